//! Full pass: manifest → downloads → compiled cycle → timed presentation.

use serde_json::json;
use signage_daemon::scheduler::{CycleScheduler, Presenter, StartOutcome, Tick};
use signage_daemon::summary::SUMMARY_FILE_NAME;
use signage_daemon::Orchestrator;
use signage_proto::config::Config;
use signage_proto::model::WebviewAsset;
use signage_proto::protocol::{Progress, ProgressStage};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Clone, Default)]
struct Recorder {
    shown: Arc<Mutex<Vec<(String, u64, Instant)>>>,
}

impl Presenter for Recorder {
    fn present(&mut self, _cycle_id: &str, asset: &WebviewAsset, duration_secs: u64) {
        self.shown
            .lock()
            .unwrap()
            .push((asset.id.clone(), duration_secs, Instant::now()));
    }

    fn error(&mut self, message: &str) {
        panic!("unexpected presenter error: {}", message);
    }
}

async fn mock_cms() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/playlists"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "is_restarting": false,
            "playlists": [{
                "id": "lobby",
                "name": "Lobby",
                "is_default": true,
                "start_date": null,
                "end_date": null,
                "days": ["mon", "tue", "wed", "thu", "fri"],
                "assets": [
                    {
                        "id": 2,
                        "name": "Intro clip",
                        "filepath": "/media/intro.mp4",
                        "filetype": "video",
                        "order": 2,
                        "duration": 10
                    },
                    {
                        "id": 1,
                        "name": "Welcome",
                        "filepath": format!("{}/media/welcome.jpg", server.uri()),
                        "filetype": "image",
                        "order": 1,
                        "duration": 5
                    },
                    {
                        "id": 3,
                        "name": "Gone",
                        "filepath": "/media/missing.png",
                        "filetype": "image",
                        "order": 3,
                        "duration": 30
                    }
                ]
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/media/welcome.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/media/intro.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp4".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/media/missing.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_initialize_then_cycle_in_order() {
    let server = mock_cms().await;
    let dir = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.manifest.url = format!("{}/api/playlists", server.uri());
    config.assets.dir = dir.path().to_path_buf();
    config.assets.clear_on_start = true;
    config.assets.max_retries = 2;
    config.assets.retry_backoff_ms = 1;
    config.assets.download_pause_ms = 0;

    let stages = Arc::new(Mutex::new(Vec::<Progress>::new()));
    let sink = stages.clone();
    let orchestrator = Orchestrator::new(config, reqwest::Client::new())
        .with_progress(Arc::new(move |p| sink.lock().unwrap().push(p)));

    let init = orchestrator.initialize_validated().await.unwrap();

    assert_eq!(init.stats.total_assets, 3);
    assert_eq!(init.stats.successful, 2);
    assert_eq!(init.stats.failed, 1);
    assert_eq!(init.initial_cycle_id.as_deref(), Some("lobby"));
    let cycle = init.initial_cycle().unwrap().clone();
    let ids: Vec<_> = cycle.assets.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2"]);
    assert_eq!(cycle.total_duration_secs, 15);
    assert!(dir.path().join("2_intro.mp4").exists());
    assert!(dir.path().join(SUMMARY_FILE_NAME).exists());
    assert_eq!(init.flat_assets().len(), 2);

    {
        let stages = stages.lock().unwrap();
        assert_eq!(stages.first().map(|p| p.stage), Some(ProgressStage::Clearing));
        assert_eq!(stages.last().map(|p| (p.stage, p.value)), Some((ProgressStage::Complete, 100)));
        assert!(stages.windows(2).all(|w| w[0].value <= w[1].value));
    }

    // Downloads are done; from here on time only moves when the runtime idles.
    tokio::time::pause();
    let recorder = Recorder::default();
    let mut scheduler = CycleScheduler::new(cycle, recorder.clone());
    assert_eq!(scheduler.start(), StartOutcome::Started);
    assert_eq!(scheduler.tick().await, Tick::Advanced(1));
    assert_eq!(scheduler.tick().await, Tick::Advanced(0));
    scheduler.stop();
    assert!(!scheduler.has_pending_timers());

    let shown = recorder.shown.lock().unwrap().clone();
    let order: Vec<_> = shown.iter().map(|(id, secs, _)| (id.as_str(), *secs)).collect();
    assert_eq!(order, vec![("1", 5), ("2", 10), ("1", 5)]);
    assert_eq!(shown[1].2 - shown[0].2, Duration::from_secs(5));
    assert_eq!(shown[2].2 - shown[1].2, Duration::from_secs(10));
}
