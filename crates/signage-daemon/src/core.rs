/// DaemonCore: owns the initialization pass and the running scheduler.
///
/// Everything meant for the rendering side goes out through one broadcast
/// channel of `Event`s; the stdout writer is its only consumer.
///
/// Periodic refreshes run as a spawned task. The loop keeps ticking the
/// current cycle and only swaps cycles once a refresh comes back `Ok`.
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use signage_daemon::orchestrator::{build_http_client, resolve_presentable, Presentable};
use signage_daemon::scheduler::{CycleScheduler, Presenter, StartOutcome, Tick};
use signage_daemon::{Initialization, Orchestrator};
use signage_proto::config::Config;
use signage_proto::model::{PlaylistCycle, WebviewAsset};
use signage_proto::protocol::{Event, PROTOCOL_VERSION};
use signage_proto::schedule::PlaylistStatus;
use signage_proto::state::StateManager;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Wait between failed initialization passes before anything is on screen.
pub const INIT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Presenter that turns scheduler output into events.
#[derive(Clone)]
pub struct ChannelPresenter {
    events: broadcast::Sender<Event>,
}

impl Presenter for ChannelPresenter {
    fn present(&mut self, cycle_id: &str, asset: &WebviewAsset, duration_secs: u64) {
        let _ = self.events.send(Event::AssetDue {
            cycle_id: cycle_id.to_string(),
            asset: asset.clone(),
            duration_secs,
        });
    }

    fn error(&mut self, message: &str) {
        let _ = self.events.send(Event::Error {
            message: message.to_string(),
        });
    }
}

/// Why presenting one initialization result ended.
enum Phase {
    Shutdown,
    Refreshed(Initialization),
    /// The running cycle left its window; pick again from the same result.
    Reresolve,
}

pub struct DaemonCore {
    config: Config,
    orchestrator: Arc<Orchestrator>,
    state: Arc<Mutex<StateManager>>,
    events: broadcast::Sender<Event>,
    presenter: ChannelPresenter,
    /// Next periodic refresh. `None` while one is running or when disabled.
    refresh_at: Option<Instant>,
    refresh_task: Option<JoinHandle<signage_daemon::Result<Initialization>>>,
}

impl DaemonCore {
    pub fn new(
        config: Config,
        state: Arc<Mutex<StateManager>>,
        events: broadcast::Sender<Event>,
    ) -> anyhow::Result<Self> {
        let client = build_http_client(&config.http)?;
        let progress_tx = events.clone();
        let orchestrator = Orchestrator::new(config.clone(), client).with_progress(Arc::new(
            move |progress| {
                let _ = progress_tx.send(Event::Progress { progress });
            },
        ));

        Ok(Self {
            config,
            orchestrator: Arc::new(orchestrator),
            state,
            presenter: ChannelPresenter {
                events: events.clone(),
            },
            events,
            refresh_at: None,
            refresh_task: None,
        })
    }

    pub async fn run(mut self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let _ = self.events.send(Event::Hello {
            protocol_version: PROTOCOL_VERSION,
            device_name: signage_proto::platform::device_name().await,
        });

        let Some(mut init) = self.initialize_until_ready(&shutdown).await else {
            return Ok(());
        };
        self.refresh_at = self.refresh_deadline();

        loop {
            match self.present(&init, &shutdown).await {
                Phase::Shutdown => {
                    info!("Shutting down");
                    if let Some(task) = self.refresh_task.take() {
                        task.abort();
                    }
                    return Ok(());
                }
                Phase::Refreshed(next) => init = next,
                Phase::Reresolve => {}
            }
        }
    }

    async fn initialize_until_ready(&mut self, shutdown: &CancellationToken) -> Option<Initialization> {
        loop {
            let result = tokio::select! {
                _ = shutdown.cancelled() => return None,
                result = self.orchestrator.initialize_validated() => result,
            };

            match result {
                Ok(init) => return Some(init),
                Err(e) => {
                    error!("Initialization failed: {}", e);
                    self.presenter.error(&e.to_string());
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = tokio::time::sleep(INIT_RETRY_DELAY) => {}
            }
        }
    }

    /// Present `init` until shutdown, a successful refresh, or the running
    /// cycle's window closing.
    async fn present(&mut self, init: &Initialization, shutdown: &CancellationToken) -> Phase {
        let check_interval = self.config.daemon.date_check_interval();

        loop {
            let wait = match resolve_presentable(&init.cycles, init.initial_cycle_id.as_deref(), Utc::now()) {
                Ok(Presentable::Active(cycle)) => match self.run_cycle(cycle.clone(), shutdown).await {
                    Some(phase) => return phase,
                    None => check_interval,
                },
                Ok(Presentable::Waiting { cycle, starts_in }) => {
                    let _ = self.events.send(Event::Status {
                        message: PlaylistStatus::Upcoming { starts_in }.message(&cycle.name),
                    });
                    starts_in.min(check_interval)
                }
                Err(e) => {
                    warn!("Nothing to present: {}", e);
                    self.presenter.error(&e.to_string());
                    check_interval
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => return Phase::Shutdown,
                _ = tokio::time::sleep(wait) => {}
                next = self.next_refresh() => return Phase::Refreshed(next),
            }
        }
    }

    /// Drive one cycle. `None` when it could not start after all.
    async fn run_cycle(&mut self, cycle: PlaylistCycle, shutdown: &CancellationToken) -> Option<Phase> {
        let mut scheduler = CycleScheduler::new(cycle, self.presenter.clone())
            .with_recheck_interval(self.config.daemon.date_check_interval());

        let resume = self
            .state
            .lock()
            .await
            .resume_asset(&scheduler.cycle().id)
            .map(str::to_string);
        if let Some(asset_id) = resume {
            if scheduler.skip_to_asset(&asset_id) {
                info!("Resuming cycle {} at asset {}", scheduler.cycle().id, asset_id);
            }
        }

        match scheduler.start() {
            StartOutcome::Started | StartOutcome::AlreadyActive => {}
            other => {
                debug!("Cycle {} did not start: {:?}", scheduler.cycle().id, other);
                return None;
            }
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    scheduler.stop();
                    return Some(Phase::Shutdown);
                }
                tick = scheduler.tick() => {
                    if let Tick::WindowClosed(status) = tick {
                        let _ = self.events.send(Event::Status {
                            message: status.message(&scheduler.cycle().name),
                        });
                        return Some(Phase::Reresolve);
                    }
                }
                next = self.next_refresh() => {
                    scheduler.stop();
                    return Some(Phase::Refreshed(next));
                }
            }
        }
    }

    /// Resolves with the next refresh that succeeds. Pending forever when
    /// refreshing is disabled.
    ///
    /// Cancel-safe: the deadline and the running task live on `self`, so a
    /// `select!` that drops this future loses nothing.
    async fn next_refresh(&mut self) -> Initialization {
        loop {
            if let Some(task) = self.refresh_task.as_mut() {
                let outcome = task.await;
                self.refresh_task = None;
                self.refresh_at = self.refresh_deadline();
                match outcome {
                    Ok(Ok(init)) => {
                        info!("Refresh complete: {} playlists", init.cycles.len());
                        return init;
                    }
                    Ok(Err(e)) => warn!("Refresh failed, keeping current content: {}", e),
                    Err(e) => warn!("Refresh task ended abnormally: {}", e),
                }
                continue;
            }

            sleep_until_opt(self.refresh_at).await;
            info!("Refreshing manifest");
            self.refresh_at = None;
            let orchestrator = self.orchestrator.clone();
            self.refresh_task = Some(tokio::spawn(async move {
                orchestrator.initialize_validated().await
            }));
        }
    }

    fn refresh_deadline(&self) -> Option<Instant> {
        match self.config.manifest.refresh_interval_secs {
            0 => None,
            secs => Some(Instant::now() + Duration::from_secs(secs)),
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::path::Path;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Running {
        events: broadcast::Receiver<Event>,
        shutdown: CancellationToken,
        task: JoinHandle<anyhow::Result<()>>,
    }

    impl Running {
        async fn next_matching<F>(&mut self, within: Duration, mut pred: F) -> Option<Event>
        where
            F: FnMut(&Event) -> bool,
        {
            let deadline = Instant::now() + within;
            loop {
                let event = match tokio::time::timeout_at(deadline, self.events.recv()).await {
                    Err(_) => return None,
                    Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                    Ok(Err(broadcast::error::RecvError::Closed)) => return None,
                    Ok(Ok(event)) => event,
                };
                if pred(&event) {
                    return Some(event);
                }
            }
        }

        /// Every `asset_due` within `window`: (ms since the first, asset id,
        /// whether its display path existed on arrival).
        async fn asset_due_timeline(&mut self, window: Duration) -> Vec<(u128, String, bool)> {
            let mut timeline = Vec::new();
            let mut first: Option<Instant> = None;
            let deadline = Instant::now() + window;
            while let Some(Event::AssetDue { asset, .. }) = self
                .next_matching(deadline.saturating_duration_since(Instant::now()), |e| {
                    matches!(e, Event::AssetDue { .. })
                })
                .await
            {
                let at = *first.get_or_insert_with(Instant::now);
                timeline.push((
                    at.elapsed().as_millis(),
                    asset.id.clone(),
                    Path::new(&asset.display_path).exists(),
                ));
            }
            timeline
        }

        async fn stop(self) {
            self.shutdown.cancel();
            self.task.await.unwrap().unwrap();
        }
    }

    fn asset(id: u32, duration: u64) -> Value {
        json!({
            "id": id,
            "name": format!("asset {}", id),
            "filepath": format!("/media/{}.jpg", id),
            "filetype": "image",
            "order": id,
            "duration": duration
        })
    }

    fn playlist(id: &str, is_default: bool, start: Option<String>, end: Option<String>, assets: Vec<Value>) -> Value {
        json!({
            "id": id,
            "name": id,
            "is_default": is_default,
            "start_date": start,
            "end_date": end,
            "days": null,
            "assets": assets
        })
    }

    fn manifest(playlists: Vec<Value>) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "is_restarting": false,
            "playlists": playlists
        }))
    }

    async fn media_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/media/.+"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg".to_vec()))
            .mount(&server)
            .await;
        server
    }

    fn config(server: &MockServer, dir: &Path) -> Config {
        let mut config = Config::default();
        config.manifest.url = format!("{}/api/playlists", server.uri());
        config.assets.dir = dir.join("assets");
        config.assets.max_retries = 1;
        config.assets.retry_backoff_ms = 1;
        config.assets.download_pause_ms = 0;
        config.assets.write_summary = false;
        config.http.request_timeout_secs = 30;
        config.daemon.state_file = dir.join("state.json");
        config.daemon.date_check_interval_secs = 1;
        config
    }

    fn start(config: Config) -> Running {
        let (tx, events) = broadcast::channel(256);
        let state = StateManager::new(config.daemon.state_file.clone());
        let core = DaemonCore::new(config, Arc::new(Mutex::new(state)), tx).unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(core.run(shutdown.clone()));
        Running {
            events,
            shutdown,
            task,
        }
    }

    async fn manifest_requests(server: &MockServer) -> usize {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == "/api/playlists")
            .count()
    }

    #[tokio::test]
    async fn test_cycle_keeps_time_while_a_refresh_fails() {
        let server = media_server().await;
        Mock::given(method("GET"))
            .and(path("/api/playlists"))
            .respond_with(manifest(vec![playlist("lobby", true, None, None, vec![asset(1, 1), asset(2, 1)])]))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/playlists"))
            .respond_with(ResponseTemplate::new(500).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&server, dir.path());
        config.manifest.refresh_interval_secs = 2;
        config.assets.clear_on_start = true;

        let mut running = start(config);
        let timeline = running.asset_due_timeline(Duration::from_millis(7000)).await;
        assert!(manifest_requests(&server).await >= 2, "no refresh was attempted");
        running.stop().await;

        assert!(timeline.len() >= 6, "timeline: {:?}", timeline);
        let max_gap = timeline.windows(2).map(|w| w[1].0 - w[0].0).max().unwrap();
        assert!(max_gap < 1500, "timeline: {:?}", timeline);
        assert!(timeline.iter().all(|(_, _, exists)| *exists), "timeline: {:?}", timeline);
        let ids: Vec<_> = timeline.iter().take(4).map(|(_, id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "1", "2"]);
    }

    #[tokio::test]
    async fn test_successful_refresh_swaps_content() {
        let server = media_server().await;
        Mock::given(method("GET"))
            .and(path("/api/playlists"))
            .respond_with(manifest(vec![playlist("lobby", true, None, None, vec![asset(1, 1)])]))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/playlists"))
            .respond_with(manifest(vec![playlist("lobby", true, None, None, vec![asset(9, 1)])]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&server, dir.path());
        config.manifest.refresh_interval_secs = 1;

        let mut running = start(config);
        let first = running
            .next_matching(Duration::from_secs(5), |e| matches!(e, Event::AssetDue { .. }))
            .await;
        assert!(matches!(first, Some(Event::AssetDue { asset, .. }) if asset.id == "1"));

        let swapped = running
            .next_matching(Duration::from_secs(5), |e| {
                matches!(e, Event::AssetDue { asset, .. } if asset.id == "9")
            })
            .await;
        assert!(swapped.is_some());
        running.stop().await;
    }

    #[tokio::test]
    async fn test_resumes_at_saved_asset() {
        let server = media_server().await;
        Mock::given(method("GET"))
            .and(path("/api/playlists"))
            .respond_with(manifest(vec![playlist(
                "lobby",
                true,
                None,
                None,
                vec![asset(1, 5), asset(2, 5), asset(3, 5)],
            )]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = config(&server, dir.path());
        StateManager::new(config.daemon.state_file.clone())
            .set_presented("lobby", "2")
            .await
            .unwrap();

        let mut running = start(config);
        let first = running
            .next_matching(Duration::from_secs(5), |e| matches!(e, Event::AssetDue { .. }))
            .await;
        match first {
            Some(Event::AssetDue { cycle_id, asset, duration_secs }) => {
                assert_eq!(cycle_id, "lobby");
                assert_eq!(asset.id, "2");
                assert_eq!(duration_secs, 5);
            }
            other => panic!("unexpected {:?}", other),
        }
        running.stop().await;
    }

    #[tokio::test]
    async fn test_upcoming_playlist_shows_countdown() {
        let server = media_server().await;
        let starts = (Utc::now() + chrono::Duration::hours(2)).to_rfc3339();
        Mock::given(method("GET"))
            .and(path("/api/playlists"))
            .respond_with(manifest(vec![playlist("Evening", true, Some(starts), None, vec![asset(1, 5)])]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut running = start(config(&server, dir.path()));
        let status = running
            .next_matching(Duration::from_secs(5), |e| {
                matches!(e, Event::Status { .. } | Event::AssetDue { .. })
            })
            .await;
        match status {
            Some(Event::Status { message }) => {
                assert!(message.starts_with("Playlist \"Evening\" starts in 1h 59m"), "{}", message)
            }
            other => panic!("unexpected {:?}", other),
        }
        running.stop().await;
    }

    #[tokio::test]
    async fn test_closed_window_falls_back_to_next_active_cycle() {
        let server = media_server().await;
        let ends = (Utc::now() + chrono::Duration::seconds(2)).to_rfc3339();
        Mock::given(method("GET"))
            .and(path("/api/playlists"))
            .respond_with(manifest(vec![
                playlist("ending", true, None, Some(ends), vec![asset(1, 30)]),
                playlist("fallback", false, None, None, vec![asset(2, 30)]),
            ]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut running = start(config(&server, dir.path()));

        let first = running
            .next_matching(Duration::from_secs(5), |e| matches!(e, Event::AssetDue { .. }))
            .await;
        assert!(matches!(first, Some(Event::AssetDue { cycle_id, .. }) if cycle_id == "ending"));

        let ended = running
            .next_matching(Duration::from_secs(5), |e| matches!(e, Event::Status { .. }))
            .await;
        assert!(matches!(ended, Some(Event::Status { message }) if message.ends_with("has ended")));

        let next = running
            .next_matching(Duration::from_secs(3), |e| matches!(e, Event::AssetDue { .. }))
            .await;
        assert!(matches!(next, Some(Event::AssetDue { cycle_id, .. }) if cycle_id == "fallback"));
        running.stop().await;
    }

    #[tokio::test]
    async fn test_refresh_schedule_survives_cycle_switch() {
        let server = media_server().await;
        let ends = (Utc::now() + chrono::Duration::seconds(1)).to_rfc3339();
        Mock::given(method("GET"))
            .and(path("/api/playlists"))
            .respond_with(manifest(vec![
                playlist("ending", true, None, Some(ends), vec![asset(1, 30)]),
                playlist("fallback", false, None, None, vec![asset(2, 30)]),
            ]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&server, dir.path());
        config.manifest.refresh_interval_secs = 3;
        let started = Instant::now();
        let mut running = start(config);

        let switched = running
            .next_matching(Duration::from_secs(4), |e| {
                matches!(e, Event::AssetDue { cycle_id, .. } if cycle_id == "fallback")
            })
            .await;
        assert!(switched.is_some());

        // Switching cycles must not push the refresh back a full interval.
        tokio::time::sleep_until(started + Duration::from_millis(3600)).await;
        assert!(manifest_requests(&server).await >= 2);
        running.stop().await;
    }
}
