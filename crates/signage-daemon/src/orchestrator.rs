//! Orchestrator: one full initialization pass.
//!
//! clear storage → device name → manifest → assets + compile → pick the
//! initial cycle. Progress is reported through an optional sink; it is
//! advisory only.

use chrono::{DateTime, Utc};
use serde::Serialize;
use signage_proto::config::{Config, HttpConfig};
use signage_proto::model::{FetchResult, Manifest, PlaylistCycle, WebviewAsset};
use signage_proto::protocol::{Progress, ProgressStage};
use signage_proto::schedule::{playlist_status, PlaylistStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::compiler::{compile_cycles, flatten_assets, select_initial_cycle};
use crate::error::{CoreError, Result};
use crate::fetcher::{AssetFetcher, FetchOptions};
use crate::manifest::ManifestClient;
use crate::summary::write_summary;

pub type ProgressSink = Arc<dyn Fn(Progress) + Send + Sync>;

pub fn build_http_client(http: &HttpConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(http.user_agent.clone())
        .connect_timeout(http.connect_timeout())
        .timeout(http.request_timeout())
        .build()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InitStats {
    pub total_assets: usize,
    pub successful: usize,
    pub failed: usize,
    pub streams: usize,
    pub playlists: usize,
    pub elapsed_ms: u64,
}

impl InitStats {
    fn from_results(results: &[FetchResult], playlists: usize, elapsed: Duration) -> Self {
        let successful = results.iter().filter(|r| r.is_success()).count();
        Self {
            total_assets: results.len(),
            successful,
            failed: results.len() - successful,
            streams: results.iter().filter(|r| r.is_stream()).count(),
            playlists,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

/// Everything one successful pass produced.
#[derive(Debug, Clone)]
pub struct Initialization {
    pub device_name: Option<String>,
    pub manifest: Manifest,
    pub results: Vec<FetchResult>,
    pub cycles: Vec<PlaylistCycle>,
    pub initial_cycle_id: Option<String>,
    pub stats: InitStats,
}

impl Initialization {
    pub fn initial_cycle(&self) -> Option<&PlaylistCycle> {
        let id = self.initial_cycle_id.as_deref()?;
        self.cycles.iter().find(|c| c.id == id)
    }

    /// All successful assets as one sequence, sorted by ordering key.
    pub fn flat_assets(&self) -> Vec<WebviewAsset> {
        flatten_assets(&self.results)
    }

    /// Reject passes that technically succeeded but left nothing to show.
    pub fn validate(&self) -> Result<()> {
        if self.cycles.is_empty() {
            return Err(CoreError::NoPlaylists);
        }
        match self.initial_cycle() {
            Some(cycle) if !cycle.is_empty() => Ok(()),
            Some(cycle) => Err(CoreError::EmptyCycle {
                playlist_id: cycle.id.clone(),
            }),
            None => Err(CoreError::NoPlaylists),
        }
    }
}

/// Outcome of a pass in the shape the presentation layer consumes.
#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub success: bool,
    pub error: Option<String>,
    pub device_name: Option<String>,
    pub is_restarting: bool,
    pub cycles: Vec<PlaylistCycle>,
    pub initial_cycle_id: Option<String>,
    pub stats: Option<InitStats>,
}

impl InitReport {
    pub fn from_result(result: &Result<Initialization>) -> Self {
        match result {
            Ok(init) => Self {
                success: true,
                error: None,
                device_name: init.device_name.clone(),
                is_restarting: init.manifest.is_restarting,
                cycles: init.cycles.clone(),
                initial_cycle_id: init.initial_cycle_id.clone(),
                stats: Some(init.stats.clone()),
            },
            Err(e) => Self {
                success: false,
                error: Some(e.to_string()),
                device_name: None,
                is_restarting: false,
                cycles: Vec::new(),
                initial_cycle_id: None,
                stats: None,
            },
        }
    }
}

pub struct Orchestrator {
    config: Config,
    client: reqwest::Client,
    progress: Option<ProgressSink>,
    /// Set once the assets directory has been wiped. Later passes (refreshes)
    /// must not delete files a running cycle still points at.
    cleared: AtomicBool,
}

impl Orchestrator {
    pub fn new(config: Config, client: reqwest::Client) -> Self {
        Self {
            config,
            client,
            progress: None,
            cleared: AtomicBool::new(false),
        }
    }

    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run a pass and validate it. Any failure comes back as `Err`.
    pub async fn initialize_validated(&self) -> Result<Initialization> {
        let init = self.initialize().await?;
        init.validate()?;
        Ok(init)
    }

    /// Run a validated pass and fold the outcome into a report.
    pub async fn run(&self) -> InitReport {
        let result = self.initialize_validated().await;
        if let Err(e) = &result {
            warn!("Initialization failed: {}", e);
        }
        InitReport::from_result(&result)
    }

    pub async fn initialize(&self) -> Result<Initialization> {
        let started = std::time::Instant::now();
        let assets_dir = &self.config.assets.dir;

        if self.config.assets.clear_on_start && !self.cleared.swap(true, Ordering::SeqCst) {
            self.report(Progress::stage(ProgressStage::Clearing, 5));
            clear_directory(assets_dir).await?;
        }

        self.report(Progress::stage(ProgressStage::DeviceInfo, 10));
        let device_name = signage_proto::platform::device_name().await;
        debug!("Device name: {:?}", device_name);

        self.report(Progress::stage(ProgressStage::ApiFetch, 20));
        let client = ManifestClient::new(self.client.clone(), self.config.manifest.url.clone());
        let manifest = client.fetch().await?;
        if manifest.is_restarting {
            info!("Manifest is flagged as restarting");
        }

        let assets = manifest.unique_assets();
        let total = assets.len();
        self.report(Progress::counted(ProgressStage::Downloading, 30, 0, total));

        let fetcher = AssetFetcher::new(
            self.client.clone(),
            assets_dir.clone(),
            FetchOptions::from(&self.config.assets),
        )
        .with_base_url(&self.config.manifest.url);
        let results = fetcher
            .fetch_all(&assets, |done, total| {
                let value = 30 + (done * 60 / total.max(1)) as u8;
                self.report(Progress::counted(ProgressStage::Downloading, value, done, total));
            })
            .await?;

        let cycles = compile_cycles(&manifest, &results);
        let initial_cycle_id = select_initial_cycle(&cycles).map(|c| c.id.clone());

        if self.config.assets.write_summary {
            if let Err(e) = write_summary(assets_dir, &cycles, device_name.as_deref()).await {
                warn!("Could not write summary: {}", e);
            }
        }

        let stats = InitStats::from_results(&results, cycles.len(), started.elapsed());
        info!(
            "Initialization complete: {} playlists, {}/{} assets ok ({} streams) in {}ms",
            stats.playlists, stats.successful, stats.total_assets, stats.streams, stats.elapsed_ms
        );
        self.report(Progress::stage(ProgressStage::Complete, 100));

        Ok(Initialization {
            device_name,
            manifest,
            results,
            cycles,
            initial_cycle_id,
            stats,
        })
    }

    fn report(&self, progress: Progress) {
        if let Some(sink) = &self.progress {
            sink(progress);
        }
    }
}

async fn clear_directory(dir: &std::path::Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => info!("Cleared {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}

/// Which cycle the screen should show now.
#[derive(Debug, Clone, PartialEq)]
pub enum Presentable<'a> {
    Active(&'a PlaylistCycle),
    /// Nothing is active; this one starts soonest.
    Waiting {
        cycle: &'a PlaylistCycle,
        starts_in: Duration,
    },
}

/// Prefer `preferred` when it is active, then defaults, then any active
/// cycle, then the earliest upcoming one.
pub fn resolve_presentable<'a>(
    cycles: &'a [PlaylistCycle],
    preferred: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Presentable<'a>> {
    if cycles.is_empty() {
        return Err(CoreError::NoPlaylists);
    }

    let active = |c: &&PlaylistCycle| !c.is_empty() && c.is_active_at(now);
    let found = preferred
        .and_then(|id| cycles.iter().filter(active).find(|c| c.id == id))
        .or_else(|| cycles.iter().filter(active).find(|c| c.is_default))
        .or_else(|| cycles.iter().find(active));
    if let Some(cycle) = found {
        return Ok(Presentable::Active(cycle));
    }

    cycles
        .iter()
        .filter(|c| !c.is_empty())
        .filter_map(|c| match playlist_status(c.start, c.end, now) {
            PlaylistStatus::Upcoming { starts_in } => Some((c, starts_in)),
            _ => None,
        })
        .min_by_key(|(_, starts_in)| *starts_in)
        .map(|(cycle, starts_in)| Presentable::Waiting { cycle, starts_in })
        .ok_or(CoreError::NoActivePlaylist)
}
