use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub manifest: ManifestConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// Where the playlist manifest lives and how often it is re-read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestConfig {
    #[serde(default = "default_manifest_url")]
    pub url: String,
    /// Re-run the whole initialization pass this often. 0 disables it.
    #[serde(default)]
    pub refresh_interval_secs: u64,
}

/// Local asset storage and download behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetsConfig {
    #[serde(default = "default_assets_dir")]
    pub dir: PathBuf,
    /// Wipe the assets directory before the first initialization pass.
    #[serde(default)]
    pub clear_on_start: bool,
    /// Total download attempts per asset.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base of the exponential backoff; the wait after attempt `n` is
    /// `base * 2^n`.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Pause between two sequential non-stream downloads.
    #[serde(default = "default_download_pause_ms")]
    pub download_pause_ms: u64,
    /// 1 downloads sequentially; N > 1 downloads in batches of N.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Write `webview-manifest.json` after each pass.
    #[serde(default = "default_write_summary")]
    pub write_summary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// How often a running cycle re-checks its active window.
    #[serde(default = "default_date_check_interval_secs")]
    pub date_check_interval_secs: u64,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            url: default_manifest_url(),
            refresh_interval_secs: 0,
        }
    }
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            dir: default_assets_dir(),
            clear_on_start: false,
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            download_pause_ms: default_download_pause_ms(),
            concurrency: default_concurrency(),
            write_summary: default_write_summary(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            date_check_interval_secs: default_date_check_interval_secs(),
        }
    }
}

impl AssetsConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn download_pause(&self) -> Duration {
        Duration::from_millis(self.download_pause_ms)
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl DaemonConfig {
    pub fn date_check_interval(&self) -> Duration {
        Duration::from_secs(self.date_check_interval_secs.max(1))
    }
}

fn default_manifest_url() -> String {
    "http://127.0.0.1:8000/api/playlists".to_string()
}

fn default_assets_dir() -> PathBuf {
    platform::data_dir().join("assets")
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_download_pause_ms() -> u64 {
    500
}

fn default_concurrency() -> usize {
    1
}

fn default_write_summary() -> bool {
    true
}

fn default_user_agent() -> String {
    format!("signage-daemon/{}", env!("CARGO_PKG_VERSION"))
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_state_file() -> PathBuf {
    platform::data_dir().join("state.json")
}

fn default_date_check_interval_secs() -> u64 {
    60
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
