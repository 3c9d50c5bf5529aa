//! Asset fetcher: downloads every non-stream asset into the assets directory
//! with bounded retry and exponential backoff, and checks streams without
//! downloading them.
//!
//! Failures never escape this module as errors. Each asset yields exactly one
//! `FetchResult`, so one broken asset cannot abort the batch.

use futures_util::future::join_all;
use reqwest::Url;
use signage_proto::config::AssetsConfig;
use signage_proto::model::{Asset, FetchResult};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Total attempts per asset.
    pub max_retries: u32,
    pub backoff_base: Duration,
    /// Pause after each sequential non-stream download.
    pub download_pause: Duration,
    /// 1 = sequential, N > 1 = batches of N concurrent fetches.
    pub concurrency: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            download_pause: Duration::from_millis(500),
            concurrency: 1,
        }
    }
}

impl From<&AssetsConfig> for FetchOptions {
    fn from(config: &AssetsConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: config.retry_backoff(),
            download_pause: config.download_pause(),
            concurrency: config.concurrency,
        }
    }
}

/// Wait before the attempt following `attempt` (1-based): `base * 2^attempt`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

pub struct AssetFetcher {
    client: reqwest::Client,
    assets_dir: PathBuf,
    /// Relative source locations are resolved against this URL.
    base_url: Option<Url>,
    options: FetchOptions,
}

impl AssetFetcher {
    pub fn new(client: reqwest::Client, assets_dir: PathBuf, options: FetchOptions) -> Self {
        Self {
            client,
            assets_dir,
            base_url: None,
            options,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = Url::parse(base_url).ok();
        self
    }

    pub fn assets_dir(&self) -> &Path {
        &self.assets_dir
    }

    /// Fetch every asset, returning results in input order.
    ///
    /// `on_progress(done, total)` is called after each asset (sequential mode)
    /// or after each batch (concurrent mode).
    pub async fn fetch_all<F>(&self, assets: &[Asset], mut on_progress: F) -> Result<Vec<FetchResult>>
    where
        F: FnMut(usize, usize),
    {
        tokio::fs::create_dir_all(&self.assets_dir).await?;

        let total = assets.len();
        let mut results = Vec::with_capacity(total);
        info!(
            "Fetching {} assets into {} (concurrency={})",
            total,
            self.assets_dir.display(),
            self.options.concurrency.max(1)
        );

        if self.options.concurrency <= 1 {
            for (idx, asset) in assets.iter().enumerate() {
                results.push(self.fetch_one(asset).await);
                on_progress(idx + 1, total);

                let more = idx + 1 < total;
                if more && !asset.is_stream() && !self.options.download_pause.is_zero() {
                    tokio::time::sleep(self.options.download_pause).await;
                }
            }
        } else {
            for batch in assets.chunks(self.options.concurrency) {
                let fetched = join_all(batch.iter().map(|asset| self.fetch_one(asset))).await;
                results.extend(fetched);
                on_progress(results.len(), total);
            }
        }

        let failed = results.iter().filter(|r| !r.is_success()).count();
        info!("Fetched {} assets, {} failed", total, failed);
        Ok(results)
    }

    /// Resolve one asset into a `FetchResult`. Never fails.
    pub async fn fetch_one(&self, asset: &Asset) -> FetchResult {
        if asset.is_stream() {
            self.check_stream(asset).await;
            return FetchResult::streamed(asset.clone());
        }

        let path = self.assets_dir.join(local_file_name(asset));
        let attempts = self.options.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.download(asset, &path).await {
                Ok(bytes) => {
                    debug!("Asset {} saved to {} ({} bytes)", asset.id, path.display(), bytes);
                    return FetchResult::downloaded(asset.clone(), path);
                }
                Err(e) => {
                    warn!(
                        "Asset {} attempt {}/{} failed: {}",
                        asset.id, attempt, attempts, e
                    );
                    last_error = e;
                    if attempt < attempts {
                        let delay = backoff_delay(self.options.backoff_base, attempt);
                        info!("Retrying asset {} in {:?}", asset.id, delay);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        let err = CoreError::AssetFetch {
            asset_id: asset.id.clone(),
            message: last_error.clone(),
        };
        warn!("{}", err);
        FetchResult::failed(asset.clone(), last_error)
    }

    /// HEAD the stream. Live endpoints often refuse HEAD while still serving
    /// playback, so the outcome is only logged.
    async fn check_stream(&self, asset: &Asset) {
        let url = match self.resolve(&asset.source) {
            Ok(url) => url,
            Err(e) => {
                warn!("Stream {} not checked: {}", asset.id, e);
                return;
            }
        };

        match self.client.head(url).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!("Stream {} reachable ({})", asset.id, resp.status());
            }
            Ok(resp) => warn!(
                "Stream {} check returned {}, keeping it anyway",
                asset.id,
                resp.status()
            ),
            Err(e) => warn!("Stream {} check failed: {}, keeping it anyway", asset.id, e),
        }
    }

    /// One download attempt. Returns the number of bytes written.
    async fn download(&self, asset: &Asset, path: &Path) -> std::result::Result<usize, String> {
        let url = self.resolve(&asset.source)?;

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| format!("Could not reach {}: {}", url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!(
                "HTTP {} {} from {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown"),
                url
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| format!("Failed to read body from {}: {}", url, e))?;

        write_atomic(path, &bytes)
            .await
            .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
        Ok(bytes.len())
    }

    fn resolve(&self, source: &str) -> std::result::Result<Url, String> {
        match Url::parse(source) {
            Ok(url) => Ok(url),
            Err(_) => match &self.base_url {
                Some(base) => base
                    .join(source)
                    .map_err(|e| format!("Invalid source {:?}: {}", source, e)),
                None => Err(format!("Source {:?} is not a URL", source)),
            },
        }
    }
}

/// Write to a sibling `.part` file first so a crash never leaves a truncated
/// asset under its final name.
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".part");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

/// `<id>_<sanitized name>` with an extension guaranteed.
///
/// The source's last path segment wins over the declared name when it looks
/// like a file name.
pub fn local_file_name(asset: &Asset) -> String {
    let segment = match Url::parse(&asset.source) {
        Ok(url) => url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .map(str::to_string),
        Err(_) => asset
            .source
            .split(['?', '#'])
            .next()
            .and_then(|p| p.rsplit('/').next())
            .map(str::to_string),
    };
    let name = segment
        .filter(|s| s.contains('.'))
        .unwrap_or_else(|| asset.name.clone());

    let mut file_name = sanitize(&name);
    if !file_name.contains('.') {
        file_name.push_str(asset.file_type.default_extension());
    }
    format!("{}_{}", sanitize(&asset.id), file_name)
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '-')
        .collect()
}
