//! `webview-manifest.json`: a snapshot of what one initialization pass
//! resolved, written next to the downloaded assets.

use chrono::{DateTime, Utc};
use serde::Serialize;
use signage_proto::model::{PlaylistCycle, WebviewAsset};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;

pub const SUMMARY_FILE_NAME: &str = "webview-manifest.json";

#[derive(Debug, Serialize)]
pub struct WebviewManifest<'a> {
    pub generated_at: DateTime<Utc>,
    pub device_name: Option<&'a str>,
    pub total_cycles: usize,
    pub total_assets: usize,
    pub min_cycle_duration_secs: Option<u64>,
    pub max_cycle_duration_secs: Option<u64>,
    pub cycles: Vec<CycleSummary<'a>>,
}

#[derive(Debug, Serialize)]
pub struct CycleSummary<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub is_default: bool,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub asset_count: usize,
    pub total_duration_secs: u64,
    pub assets: &'a [WebviewAsset],
}

pub fn build_summary<'a>(
    cycles: &'a [PlaylistCycle],
    device_name: Option<&'a str>,
    generated_at: DateTime<Utc>,
) -> WebviewManifest<'a> {
    let durations = cycles.iter().map(|c| c.total_duration_secs);

    WebviewManifest {
        generated_at,
        device_name,
        total_cycles: cycles.len(),
        total_assets: cycles.iter().map(|c| c.len()).sum(),
        min_cycle_duration_secs: durations.clone().min(),
        max_cycle_duration_secs: durations.max(),
        cycles: cycles
            .iter()
            .map(|c| CycleSummary {
                id: &c.id,
                name: &c.name,
                is_default: c.is_default,
                start: c.start,
                end: c.end,
                asset_count: c.len(),
                total_duration_secs: c.total_duration_secs,
                assets: &c.assets,
            })
            .collect(),
    }
}

pub async fn write_summary(
    dir: &Path,
    cycles: &[PlaylistCycle],
    device_name: Option<&str>,
) -> Result<PathBuf> {
    let summary = build_summary(cycles, device_name, Utc::now());
    let json = serde_json::to_string_pretty(&summary)?;

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(SUMMARY_FILE_NAME);
    tokio::fs::write(&path, json).await?;
    info!("Wrote {} ({} cycles)", path.display(), summary.total_cycles);
    Ok(path)
}
