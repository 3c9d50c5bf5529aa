//! Playlist compiler: joins fetch results back onto playlist membership.
//!
//! Pure derivation, no I/O. Same inputs always give the same cycles.

use signage_proto::model::{FetchResult, Manifest, PlaylistCycle, WebviewAsset};
use std::collections::HashMap;
use tracing::{debug, warn};

/// One cycle per playlist that kept at least one asset, in manifest order.
pub fn compile_cycles(manifest: &Manifest, results: &[FetchResult]) -> Vec<PlaylistCycle> {
    let resolved = resolved_assets(results);

    manifest
        .playlists
        .iter()
        .filter_map(|playlist| {
            let mut assets: Vec<WebviewAsset> = playlist
                .assets
                .iter()
                .filter_map(|a| {
                    resolved
                        .get(a.id.as_str())
                        .and_then(|result| WebviewAsset::resolve(a, result))
                })
                .collect();

            if assets.is_empty() {
                warn!(
                    "Playlist {} ({}) has no playable assets, dropping it",
                    playlist.id, playlist.name
                );
                return None;
            }

            // Stable: equal keys keep manifest order.
            assets.sort_by_key(|a| a.order);
            let total_duration_secs = assets.iter().map(|a| a.duration_secs).sum();
            debug!(
                "Compiled playlist {}: {} assets, {}s per cycle",
                playlist.id,
                assets.len(),
                total_duration_secs
            );

            Some(PlaylistCycle {
                id: playlist.id.clone(),
                name: playlist.name.clone(),
                assets,
                total_duration_secs,
                is_default: playlist.is_default,
                start: playlist.start,
                end: playlist.end,
            })
        })
        .collect()
}

/// Every successful asset across all playlists as one sequence, sorted by
/// ordering key.
pub fn flatten_assets(results: &[FetchResult]) -> Vec<WebviewAsset> {
    let mut assets: Vec<WebviewAsset> = results.iter().filter_map(WebviewAsset::from_fetch).collect();
    assets.sort_by_key(|a| a.order);
    assets
}

/// First playlist flagged default, otherwise the first playlist.
pub fn select_initial_cycle(cycles: &[PlaylistCycle]) -> Option<&PlaylistCycle> {
    cycles.iter().find(|c| c.is_default).or_else(|| cycles.first())
}

/// Successful results by asset id. The first result for an id wins.
fn resolved_assets(results: &[FetchResult]) -> HashMap<&str, &FetchResult> {
    let mut resolved = HashMap::new();
    for result in results.iter().filter(|r| r.is_success()) {
        resolved.entry(result.asset.id.as_str()).or_insert(result);
    }
    resolved
}
