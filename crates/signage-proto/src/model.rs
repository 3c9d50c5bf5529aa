use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Extension that marks a live HLS playlist in a source location.
pub const STREAM_EXTENSION: &str = ".m3u8";

/// Declared media kind of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Image,
    Video,
    Audio,
    Stream,
    Text,
    #[default]
    Other,
}

impl FileType {
    /// Map a wire tag onto a file type. Unknown tags become `Other`.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "image" => Self::Image,
            "video" => Self::Video,
            "audio" => Self::Audio,
            "stream" => Self::Stream,
            "text" => Self::Text,
            _ => Self::Other,
        }
    }

    /// Extension appended to a downloaded file whose name carries none.
    pub fn default_extension(self) -> &'static str {
        match self {
            Self::Stream => ".m3u8",
            Self::Video => ".mp4",
            Self::Audio => ".mp3",
            Self::Image => ".jpg",
            Self::Text => ".txt",
            Self::Other => ".bin",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Stream => "stream",
            Self::Text => "text",
            Self::Other => "other",
        }
    }
}

/// One piece of content as described by the remote manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub name: String,
    pub file_type: FileType,
    /// URL or path the bytes are fetched from.
    pub source: String,
    /// Ordering key inside a playlist. Not necessarily contiguous.
    pub order: i64,
    pub duration_secs: u64,
}

impl Asset {
    /// A stream is played by reference and never downloaded. Either the
    /// declared type or the HLS extension in the source is enough.
    pub fn is_stream(&self) -> bool {
        self.file_type == FileType::Stream
            || self.source.to_ascii_lowercase().contains(STREAM_EXTENSION)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub is_default: bool,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Weekday filter as sent on the wire. Carried along, never evaluated.
    #[serde(default)]
    pub weekdays: Option<serde_json::Value>,
    pub assets: Vec<Asset>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub is_restarting: bool,
    pub playlists: Vec<Playlist>,
}

impl Manifest {
    /// Every asset referenced by any playlist, once per id, in first-seen order.
    pub fn unique_assets(&self) -> Vec<Asset> {
        let mut seen = std::collections::HashSet::new();
        self.playlists
            .iter()
            .flat_map(|p| p.assets.iter())
            .filter(|a| seen.insert(a.id.clone()))
            .cloned()
            .collect()
    }
}

/// What happened when one asset was fetched (or, for streams, checked).
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Downloaded { path: PathBuf },
    Streamed { url: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub asset: Asset,
    pub outcome: FetchOutcome,
}

impl FetchResult {
    pub fn downloaded(asset: Asset, path: PathBuf) -> Self {
        Self {
            asset,
            outcome: FetchOutcome::Downloaded { path },
        }
    }

    pub fn streamed(asset: Asset) -> Self {
        let url = asset.source.clone();
        Self {
            asset,
            outcome: FetchOutcome::Streamed { url },
        }
    }

    pub fn failed(asset: Asset, error: impl Into<String>) -> Self {
        Self {
            asset,
            outcome: FetchOutcome::Failed {
                error: error.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, FetchOutcome::Failed { .. })
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.outcome, FetchOutcome::Streamed { .. })
    }

    /// Local file for downloads, original URL for streams.
    pub fn local_path(&self) -> Option<String> {
        match &self.outcome {
            FetchOutcome::Downloaded { path } => Some(path.display().to_string()),
            FetchOutcome::Streamed { url } => Some(url.clone()),
            FetchOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            FetchOutcome::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// A successfully resolved asset, ready to hand to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebviewAsset {
    pub id: String,
    pub name: String,
    pub file_type: FileType,
    pub order: i64,
    pub duration_secs: u64,
    pub display_path: String,
    pub is_stream: bool,
    pub source: String,
}

impl WebviewAsset {
    /// `None` for failed fetches.
    pub fn from_fetch(result: &FetchResult) -> Option<Self> {
        Self::resolve(&result.asset, result)
    }

    /// Combine a playlist's own descriptor of an asset with the fetch result
    /// recorded for that asset id.
    pub fn resolve(asset: &Asset, result: &FetchResult) -> Option<Self> {
        let display_path = result.local_path()?;
        Some(Self {
            id: asset.id.clone(),
            name: asset.name.clone(),
            file_type: asset.file_type,
            order: asset.order,
            duration_secs: asset.duration_secs,
            display_path,
            is_stream: result.is_stream(),
            source: asset.source.clone(),
        })
    }
}

/// A compiled playlist: its resolved assets in presentation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistCycle {
    pub id: String,
    pub name: String,
    pub assets: Vec<WebviewAsset>,
    pub total_duration_secs: u64,
    pub is_default: bool,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl PlaylistCycle {
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn position_of(&self, asset_id: &str) -> Option<usize> {
        self.assets.iter().position(|a| a.id == asset_id)
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        crate::schedule::is_playlist_active(self.start, self.end, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(id: &str, file_type: FileType, source: &str) -> Asset {
        Asset {
            id: id.to_string(),
            name: format!("asset {}", id),
            file_type,
            source: source.to_string(),
            order: 1,
            duration_secs: 5,
        }
    }

    #[test]
    fn test_stream_by_type_or_extension() {
        assert!(asset("1", FileType::Stream, "https://cdn/live").is_stream());
        assert!(asset("2", FileType::Video, "a.m3u8").is_stream());
        assert!(asset("3", FileType::Video, "https://cdn/live/index.M3U8?token=x").is_stream());
        assert!(!asset("4", FileType::Video, "https://cdn/clip.mp4").is_stream());
        assert!(!asset("5", FileType::Image, "poster.jpg").is_stream());
    }

    #[test]
    fn test_file_type_tags() {
        assert_eq!(FileType::from_tag("Video"), FileType::Video);
        assert_eq!(FileType::from_tag(" stream "), FileType::Stream);
        assert_eq!(FileType::from_tag("pdf"), FileType::Other);
        assert_eq!(FileType::Other.default_extension(), ".bin");
    }

    #[test]
    fn test_unique_assets_keeps_first_occurrence() {
        let shared = asset("a", FileType::Image, "x.jpg");
        let manifest = Manifest {
            is_restarting: false,
            playlists: vec![
                Playlist {
                    id: "p1".into(),
                    name: "one".into(),
                    is_default: true,
                    start: None,
                    end: None,
                    weekdays: None,
                    assets: vec![shared.clone(), asset("b", FileType::Video, "y.mp4")],
                },
                Playlist {
                    id: "p2".into(),
                    name: "two".into(),
                    is_default: false,
                    start: None,
                    end: None,
                    weekdays: None,
                    assets: vec![shared],
                },
            ],
        };
        let ids: Vec<_> = manifest.unique_assets().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_failed_fetch_has_no_webview_asset() {
        let failed = FetchResult::failed(asset("1", FileType::Image, "x.jpg"), "boom");
        assert!(!failed.is_success());
        assert_eq!(failed.error(), Some("boom"));
        assert!(WebviewAsset::from_fetch(&failed).is_none());

        let stream = FetchResult::streamed(asset("2", FileType::Stream, "https://cdn/live"));
        let webview = WebviewAsset::from_fetch(&stream).unwrap();
        assert!(webview.is_stream);
        assert_eq!(webview.display_path, "https://cdn/live");
    }
}
