//! Active-window evaluation for playlists.
//!
//! A playlist is eligible during `[start, end)`: a missing bound is open, and
//! an end equal to "now" already counts as ended.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub fn is_playlist_active(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    matches!(playlist_status(start, end, now), PlaylistStatus::Active)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PlaylistStatus {
    Active,
    Upcoming { starts_in: Duration },
    Ended,
}

pub fn playlist_status(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> PlaylistStatus {
    if let Some(end) = end {
        if now >= end {
            return PlaylistStatus::Ended;
        }
    }
    if let Some(start) = start {
        if now < start {
            let starts_in = (start - now).to_std().unwrap_or_default();
            return PlaylistStatus::Upcoming { starts_in };
        }
    }
    PlaylistStatus::Active
}

impl PlaylistStatus {
    /// Text shown on screen while a playlist is not presentable.
    pub fn message(&self, playlist_name: &str) -> String {
        match self {
            Self::Active => format!("Playlist \"{}\" is active", playlist_name),
            Self::Upcoming { starts_in } => format!(
                "Playlist \"{}\" starts in {}",
                playlist_name,
                format_countdown(*starts_in)
            ),
            Self::Ended => format!("Playlist \"{}\" has ended", playlist_name),
        }
    }
}

/// `3d 04h 05m`, `2h 05m`, `5m 09s` or `42s` depending on magnitude.
pub fn format_countdown(remaining: Duration) -> String {
    let total = remaining.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    if days > 0 {
        format!("{}d {:02}h {:02}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {:02}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Parse a manifest timestamp.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` and bare
/// dates. Values without an offset are read as local time.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    let naive = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}
