//! Events sent from the daemon to the presentation layer, one JSON object per
//! line.

use serde::{Deserialize, Serialize};

use crate::model::WebviewAsset;

/// Bump when the event format changes in a breaking way.
pub const PROTOCOL_VERSION: u32 = 1;

/// Named stages of an initialization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressStage {
    Clearing,
    DeviceInfo,
    ApiFetch,
    Downloading,
    Complete,
}

/// Advisory progress of an initialization pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub stage: ProgressStage,
    /// 0..=100
    pub value: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
}

impl Progress {
    pub fn stage(stage: ProgressStage, value: u8) -> Self {
        Self {
            stage,
            value: value.min(100),
            current: None,
            total: None,
        }
    }

    pub fn counted(stage: ProgressStage, value: u8, current: usize, total: usize) -> Self {
        Self {
            current: Some(current),
            total: Some(total),
            ..Self::stage(stage, value)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// First line written on startup.
    Hello {
        protocol_version: u32,
        device_name: Option<String>,
    },
    Progress {
        #[serde(flatten)]
        progress: Progress,
    },
    /// `asset` is now due for `duration_secs` seconds.
    AssetDue {
        cycle_id: String,
        asset: WebviewAsset,
        duration_secs: u64,
    },
    /// Non-error status text, e.g. a countdown until a playlist starts.
    Status {
        message: String,
    },
    Error {
        message: String,
    },
    Log {
        message: String,
    },
}

impl Event {
    pub fn encode_line(&self) -> anyhow::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn decode_line(line: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(line.trim_end())?)
    }
}
