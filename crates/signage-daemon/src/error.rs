use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Failures of the acquisition and cycling core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Could not reach {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered but the body could not be read to the end.
    #[error("Failed to read response body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} {status_text} from {url}")]
    HttpStatus {
        url: String,
        status: u16,
        status_text: String,
    },

    #[error("Invalid manifest: {0}")]
    Schema(#[from] SchemaError),

    /// Retries for one asset exhausted. Recovered into a failed fetch result.
    #[error("Asset {asset_id} could not be fetched: {message}")]
    AssetFetch { asset_id: String, message: String },

    #[error("No playlist is active now and none is scheduled to start")]
    NoActivePlaylist,

    #[error("Playlist {playlist_id} has no playable assets")]
    EmptyCycle { playlist_id: String },

    #[error("No playlist could be compiled from the manifest")]
    NoPlaylists,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a manifest body was rejected. `path` points at the offending value,
/// e.g. `playlists[0].assets[2]`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("body is not valid JSON: {0}")]
    NotJson(String),

    #[error("{path} is not an object")]
    NotAnObject { path: String },

    #[error("{path} is missing field `{field}`")]
    MissingField { path: String, field: &'static str },

    #[error("{path}.{field} should be {expected}")]
    WrongType {
        path: String,
        field: &'static str,
        expected: &'static str,
    },

    #[error("{path}.{field} is empty")]
    EmptyValue { path: String, field: &'static str },

    #[error("{path}.{field} is not an integer: {value:?}")]
    InvalidNumber {
        path: String,
        field: &'static str,
        value: String,
    },

    #[error("{path}.duration is negative: {value}")]
    NegativeDuration { path: String, value: i64 },

    #[error("{path}.{field} is not a timestamp: {value:?}")]
    InvalidTimestamp {
        path: String,
        field: &'static str,
        value: String,
    },
}

impl CoreError {
    /// HTTP status of the failure, if it came from a response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            CoreError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}
