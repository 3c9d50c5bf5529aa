//! Manifest client: one GET of the playlist endpoint, then a strict
//! structural validation pass.
//!
//! Expected body:
//!
//! ```json
//! {
//!   "is_restarting": false,
//!   "playlists": [{
//!     "id": 1, "name": "Lobby", "is_default": true,
//!     "start_date": null, "end_date": "2026-12-31T23:59:59Z", "days": null,
//!     "assets": [{
//!       "id": 7, "name": "Poster", "filepath": "https://cdn/poster.jpg",
//!       "filetype": "image", "order": 1, "duration": 5
//!     }]
//!   }]
//! }
//! ```
//!
//! Any playlist or asset that does not match rejects the whole body.

use serde_json::{Map, Value};
use signage_proto::model::{Asset, FileType, Manifest, Playlist};
use signage_proto::schedule::parse_timestamp;
use tracing::{debug, info};

use crate::error::{CoreError, Result, SchemaError};

pub struct ManifestClient {
    client: reqwest::Client,
    url: String,
}

impl ManifestClient {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn fetch(&self) -> Result<Manifest> {
        info!("Fetching manifest from {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|source| CoreError::Transport {
                url: self.url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::HttpStatus {
                url: self.url.clone(),
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|source| body_error(&self.url, source))?;
        debug!("Manifest body: {} bytes", body.len());

        let manifest = parse_manifest(&body)?;
        info!(
            "Manifest ok: {} playlists, is_restarting={}",
            manifest.playlists.len(),
            manifest.is_restarting
        );
        Ok(manifest)
    }
}

fn body_error(url: &str, source: reqwest::Error) -> CoreError {
    CoreError::Body {
        url: url.to_string(),
        source,
    }
}

pub fn parse_manifest(body: &str) -> std::result::Result<Manifest, SchemaError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| SchemaError::NotJson(e.to_string()))?;
    validate_manifest(&value)
}

pub fn validate_manifest(value: &Value) -> std::result::Result<Manifest, SchemaError> {
    let root = Fields::of(value, "manifest".to_string())?;
    let is_restarting = root.boolean("is_restarting")?;

    let playlists = root
        .array("playlists")?
        .iter()
        .enumerate()
        .map(|(idx, p)| validate_playlist(p, format!("playlists[{}]", idx)))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Manifest {
        is_restarting,
        playlists,
    })
}

fn validate_playlist(value: &Value, path: String) -> std::result::Result<Playlist, SchemaError> {
    let fields = Fields::of(value, path)?;
    let id = fields.identifier("id")?;
    let name = fields.string("name")?;
    let is_default = fields.boolean("is_default")?;

    let assets = fields
        .array("assets")?
        .iter()
        .enumerate()
        .map(|(idx, a)| validate_asset(a, format!("{}.assets[{}]", fields.path, idx)))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Playlist {
        id,
        name,
        is_default,
        start: fields.timestamp("start_date")?,
        end: fields.timestamp("end_date")?,
        weekdays: fields.optional("days"),
        assets,
    })
}

fn validate_asset(value: &Value, path: String) -> std::result::Result<Asset, SchemaError> {
    let fields = Fields::of(value, path)?;

    let duration = fields.integer("duration")?;
    if duration < 0 {
        return Err(SchemaError::NegativeDuration {
            path: fields.path.clone(),
            value: duration,
        });
    }

    Ok(Asset {
        id: fields.identifier("id")?,
        name: fields.string("name")?,
        file_type: FileType::from_tag(&fields.string("filetype")?),
        source: fields.string("filepath")?,
        order: fields.integer("order")?,
        duration_secs: duration as u64,
    })
}

/// Typed accessors over one JSON object, reporting failures at `path`.
struct Fields<'a> {
    obj: &'a Map<String, Value>,
    path: String,
}

impl<'a> Fields<'a> {
    fn of(value: &'a Value, path: String) -> std::result::Result<Self, SchemaError> {
        match value.as_object() {
            Some(obj) => Ok(Self { obj, path }),
            None => Err(SchemaError::NotAnObject { path }),
        }
    }

    fn required(&self, field: &'static str) -> std::result::Result<&'a Value, SchemaError> {
        match self.obj.get(field) {
            Some(Value::Null) | None => Err(SchemaError::MissingField {
                path: self.path.clone(),
                field,
            }),
            Some(v) => Ok(v),
        }
    }

    fn optional(&self, field: &'static str) -> Option<Value> {
        self.obj.get(field).filter(|v| !v.is_null()).cloned()
    }

    fn wrong_type(&self, field: &'static str, expected: &'static str) -> SchemaError {
        SchemaError::WrongType {
            path: self.path.clone(),
            field,
            expected,
        }
    }

    fn empty(&self, field: &'static str) -> SchemaError {
        SchemaError::EmptyValue {
            path: self.path.clone(),
            field,
        }
    }

    fn string(&self, field: &'static str) -> std::result::Result<String, SchemaError> {
        let s = self
            .required(field)?
            .as_str()
            .ok_or_else(|| self.wrong_type(field, "a string"))?;
        if s.trim().is_empty() {
            return Err(self.empty(field));
        }
        Ok(s.to_string())
    }

    /// Ids arrive as strings or integers; both are kept as strings.
    fn identifier(&self, field: &'static str) -> std::result::Result<String, SchemaError> {
        match self.required(field)? {
            Value::String(s) if s.trim().is_empty() => Err(self.empty(field)),
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
            _ => Err(self.wrong_type(field, "a string or integer")),
        }
    }

    fn boolean(&self, field: &'static str) -> std::result::Result<bool, SchemaError> {
        self.required(field)?
            .as_bool()
            .ok_or_else(|| self.wrong_type(field, "a boolean"))
    }

    /// Integers may also arrive as numeric strings.
    fn integer(&self, field: &'static str) -> std::result::Result<i64, SchemaError> {
        match self.required(field)? {
            Value::Number(n) => n.as_i64().ok_or_else(|| SchemaError::InvalidNumber {
                path: self.path.clone(),
                field,
                value: n.to_string(),
            }),
            Value::String(s) if s.trim().is_empty() => Err(self.empty(field)),
            Value::String(s) => s.trim().parse::<i64>().map_err(|_| SchemaError::InvalidNumber {
                path: self.path.clone(),
                field,
                value: s.clone(),
            }),
            _ => Err(self.wrong_type(field, "an integer")),
        }
    }

    fn array(&self, field: &'static str) -> std::result::Result<&'a Vec<Value>, SchemaError> {
        self.required(field)?
            .as_array()
            .ok_or_else(|| self.wrong_type(field, "an array"))
    }

    /// Missing, null and empty strings mean "no bound".
    fn timestamp(
        &self,
        field: &'static str,
    ) -> std::result::Result<Option<chrono::DateTime<chrono::Utc>>, SchemaError> {
        match self.obj.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => {
                parse_timestamp(s)
                    .map(Some)
                    .ok_or_else(|| SchemaError::InvalidTimestamp {
                        path: self.path.clone(),
                        field,
                        value: s.clone(),
                    })
            }
            Some(_) => Err(self.wrong_type(field, "a timestamp string")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn asset_json() -> Value {
        json!({
            "id": 7,
            "name": "Poster",
            "filepath": "https://cdn.example.com/poster.jpg",
            "filetype": "image",
            "order": "2",
            "duration": 5
        })
    }

    fn manifest_with_asset(asset: Value) -> Value {
        json!({
            "is_restarting": false,
            "playlists": [{
                "id": "lobby",
                "name": "Lobby",
                "is_default": true,
                "start_date": null,
                "end_date": "2030-01-01T00:00:00Z",
                "days": ["mon", "tue"],
                "assets": [asset]
            }]
        })
    }

    #[test]
    fn test_valid_manifest() {
        let manifest = validate_manifest(&manifest_with_asset(asset_json())).unwrap();
        assert!(!manifest.is_restarting);
        let playlist = &manifest.playlists[0];
        assert_eq!(playlist.id, "lobby");
        assert!(playlist.is_default);
        assert!(playlist.start.is_none());
        assert!(playlist.end.is_some());
        assert_eq!(playlist.weekdays, Some(json!(["mon", "tue"])));

        let asset = &playlist.assets[0];
        assert_eq!(asset.id, "7");
        assert_eq!(asset.file_type, FileType::Image);
        assert_eq!(asset.order, 2);
        assert_eq!(asset.duration_secs, 5);
    }

    #[test]
    fn test_missing_restart_flag() {
        let err = validate_manifest(&json!({ "playlists": [] })).unwrap_err();
        assert_eq!(
            err,
            SchemaError::MissingField {
                path: "manifest".into(),
                field: "is_restarting"
            }
        );
    }

    #[test]
    fn test_one_bad_asset_rejects_everything() {
        let mut bad = asset_json();
        bad["filepath"] = json!("");
        let err = validate_manifest(&manifest_with_asset(bad)).unwrap_err();
        assert_eq!(
            err,
            SchemaError::EmptyValue {
                path: "playlists[0].assets[0]".into(),
                field: "filepath"
            }
        );
    }

    #[test]
    fn test_schema_causes() {
        let mut bad = asset_json();
        bad["order"] = json!("first");
        assert!(matches!(
            validate_manifest(&manifest_with_asset(bad)).unwrap_err(),
            SchemaError::InvalidNumber { field: "order", .. }
        ));

        let mut bad = asset_json();
        bad["duration"] = json!(-3);
        assert!(matches!(
            validate_manifest(&manifest_with_asset(bad)).unwrap_err(),
            SchemaError::NegativeDuration { value: -3, .. }
        ));

        let mut bad = asset_json();
        bad["name"] = json!(12);
        assert!(matches!(
            validate_manifest(&manifest_with_asset(bad)).unwrap_err(),
            SchemaError::WrongType { field: "name", .. }
        ));

        let mut manifest = manifest_with_asset(asset_json());
        manifest["playlists"][0]["is_default"] = json!("yes");
        assert!(matches!(
            validate_manifest(&manifest).unwrap_err(),
            SchemaError::WrongType { field: "is_default", .. }
        ));

        let mut manifest = manifest_with_asset(asset_json());
        manifest["playlists"][0]["start_date"] = json!("soon");
        assert!(matches!(
            validate_manifest(&manifest).unwrap_err(),
            SchemaError::InvalidTimestamp { field: "start_date", .. }
        ));

        assert!(matches!(
            validate_manifest(&json!({ "is_restarting": true, "playlists": [42] })).unwrap_err(),
            SchemaError::NotAnObject { .. }
        ));
        assert!(matches!(parse_manifest("<html>").unwrap_err(), SchemaError::NotJson(_)));
    }

    #[tokio::test]
    async fn test_truncated_body_is_not_a_transport_error() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Promise 100 bytes, send 2, hang up.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 100\r\n\r\n{}")
                .await;
            let _ = socket.shutdown().await;
        });

        let url = format!("http://{}/api/playlists", addr);
        let err = ManifestClient::new(reqwest::Client::new(), url.clone())
            .fetch()
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Body { .. }), "got {:?}", err);
        assert!(err.to_string().contains(&url));
        assert!(!err.to_string().starts_with("Could not reach"));
    }
}
