use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::protocol::TelemetryPayload;

const SUBDIRS: [&str; 4] = ["screenshots", "audio", "photos", "files"];

/// On-disk archive for binary telemetry bodies. The relay forwards those
/// payloads opaquely; archiving is a best-effort side channel so captures
/// survive a controller that was absent or closed. Failures are logged and
/// never affect the connection.
#[derive(Debug, Clone)]
pub struct Archive {
    root: PathBuf,
    enabled: bool,
}

impl Archive {
    /// Ensures the output directory tree exists.
    pub fn bootstrap(config: &Config) -> Result<Self> {
        let root = config.data_dir.clone();
        for sub in SUBDIRS {
            let dir = root.join(sub);
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(Self {
            root,
            enabled: config.archive,
        })
    }

    /// Persists the binary body of media-bearing payloads. Non-media kinds
    /// and payloads without a usable body are ignored.
    pub fn store_media(&self, uid: &str, payload: &TelemetryPayload) {
        if !self.enabled {
            return;
        }
        let (subdir, body_field, extension) = match payload.kind.as_str() {
            "screenshot" => ("screenshots", "image", "png"),
            "camera_photo" => ("photos", "image", "jpg"),
            "audio_recording" => ("audio", "audio", "m4a"),
            "file_list" => {
                let is_download = payload
                    .fields
                    .get("action")
                    .and_then(Value::as_str)
                    .map(|action| action == "download")
                    .unwrap_or(false);
                if !is_download {
                    return;
                }
                ("files", "file_data", "bin")
            }
            _ => return,
        };
        let Some(body) = payload.fields.get(body_field).and_then(Value::as_str) else {
            return;
        };

        let name = payload
            .fields
            .get("name")
            .and_then(Value::as_str)
            .and_then(base_name)
            .map(str::to_string)
            .unwrap_or_else(|| format!("capture.{extension}"));
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
        let path = self.root.join(subdir).join(format!("{uid}-{stamp}-{name}"));

        let body = body.to_string();
        let uid = uid.to_string();
        let kind = payload.kind.clone();
        tokio::task::spawn_blocking(move || match STANDARD.decode(body.as_bytes()) {
            Ok(bytes) => {
                if let Err(err) = fs::write(&path, bytes) {
                    warn!(%uid, %kind, error = %err, "media payload not archived");
                } else {
                    debug!(%uid, %kind, path = %path.display(), "archived media payload");
                }
            }
            Err(err) => {
                warn!(%uid, %kind, error = %err, "media payload not archived: invalid base64");
            }
        });
    }
}

/// Final path component only; agents do not get to choose where their
/// uploads land.
fn base_name(name: &str) -> Option<&str> {
    let candidate = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if candidate.is_empty() || candidate == "." || candidate == ".." {
        None
    } else {
        Some(candidate)
    }
}
