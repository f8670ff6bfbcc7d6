use std::sync::Arc;

use metrics::counter;
use serde_json::Value;
use tracing::{debug, warn};

use crate::protocol::ServerMessage;
use crate::registry::Registry;

/// Which way an ICE candidate is travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceDirection {
    FromAgent,
    FromController,
}

/// Forwards media-negotiation handshakes between one agent and the
/// controller. The negotiation bodies are opaque; this relay never inspects
/// them and never carries media bytes.
///
/// Unresolvable targets drop the message with a log line only; nothing is
/// surfaced back to the sender, unlike command routing.
#[derive(Clone)]
pub struct SignalingRelay {
    registry: Arc<Registry>,
}

impl SignalingRelay {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Agent → controller: the opening offer for a media stream.
    pub fn forward_offer(&self, uid: &str, offer: Value, media_kind: Option<String>) {
        self.to_controller(
            uid,
            "offer",
            ServerMessage::SignalingOffer {
                uid: uid.to_string(),
                offer,
                media_kind,
            },
        );
    }

    /// Controller → agent: the answering half of the handshake.
    pub fn forward_answer(&self, uid: &str, answer: Value) {
        self.to_agent(uid, "answer", ServerMessage::SignalingAnswer { answer });
    }

    pub fn forward_ice(&self, direction: IceDirection, uid: &str, candidate: Value) {
        match direction {
            IceDirection::FromAgent => self.to_controller(
                uid,
                "ice",
                ServerMessage::AgentIce {
                    uid: uid.to_string(),
                    candidate,
                },
            ),
            IceDirection::FromController => {
                self.to_agent(uid, "ice", ServerMessage::ControllerIce { candidate })
            }
        }
    }

    /// Agent → controller: a failed negotiation, reported by name.
    pub fn forward_error(&self, uid: &str, message: String) {
        self.to_controller(
            uid,
            "error",
            ServerMessage::SignalingError {
                uid: uid.to_string(),
                message,
            },
        );
    }

    fn to_controller(&self, uid: &str, stage: &'static str, message: ServerMessage) {
        match self.registry.controller() {
            Some(controller) if controller.send(message) => {
                debug!(%uid, stage, "signaling forwarded to controller");
                counter!("switchboard_signaling_relayed_total", 1, "direction" => "to_controller");
            }
            Some(_) => {
                warn!(%uid, stage, "signaling dropped: controller channel closed");
                counter!("switchboard_signaling_dropped_total", 1, "reason" => "controller_gone");
            }
            None => {
                warn!(%uid, stage, "signaling dropped: no controller registered");
                counter!("switchboard_signaling_dropped_total", 1, "reason" => "no_controller");
            }
        }
    }

    fn to_agent(&self, uid: &str, stage: &'static str, message: ServerMessage) {
        match self.registry.find_agent(uid) {
            Some(agent) if agent.send(message) => {
                debug!(%uid, stage, "signaling forwarded to agent");
                counter!("switchboard_signaling_relayed_total", 1, "direction" => "to_agent");
            }
            Some(_) => {
                warn!(%uid, stage, "signaling dropped: agent channel closed");
                counter!("switchboard_signaling_dropped_total", 1, "reason" => "agent_gone");
            }
            None => {
                warn!(%uid, stage, "signaling dropped: agent not in registry");
                counter!("switchboard_signaling_dropped_total", 1, "reason" => "agent_unknown");
            }
        }
    }
}
