use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::archive::Archive;
use crate::auth::CredentialStore;
use crate::commands::{self, DispatchError};
use crate::config::Config;
use crate::protocol::{AgentRecord, ClientMessage, CommandDescriptor, Identity, ServerMessage};
use crate::registry::{AgentEntry, AgentHandle, ConnectionId, ControllerEntry, Outbox, Registry};
use crate::router::PayloadRouter;
use crate::signaling::{IceDirection, SignalingRelay};

/// Shared relay state handed to every connection task and HTTP handler.
#[derive(Clone)]
pub struct Hub {
    pub registry: Arc<Registry>,
    pub credentials: Arc<CredentialStore>,
    pub router: PayloadRouter,
    pub signaling: SignalingRelay,
    pub archive: Archive,
    pub config: Arc<Config>,
}

impl Hub {
    pub fn new(config: Arc<Config>, archive: Archive) -> Self {
        let registry = Arc::new(Registry::new());
        let credentials = Arc::new(CredentialStore::from_config(&config));
        Self {
            router: PayloadRouter::new(registry.clone()),
            signaling: SignalingRelay::new(registry.clone()),
            registry,
            credentials,
            archive,
            config,
        }
    }
}

/// What this connection has registered as. Starts unregistered; the first
/// accepted registration decides the role for the remaining lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Session {
    Unregistered,
    Agent { uid: String },
    Controller,
}

/// WebSocket upgrade handler for `GET /ws`.
pub async fn websocket_handler(ws: WebSocketUpgrade, State(hub): State<Hub>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Drives one connection to completion: writer task draining the outbox,
/// read loop dispatching inbound frames in arrival order, registry cleanup
/// on the way out.
async fn handle_socket(socket: WebSocket, hub: Hub) {
    let conn_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(err) => error!(%conn_id, error = %err, "failed to encode outbound message"),
            }
        }
        debug!(%conn_id, "writer task ended");
    });

    debug!(%conn_id, "connection opened");
    let mut session = Session::Unregistered;

    while let Some(frame) = receiver.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                error!(%conn_id, error = %err, "websocket error");
                break;
            }
        };

        let text = match frame {
            Message::Text(text) => text,
            // Some client stacks ship JSON in binary frames; accept them.
            Message::Binary(data) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    debug!(%conn_id, "ignoring non-UTF8 binary frame");
                    continue;
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        let message = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(message) => message,
            Err(err) => {
                warn!(%conn_id, error = %err, "discarding unparseable frame");
                continue;
            }
        };

        if !handle_message(&hub, conn_id, &tx, &mut session, message) {
            break;
        }
    }

    disconnect(&hub, conn_id, &session);
    debug!(%conn_id, "connection closed");
}

/// Dispatches one inbound message. Returns `false` when the connection must
/// be terminated (the one case is a failed agent registration).
pub fn handle_message(
    hub: &Hub,
    conn_id: ConnectionId,
    tx: &Outbox,
    session: &mut Session,
    message: ClientMessage,
) -> bool {
    match message {
        ClientMessage::RegisterAgent {
            email,
            password,
            record,
        } => register_agent(hub, conn_id, tx, session, &email, &password, record),

        ClientMessage::RegisterController { identity } => {
            // Trusted form: identity was established upstream.
            install_controller(hub, conn_id, tx, session, identity);
            true
        }

        ClientMessage::RegisterControllerWithCredentials { email, password } => {
            match hub.credentials.authenticate(&email, &password) {
                Some(identity) => {
                    install_controller(hub, conn_id, tx, session, identity);
                }
                None => {
                    warn!(%conn_id, %email, "controller registration rejected");
                    counter!("switchboard_auth_failures_total", 1, "party" => "controller");
                    // Kept open but unregistered, unlike the agent path.
                    let _ = tx.send(ServerMessage::AuthError {
                        message: "invalid email or password".to_string(),
                    });
                }
            }
            true
        }

        ClientMessage::RequestAgentList => {
            let _ = tx.send(ServerMessage::AgentList {
                agents: hub.registry.list_agents(),
            });
            true
        }

        ClientMessage::IssueCommand {
            command,
            target_uid,
            params,
        } => {
            if let Err(err) = issue_command(hub, &command, &target_uid, &params) {
                debug!(%conn_id, %command, %target_uid, error = %err, "command not delivered");
                let _ = tx.send(ServerMessage::CommandError {
                    message: err.to_string(),
                });
            }
            true
        }

        ClientMessage::IssueRawCommand {
            target_uid,
            commands,
        } => {
            if let Err(err) = deliver(hub, &target_uid, commands) {
                debug!(%conn_id, %target_uid, error = %err, "raw command not delivered");
                let _ = tx.send(ServerMessage::CommandError {
                    message: err.to_string(),
                });
            }
            true
        }

        ClientMessage::SignalingAnswer { uid, answer } => {
            hub.signaling.forward_answer(&uid, answer);
            true
        }

        ClientMessage::ControllerIce { uid, candidate } => {
            hub.signaling
                .forward_ice(IceDirection::FromController, &uid, candidate);
            true
        }

        ClientMessage::Telemetry { payload } => {
            match session {
                Session::Agent { uid } => {
                    hub.archive.store_media(uid, &payload);
                    hub.router.route(uid, payload);
                }
                _ => warn!(%conn_id, kind = %payload.kind, "telemetry from unregistered connection ignored"),
            }
            true
        }

        ClientMessage::SignalingOffer { offer, media_kind } => {
            match session {
                Session::Agent { uid } => hub.signaling.forward_offer(uid, offer, media_kind),
                _ => warn!(%conn_id, "signaling offer from unregistered connection ignored"),
            }
            true
        }

        ClientMessage::AgentIce { candidate } => {
            match session {
                Session::Agent { uid } => {
                    hub.signaling
                        .forward_ice(IceDirection::FromAgent, uid, candidate)
                }
                _ => warn!(%conn_id, "ice candidate from unregistered connection ignored"),
            }
            true
        }

        ClientMessage::SignalingError { message } => {
            match session {
                Session::Agent { uid } => hub.signaling.forward_error(uid, message),
                _ => warn!(%conn_id, "signaling error from unregistered connection ignored"),
            }
            true
        }
    }
}

fn register_agent(
    hub: &Hub,
    conn_id: ConnectionId,
    tx: &Outbox,
    session: &mut Session,
    email: &str,
    password: &str,
    record: AgentRecord,
) -> bool {
    if !hub.credentials.validate(email, password) {
        // Failed agent authentication terminates the connection outright.
        warn!(%conn_id, uid = %record.uid, "agent registration rejected; closing connection");
        counter!("switchboard_auth_failures_total", 1, "party" => "agent");
        return false;
    }

    let uid = record.uid.clone();
    let entry = AgentEntry::new(record, conn_id, tx.clone());
    let snapshot = entry.snapshot();
    if let Some(replaced) = hub.registry.register_agent(entry) {
        debug!(%uid, replaced_conn = %replaced.conn_id, "agent re-registered; prior entry replaced");
    }
    gauge!(
        "switchboard_agents_connected",
        hub.registry.agent_count() as f64
    );
    info!(%uid, %conn_id, "agent registered");

    if let Some(controller) = hub.registry.controller() {
        controller.send(ServerMessage::AgentAdded { agent: snapshot });
    }

    *session = Session::Agent { uid };
    true
}

fn install_controller(
    hub: &Hub,
    conn_id: ConnectionId,
    tx: &Outbox,
    session: &mut Session,
    identity: Identity,
) {
    if !hub.config.controller_takeover && hub.registry.has_controller() {
        warn!(%conn_id, email = %identity.email, "controller registration rejected: slot occupied");
        let _ = tx.send(ServerMessage::AuthError {
            message: "a controller session is already active".to_string(),
        });
        return;
    }

    let entry = ControllerEntry::new(identity, conn_id, tx.clone());
    if let Some(superseded) = hub.registry.set_controller(entry) {
        if superseded.conn_id != conn_id {
            // The old connection stays open at the transport level but is no
            // longer addressable as the controller.
            info!(
                superseded_conn = %superseded.conn_id,
                email = %superseded.identity.email,
                "previous controller superseded"
            );
        }
    }
    *session = Session::Controller;

    let agents = hub.registry.list_agents();
    info!(%conn_id, count = agents.len(), "controller registered; sending roster");
    let _ = tx.send(ServerMessage::AgentList { agents });
}

/// Dispatch checks run in a fixed order: target presence, then liveness,
/// then the command table.
fn issue_command(
    hub: &Hub,
    command: &str,
    target_uid: &str,
    params: &Map<String, Value>,
) -> Result<(), DispatchError> {
    let agent = hub
        .registry
        .find_agent(target_uid)
        .ok_or_else(|| DispatchError::TargetNotFound(target_uid.to_string()))?;
    if agent.is_closed() {
        return Err(DispatchError::TargetUnreachable(target_uid.to_string()));
    }
    let descriptor = commands::translate(command, params)
        .ok_or_else(|| DispatchError::UnknownCommand(command.to_string()))?;
    send_commands(&agent, command, vec![descriptor])
}

/// Raw descriptor lists skip translation entirely.
fn deliver(
    hub: &Hub,
    target_uid: &str,
    descriptors: Vec<CommandDescriptor>,
) -> Result<(), DispatchError> {
    let agent = hub
        .registry
        .find_agent(target_uid)
        .ok_or_else(|| DispatchError::TargetNotFound(target_uid.to_string()))?;
    send_commands(&agent, "raw", descriptors)
}

fn send_commands(
    agent: &AgentHandle,
    command: &str,
    descriptors: Vec<CommandDescriptor>,
) -> Result<(), DispatchError> {
    if !agent.send(ServerMessage::Commands {
        commands: descriptors,
    }) {
        return Err(DispatchError::TargetUnreachable(agent.uid.clone()));
    }
    counter!("switchboard_commands_dispatched_total", 1, "command" => command.to_string());
    debug!(uid = %agent.uid, %command, "command dispatched");
    Ok(())
}

/// Registry cleanup once the read loop ends, for whatever reason.
pub fn disconnect(hub: &Hub, conn_id: ConnectionId, session: &Session) {
    match session {
        Session::Agent { .. } => {
            if let Some(record) = hub.registry.remove_agent(conn_id) {
                info!(uid = %record.uid, %conn_id, "agent disconnected");
                gauge!(
                    "switchboard_agents_connected",
                    hub.registry.agent_count() as f64
                );
                if let Some(controller) = hub.registry.controller() {
                    controller.send(ServerMessage::AgentRemoved { uid: record.uid });
                }
            }
        }
        Session::Controller => {
            if hub.registry.clear_controller_if(conn_id) {
                info!(%conn_id, "controller disconnected");
            }
        }
        Session::Unregistered => {}
    }
}
