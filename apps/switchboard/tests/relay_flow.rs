use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use uuid::Uuid;

use switchboard::archive::Archive;
use switchboard::config::Config;
use switchboard::hub::{disconnect, handle_message, Hub, Session};
use switchboard::protocol::ServerMessage;
use switchboard::registry::Outbox;

const EMAIL: &str = "admin@switchboard.local";
const PASSWORD: &str = "switchboard-dev-password";

fn hub() -> (Hub, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config {
        data_dir: dir.path().to_path_buf(),
        archive: false,
        ..Config::default()
    };
    let config = Arc::new(config);
    let archive = Archive::bootstrap(&config).expect("bootstrap");
    (Hub::new(config, archive), dir)
}

/// One in-process stand-in for a WebSocket connection: the hub only ever
/// sees a connection id, an outbox, and the per-connection session state.
struct Conn {
    id: Uuid,
    tx: Outbox,
    rx: UnboundedReceiver<ServerMessage>,
    session: Session,
}

fn open() -> Conn {
    let (tx, rx) = mpsc::unbounded_channel();
    Conn {
        id: Uuid::new_v4(),
        tx,
        rx,
        session: Session::Unregistered,
    }
}

fn send(hub: &Hub, conn: &mut Conn, frame: Value) -> bool {
    let message = serde_json::from_value(frame).expect("valid client message");
    handle_message(hub, conn.id, &conn.tx, &mut conn.session, message)
}

fn register_agent(hub: &Hub, conn: &mut Conn, uid: &str) {
    let kept_open = send(
        hub,
        conn,
        json!({
            "type": "register_agent",
            "email": EMAIL,
            "password": PASSWORD,
            "uid": uid,
            "device": "test device"
        }),
    );
    assert!(kept_open, "agent registration should keep the connection");
    assert_eq!(conn.session, Session::Agent { uid: uid.into() });
}

fn register_controller(hub: &Hub, conn: &mut Conn) -> Vec<switchboard::protocol::AgentRecord> {
    assert!(send(
        hub,
        conn,
        json!({
            "type": "register_controller_with_credentials",
            "email": EMAIL,
            "password": PASSWORD
        }),
    ));
    match conn.rx.try_recv().expect("roster after registration") {
        ServerMessage::AgentList { agents } => agents,
        other => panic!("expected the roster, got {other:?}"),
    }
}

fn assert_silent(conn: &mut Conn) {
    assert!(
        conn.rx.try_recv().is_err(),
        "connection should have received nothing further"
    );
}

#[test]
fn double_registration_keeps_one_roster_entry() {
    let (hub, _dir) = hub();
    let mut first = open();
    let mut second = open();

    register_agent(&hub, &mut first, "A1");
    register_agent(&hub, &mut second, "A1");

    let roster = hub.registry.list_agents();
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].uid, "A1");
}

#[test]
fn failed_agent_registration_terminates_the_connection() {
    let (hub, _dir) = hub();
    let mut agent = open();

    let kept_open = send(
        &hub,
        &mut agent,
        json!({
            "type": "register_agent",
            "email": EMAIL,
            "password": "wrong",
            "uid": "A1"
        }),
    );

    assert!(!kept_open);
    assert_eq!(agent.session, Session::Unregistered);
    assert_eq!(hub.registry.agent_count(), 0);
    // Terminated, not notified: no auth event goes out to agents.
    assert_silent(&mut agent);
}

#[test]
fn failed_controller_registration_stays_open_with_auth_error() {
    let (hub, _dir) = hub();
    let mut controller = open();

    let kept_open = send(
        &hub,
        &mut controller,
        json!({
            "type": "register_controller_with_credentials",
            "email": EMAIL,
            "password": "wrong"
        }),
    );

    assert!(kept_open);
    assert_eq!(controller.session, Session::Unregistered);
    match controller.rx.try_recv().expect("auth error") {
        ServerMessage::AuthError { .. } => {}
        other => panic!("expected auth_error, got {other:?}"),
    }
    assert!(!hub.registry.has_controller());
}

#[test]
fn translated_command_reaches_exactly_the_target() {
    let (hub, _dir) = hub();
    let mut controller = open();
    let mut agent = open();
    register_controller(&hub, &mut controller);
    register_agent(&hub, &mut agent, "A1");
    // Drain the agent_added notice.
    controller.rx.try_recv().expect("agent_added");

    assert!(send(
        &hub,
        &mut controller,
        json!({
            "type": "issue_command",
            "command": "request_sms",
            "target_uid": "A1",
            "count": 50
        }),
    ));

    match agent.rx.try_recv().expect("commands event") {
        ServerMessage::Commands { commands } => {
            assert_eq!(commands.len(), 1);
            assert_eq!(commands[0].name, "get_sms");
            assert_eq!(commands[0].args, vec![json!(50)]);
        }
        other => panic!("expected commands, got {other:?}"),
    }
    assert_silent(&mut controller);
}

#[test]
fn unknown_command_errors_to_issuer_and_nothing_to_agent() {
    let (hub, _dir) = hub();
    let mut controller = open();
    let mut agent = open();
    register_controller(&hub, &mut controller);
    register_agent(&hub, &mut agent, "A1");
    controller.rx.try_recv().expect("agent_added");

    assert!(send(
        &hub,
        &mut controller,
        json!({
            "type": "issue_command",
            "command": "bogus",
            "target_uid": "A1"
        }),
    ));

    match controller.rx.try_recv().expect("command error") {
        ServerMessage::CommandError { message } => {
            assert!(message.contains("unknown command"), "{message}");
        }
        other => panic!("expected command_error, got {other:?}"),
    }
    assert_silent(&mut agent);
}

#[test]
fn missing_and_unreachable_targets_error_to_issuer() {
    let (hub, _dir) = hub();
    let mut controller = open();
    register_controller(&hub, &mut controller);

    assert!(send(
        &hub,
        &mut controller,
        json!({
            "type": "issue_command",
            "command": "request_sms",
            "target_uid": "ghost"
        }),
    ));
    match controller.rx.try_recv().expect("command error") {
        ServerMessage::CommandError { message } => {
            assert!(message.contains("not connected"), "{message}");
        }
        other => panic!("expected command_error, got {other:?}"),
    }

    // Registered but its channel is gone: reported as unreachable.
    let mut agent = open();
    register_agent(&hub, &mut agent, "A1");
    controller.rx.try_recv().expect("agent_added");
    drop(agent.rx);
    assert!(send(
        &hub,
        &mut controller,
        json!({
            "type": "issue_command",
            "command": "request_sms",
            "target_uid": "A1"
        }),
    ));
    match controller.rx.try_recv().expect("command error") {
        ServerMessage::CommandError { message } => {
            assert!(message.contains("unreachable"), "{message}");
        }
        other => panic!("expected command_error, got {other:?}"),
    }
}

#[test]
fn malformed_message_log_recovers_and_keeps_the_connection() {
    let (hub, _dir) = hub();
    let mut controller = open();
    let mut agent = open();
    register_controller(&hub, &mut controller);
    register_agent(&hub, &mut agent, "A1");
    controller.rx.try_recv().expect("agent_added");

    let kept_open = send(
        &hub,
        &mut agent,
        json!({
            "type": "telemetry",
            "kind": "message_log",
            "messages": "not valid json"
        }),
    );

    assert!(kept_open, "decode failures must never drop the connection");
    assert_eq!(
        controller.rx.try_recv().expect("recovered event"),
        ServerMessage::MessageLog {
            uid: "A1".into(),
            data: vec![],
        }
    );
}

#[test]
fn telemetry_without_controller_is_dropped_not_buffered() {
    let (hub, _dir) = hub();
    let mut agent = open();
    register_agent(&hub, &mut agent, "A1");

    assert!(send(
        &hub,
        &mut agent,
        json!({"type": "telemetry", "kind": "message_log", "messages": "[]"}),
    ));

    // A controller arriving later sees the roster but no replayed telemetry.
    let mut controller = open();
    let roster = register_controller(&hub, &mut controller);
    assert_eq!(roster.len(), 1);
    assert_silent(&mut controller);
}

#[test]
fn agent_disconnect_notifies_controller_exactly_once() {
    let (hub, _dir) = hub();
    let mut controller = open();
    let mut agent = open();
    register_controller(&hub, &mut controller);
    register_agent(&hub, &mut agent, "A1");
    controller.rx.try_recv().expect("agent_added");

    disconnect(&hub, agent.id, &agent.session);

    assert!(hub.registry.list_agents().is_empty());
    assert_eq!(
        controller.rx.try_recv().expect("agent_removed"),
        ServerMessage::AgentRemoved { uid: "A1".into() }
    );
    assert_silent(&mut controller);
}

#[test]
fn superseded_controller_receives_nothing_further() {
    let (hub, _dir) = hub();
    let mut first = open();
    let mut second = open();
    let mut agent = open();
    register_agent(&hub, &mut agent, "A1");

    register_controller(&hub, &mut first);
    register_controller(&hub, &mut second);

    assert!(send(
        &hub,
        &mut agent,
        json!({"type": "telemetry", "kind": "contact_list", "contacts": "[]"}),
    ));

    assert_eq!(
        second.rx.try_recv().expect("telemetry for the new controller"),
        ServerMessage::ContactList {
            uid: "A1".into(),
            data: vec![],
        }
    );
    // Still open at the transport level, but no longer addressed.
    assert_silent(&mut first);

    // The first controller's eventual disconnect must not clear the slot.
    disconnect(&hub, first.id, &first.session);
    assert!(hub.registry.has_controller());
}

#[test]
fn takeover_can_be_disabled_by_configuration() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config {
        data_dir: dir.path().to_path_buf(),
        archive: false,
        controller_takeover: false,
        ..Config::default()
    };
    let config = Arc::new(config);
    let archive = Archive::bootstrap(&config).expect("bootstrap");
    let hub = Hub::new(config, archive);

    let mut first = open();
    let mut second = open();
    register_controller(&hub, &mut first);

    assert!(send(
        &hub,
        &mut second,
        json!({
            "type": "register_controller_with_credentials",
            "email": EMAIL,
            "password": PASSWORD
        }),
    ));
    match second.rx.try_recv().expect("rejection") {
        ServerMessage::AuthError { .. } => {}
        other => panic!("expected auth_error, got {other:?}"),
    }
    assert_eq!(second.session, Session::Unregistered);

    // The incumbent is untouched.
    assert_eq!(
        hub.registry.controller().map(|handle| handle.conn_id),
        Some(first.id)
    );
}

#[test]
fn normalized_events_keep_documented_field_order() {
    let event = ServerMessage::Location {
        uid: "A1".into(),
        latitude: Some(1.0),
        longitude: Some(2.0),
        accuracy: Some(3.0),
    };
    assert_eq!(
        serde_json::to_string(&event).expect("serialize"),
        r#"{"type":"location","uid":"A1","latitude":1.0,"longitude":2.0,"accuracy":3.0}"#
    );

    let event = ServerMessage::MessageLog {
        uid: "A1".into(),
        data: vec![json!({"from": "x"})],
    };
    assert_eq!(
        serde_json::to_string(&event).expect("serialize"),
        r#"{"type":"message_log","uid":"A1","data":[{"from":"x"}]}"#
    );
}
