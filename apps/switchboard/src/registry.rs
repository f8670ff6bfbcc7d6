use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{AgentRecord, Identity, ServerMessage};

/// Identifies one WebSocket connection for the lifetime of its task.
pub type ConnectionId = Uuid;

/// Fire-and-forget outbound handle for a connection; drained by its writer
/// task. Sends never block and never surface delivery errors beyond a closed
/// channel.
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// Registry-owned state for one connected agent.
#[derive(Debug)]
pub struct AgentEntry {
    pub record: AgentRecord,
    pub conn_id: ConnectionId,
    pub outbox: Outbox,
    pub connected_at: DateTime<Utc>,
}

impl AgentEntry {
    pub fn new(record: AgentRecord, conn_id: ConnectionId, outbox: Outbox) -> Self {
        Self {
            record,
            conn_id,
            outbox,
            connected_at: Utc::now(),
        }
    }

    /// Controller-facing projection of this entry.
    pub fn snapshot(&self) -> AgentRecord {
        let mut record = self.record.clone();
        record.connected_at = Some(self.connected_at);
        record
    }
}

/// Registry-owned state for the controller slot.
#[derive(Debug)]
pub struct ControllerEntry {
    pub identity: Identity,
    pub conn_id: ConnectionId,
    pub outbox: Outbox,
    pub connected_at: DateTime<Utc>,
}

impl ControllerEntry {
    pub fn new(identity: Identity, conn_id: ConnectionId, outbox: Outbox) -> Self {
        Self {
            identity,
            conn_id,
            outbox,
            connected_at: Utc::now(),
        }
    }
}

/// Cloned send handle for a registered agent, valid outside the lock.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    pub uid: String,
    pub conn_id: ConnectionId,
    pub outbox: Outbox,
}

impl AgentHandle {
    pub fn send(&self, message: ServerMessage) -> bool {
        self.outbox.send(message).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.outbox.is_closed()
    }
}

/// Cloned send handle for the current controller, valid outside the lock.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    pub conn_id: ConnectionId,
    pub outbox: Outbox,
}

impl ControllerHandle {
    pub fn send(&self, message: ServerMessage) -> bool {
        self.outbox.send(message).is_ok()
    }
}

#[derive(Default)]
struct RegistryInner {
    agents: HashMap<String, AgentEntry>,
    controller: Option<ControllerEntry>,
}

/// In-memory store of connected agents plus the at-most-one controller slot.
///
/// All state lives behind one mutex; every operation is a short synchronous
/// critical section with no await points, so concurrent connection tasks
/// always observe the agent map and controller slot in a consistent state.
/// Nothing here is durable.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, RegistryInner> {
        // A poisoned lock only means another connection task panicked
        // mid-mutation of plain maps; the state is still coherent enough to
        // keep relaying.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or replaces the entry keyed by the record's uid, returning the
    /// replaced entry if the uid was already present. Reconnection therefore
    /// never yields duplicate roster entries.
    pub fn register_agent(&self, entry: AgentEntry) -> Option<AgentEntry> {
        self.locked().agents.insert(entry.record.uid.clone(), entry)
    }

    /// Removes and returns the agent whose live connection matches. An entry
    /// replaced by a reconnect keeps its newer connection id, so the eventual
    /// disconnect of the superseded socket is a no-op here.
    pub fn remove_agent(&self, conn_id: ConnectionId) -> Option<AgentRecord> {
        let mut inner = self.locked();
        let uid = inner
            .agents
            .iter()
            .find(|(_, entry)| entry.conn_id == conn_id)
            .map(|(uid, _)| uid.clone())?;
        inner.agents.remove(&uid).map(|entry| entry.snapshot())
    }

    pub fn find_agent(&self, uid: &str) -> Option<AgentHandle> {
        self.locked().agents.get(uid).map(|entry| AgentHandle {
            uid: entry.record.uid.clone(),
            conn_id: entry.conn_id,
            outbox: entry.outbox.clone(),
        })
    }

    /// Unconditionally overwrites the controller slot, returning the
    /// superseded entry (still live at the transport level, no longer
    /// addressable) if one was present.
    pub fn set_controller(&self, entry: ControllerEntry) -> Option<ControllerEntry> {
        self.locked().controller.replace(entry)
    }

    /// Clears the controller slot only when it is still held by the given
    /// connection, so a stale disconnect cannot evict a newer controller.
    pub fn clear_controller_if(&self, conn_id: ConnectionId) -> bool {
        let mut inner = self.locked();
        match &inner.controller {
            Some(entry) if entry.conn_id == conn_id => {
                inner.controller = None;
                true
            }
            _ => false,
        }
    }

    pub fn controller(&self) -> Option<ControllerHandle> {
        self.locked().controller.as_ref().map(|entry| ControllerHandle {
            conn_id: entry.conn_id,
            outbox: entry.outbox.clone(),
        })
    }

    pub fn has_controller(&self) -> bool {
        self.locked().controller.is_some()
    }

    /// Roster snapshot, each record stamped with its registration time.
    pub fn list_agents(&self) -> Vec<AgentRecord> {
        self.locked()
            .agents
            .values()
            .map(AgentEntry::snapshot)
            .collect()
    }

    pub fn agent_count(&self) -> usize {
        self.locked().agents.len()
    }
}
