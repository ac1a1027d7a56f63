//! Live connection tracking
//!
//! The registry maps transport connections to the logical role each one has
//! assumed and the session it belongs to. Role and session linkage are set
//! at most once per connection and are immutable thereafter.

use crate::protocol::ServerMessage;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Unique identifier for a transport connection
pub type ConnectionId = Uuid;

/// Logical role a connection has assumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The controllable endpoint that owns a session
    Agent,
    /// The endpoint that joins a session to receive media and send input
    Viewer,
}

impl Role {
    /// The peer role on the other side of the session
    pub fn opposite(self) -> Role {
        match self {
            Role::Agent => Role::Viewer,
            Role::Viewer => Role::Agent,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Agent => write!(f, "agent"),
            Role::Viewer => write!(f, "viewer"),
        }
    }
}

/// Outbound handle to one transport connection
///
/// Sends are fire-and-forget: the message is queued on an unbounded channel
/// drained by the connection's writer task, so a send never blocks and is
/// safe to call while holding a lock.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ConnectionHandle {
    /// Create a handle around an outbound message channel
    pub fn new(id: ConnectionId, tx: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self { id, tx }
    }

    /// Connection identifier
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a message for delivery to this connection
    ///
    /// A failed send means the writer task is gone (socket closed); the
    /// message is dropped, which the teardown path makes harmless.
    pub fn send(&self, msg: ServerMessage) {
        if self.tx.send(msg).is_err() {
            debug!(connection = %self.id, "Dropping message for closed connection");
        }
    }
}

/// Registry entry for one live connection
#[derive(Debug, Clone)]
struct ConnectionEntry {
    handle: ConnectionHandle,
    role: Option<Role>,
    session_id: Option<String>,
}

/// Tracks live transport connections and their role/session linkage
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, ConnectionEntry>>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a freshly accepted connection with no role yet
    pub async fn register(&self, handle: ConnectionHandle) {
        let mut connections = self.connections.write().await;
        debug!(connection = %handle.id(), "Registering connection");
        connections.insert(
            handle.id(),
            ConnectionEntry {
                handle,
                role: None,
                session_id: None,
            },
        );
    }

    /// Remove a connection; returns its role and session linkage, if any
    ///
    /// Idempotent: removing an unknown id returns `None` so a double close
    /// never double-notifies.
    pub async fn unregister(&self, id: ConnectionId) -> Option<(Option<Role>, Option<String>)> {
        let mut connections = self.connections.write().await;
        connections
            .remove(&id)
            .map(|entry| (entry.role, entry.session_id))
    }

    /// Fix a connection's role and session; immutable once set
    ///
    /// A connection that already declared a role keeps it; a conflicting
    /// re-declaration is rejected so one socket can never act as both
    /// peers of a session.
    pub async fn assign(&self, id: ConnectionId, role: Role, session_id: &str) -> Result<()> {
        let mut connections = self.connections.write().await;
        let entry = connections
            .get_mut(&id)
            .ok_or_else(|| Error::ConnectionNotFound(id.to_string()))?;

        match entry.role {
            None => {
                debug!(connection = %id, %role, session = session_id, "Assigning role");
                entry.role = Some(role);
                entry.session_id = Some(session_id.to_string());
                Ok(())
            }
            Some(existing) if existing == role => match &entry.session_id {
                // Session linkage is as immutable as the role; a cleared
                // linkage (displaced viewer) may be set again.
                Some(linked) if linked != session_id => Err(Error::SessionError(format!(
                    "Connection already linked to session {}",
                    linked
                ))),
                _ => {
                    entry.session_id = Some(session_id.to_string());
                    Ok(())
                }
            },
            Some(existing) => {
                warn!(
                    connection = %id,
                    declared = %existing,
                    requested = %role,
                    "Rejecting role change"
                );
                Err(Error::SessionError(format!(
                    "Connection already declared role {}",
                    existing
                )))
            }
        }
    }

    /// Clear the session linkage of a displaced connection
    ///
    /// Used when a rejoining viewer displaces a previous viewer connection
    /// whose socket has not been reaped yet; later messages from the old
    /// socket then resolve to nothing and are dropped.
    pub async fn clear_session(&self, id: ConnectionId) {
        let mut connections = self.connections.write().await;
        if let Some(entry) = connections.get_mut(&id) {
            entry.session_id = None;
        }
    }

    /// Role and session linkage for a connection
    pub async fn linkage(&self, id: ConnectionId) -> Option<(Option<Role>, Option<String>)> {
        let connections = self.connections.read().await;
        connections
            .get(&id)
            .map(|entry| (entry.role, entry.session_id.clone()))
    }

    /// Number of live connections
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
