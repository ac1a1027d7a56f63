//! Message routing
//!
//! Single entry point for decoded frames from either peer: resolves the
//! message against the session store, runs it through the negotiation
//! coordinator or the deduplicator as appropriate, and forwards to the
//! opposite role's connection. Best-effort signaling: unknown types and
//! malformed frames are dropped and logged, never fatal.

use crate::config::RelayConfig;
use crate::dedupe::EventDeduplicator;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, Role};
use crate::session::SessionStore;
use crate::{Error, Result};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Top-level dispatcher shared by all connection tasks
pub struct MessageRouter {
    store: SessionStore,
    registry: ConnectionRegistry,
    dedupe: EventDeduplicator,
    session_ttl: Duration,
}

impl MessageRouter {
    /// Build a router from validated configuration
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            store: SessionStore::new(config.session_id_length, config.max_sessions),
            registry: ConnectionRegistry::new(),
            dedupe: EventDeduplicator::new(config.dedupe_window()),
            session_ttl: config.session_ttl(),
        }
    }

    /// Register a freshly accepted connection
    pub async fn register(&self, handle: ConnectionHandle) {
        self.registry.register(handle).await;
    }

    /// Handle one inbound text frame from `conn`
    ///
    /// Errors never propagate to the transport: protocol-contract failures
    /// are reported back as `error` notifications, expected races are
    /// logged and dropped.
    pub async fn handle(&self, conn: &ConnectionHandle, raw: &str) {
        let msg = match ClientMessage::from_json(raw) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(connection = %conn.id(), error = %e, "Dropping undecodable frame");
                return;
            }
        };

        if let Err(e) = self.dispatch(conn, msg).await {
            if e.is_reportable() {
                conn.send(ServerMessage::Error {
                    reason: e.to_string(),
                });
            } else if e.is_silent_drop() {
                debug!(connection = %conn.id(), error = %e, "Dropping message");
            } else {
                warn!(connection = %conn.id(), error = %e, "Message handling failed");
            }
        }
    }

    async fn dispatch(&self, conn: &ConnectionHandle, msg: ClientMessage) -> Result<()> {
        match msg {
            ClientMessage::CreateSession { session_id } => {
                self.create_session(conn, session_id).await
            }
            ClientMessage::JoinSession { session_id } => self.join_session(conn, &session_id).await,
            ClientMessage::Offer { session_id, sdp } => self.offer(conn, &session_id, sdp).await,
            ClientMessage::Answer { session_id, sdp } => self.answer(conn, &session_id, sdp).await,
            ClientMessage::IceCandidate {
                session_id,
                candidate,
            } => self.ice_candidate(conn, &session_id, candidate).await,
            ClientMessage::InputEvent { session_id, event } => {
                self.input_event(conn, &session_id, event).await
            }
        }
    }

    async fn create_session(
        &self,
        conn: &ConnectionHandle,
        requested: Option<String>,
    ) -> Result<()> {
        // First message of this type fixes the role; a connection that
        // already declared viewer cannot own a session.
        self.require_role(conn.id(), Role::Agent).await?;

        // Session linkage is immutable: an agent that already owns a
        // session may only re-attach to that same id. Allowing a second
        // session would orphan the first one on disconnect.
        if let Some((_, Some(linked))) = self.registry.linkage(conn.id()).await {
            if requested.as_deref() != Some(linked.as_str()) {
                return Err(Error::SessionError(format!(
                    "Connection already owns session {}",
                    linked
                )));
            }
        }

        let session_id = self.store.create(conn.clone(), requested).await?;
        self.registry
            .assign(conn.id(), Role::Agent, &session_id)
            .await?;

        conn.send(ServerMessage::SessionCreated {
            session_id: session_id.clone(),
        });
        info!(connection = %conn.id(), session = %session_id, "Session created");
        Ok(())
    }

    async fn join_session(&self, conn: &ConnectionHandle, session_id: &str) -> Result<()> {
        self.require_role(conn.id(), Role::Viewer).await?;

        // A viewer linked to another session cannot switch sessions on
        // the same socket; a retry for the same id is fine.
        if let Some((_, Some(linked))) = self.registry.linkage(conn.id()).await {
            if linked != session_id {
                return Err(Error::SessionError(format!(
                    "Connection already attached to session {}",
                    linked
                )));
            }
        }

        let joined = self.store.join(session_id, conn.clone()).await?;
        self.registry
            .assign(conn.id(), Role::Viewer, session_id)
            .await?;

        // A join retry from the same socket displaces itself; clearing
        // its own linkage here would brick the pairing.
        if let Some(displaced) = joined.displaced {
            if displaced.id() != conn.id() {
                self.registry.clear_session(displaced.id()).await;
            }
        }

        let notice = ServerMessage::ViewerJoined {
            session_id: session_id.to_string(),
        };
        joined.agent.send(notice.clone());
        conn.send(notice);
        Ok(())
    }

    async fn offer(&self, conn: &ConnectionHandle, session_id: &str, sdp: String) -> Result<()> {
        self.require_linkage(conn.id(), Role::Agent, session_id).await?;

        let viewer = self.store.apply_offer(session_id, &sdp).await?;
        viewer.send(ServerMessage::Offer {
            session_id: session_id.to_string(),
            sdp,
        });
        Ok(())
    }

    async fn answer(&self, conn: &ConnectionHandle, session_id: &str, sdp: String) -> Result<()> {
        self.require_linkage(conn.id(), Role::Viewer, session_id).await?;

        let result = self.store.apply_answer(session_id, &sdp).await?;
        result.agent.send(ServerMessage::Answer {
            session_id: session_id.to_string(),
            sdp,
        });

        // Queued candidates flush in receipt order, each to the peer
        // opposite its origin, exactly once.
        let flushed = result.flushes.len();
        for (target, pending) in result.flushes {
            target.send(ServerMessage::IceCandidate {
                session_id: session_id.to_string(),
                candidate: pending.candidate,
            });
        }
        if flushed > 0 {
            debug!(session = session_id, count = flushed, "Flushed queued candidates");
        }
        Ok(())
    }

    async fn ice_candidate(
        &self,
        conn: &ConnectionHandle,
        session_id: &str,
        candidate: crate::protocol::CandidatePayload,
    ) -> Result<()> {
        let from = self.resolve_role(conn.id(), session_id).await?;

        match self.store.accept_candidate(session_id, from, candidate).await? {
            Some((target, candidate)) => {
                target.send(ServerMessage::IceCandidate {
                    session_id: session_id.to_string(),
                    candidate,
                });
            }
            None => {
                debug!(session = session_id, %from, "Queued early ice candidate");
            }
        }
        Ok(())
    }

    async fn input_event(
        &self,
        conn: &ConnectionHandle,
        session_id: &str,
        event: crate::protocol::InputAction,
    ) -> Result<()> {
        self.require_linkage(conn.id(), Role::Viewer, session_id).await?;

        if self.dedupe.should_suppress(session_id, &event).await {
            return Ok(());
        }

        let agent = self.store.input_target(session_id).await?;
        agent.send(ServerMessage::InputEvent {
            session_id: session_id.to_string(),
            event,
        });
        Ok(())
    }

    /// Teardown entry for a closed connection; idempotent
    pub async fn disconnect(&self, conn_id: ConnectionId) {
        let Some((role, session_id)) = self.registry.unregister(conn_id).await else {
            return;
        };

        let (Some(role), Some(session_id)) = (role, session_id) else {
            debug!(connection = %conn_id, "Unpaired connection closed");
            return;
        };

        match role {
            Role::Agent => {
                if let Some(session) = self.store.remove_agent(&session_id, conn_id).await {
                    if let Some(viewer) = session.viewer() {
                        viewer.send(ServerMessage::AgentDisconnected {
                            session_id: session_id.clone(),
                        });
                        self.registry.clear_session(viewer.id()).await;
                    }
                }
            }
            Role::Viewer => {
                if let Some(agent) = self.store.detach_viewer(&session_id, conn_id).await {
                    agent.send(ServerMessage::ViewerDisconnected {
                        session_id: session_id.clone(),
                    });
                }
            }
        }
    }

    /// Destroy sessions older than the TTL and notify their peers
    ///
    /// Runs on the sweep interval; takes the same locks as message
    /// handling so a session is never destroyed mid-forward.
    pub async fn sweep_expired(&self) -> usize {
        let removed = self.store.sweep_expired(self.session_ttl).await;
        let count = removed.len();

        for session in removed {
            let session_id = session.id().to_string();
            if let Some(viewer) = session.viewer() {
                viewer.send(ServerMessage::AgentDisconnected {
                    session_id: session_id.clone(),
                });
                self.registry.clear_session(viewer.id()).await;
            }
            session.agent().send(ServerMessage::Error {
                reason: format!("Session expired: {}", session_id),
            });
            self.registry.clear_session(session.agent().id()).await;
        }

        count
    }

    /// A connection may only ever act as one role
    async fn require_role(&self, conn_id: ConnectionId, wanted: Role) -> Result<()> {
        match self.registry.linkage(conn_id).await {
            Some((Some(role), _)) if role != wanted => Err(Error::SessionError(format!(
                "Connection already declared role {}",
                role
            ))),
            Some(_) => Ok(()),
            None => Err(Error::ConnectionNotFound(conn_id.to_string())),
        }
    }

    /// The sender must be linked to this session with this role
    async fn require_linkage(
        &self,
        conn_id: ConnectionId,
        wanted: Role,
        session_id: &str,
    ) -> Result<()> {
        let role = self.resolve_role(conn_id, session_id).await?;
        if role != wanted {
            return Err(Error::StaleNegotiation(format!(
                "{} message from {} connection",
                wanted.opposite(),
                role
            )));
        }
        Ok(())
    }

    async fn resolve_role(&self, conn_id: ConnectionId, session_id: &str) -> Result<Role> {
        match self.registry.linkage(conn_id).await {
            Some((Some(role), Some(linked))) if linked == session_id => Ok(role),
            Some(_) => Err(Error::StaleNegotiation(
                "message for a session this connection is not linked to".to_string(),
            )),
            None => Err(Error::ConnectionNotFound(conn_id.to_string())),
        }
    }

    /// Number of live sessions
    pub async fn session_count(&self) -> usize {
        self.store.session_count().await
    }

    /// Number of live connections
    pub async fn connection_count(&self) -> usize {
        self.registry.connection_count().await
    }

    /// Negotiation state of a session, if it exists (introspection)
    pub async fn negotiation_state(
        &self,
        session_id: &str,
    ) -> Option<crate::negotiation::NegotiationState> {
        self.store.negotiation_state(session_id).await
    }
}
