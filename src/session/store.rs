//! Session store: pairing, lookup, and expiry
//!
//! A session binds exactly one agent connection and at most one viewer
//! connection under one identifier. The store owns the id→session mapping;
//! all mutation happens under its lock, and outbound notifications are
//! fire-and-forget sends that never block, so no send is awaited while the
//! lock is held.

use crate::negotiation::{CandidateDisposition, Negotiation, PendingCandidate};
use crate::protocol::CandidatePayload;
use crate::registry::{ConnectionHandle, ConnectionId, Role};
use crate::{Error, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Session identifier, the pairing key
pub type SessionId = String;

/// One agent/viewer pairing with its negotiation round
pub struct Session {
    id: SessionId,
    agent: ConnectionHandle,
    viewer: Option<ConnectionHandle>,
    created_at: Instant,
    negotiation: Negotiation,
}

impl Session {
    fn new(id: SessionId, agent: ConnectionHandle) -> Self {
        info!(session = %id, agent = %agent.id(), "Creating session");

        let mut negotiation = Negotiation::new();
        negotiation.agent_ready();

        Self {
            id,
            agent,
            viewer: None,
            created_at: Instant::now(),
            negotiation,
        }
    }

    /// Session identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The agent's connection handle
    pub fn agent(&self) -> &ConnectionHandle {
        &self.agent
    }

    /// The viewer's connection handle, if one is attached
    pub fn viewer(&self) -> Option<&ConnectionHandle> {
        self.viewer.as_ref()
    }

    /// Age of the session since creation
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Current negotiation state
    pub fn negotiation_state(&self) -> crate::negotiation::NegotiationState {
        self.negotiation.state()
    }

    fn peer_of(&self, role: Role) -> Option<&ConnectionHandle> {
        match role.opposite() {
            Role::Agent => Some(&self.agent),
            Role::Viewer => self.viewer.as_ref(),
        }
    }
}

/// Result of a successful join: both peers, plus any displaced viewer
pub struct JoinResult {
    /// The session's agent connection
    pub agent: ConnectionHandle,
    /// A previous viewer connection displaced by this join, if any
    pub displaced: Option<ConnectionHandle>,
}

/// Result of applying an answer: forward target plus flush plan
pub struct AnswerResult {
    /// The agent connection the answer is forwarded to
    pub agent: ConnectionHandle,
    /// Queued candidates with the handle each one flushes to, FIFO
    pub flushes: Vec<(ConnectionHandle, PendingCandidate)>,
}

/// Maps session identifiers to live pairings
///
/// Owns creation, lookup, and expiry. Generated identifiers are random
/// alphanumeric strings collision-checked against the live store.
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,

    /// Length of generated session ids
    id_length: usize,

    /// Maximum concurrent sessions (0 = unlimited)
    max_sessions: usize,
}

impl SessionStore {
    /// Create an empty store
    pub fn new(id_length: usize, max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            id_length,
            max_sessions,
        }
    }

    fn generate_id(&self, live: &HashMap<SessionId, Session>) -> SessionId {
        loop {
            let id: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(self.id_length)
                .map(char::from)
                .collect();
            if !live.contains_key(&id) {
                return id;
            }
        }
    }

    /// Create a session owned by `agent`, adopting `requested` if unused
    ///
    /// Re-creation by the connection that already owns the id is an
    /// idempotent re-attach.
    ///
    /// # Errors
    ///
    /// `DuplicateSession` if the requested id is owned by a different live
    /// agent connection; `SessionError` if the session cap is reached.
    pub async fn create(
        &self,
        agent: ConnectionHandle,
        requested: Option<String>,
    ) -> Result<SessionId> {
        let mut sessions = self.sessions.write().await;

        if let Some(id) = requested {
            if let Some(existing) = sessions.get(&id) {
                if existing.agent.id() == agent.id() {
                    debug!(session = %id, "Idempotent session re-attach");
                    return Ok(id);
                }
                return Err(Error::DuplicateSession(id));
            }

            self.check_capacity(&sessions)?;
            sessions.insert(id.clone(), Session::new(id.clone(), agent));
            return Ok(id);
        }

        self.check_capacity(&sessions)?;
        let id = self.generate_id(&sessions);
        sessions.insert(id.clone(), Session::new(id.clone(), agent));
        Ok(id)
    }

    fn check_capacity(&self, sessions: &HashMap<SessionId, Session>) -> Result<()> {
        if self.max_sessions > 0 && sessions.len() >= self.max_sessions {
            return Err(Error::SessionError(format!(
                "Maximum number of sessions reached ({})",
                self.max_sessions
            )));
        }
        Ok(())
    }

    /// Attach `viewer` to the session, starting a fresh negotiation round
    ///
    /// A viewer already attached is displaced (reconnect-race support); the
    /// displaced handle is returned so the caller can clear its linkage.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` if no session with that id exists.
    pub async fn join(&self, session_id: &str, viewer: ConnectionHandle) -> Result<JoinResult> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        let displaced = session.viewer.replace(viewer);
        if let Some(old) = &displaced {
            warn!(
                session = session_id,
                displaced = %old.id(),
                "New viewer displaces previous viewer connection"
            );
        }

        session.negotiation.viewer_joined();
        info!(session = session_id, "Viewer joined");

        Ok(JoinResult {
            agent: session.agent.clone(),
            displaced,
        })
    }

    /// Apply an offer from the agent; returns the viewer handle to forward to
    pub async fn apply_offer(&self, session_id: &str, sdp: &str) -> Result<ConnectionHandle> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        session.negotiation.apply_offer(sdp)?;

        // ViewerJoined implies a viewer is attached
        session
            .viewer
            .clone()
            .ok_or_else(|| Error::StaleNegotiation("offer with no viewer attached".to_string()))
    }

    /// Apply an answer from the viewer; returns the forward/flush plan
    pub async fn apply_answer(&self, session_id: &str, sdp: &str) -> Result<AnswerResult> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        let flushed = session.negotiation.apply_answer(sdp)?;

        let mut flushes = Vec::with_capacity(flushed.len());
        for pending in flushed {
            match session.peer_of(pending.from) {
                Some(target) => flushes.push((target.clone(), pending)),
                None => warn!(
                    session = session_id,
                    "Dropping queued candidate with no live target"
                ),
            }
        }

        Ok(AnswerResult {
            agent: session.agent.clone(),
            flushes,
        })
    }

    /// Accept an ICE candidate; returns the forward target, or `None` if queued
    pub async fn accept_candidate(
        &self,
        session_id: &str,
        from: Role,
        candidate: CandidatePayload,
    ) -> Result<Option<(ConnectionHandle, CandidatePayload)>> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        // Post-answer traffic marks the advisory Connected state
        session.negotiation.mark_connected();

        match session.negotiation.accept_candidate(from, candidate.clone())? {
            CandidateDisposition::Queued => Ok(None),
            CandidateDisposition::Forward => {
                let target = session.peer_of(from).cloned().ok_or_else(|| {
                    Error::StaleNegotiation("candidate with no live target".to_string())
                })?;
                Ok(Some((target, candidate)))
            }
        }
    }

    /// Resolve the agent handle for an input event
    pub async fn input_target(&self, session_id: &str) -> Result<ConnectionHandle> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        session.negotiation.mark_connected();
        Ok(session.agent.clone())
    }

    /// Destroy the session owned by `agent_conn`; returns it for notification
    ///
    /// Idempotent: the session is only removed when it is still owned by
    /// that connection.
    pub async fn remove_agent(&self, session_id: &str, agent_conn: ConnectionId) -> Option<Session> {
        let mut sessions = self.sessions.write().await;

        let owned = sessions
            .get(session_id)
            .map(|s| s.agent.id() == agent_conn)
            .unwrap_or(false);
        if !owned {
            return None;
        }

        let mut session = sessions.remove(session_id)?;
        info!(session = session_id, "Agent disconnected, destroying session");
        session.negotiation.close();
        Some(session)
    }

    /// Detach `viewer_conn` from the session; returns the agent handle
    ///
    /// The session survives and becomes re-joinable. Idempotent: a viewer
    /// already displaced by a rejoin detaches nothing.
    pub async fn detach_viewer(
        &self,
        session_id: &str,
        viewer_conn: ConnectionId,
    ) -> Option<ConnectionHandle> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(session_id)?;

        let attached = session
            .viewer
            .as_ref()
            .map(|v| v.id() == viewer_conn)
            .unwrap_or(false);
        if !attached {
            return None;
        }

        session.viewer = None;
        session.negotiation.viewer_detached();
        info!(session = session_id, "Viewer disconnected, session stays open");
        Some(session.agent.clone())
    }

    /// Destroy every session older than `ttl`; returns them for notification
    pub async fn sweep_expired(&self, ttl: Duration) -> Vec<Session> {
        let mut sessions = self.sessions.write().await;

        let expired: Vec<SessionId> = sessions
            .iter()
            .filter(|(_, s)| s.age() >= ttl)
            .map(|(id, _)| id.clone())
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(mut session) = sessions.remove(&id) {
                info!(session = %id, age_secs = session.age().as_secs(), "Expiring session");
                session.negotiation.close();
                removed.push(session);
            }
        }

        removed
    }

    /// Whether a session with this id exists
    pub async fn has_session(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Number of live sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Negotiation state of a session, if it exists
    pub async fn negotiation_state(
        &self,
        session_id: &str,
    ) -> Option<crate::negotiation::NegotiationState> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(Session::negotiation_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiation::NegotiationState;
    use crate::protocol::ServerMessage;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(Uuid::new_v4(), tx), rx)
    }

    fn store() -> SessionStore {
        SessionStore::new(8, 0)
    }

    #[tokio::test]
    async fn test_create_generates_collision_free_id() {
        let store = store();
        let (agent, _rx) = handle();

        let id = store.create(agent, None).await.unwrap();
        assert_eq!(id.len(), 8);
        assert!(store.has_session(&id).await);
        assert_eq!(
            store.negotiation_state(&id).await,
            Some(NegotiationState::AgentReady)
        );
    }

    #[tokio::test]
    async fn test_create_adopts_requested_id() {
        let store = store();
        let (agent, _rx) = handle();

        let id = store
            .create(agent, Some("device-0042".to_string()))
            .await
            .unwrap();
        assert_eq!(id, "device-0042");
    }

    #[tokio::test]
    async fn test_create_duplicate_rejected_for_other_owner() {
        let store = store();
        let (agent_a, _rx_a) = handle();
        let (agent_b, _rx_b) = handle();

        store
            .create(agent_a.clone(), Some("shared".to_string()))
            .await
            .unwrap();

        let result = store.create(agent_b, Some("shared".to_string())).await;
        assert!(matches!(result, Err(Error::DuplicateSession(_))));

        // Same owner re-attaches idempotently
        let id = store
            .create(agent_a, Some("shared".to_string()))
            .await
            .unwrap();
        assert_eq!(id, "shared");
        assert_eq!(store.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_max_sessions_cap() {
        let store = SessionStore::new(8, 1);
        let (agent_a, _rx_a) = handle();
        let (agent_b, _rx_b) = handle();

        store.create(agent_a, None).await.unwrap();
        let result = store.create(agent_b, None).await;
        assert!(matches!(result, Err(Error::SessionError(_))));
    }

    #[tokio::test]
    async fn test_join_unknown_session() {
        let store = store();
        let (viewer, _rx) = handle();

        let result = store.join("missing1", viewer).await;
        assert!(matches!(result, Err(Error::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_join_and_displacement() {
        let store = store();
        let (agent, _arx) = handle();
        let (viewer1, _v1rx) = handle();
        let (viewer2, _v2rx) = handle();
        let viewer1_id = viewer1.id();

        let id = store.create(agent, None).await.unwrap();

        let joined = store.join(&id, viewer1).await.unwrap();
        assert!(joined.displaced.is_none());
        assert_eq!(
            store.negotiation_state(&id).await,
            Some(NegotiationState::ViewerJoined)
        );

        // Second viewer displaces the first
        let joined = store.join(&id, viewer2).await.unwrap();
        assert_eq!(joined.displaced.map(|h| h.id()), Some(viewer1_id));
    }

    #[tokio::test]
    async fn test_agent_disconnect_destroys_session() {
        let store = store();
        let (agent, _arx) = handle();
        let agent_id = agent.id();

        let id = store.create(agent, None).await.unwrap();

        // Wrong connection id removes nothing
        assert!(store.remove_agent(&id, Uuid::new_v4()).await.is_none());
        assert!(store.has_session(&id).await);

        let removed = store.remove_agent(&id, agent_id).await.unwrap();
        assert_eq!(removed.id(), id);
        assert!(!store.has_session(&id).await);

        // Double close is a no-op
        assert!(store.remove_agent(&id, agent_id).await.is_none());

        // A subsequent join fails
        let (viewer, _vrx) = handle();
        assert!(matches!(
            store.join(&id, viewer).await,
            Err(Error::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_viewer_detach_keeps_session_joinable() {
        let store = store();
        let (agent, _arx) = handle();
        let (viewer, _vrx) = handle();
        let viewer_id = viewer.id();

        let id = store.create(agent, None).await.unwrap();
        store.join(&id, viewer).await.unwrap();

        let agent_handle = store.detach_viewer(&id, viewer_id).await;
        assert!(agent_handle.is_some());
        assert_eq!(
            store.negotiation_state(&id).await,
            Some(NegotiationState::AgentReady)
        );

        // Double detach does not notify twice
        assert!(store.detach_viewer(&id, viewer_id).await.is_none());

        // Re-joinable
        let (viewer2, _v2rx) = handle();
        assert!(store.join(&id, viewer2).await.is_ok());
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let store = store();
        let (agent_a, _arx) = handle();
        let (agent_b, _brx) = handle();

        let id_a = store.create(agent_a, None).await.unwrap();
        let _id_b = store.create(agent_b, None).await.unwrap();

        // TTL zero expires everything
        let removed = store.sweep_expired(Duration::from_secs(0)).await;
        assert_eq!(removed.len(), 2);
        assert_eq!(store.session_count().await, 0);
        assert!(!store.has_session(&id_a).await);

        // Nothing left to expire
        assert!(store.sweep_expired(Duration::from_secs(0)).await.is_empty());
    }

    #[tokio::test]
    async fn test_offer_requires_viewer() {
        let store = store();
        let (agent, _arx) = handle();

        let id = store.create(agent, None).await.unwrap();
        let result = store.apply_offer(&id, "v=0...").await;
        assert!(matches!(result, Err(Error::StaleNegotiation(_))));
    }
}
