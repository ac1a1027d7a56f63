//! Per-session negotiation state machine
//!
//! Governs one session's offer/answer/ICE exchange: rejects stale or
//! duplicate answers, queues candidates that arrive before the remote
//! description is ready, and resets cleanly when a viewer rejoins so a
//! fresh round is never contaminated by guards from the previous one.

use crate::protocol::CandidatePayload;
use crate::registry::Role;
use crate::{Error, Result};
use std::collections::VecDeque;
use tracing::debug;

/// Negotiation lifecycle for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// No session yet
    Idle,
    /// Session exists, no viewer attached
    AgentReady,
    /// Viewer attached; waiting for the agent's offer
    ViewerJoined,
    /// Offer forwarded to the viewer; waiting for the answer
    OfferSent,
    /// Answer forwarded to the agent; queued candidates flushed
    AnswerApplied,
    /// Advisory: post-answer traffic observed on the session
    Connected,
    /// Session destroyed
    Closed,
}

impl std::fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NegotiationState::Idle => "idle",
            NegotiationState::AgentReady => "agent-ready",
            NegotiationState::ViewerJoined => "viewer-joined",
            NegotiationState::OfferSent => "offer-sent",
            NegotiationState::AnswerApplied => "answer-applied",
            NegotiationState::Connected => "connected",
            NegotiationState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

/// An ICE candidate held back until the remote description is applied
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCandidate {
    /// Role that sent the candidate; flushed to the opposite peer
    pub from: Role,
    /// The candidate payload, transported verbatim
    pub candidate: CandidatePayload,
}

/// What the router should do with an inbound candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDisposition {
    /// Remote description is in place; forward to the opposite peer now
    Forward,
    /// No remote description yet; held in the pending queue
    Queued,
}

/// The coordinator for one session's negotiation round
#[derive(Debug)]
pub struct Negotiation {
    state: NegotiationState,
    pending: VecDeque<PendingCandidate>,
}

impl Negotiation {
    /// Coordinator for a freshly created session
    pub fn new() -> Self {
        Self {
            state: NegotiationState::Idle,
            pending: VecDeque::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Number of queued candidates
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn transition(&mut self, next: NegotiationState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "Negotiation transition");
            self.state = next;
        }
    }

    /// Session created: the agent side is ready to be paired
    pub fn agent_ready(&mut self) {
        self.transition(NegotiationState::AgentReady);
    }

    /// A viewer joined (first join or rejoin)
    ///
    /// Resets to a fresh round: the pending queue and the answer-applied
    /// guard are cleared so re-negotiation never replays stale state.
    pub fn viewer_joined(&mut self) {
        self.pending.clear();
        self.transition(NegotiationState::ViewerJoined);
    }

    /// The viewer detached; the session parks until a rejoin
    pub fn viewer_detached(&mut self) {
        self.pending.clear();
        self.transition(NegotiationState::AgentReady);
    }

    /// Apply a well-formed offer from the agent
    ///
    /// # Errors
    ///
    /// `InvalidPayload` if the sdp is empty; `StaleNegotiation` if the
    /// round is not waiting for an offer (the external peer state machine
    /// is not re-enterable).
    pub fn apply_offer(&mut self, sdp: &str) -> Result<()> {
        if sdp.is_empty() {
            return Err(Error::InvalidPayload("offer with empty sdp".to_string()));
        }

        match self.state {
            NegotiationState::ViewerJoined => {
                self.transition(NegotiationState::OfferSent);
                Ok(())
            }
            state => Err(Error::StaleNegotiation(format!(
                "offer received in state {}",
                state
            ))),
        }
    }

    /// Apply a well-formed answer from the viewer
    ///
    /// Returns the queued candidates in receipt order; the caller flushes
    /// each to the peer opposite its origin, exactly once.
    ///
    /// # Errors
    ///
    /// `InvalidPayload` if the sdp is empty; `StaleNegotiation` for a
    /// duplicate or late answer (re-delivery of an already-applied answer
    /// must be a no-op).
    pub fn apply_answer(&mut self, sdp: &str) -> Result<Vec<PendingCandidate>> {
        if sdp.is_empty() {
            return Err(Error::InvalidPayload("answer with empty sdp".to_string()));
        }

        match self.state {
            NegotiationState::OfferSent => {
                self.transition(NegotiationState::AnswerApplied);
                Ok(self.pending.drain(..).collect())
            }
            state => Err(Error::StaleNegotiation(format!(
                "answer received in state {}",
                state
            ))),
        }
    }

    /// Accept an inbound ICE candidate
    ///
    /// Between join and answer the candidate is held in the FIFO queue;
    /// after the answer it is forwarded directly.
    ///
    /// # Errors
    ///
    /// `InvalidPayload` if the candidate line is empty;
    /// `StaleNegotiation` if no negotiation round is in progress (no
    /// viewer attached, or the session is closed).
    pub fn accept_candidate(
        &mut self,
        from: Role,
        candidate: CandidatePayload,
    ) -> Result<CandidateDisposition> {
        if candidate.candidate.is_empty() {
            return Err(Error::InvalidPayload("empty ice candidate".to_string()));
        }

        match self.state {
            NegotiationState::ViewerJoined | NegotiationState::OfferSent => {
                self.pending.push_back(PendingCandidate { from, candidate });
                Ok(CandidateDisposition::Queued)
            }
            NegotiationState::AnswerApplied | NegotiationState::Connected => {
                Ok(CandidateDisposition::Forward)
            }
            state => Err(Error::StaleNegotiation(format!(
                "candidate in state {}",
                state
            ))),
        }
    }

    /// Advisory transition inferred from post-answer liveness
    pub fn mark_connected(&mut self) {
        if self.state == NegotiationState::AnswerApplied {
            self.transition(NegotiationState::Connected);
        }
    }

    /// Terminal transition on session destruction
    pub fn close(&mut self) {
        self.pending.clear();
        self.transition(NegotiationState::Closed);
    }
}

impl Default for Negotiation {
    fn default() -> Self {
        Self::new()
    }
}
