//! Signaling relay for agent/viewer remote-control pairing
//!
//! A controllable **agent** endpoint and a remote **viewer** endpoint
//! discover each other through a session identifier and establish a direct
//! peer-to-peer channel via an external offer/answer/ICE exchange. This
//! crate is the relay in the middle: it pairs two WebSocket connections
//! under one session id, forwards negotiation messages and remote-control
//! input events with correct ordering and deduplication, and manages
//! session creation, expiry, and role-aware teardown. Negotiation payloads
//! are transported verbatim and never interpreted.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  agent / viewer WebSocket connections                │
//! │  ↓ (one read loop per connection, FIFO)              │
//! │  SignalingServer                                     │
//! │  └─ MessageRouter (decode → dispatch → forward)      │
//! │     ├─ SessionStore (pairing, lookup, expiry)        │
//! │     │   └─ Negotiation (per-session state machine)   │
//! │     ├─ ConnectionRegistry (role/session linkage)     │
//! │     └─ EventDeduplicator (commit-event memo)         │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use remotedesk_signaling::{RelayConfig, SignalingServer};
//!
//! # async fn example() -> remotedesk_signaling::Result<()> {
//! let config = RelayConfig {
//!     bind_address: "127.0.0.1".to_string(),
//!     port: 9030,
//!     ..Default::default()
//! };
//!
//! let server = SignalingServer::new(config)?;
//! let handle = server.start().await?;
//! println!("listening on {}", handle.local_addr());
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod dedupe;
pub mod error;
pub mod negotiation;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;

// Re-exports for the public API
pub use config::RelayConfig;
pub use dedupe::EventDeduplicator;
pub use error::{Error, Result};
pub use negotiation::{CandidateDisposition, Negotiation, NegotiationState, PendingCandidate};
pub use protocol::{CandidatePayload, ClientMessage, InputAction, MouseButton, ServerMessage};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, Role};
pub use router::MessageRouter;
pub use server::{ServerHandle, SignalingServer};
pub use session::{Session, SessionId, SessionStore};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
