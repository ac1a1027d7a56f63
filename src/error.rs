//! Error types for the signaling relay

/// Result type alias using the relay Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in relay operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No live session with the given id
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Requested session id is already owned by another live agent
    #[error("Duplicate session: {0}")]
    DuplicateSession(String),

    /// Session limit reached or other session-management failure
    #[error("Session error: {0}")]
    SessionError(String),

    /// Malformed negotiation payload (missing or empty required fields)
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Duplicate or late answer for an already-applied negotiation round
    #[error("Stale negotiation: {0}")]
    StaleNegotiation(String),

    /// Connection not present in the registry
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error should be reported back to the sender
    ///
    /// `SessionNotFound` and `DuplicateSession` are part of the protocol
    /// contract and surface as `error` notifications; everything else in
    /// the message path is dropped and logged.
    pub fn is_reportable(&self) -> bool {
        matches!(
            self,
            Error::SessionNotFound(_) | Error::DuplicateSession(_) | Error::SessionError(_)
        )
    }

    /// Check if this error is an expected race, dropped without reporting
    pub fn is_silent_drop(&self) -> bool {
        matches!(self, Error::InvalidPayload(_) | Error::StaleNegotiation(_))
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}
