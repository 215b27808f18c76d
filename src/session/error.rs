//! Session error taxonomy

use crate::transport::{SessionId, TransportError};

/// Errors reported by the session core
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Container listing failed; reported once, never retried
    #[error("Container discovery failed: {0}")]
    Discovery(String),
    #[error("No connection within {timeout_ms}ms")]
    ConnectionTimeout { timeout_ms: u64 },
    #[error("Connection rejected: {0}")]
    TransportRejected(String),
    /// Error frame on an already connected session
    #[error("Stream error: {0}")]
    StreamError(String),
    #[error("Session closed by remote")]
    UnexpectedClose,
    #[error("Invalid target: {0}")]
    InvalidTarget(String),
    /// The attempt was superseded by `close()` or a newer `connect()`
    #[error("Connection attempt cancelled")]
    Cancelled,
}

impl From<TransportError> for SessionError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Rejected(reason) => SessionError::TransportRejected(reason),
            other => SessionError::TransportRejected(other.to_string()),
        }
    }
}

/// Subscription contract violations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MultiplexerError {
    #[error("Subscriptions for session {active} are still open, cannot subscribe {requested}")]
    AlreadySubscribed {
        active: SessionId,
        requested: SessionId,
    },
    #[error("Listener registration failed: {0}")]
    Transport(#[from] TransportError),
}
