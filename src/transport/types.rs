//! Transport data types and error definitions

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Opaque session identifier assigned by the transport on a successful connect
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Push channels exposed by the transport for every session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Raw shell output
    Output,
    /// Error frames on an established session
    Error,
    /// Remote end closed the session
    Closed,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::Output, Topic::Error, Topic::Closed];

    pub fn name(&self) -> &'static str {
        match self {
            Topic::Output => "output",
            Topic::Error => "error",
            Topic::Closed => "closed",
        }
    }

    /// Topic key scoped to a session, e.g. `output:s1`
    pub fn key(&self, session_id: &SessionId) -> String {
        format!("{}:{}", self.name(), session_id)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Handle returned by listener registration, used to unregister it later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Callback invoked with each payload delivered on a topic
pub type Listener = Arc<dyn Fn(String) + Send + Sync + 'static>;

/// Parameters of a remote exec connect call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub pod: String,
    pub namespace: String,
    pub container: String,
    /// Shell binaries to try in order; the first one present in the container is used.
    /// Empty leaves the choice to the transport.
    pub shell_candidates: Vec<String>,
}

/// Error types reported by transport collaborators
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Remote rejected the connection: {0}")]
    Rejected(String),
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}
