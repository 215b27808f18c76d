//! Session state machine and cancellation types

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::transport::{ConnectRequest, SessionId};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Error,
    Closed,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Error => "error",
            SessionState::Closed => "closed",
        }
    }

    /// Whether `close()` has anything to release in this state
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Idle | SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Container a session is opened against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub pod: String,
    pub namespace: String,
    pub container: String,
}

impl Target {
    pub fn new(
        pod: impl Into<String>,
        namespace: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            pod: pod.into(),
            namespace: namespace.into(),
            container: container.into(),
        }
    }

    pub fn to_request(&self, shell_candidates: Vec<String>) -> ConnectRequest {
        ConnectRequest {
            pod: self.pod.clone(),
            namespace: self.namespace.clone(),
            container: self.container.clone(),
            shell_candidates,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} [{}]", self.namespace, self.pod, self.container)
    }
}

/// The controller's current session record
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    /// Assigned by the transport once the connect succeeds
    pub id: Option<SessionId>,
    pub target: Target,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn connecting(target: Target) -> Self {
        Self {
            id: None,
            target,
            state: SessionState::Connecting,
            created_at: Utc::now(),
        }
    }
}

/// An in-flight connect correlated with its timeout by generation
#[derive(Debug)]
pub struct ConnectionAttempt {
    pub generation: u64,
    pub timeout: Duration,
    pub started_at: Instant,
    timer: Option<JoinHandle<()>>,
}

impl ConnectionAttempt {
    pub fn new(generation: u64, timeout: Duration) -> Self {
        Self {
            generation,
            timeout,
            started_at: Instant::now(),
            timer: None,
        }
    }

    pub fn set_timer(&mut self, timer: JoinHandle<()>) {
        self.timer = Some(timer);
    }

    /// Stop the timeout timer. The transport call itself keeps running.
    pub fn settle(mut self) -> Duration {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.started_at.elapsed()
    }
}

/// Session statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub connect_attempts: u64,
    pub sessions_connected: u64,
    pub timeouts: u64,
    pub rejections: u64,
    pub stale_sessions_closed: u64,
    pub stream_errors: u64,
    pub remote_closes: u64,
}

/// Writer side of the current session id. Only the controller holds one.
#[derive(Debug, Default)]
pub struct CurrentSession {
    slot: Arc<RwLock<Option<SessionId>>>,
}

/// Read-only view of the current session id
#[derive(Debug, Clone)]
pub struct CurrentSessionView {
    slot: Arc<RwLock<Option<SessionId>>>,
}

impl CurrentSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self) -> CurrentSessionView {
        CurrentSessionView {
            slot: self.slot.clone(),
        }
    }

    pub fn set(&self, session_id: SessionId) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(session_id);
    }

    pub fn clear(&self) -> Option<SessionId> {
        self.slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn get(&self) -> Option<SessionId> {
        self.view().get()
    }
}

impl CurrentSessionView {
    pub fn get(&self) -> Option<SessionId> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_current(&self, session_id: &SessionId) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            == Some(session_id)
    }
}
