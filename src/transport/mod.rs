//! Remote exec transport boundary
//!
//! The transport opens and closes remote exec channels and pushes three event
//! topics per session. Listeners are registered per session id instead of on a
//! global topic namespace, so the multiplexer can hold exactly one set at a time.

pub mod demo;
pub mod mock;
pub mod types;

use async_trait::async_trait;

// Re-export commonly used types
pub use mock::{ConnectMode, MockTransport, PendingConnect};
pub use types::*;

/// Remote exec channel provider
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Open an exec channel and return the id the transport assigned to it
    async fn connect(&self, request: ConnectRequest) -> Result<SessionId, TransportError>;

    /// Write input bytes to the remote process
    async fn send(&self, session_id: &SessionId, data: &[u8]) -> Result<(), TransportError>;

    /// Notify the remote pty about new terminal dimensions
    async fn resize(&self, session_id: &SessionId, cols: u16, rows: u16)
    -> Result<(), TransportError>;

    /// Close a session. Must tolerate already-closed and unknown ids.
    async fn close(&self, session_id: &SessionId) -> Result<(), TransportError>;

    /// Register a listener for one topic of one session
    fn listen(
        &self,
        session_id: &SessionId,
        topic: Topic,
        listener: Listener,
    ) -> Result<ListenerId, TransportError>;

    /// Remove a listener. Unknown handles are ignored.
    fn unlisten(&self, listener_id: ListenerId);
}

/// Container discovery provider
#[async_trait]
pub trait ContainerResolver: Send + Sync {
    /// List the containers of a pod in declaration order
    async fn list(&self, pod: &str, namespace: &str) -> Result<Vec<String>, TransportError>;
}
