//! Local input forwarding

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::state::CurrentSessionView;
use crate::transport::{SessionId, TransportClient};

#[derive(Debug)]
enum ForwardCommand {
    Data(Vec<u8>),
    Resize { cols: u16, rows: u16 },
}

struct ArmedSession {
    session_id: SessionId,
    queue: mpsc::UnboundedSender<ForwardCommand>,
}

/// Delivers keystrokes and resizes to the current session only.
///
/// Input for an armed session goes through one queue drained by a single task,
/// so chunks reach the transport in the order they were typed.
pub struct InputForwarder {
    transport: Arc<dyn TransportClient>,
    current: CurrentSessionView,
    armed: Option<ArmedSession>,
    dimensions: Option<(u16, u16)>,
    dropped: AtomicU64,
}

impl InputForwarder {
    pub fn new(transport: Arc<dyn TransportClient>, current: CurrentSessionView) -> Self {
        Self {
            transport,
            current,
            armed: None,
            dimensions: None,
            dropped: AtomicU64::new(0),
        }
    }

    /// Start forwarding for a session, replaying the last known dimensions
    pub fn arm(&mut self, session_id: SessionId) {
        self.disarm();

        let (queue, commands) = mpsc::unbounded_channel();
        tokio::spawn(pump(
            self.transport.clone(),
            self.current.clone(),
            session_id.clone(),
            commands,
        ));

        if let Some((cols, rows)) = self.dimensions {
            let _ = queue.send(ForwardCommand::Resize { cols, rows });
        }

        debug!("Input forwarder armed for session {}", session_id);
        self.armed = Some(ArmedSession { session_id, queue });
    }

    /// Stop forwarding. Anything still queued is dropped by the pump.
    pub fn disarm(&mut self) {
        if let Some(armed) = self.armed.take() {
            debug!("Input forwarder disarmed for session {}", armed.session_id);
        }
    }

    pub fn armed_session(&self) -> Option<&SessionId> {
        self.armed.as_ref().map(|armed| &armed.session_id)
    }

    /// Forward input to `session_id` if it is the current session.
    ///
    /// Input for any other session is dropped silently; returns whether it was queued.
    pub fn send(&self, session_id: &SessionId, data: &[u8]) -> bool {
        let queued = match &self.armed {
            Some(armed) if &armed.session_id == session_id && self.current.is_current(session_id) => {
                armed.queue.send(ForwardCommand::Data(data.to_vec())).is_ok()
            }
            _ => false,
        };

        if !queued {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::increment_counter!("podshell_input_dropped");
            debug!("Dropped {} bytes of input for session {}", data.len(), session_id);
        }
        queued
    }

    /// Advisory terminal size notification; failures are only logged
    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.dimensions = Some((cols, rows));

        match &self.armed {
            Some(armed) => {
                if armed
                    .queue
                    .send(ForwardCommand::Resize { cols, rows })
                    .is_err()
                {
                    warn!("Resize to {}x{} not delivered, input pump stopped", cols, rows);
                }
            }
            None => debug!("Resize to {}x{} recorded, no session armed", cols, rows),
        }
    }

    pub fn dimensions(&self) -> Option<(u16, u16)> {
        self.dimensions
    }

    /// Number of input chunks dropped because they targeted a stale session
    pub fn dropped_inputs(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn pump(
    transport: Arc<dyn TransportClient>,
    current: CurrentSessionView,
    session_id: SessionId,
    mut commands: mpsc::UnboundedReceiver<ForwardCommand>,
) {
    while let Some(command) = commands.recv().await {
        if !current.is_current(&session_id) {
            debug!("Discarding queued {:?} for stale session {}", command, session_id);
            continue;
        }

        match command {
            ForwardCommand::Data(data) => {
                if let Err(e) = transport.send(&session_id, &data).await {
                    warn!("Failed to send input to session {}: {}", session_id, e);
                }
            }
            ForwardCommand::Resize { cols, rows } => {
                if let Err(e) = transport.resize(&session_id, cols, rows).await {
                    warn!("Failed to resize session {} to {}x{}: {}", session_id, cols, rows, e);
                }
            }
        }
    }

    debug!("Input pump for session {} stopped", session_id);
}
