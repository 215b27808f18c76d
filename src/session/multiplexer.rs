//! Session event multiplexer
//!
//! Holds the listener registrations of exactly one session and turns raw
//! transport events into render sink writes and controller notifications.
//! A set is guarded by a gate: once the gate is shut (by `dispose()` or by a
//! remote close) none of its listeners deliver anything, even if the transport
//! still invokes them.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::action_channel::SessionEvent;
use super::error::MultiplexerError;
use super::state::CurrentSessionView;
use crate::render::RenderSink;
use crate::transport::{Listener, ListenerId, SessionId, Topic, TransportClient};

/// Delivery gate shared by the three listeners of one set
#[derive(Debug)]
struct SubscriptionGate {
    open: Mutex<bool>,
}

impl SubscriptionGate {
    fn new() -> Self {
        Self {
            open: Mutex::new(true),
        }
    }

    /// Run `f` while holding the gate, only if it is still open
    fn deliver<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if *open { Some(f()) } else { None }
    }

    /// Shut the gate, running `f` if this call was the one that shut it
    fn shut_with(&self, f: impl FnOnce()) -> bool {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if *open {
            *open = false;
            f();
            true
        } else {
            false
        }
    }
}

/// The three listener handles bound to one session
struct SubscriptionSet {
    session_id: SessionId,
    handles: Vec<ListenerId>,
    gate: Arc<SubscriptionGate>,
}

/// Annotated line written to the sink for an error frame
pub fn annotate_error(payload: &str) -> String {
    format!("\r\n[error] {}\r\n", payload.trim_end())
}

/// Routes transport events of the current session
pub struct EventMultiplexer {
    transport: Arc<dyn TransportClient>,
    sink: Arc<dyn RenderSink>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    current: CurrentSessionView,
    active: Option<SubscriptionSet>,
}

impl EventMultiplexer {
    pub fn new(
        transport: Arc<dyn TransportClient>,
        sink: Arc<dyn RenderSink>,
        event_tx: mpsc::UnboundedSender<SessionEvent>,
        current: CurrentSessionView,
    ) -> Self {
        Self {
            transport,
            sink,
            event_tx,
            current,
            active: None,
        }
    }

    /// Session whose listeners are currently registered
    pub fn active_session(&self) -> Option<&SessionId> {
        self.active.as_ref().map(|set| &set.session_id)
    }

    /// Open the output, error and closed listeners for a session
    pub fn subscribe(&mut self, session_id: &SessionId) -> Result<(), MultiplexerError> {
        if let Some(active) = &self.active {
            if &active.session_id == session_id {
                debug!("Session {} is already subscribed", session_id);
                return Ok(());
            }
            return Err(MultiplexerError::AlreadySubscribed {
                active: active.session_id.clone(),
                requested: session_id.clone(),
            });
        }

        let gate = Arc::new(SubscriptionGate::new());
        let mut handles = Vec::with_capacity(Topic::ALL.len());

        for topic in Topic::ALL {
            let listener = self.listener_for(topic, session_id, gate.clone());
            match self.transport.listen(session_id, topic, listener) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    warn!("Failed to listen on {}: {}", topic.key(session_id), e);
                    gate.shut_with(|| {});
                    for handle in handles {
                        self.transport.unlisten(handle);
                    }
                    return Err(e.into());
                }
            }
        }

        info!("Subscribed to events of session {}", session_id);
        self.active = Some(SubscriptionSet {
            session_id: session_id.clone(),
            handles,
            gate,
        });
        Ok(())
    }

    /// Release the listeners of the active session.
    ///
    /// Returns false when nothing was subscribed. Nothing from the released set
    /// reaches the sink or the controller once this returns.
    pub fn dispose(&mut self) -> bool {
        let Some(set) = self.active.take() else {
            return false;
        };

        set.gate.shut_with(|| {});
        for handle in set.handles {
            self.transport.unlisten(handle);
        }

        info!("Disposed event subscriptions of session {}", set.session_id);
        true
    }

    fn listener_for(
        &self,
        topic: Topic,
        session_id: &SessionId,
        gate: Arc<SubscriptionGate>,
    ) -> Listener {
        let session_id = session_id.clone();
        let current = self.current.clone();

        match topic {
            Topic::Output => {
                let sink = self.sink.clone();
                Arc::new(move |payload: String| {
                    let delivered = gate.deliver(|| {
                        if current.is_current(&session_id) {
                            sink.append(&payload);
                            true
                        } else {
                            false
                        }
                    });
                    if delivered == Some(true) {
                        metrics::increment_counter!("podshell_output_chunks");
                    } else {
                        debug!("Dropped output for stale session {}", session_id);
                    }
                })
            }
            Topic::Error => {
                let sink = self.sink.clone();
                let event_tx = self.event_tx.clone();
                Arc::new(move |payload: String| {
                    let delivered = gate.deliver(|| {
                        if !current.is_current(&session_id) {
                            return false;
                        }
                        sink.append(&annotate_error(&payload));
                        if event_tx
                            .send(SessionEvent::StreamError {
                                session_id: session_id.clone(),
                                payload: payload.clone(),
                            })
                            .is_err()
                        {
                            debug!("Controller gone, stream error for {} not reported", session_id);
                        }
                        true
                    });
                    if delivered != Some(true) {
                        debug!("Dropped error frame for stale session {}", session_id);
                    }
                })
            }
            Topic::Closed => {
                let event_tx = self.event_tx.clone();
                Arc::new(move |_payload: String| {
                    let shut = gate.shut_with(|| {
                        if current.is_current(&session_id) {
                            let _ = event_tx.send(SessionEvent::RemoteClosed {
                                session_id: session_id.clone(),
                            });
                        }
                    });
                    if !shut {
                        debug!("Ignored repeated close for session {}", session_id);
                    }
                })
            }
        }
    }
}

impl Drop for EventMultiplexer {
    fn drop(&mut self) {
        self.dispose();
    }
}
