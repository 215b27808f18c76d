//! Action Channel carrying asynchronous completions back to the controller

use tokio::sync::mpsc;

use crate::transport::{SessionId, TransportError};

/// Completions and notifications applied by the session controller
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The transport connect call finished
    ConnectSettled {
        generation: u64,
        result: Result<SessionId, TransportError>,
    },
    /// The connect timer for an attempt expired
    ConnectTimedOut { generation: u64 },
    /// Error frame delivered on a subscribed session
    StreamError {
        session_id: SessionId,
        payload: String,
    },
    /// Remote end closed a subscribed session
    RemoteClosed { session_id: SessionId },
}

/// Action channel for event processing
pub struct ActionChannel {
    /// Event sender
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    /// Event receiver
    event_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl ActionChannel {
    /// Create a new ActionChannel
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self { event_tx, event_rx }
    }

    /// Get next event from channel
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.event_rx.recv().await
    }

    /// Take an already queued event without waiting
    pub fn try_next_event(&mut self) -> Option<SessionEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Get event sender for external use
    pub fn event_tx(&self) -> mpsc::UnboundedSender<SessionEvent> {
        self.event_tx.clone()
    }
}

impl Default for ActionChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_send_order() {
        let mut channel = ActionChannel::new();
        let sender = channel.event_tx();

        sender
            .send(SessionEvent::ConnectTimedOut { generation: 1 })
            .unwrap();
        sender
            .send(SessionEvent::RemoteClosed {
                session_id: SessionId::from("s1"),
            })
            .unwrap();

        assert_eq!(
            channel.next_event().await,
            Some(SessionEvent::ConnectTimedOut { generation: 1 })
        );
        assert_eq!(
            channel.try_next_event(),
            Some(SessionEvent::RemoteClosed {
                session_id: SessionId::from("s1"),
            })
        );
        assert_eq!(channel.try_next_event(), None);
    }

    #[tokio::test]
    async fn test_sender_outliving_task_still_delivers() {
        let mut channel = ActionChannel::new();
        let sender = channel.event_tx();

        tokio::spawn(async move {
            let _ = sender.send(SessionEvent::ConnectSettled {
                generation: 2,
                result: Err(TransportError::Rejected("denied".to_string())),
            });
        })
        .await
        .unwrap();

        assert_eq!(
            channel.next_event().await,
            Some(SessionEvent::ConnectSettled {
                generation: 2,
                result: Err(TransportError::Rejected("denied".to_string())),
            })
        );
    }
}
