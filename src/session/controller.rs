//! Session controller owning the current session and its state machine
//!
//! ```text
//! Idle -> Connecting -> Connected -> Closed | Error
//!                    -> Error
//! ```
//!
//! Every `connect()` starts a new generation. The transport call and the
//! timeout timer both report back tagged with that generation, and whichever
//! result arrives while its attempt is still current wins. Anything arriving
//! for an older generation is discarded; a late success is closed on arrival.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::action_channel::{ActionChannel, SessionEvent};
use super::error::SessionError;
use super::input::InputForwarder;
use super::multiplexer::EventMultiplexer;
use super::state::{
    ConnectionAttempt, CurrentSession, Session, SessionState, SessionStats, Target,
};
use crate::render::RenderSink;
use crate::transport::{SessionId, TransportClient, TransportError};

/// Default time a connect may take before the attempt fails
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Single owner of "which session is current"
pub struct SessionController {
    transport: Arc<dyn TransportClient>,
    sink: Arc<dyn RenderSink>,
    current: CurrentSession,
    multiplexer: EventMultiplexer,
    forwarder: InputForwarder,
    action_channel: ActionChannel,
    generation: u64,
    attempt: Option<ConnectionAttempt>,
    session: Option<Session>,
    last_error: Option<SessionError>,
    shell_candidates: Vec<String>,
    stats: SessionStats,
}

impl SessionController {
    /// Create a new SessionController
    pub fn new(transport: Arc<dyn TransportClient>, sink: Arc<dyn RenderSink>) -> Self {
        let current = CurrentSession::new();
        let action_channel = ActionChannel::new();
        let multiplexer = EventMultiplexer::new(
            transport.clone(),
            sink.clone(),
            action_channel.event_tx(),
            current.view(),
        );
        let forwarder = InputForwarder::new(transport.clone(), current.view());

        Self {
            transport,
            sink,
            current,
            multiplexer,
            forwarder,
            action_channel,
            generation: 0,
            attempt: None,
            session: None,
            last_error: None,
            shell_candidates: Vec::new(),
            stats: SessionStats::default(),
        }
    }

    /// Shells the transport tries in order on every connect
    pub fn with_shell_candidates(mut self, shell_candidates: Vec<String>) -> Self {
        self.shell_candidates = shell_candidates;
        self
    }

    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|session| session.state)
            .unwrap_or(SessionState::Idle)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Id of the current session, if connected and not yet closed
    pub fn session_id(&self) -> Option<SessionId> {
        self.current.get()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Session whose events are currently subscribed
    pub fn subscribed_session(&self) -> Option<&SessionId> {
        self.multiplexer.active_session()
    }

    pub fn input(&self) -> &InputForwarder {
        &self.forwarder
    }

    /// Start connecting to `target`.
    ///
    /// Any active session is closed first. Returns the generation of the new
    /// attempt; its outcome is applied by [`handle_event`](Self::handle_event).
    pub fn connect(&mut self, target: Target, timeout: Duration) -> Result<u64, SessionError> {
        if target.pod.trim().is_empty() {
            return Err(SessionError::InvalidTarget("pod must not be empty".to_string()));
        }
        if target.container.trim().is_empty() {
            return Err(SessionError::InvalidTarget(
                "container must be resolved before connecting".to_string(),
            ));
        }

        self.close();

        self.generation += 1;
        let generation = self.generation;
        self.stats.connect_attempts += 1;
        metrics::increment_counter!("podshell_connect_attempts");

        info!(
            "Connecting to {} (generation {}, timeout {:?})",
            target, generation, timeout
        );

        let request = target.to_request(self.shell_candidates.clone());
        self.session = Some(Session::connecting(target));
        self.last_error = None;
        self.sink.clear();
        self.transition(SessionState::Connecting);

        let transport = self.transport.clone();
        let event_tx = self.action_channel.event_tx();
        tokio::spawn(async move {
            let result = transport.connect(request).await;
            if event_tx
                .send(SessionEvent::ConnectSettled { generation, result })
                .is_err()
            {
                debug!("Controller gone before connect {} settled", generation);
            }
        });

        let event_tx = self.action_channel.event_tx();
        let mut attempt = ConnectionAttempt::new(generation, timeout);
        attempt.set_timer(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = event_tx.send(SessionEvent::ConnectTimedOut { generation });
        }));
        self.attempt = Some(attempt);

        Ok(generation)
    }

    /// Connect and drive events until the attempt settles
    pub async fn connect_and_wait(
        &mut self,
        target: Target,
        timeout: Duration,
    ) -> Result<SessionId, SessionError> {
        let generation = self.connect(target, timeout)?;

        while self.attempt_in_flight(generation) {
            let Some(event) = self.action_channel.next_event().await else {
                break;
            };
            self.handle_event(event);
        }

        match self.session_id() {
            Some(session_id) if self.state() == SessionState::Connected => Ok(session_id),
            _ => Err(self.last_error.clone().unwrap_or(SessionError::Cancelled)),
        }
    }

    /// Close the current session. Returns false if there was nothing to close.
    ///
    /// Event subscriptions are released before this returns; the remote close is
    /// fired without waiting for it.
    pub fn close(&mut self) -> bool {
        if !self.state().is_active() {
            debug!("Close requested in state {}, nothing to do", self.state());
            return false;
        }

        // Invalidate anything still in flight for the old generation
        self.generation += 1;
        if let Some(attempt) = self.attempt.take() {
            let elapsed = attempt.settle();
            info!("Cancelled connect attempt after {:?}", elapsed);
        }

        self.multiplexer.dispose();
        self.forwarder.disarm();
        if let Some(session_id) = self.current.clear() {
            info!("Closing session {}", session_id);
            self.spawn_close(session_id);
        }

        self.transition(SessionState::Closed);
        true
    }

    /// Forward input to the current session
    pub fn send_input(&self, data: &[u8]) -> bool {
        match self.current.get() {
            Some(session_id) => self.forwarder.send(&session_id, data),
            None => {
                debug!("Dropped {} bytes of input, no current session", data.len());
                false
            }
        }
    }

    /// Forward input addressed to a specific session; dropped unless it is current
    pub fn send_input_to(&self, session_id: &SessionId, data: &[u8]) -> bool {
        self.forwarder.send(session_id, data)
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.forwarder.resize(cols, rows);
    }

    /// Wait for the next completion and apply it
    pub async fn process_next_event(&mut self) -> Option<SessionState> {
        let event = self.action_channel.next_event().await?;
        self.handle_event(event);
        Some(self.state())
    }

    /// Apply every completion already queued. Returns how many were applied.
    pub fn process_pending_events(&mut self) -> usize {
        let mut processed = 0;
        while let Some(event) = self.action_channel.try_next_event() {
            self.handle_event(event);
            processed += 1;
        }
        processed
    }

    /// Apply one asynchronous completion to the state machine
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::ConnectSettled { generation, result } => {
                self.on_connect_settled(generation, result)
            }
            SessionEvent::ConnectTimedOut { generation } => self.on_connect_timeout(generation),
            SessionEvent::StreamError {
                session_id,
                payload,
            } => self.on_stream_error(session_id, payload),
            SessionEvent::RemoteClosed { session_id } => self.on_remote_closed(session_id),
        }
    }

    fn on_connect_settled(&mut self, generation: u64, result: Result<SessionId, TransportError>) {
        let Some(attempt) = self.take_current_attempt(generation) else {
            match result {
                Ok(session_id) => self.close_stale(session_id, generation),
                Err(e) => debug!("Discarded failure of superseded connect {}: {}", generation, e),
            }
            return;
        };
        let elapsed = attempt.settle();

        let session_id = match result {
            Ok(session_id) => session_id,
            Err(e) => {
                self.stats.rejections += 1;
                metrics::increment_counter!("podshell_connect_rejections");
                self.fail(SessionError::from(e));
                return;
            }
        };

        self.current.set(session_id.clone());
        if let Some(session) = self.session.as_mut() {
            session.id = Some(session_id.clone());
        }

        if let Err(e) = self.multiplexer.subscribe(&session_id) {
            error!("Failed to subscribe to session {}: {}", session_id, e);
            self.current.clear();
            self.spawn_close(session_id);
            self.fail(SessionError::TransportRejected(e.to_string()));
            return;
        }
        self.forwarder.arm(session_id.clone());

        self.stats.sessions_connected += 1;
        metrics::increment_counter!("podshell_sessions_connected");
        info!("Session {} connected in {:?}", session_id, elapsed);
        self.transition(SessionState::Connected);
    }

    fn on_connect_timeout(&mut self, generation: u64) {
        let Some(attempt) = self.take_current_attempt(generation) else {
            debug!("Ignored timer of superseded connect {}", generation);
            return;
        };
        let timeout_ms = u64::try_from(attempt.timeout.as_millis()).unwrap_or(u64::MAX);
        attempt.settle();

        self.stats.timeouts += 1;
        metrics::increment_counter!("podshell_connect_timeouts");
        self.fail(SessionError::ConnectionTimeout { timeout_ms });
    }

    fn on_stream_error(&mut self, session_id: SessionId, payload: String) {
        if !self.is_current_session(&session_id) {
            debug!("Ignored stream error from stale session {}", session_id);
            return;
        }

        self.stats.stream_errors += 1;
        metrics::increment_counter!("podshell_stream_errors");
        self.fail(SessionError::StreamError(payload));
    }

    fn on_remote_closed(&mut self, session_id: SessionId) {
        if !self.is_current_session(&session_id) {
            debug!("Ignored close of stale session {}", session_id);
            return;
        }

        info!("Session {} closed by remote", session_id);
        self.multiplexer.dispose();
        self.forwarder.disarm();
        self.current.clear();

        self.stats.remote_closes += 1;
        metrics::increment_counter!("podshell_remote_closes");
        self.last_error = Some(SessionError::UnexpectedClose);
        self.transition(SessionState::Closed);
    }

    fn take_current_attempt(&mut self, generation: u64) -> Option<ConnectionAttempt> {
        let current = generation == self.generation
            && self
                .attempt
                .as_ref()
                .is_some_and(|attempt| attempt.generation == generation);
        if current { self.attempt.take() } else { None }
    }

    fn attempt_in_flight(&self, generation: u64) -> bool {
        self.attempt
            .as_ref()
            .is_some_and(|attempt| attempt.generation == generation)
    }

    fn is_current_session(&self, session_id: &SessionId) -> bool {
        self.current.get().as_ref() == Some(session_id)
    }

    /// A superseded attempt opened a remote session after all; release it
    fn close_stale(&mut self, session_id: SessionId, generation: u64) {
        warn!(
            "Closing session {} from superseded connect {} (current generation {})",
            session_id, generation, self.generation
        );
        self.stats.stale_sessions_closed += 1;
        metrics::increment_counter!("podshell_stale_sessions_closed");
        self.spawn_close(session_id);
    }

    fn spawn_close(&self, session_id: SessionId) {
        let transport = self.transport.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = transport.close(&session_id).await {
                        warn!("Failed to close session {}: {}", session_id, e);
                    }
                });
            }
            Err(_) => error!("No runtime available to close session {}", session_id),
        }
    }

    fn fail(&mut self, error: SessionError) {
        warn!("Session error: {}", error);
        self.last_error = Some(error);
        self.transition(SessionState::Error);
    }

    fn transition(&mut self, state: SessionState) {
        if let Some(session) = self.session.as_mut() {
            debug!("Session state {} -> {}", session.state, state);
            session.state = state;
        }
        self.sink.set_status(state);
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if self.state().is_active() {
            warn!("SessionController dropped without close(), closing now");
            self.close();
        }
    }
}
