//! Render sink boundary
//!
//! The display surface is owned by the UI layer. The session core only appends
//! text, reports the session state and clears the surface.

pub mod terminal;

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::session::SessionState;

pub use terminal::TerminalSink;

/// Display surface fed by the session core
pub trait RenderSink: Send + Sync {
    /// Append raw text to the display
    fn append(&self, text: &str);

    /// Report the current session state
    fn set_status(&self, state: SessionState);

    /// Clear the display
    fn clear(&self);
}

/// In-memory sink keeping everything it was given
#[derive(Debug, Default)]
pub struct BufferSink {
    inner: Mutex<BufferState>,
}

#[derive(Debug, Default)]
struct BufferState {
    text: String,
    statuses: Vec<SessionState>,
    clears: usize,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BufferState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Everything appended since the last clear
    pub fn contents(&self) -> String {
        self.state().text.clone()
    }

    /// Every status reported, oldest first
    pub fn statuses(&self) -> Vec<SessionState> {
        self.state().statuses.clone()
    }

    pub fn last_status(&self) -> Option<SessionState> {
        self.state().statuses.last().copied()
    }

    pub fn clear_count(&self) -> usize {
        self.state().clears
    }
}

impl RenderSink for BufferSink {
    fn append(&self, text: &str) {
        self.state().text.push_str(text);
    }

    fn set_status(&self, state: SessionState) {
        self.state().statuses.push(state);
    }

    fn clear(&self) {
        let mut buffer = self.state();
        buffer.text.clear();
        buffer.clears += 1;
    }
}
