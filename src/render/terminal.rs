//! Terminal render sink writing straight to stdout

use std::io::{Write, stdout};

use colored::Colorize;
use crossterm::{
    cursor::MoveTo,
    execute,
    terminal::{Clear, ClearType},
};
use tracing::debug;

use super::RenderSink;
use crate::session::SessionState;

/// Sink for an interactive terminal in raw mode
pub struct TerminalSink {
    enable_colors: bool,
}

impl TerminalSink {
    pub fn new(enable_colors: bool) -> Self {
        Self { enable_colors }
    }

    /// Status banner shown when the session state changes
    pub fn status_line(&self, state: SessionState) -> String {
        let label = format!("[{}]", state.label());
        if !self.enable_colors {
            return label;
        }

        match state {
            SessionState::Connected => label.green().to_string(),
            SessionState::Connecting => label.yellow().to_string(),
            SessionState::Error => label.red().bold().to_string(),
            SessionState::Idle | SessionState::Closed => label.dimmed().to_string(),
        }
    }

    fn write(&self, text: &str) {
        let mut out = stdout().lock();
        if let Err(e) = out.write_all(text.as_bytes()).and_then(|_| out.flush()) {
            debug!("Failed to write to terminal: {}", e);
        }
    }
}

impl RenderSink for TerminalSink {
    fn append(&self, text: &str) {
        self.write(text);
    }

    fn set_status(&self, state: SessionState) {
        // Raw mode needs explicit carriage returns
        self.write(&format!("\r\n{}\r\n", self.status_line(state)));
    }

    fn clear(&self) {
        if let Err(e) = execute!(stdout(), Clear(ClearType::All), MoveTo(0, 0)) {
            debug!("Failed to clear terminal: {}", e);
        }
    }
}
