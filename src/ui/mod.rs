//! Interactive terminal front end
//!
//! Puts the local terminal in raw mode and shuttles key presses and resizes to
//! the session controller until the user detaches or the remote side closes.

mod input;

use anyhow::Result;
use crossterm::event::{Event, EventStream};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use crate::session::{SessionController, SessionState};

pub use input::{KeyAction, control_byte, encode_key, handle_key_event};

/// RAII helper keeping the terminal in raw mode
pub struct RawModeGuard;

impl RawModeGuard {
    pub fn new() -> Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        // Attempt to restore the terminal; ignore errors because we are in Drop
        let _ = disable_raw_mode();
    }
}

/// Run a connected session interactively. Always closes the session on return.
pub async fn run_interactive(controller: &mut SessionController, escape_key: char) -> Result<()> {
    let guard = RawModeGuard::new()?;
    let escape_byte = control_byte(escape_key);

    if let Ok((cols, rows)) = crossterm::terminal::size() {
        controller.resize(cols, rows);
    }

    let mut events = EventStream::new();
    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(Ok(Event::Key(key_event))) => match handle_key_event(key_event, escape_byte) {
                    KeyAction::Forward(bytes) => {
                        controller.send_input(&bytes);
                    }
                    KeyAction::Detach => {
                        info!("Detached from session by user");
                        break;
                    }
                    KeyAction::Ignore => {}
                },
                Some(Ok(Event::Paste(text))) => {
                    controller.send_input(text.as_bytes());
                }
                Some(Ok(Event::Resize(cols, rows))) => controller.resize(cols, rows),
                Some(Ok(other)) => debug!("Ignored terminal event {:?}", other),
                Some(Err(e)) => {
                    warn!("Terminal event stream failed: {}", e);
                    break;
                }
                None => break,
            },
            state = controller.process_next_event() => {
                if matches!(state, None | Some(SessionState::Closed)) {
                    break;
                }
            }
        }
    }

    controller.close();
    drop(guard);
    Ok(())
}
