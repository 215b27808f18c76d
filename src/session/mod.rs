//! Interactive shell session management module
//!
//! This module provides the session lifecycle core: the controller owning the
//! state machine, the event multiplexer holding transport subscriptions, and
//! the input forwarder delivering keystrokes to the current session.

pub mod action_channel;
pub mod controller;
pub mod discovery;
pub mod error;
pub mod input;
pub mod multiplexer;
pub mod state;

pub use action_channel::{ActionChannel, SessionEvent};
pub use controller::{DEFAULT_CONNECT_TIMEOUT, SessionController};
pub use discovery::ContainerSelection;
pub use error::{MultiplexerError, SessionError};
pub use input::InputForwarder;
pub use multiplexer::EventMultiplexer;
pub use state::{
    ConnectionAttempt, CurrentSession, CurrentSessionView, Session, SessionState, SessionStats,
    Target,
};
