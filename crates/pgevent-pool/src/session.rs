//! Database client library collaborator.
//!
//! A [`Session`] is one database session whose handshake is driven one
//! [`connect_poll`](Session::connect_poll) step at a time. Sessions are
//! created by a [`SessionFactory`] injected into each execution context, so
//! the lifecycle code never talks to libpq directly (and tests can script
//! handshakes step by step).
//!
//! Dropping a session tears it down.

pub mod libpq;

use crate::config::ConnTarget;
use crate::event::{Interest, RawSocket};

/// Result of one handshake poll step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Failed,
    /// Handshake complete.
    Ok,
    /// Still connecting; poll again once the socket is readable.
    Reading,
    /// Still connecting; poll again once the socket is writable.
    Writing,
}

impl PollStatus {
    /// Event loop interest needed before the next poll step.
    pub fn interest(self) -> Interest {
        match self {
            PollStatus::Reading => Interest::READABLE,
            PollStatus::Writing => Interest::WRITABLE,
            PollStatus::Failed | PollStatus::Ok => Interest::NONE,
        }
    }
}

/// Coarse session health as reported right after the session is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Ok,
    Bad,
}

/// One database session with a non-blocking handshake.
pub trait Session: std::fmt::Debug {
    /// Health of the session. `Bad` right after start means the library
    /// already knows the attempt is doomed (unparsable conninfo, etc.).
    fn status(&self) -> SessionStatus;

    /// Switch the session's socket to non-blocking mode.
    fn set_nonblocking(&mut self) -> Result<(), String>;

    /// Socket descriptor backing the session.
    fn socket(&self) -> RawSocket;

    /// Advance the handshake by one step.
    fn connect_poll(&mut self) -> PollStatus;

    /// Last error reported by the library for this session.
    fn error_message(&self) -> String;
}

/// Starts sessions. Injected into each execution context.
pub trait SessionFactory: Send + Sync {
    /// Begin a non-blocking handshake towards `target`.
    ///
    /// Returns `None` when the session object could not be created at all.
    fn start(&self, target: &ConnTarget) -> Option<Box<dyn Session>>;
}
