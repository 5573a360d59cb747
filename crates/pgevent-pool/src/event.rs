//! Event loop collaborator interface.
//!
//! The host application owns the event loop. This crate only asks it to
//! watch a socket with a given [`Interest`] and expects every readiness
//! notification for that socket to come back through
//! [`PgContext::advance`](crate::PgContext::advance) as a [`Readiness`] value.
//! The loop is assumed to be level-triggered.

use crate::arena::ConnId;

/// Raw socket descriptor as reported by the database client library.
pub type RawSocket = i32;

/// Interest flags indicating which readiness events to monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest(u8);

impl Interest {
    /// No read/write interest; errors and hang-ups are still reported.
    pub const NONE: Interest = Interest(0);
    /// Interest in readable events.
    pub const READABLE: Interest = Interest(0b01);
    /// Interest in writable events.
    pub const WRITABLE: Interest = Interest(0b10);

    /// Returns true if readable interest is set.
    pub const fn is_readable(&self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    /// Returns true if writable interest is set.
    pub const fn is_writable(&self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }

    /// Returns true if neither readable nor writable interest is set.
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Combines interests.
    pub const fn add(self, other: Interest) -> Self {
        Interest(self.0 | other.0)
    }

    /// Raw bitmask, for hosts that speak in integer flags.
    pub const fn bits(&self) -> u8 {
        self.0
    }
}

/// A readiness notification delivered by the host loop for one socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Readable,
    Writable,
    Error,
    /// Peer hung up.
    Closed,
    /// The host loop gave up waiting on the socket.
    Timeout,
}

/// The host's readiness-notification primitive.
pub trait EventLoop {
    /// Watch `socket` with `interest`, tagging notifications with `conn`.
    ///
    /// Calling this for an already registered socket updates its interest.
    fn register(&mut self, socket: RawSocket, interest: Interest, conn: ConnId) -> Result<(), String>;

    /// Stop watching `socket`. Unknown sockets are ignored.
    fn deregister(&mut self, socket: RawSocket);
}
