//! Per-connection state: handshake state, callbacks and collection membership.
//!
//! The lifecycle is
//!
//! ```text
//! CLOSED ──start──▶ CONNECTING ──poll Ok──▶ CONNECTED ──release──▶ CLOSED
//!                       │  ▲
//!                       │  └── poll Reading/Writing (wait for readiness)
//!                       └────── poll Failed / error / timeout ──▶ CLOSED
//! ```
//!
//! Transitions are performed by [`PgContext`](crate::PgContext); this module
//! only holds the data and the at-most-once callback plumbing.

use std::fmt;

use crate::arena::ConnId;
use crate::config::PoolKey;
use crate::error::Status;
use crate::event::RawSocket;
use crate::session::{PollStatus, Session};

/// Invoked once when a handshake completes or fails.
pub type ConnectCallback<R> = Box<dyn FnOnce(ConnId, Status, Option<&R>)>;

/// Invoked once when a connection is released.
pub type DisconnectCallback<R> = Box<dyn FnOnce(ConnId, Status, Option<&R>)>;

/// Handshake state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Closed,
    Connecting,
    Connected,
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnState::Closed => write!(f, "closed"),
            ConnState::Connecting => write!(f, "connecting"),
            ConnState::Connected => write!(f, "connected"),
        }
    }
}

/// Whether the caller asked to disconnect before the handshake finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisconnectRequest {
    #[default]
    NotRequested,
    RequestedWhilePending,
}

/// The one collection a live connection belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Membership {
    /// Non-pooled; listed in the context's connection registry.
    Registry,
    /// Idle in the named pool.
    Free(PoolKey),
    /// Lent out by the named pool.
    Busy(PoolKey),
}

impl Membership {
    pub(crate) fn pool(&self) -> Option<&PoolKey> {
        match self {
            Membership::Registry => None,
            Membership::Free(key) | Membership::Busy(key) => Some(key),
        }
    }
}

pub(crate) struct Connection<R> {
    pub(crate) session: Box<dyn Session>,
    pub(crate) socket: RawSocket,
    pub(crate) state: ConnState,
    pub(crate) last_poll: Option<PollStatus>,
    /// Caller context; `None` while pooled and idle.
    pub(crate) request: Option<R>,
    pub(crate) on_connect: Option<ConnectCallback<R>>,
    pub(crate) on_disconnect: Option<DisconnectCallback<R>>,
    pub(crate) disconnect: DisconnectRequest,
    pub(crate) membership: Membership,
    /// Set on direct-connect fallbacks opened because the pool was full.
    pub(crate) overflow_of: Option<PoolKey>,
    /// Whether the socket is currently registered with the event loop.
    pub(crate) registered: bool,
}

impl<R> Connection<R> {
    pub(crate) fn new(
        session: Box<dyn Session>,
        request: Option<R>,
        on_connect: Option<ConnectCallback<R>>,
        membership: Membership,
    ) -> Self {
        Self {
            session,
            socket: -1,
            state: ConnState::Closed,
            last_poll: None,
            request,
            on_connect,
            on_disconnect: None,
            disconnect: DisconnectRequest::NotRequested,
            membership,
            overflow_of: None,
            registered: false,
        }
    }

    pub(crate) fn fire_connect(&mut self, id: ConnId, status: Status) {
        if let Some(cb) = self.on_connect.take() {
            cb(id, status, self.request.as_ref());
        }
    }

    pub(crate) fn fire_disconnect(&mut self, id: ConnId, status: Status) {
        if let Some(cb) = self.on_disconnect.take() {
            cb(id, status, self.request.as_ref());
        }
    }

    /// Drop everything tied to the borrower before the connection goes back
    /// to a free set.
    pub(crate) fn clear_caller(&mut self) {
        self.request = None;
        self.on_connect = None;
        self.on_disconnect = None;
        self.disconnect = DisconnectRequest::NotRequested;
    }
}

impl<R> fmt::Debug for Connection<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("socket", &self.socket)
            .field("state", &self.state)
            .field("last_poll", &self.last_poll)
            .field("membership", &self.membership)
            .field("disconnect", &self.disconnect)
            .field("overflow_of", &self.overflow_of)
            .finish_non_exhaustive()
    }
}
