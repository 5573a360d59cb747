//! pgevent-pool: non-blocking PostgreSQL connection lifecycle and
//! per-context connection pools.
//!
//! Connections are driven through their handshake one poll step at a time by
//! readiness notifications from a host event loop, so a single-threaded
//! worker can have many handshakes in flight without blocking.
//!
//! # Architecture
//!
//! ```text
//! PoolRegistry (static, shared)          PgContext (one per worker thread)
//!   key → PoolConfig  ──── Arc ────────▶   arena: ConnId → Connection
//!                                          registry: non-pooled ConnIds
//!                                          pools: key → Pool { free, busy }
//!                                              │
//!               SessionFactory ◀── start ──────┤
//!               EventLoop      ◀── register ───┘
//!
//! host loop readiness ──▶ PgContext::advance(id, event)
//! ```
//!
//! Connections are addressed by generational [`ConnId`]s, so a notification
//! for a connection that has already been released resolves to nothing
//! instead of touching a recycled slot.

mod arena;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod event;
pub mod pool;
pub mod session;

pub use arena::ConnId;
pub use config::{ConnTarget, PoolConfig, PoolKey, PoolRegistry};
pub use connection::{ConnState, ConnectCallback, DisconnectCallback, DisconnectRequest};
pub use context::PgContext;
pub use error::{PoolError, PoolResult, Status};
pub use event::{EventLoop, Interest, RawSocket, Readiness};
pub use pool::PoolStats;
pub use session::libpq::LibpqFactory;
pub use session::{PollStatus, Session, SessionFactory, SessionStatus};
