//! Error types for connection and pool operations.

use thiserror::Error;

use crate::arena::ConnId;
use crate::config::PoolKey;

/// Result type alias for connection and pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// OK|ERR value handed to connect and disconnect callbacks.
pub type Status = Result<(), PoolError>;

/// Errors that can occur while connecting, pooling or releasing connections.
///
/// `Clone` so one failure can be delivered to a callback and returned to the
/// synchronous caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("could not allocate a database session: {0}")]
    Allocation(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("could not switch socket to non-blocking mode: {0}")]
    SocketMode(String),

    #[error("event loop refused socket registration: {0}")]
    Registration(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("no pool configuration registered for key `{0}`")]
    ConfigurationNotFound(PoolKey),

    #[error("pool `{0}` could not spawn any usable connection")]
    PoolExhausted(PoolKey),

    #[error("pool `{0}` is already registered")]
    DuplicatePool(PoolKey),

    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown connection: {0}")]
    UnknownConnection(ConnId),

    #[error("connection {0} is not borrowed from a pool")]
    NotBorrowed(ConnId),

    #[error("execution context is shutting down")]
    Shutdown,
}
