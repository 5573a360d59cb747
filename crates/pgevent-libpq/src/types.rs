//! Safe wrapper types for libpq status codes.

use std::os::raw::c_int;

use crate::ffi;

/// Errors from libpq operations.
#[derive(Debug, thiserror::Error)]
pub enum PgError {
    #[error("libpq could not allocate a connection object")]
    OutOfMemory,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("could not set non-blocking mode: {0}")]
    NonBlocking(String),

    #[error("not available on this platform")]
    NotAvailable,
}

/// Connection status as far as the caller cares: definitely broken, or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    /// Handshake complete and the connection is usable.
    Ok,
    /// The connection failed and must be finished.
    Bad,
    /// Handshake still in progress (any of libpq's intermediate states).
    InProgress,
}

impl ConnStatus {
    #[cfg_attr(not(feature = "system"), allow(dead_code))]
    pub(crate) fn from_raw(raw: ffi::ConnStatusType) -> Self {
        match raw {
            ffi::CONNECTION_OK => Self::Ok,
            ffi::CONNECTION_BAD => Self::Bad,
            _ => Self::InProgress,
        }
    }
}

/// Result of one `PQconnectPoll` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingStatus {
    Failed,
    /// Wait until the socket is readable, then poll again.
    Reading,
    /// Wait until the socket is writable, then poll again.
    Writing,
    Ok,
}

impl PollingStatus {
    #[cfg_attr(not(feature = "system"), allow(dead_code))]
    pub(crate) fn from_raw(raw: c_int) -> Self {
        match raw {
            ffi::PGRES_POLLING_OK => Self::Ok,
            ffi::PGRES_POLLING_READING => Self::Reading,
            // ACTIVE is obsolete; waiting for writability is the safe reading.
            ffi::PGRES_POLLING_WRITING | ffi::PGRES_POLLING_ACTIVE => Self::Writing,
            _ => Self::Failed,
        }
    }
}
