//! Raw FFI bindings to the asynchronous connection API of libpq.
//!
//! Only the functions needed to drive `PQconnectPoll` from an external event
//! loop are declared. On builds without the `system` feature the `extern`
//! block is absent (no library to link against).

#![allow(non_camel_case_types)]
#![allow(dead_code)]

use std::os::raw::c_int;
#[cfg(feature = "system")]
use std::os::raw::c_char;

/// Opaque connection handle.
#[repr(C)]
pub struct PGconn {
    _private: [u8; 0],
}

/// `ConnStatusType` from libpq-fe.h. Declared as a plain integer because
/// libpq reports many intermediate values while a handshake is in flight.
pub type ConnStatusType = c_int;

pub const CONNECTION_OK: ConnStatusType = 0;
pub const CONNECTION_BAD: ConnStatusType = 1;

/// `PostgresPollingStatusType` from libpq-fe.h.
pub type PostgresPollingStatusType = c_int;

pub const PGRES_POLLING_FAILED: PostgresPollingStatusType = 0;
pub const PGRES_POLLING_READING: PostgresPollingStatusType = 1;
pub const PGRES_POLLING_WRITING: PostgresPollingStatusType = 2;
pub const PGRES_POLLING_OK: PostgresPollingStatusType = 3;
/// Obsolete, never returned by libpq since 7.x.
pub const PGRES_POLLING_ACTIVE: PostgresPollingStatusType = 4;

#[cfg(feature = "system")]
unsafe extern "C" {
    // ── Non-blocking connect ────────────────────────────────────
    pub fn PQconnectStart(conninfo: *const c_char) -> *mut PGconn;
    pub fn PQconnectStartParams(
        keywords: *const *const c_char,
        values: *const *const c_char,
        expand_dbname: c_int,
    ) -> *mut PGconn;
    pub fn PQconnectPoll(conn: *mut PGconn) -> PostgresPollingStatusType;
    pub fn PQfinish(conn: *mut PGconn);

    // ── Connection state ────────────────────────────────────────
    pub fn PQstatus(conn: *const PGconn) -> ConnStatusType;
    pub fn PQerrorMessage(conn: *const PGconn) -> *const c_char;
    pub fn PQsocket(conn: *const PGconn) -> c_int;
    pub fn PQsetnonblocking(conn: *mut PGconn, arg: c_int) -> c_int;
}
