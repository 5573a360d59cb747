//! libpq-backed session factory.
//!
//! Bridges [`SessionFactory`] to `pgevent-libpq`:
//!
//! ```text
//! ConnTarget::Params → PgConnection::start_params (PQconnectStartParams)
//! ConnTarget::Uri    → PgConnection::start        (PQconnectStart)
//! Session::connect_poll → PQconnectPoll
//! drop(session)         → PQfinish
//! ```
//!
//! Without the `system-libpq` feature every start fails with
//! `PgError::NotAvailable` and the factory reports an allocation failure.

use pgevent_libpq::{ConnStatus, PgConnection, PollingStatus};

use super::{PollStatus, Session, SessionFactory, SessionStatus};
use crate::config::ConnTarget;
use crate::event::RawSocket;

/// [`SessionFactory`] that starts real libpq handshakes.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibpqFactory;

impl LibpqFactory {
    pub fn new() -> Self {
        Self
    }
}

impl SessionFactory for LibpqFactory {
    fn start(&self, target: &ConnTarget) -> Option<Box<dyn Session>> {
        let started = match target {
            ConnTarget::Params {
                params,
                expand_dbname,
            } => {
                let pairs: Vec<(&str, &str)> = params
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                PgConnection::start_params(&pairs, *expand_dbname)
            }
            ConnTarget::Uri(uri) => PgConnection::start(uri),
        };

        match started {
            Ok(conn) => Some(Box::new(LibpqSession { conn })),
            Err(e) => {
                tracing::warn!(target_kind = target.kind(), error = %e, "libpq could not start session");
                None
            }
        }
    }
}

/// A [`Session`] over a libpq connection.
#[derive(Debug)]
pub struct LibpqSession {
    conn: PgConnection,
}

impl Session for LibpqSession {
    fn status(&self) -> SessionStatus {
        match self.conn.status() {
            ConnStatus::Bad => SessionStatus::Bad,
            ConnStatus::Ok | ConnStatus::InProgress => SessionStatus::Ok,
        }
    }

    fn set_nonblocking(&mut self) -> Result<(), String> {
        self.conn.set_nonblocking(true).map_err(|e| e.to_string())
    }

    fn socket(&self) -> RawSocket {
        self.conn.socket()
    }

    fn connect_poll(&mut self) -> PollStatus {
        match self.conn.connect_poll() {
            PollingStatus::Failed => PollStatus::Failed,
            PollingStatus::Ok => PollStatus::Ok,
            PollingStatus::Reading => PollStatus::Reading,
            PollingStatus::Writing => PollStatus::Writing,
        }
    }

    fn error_message(&self) -> String {
        self.conn.error_message()
    }
}
