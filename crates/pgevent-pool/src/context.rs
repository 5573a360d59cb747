//! Execution context: owner of every connection, registry and pool of one
//! worker thread.
//!
//! A [`PgContext`] is created per execution context and never shared. It
//! owns the connection arena, the registry of non-pooled connections and the
//! lazily created pool instances, and it holds the injected collaborators
//! (session factory, event loop, static pool configurations).
//!
//! # Handshake flow
//!
//! ```text
//! connect()/connect_uri()/spawn
//!   → SessionFactory::start
//!     → None                 → Err(Allocation), nothing to clean up
//!     → status Bad           → on_connect(ERR), release
//!     → set_nonblocking fail → error log, release, Err(SocketMode)
//!     → drive(): connect_poll
//!         Failed             → on_connect(ERR), release
//!         Ok                 → CONNECTED, register(NONE), on_connect(OK)
//!         Reading/Writing    → CONNECTING, register(READ/WRITE)
//!
//! host loop readiness → advance(id, event) → drive() again
//! ```
//!
//! A disconnect requested mid-handshake is recorded and checked by `drive()`
//! after every poll step: the connection is released once the handshake
//! completes (disconnect callback OK, no connect callback) or fails (both
//! callbacks report the failure).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::arena::{Arena, ConnId};
use crate::config::{ConnTarget, PoolKey, PoolRegistry};
use crate::connection::{
    ConnState, ConnectCallback, Connection, DisconnectCallback, DisconnectRequest, Membership,
};
use crate::error::{PoolError, PoolResult, Status};
use crate::event::{EventLoop, Interest, RawSocket, Readiness};
use crate::pool::Pool;
use crate::session::{PollStatus, Session, SessionFactory, SessionStatus};

/// Connection and pool state for one execution context.
///
/// `R` is the caller context (e.g. the in-flight request) bound to a
/// connection and handed back to its callbacks.
pub struct PgContext<R = ()> {
    factory: Arc<dyn SessionFactory>,
    events: Box<dyn EventLoop>,
    pub(crate) configs: Arc<PoolRegistry>,
    pub(crate) conns: Arena<Connection<R>>,
    /// Live non-pooled connections.
    registry: Vec<ConnId>,
    /// Pool instances of this context, created on first acquire.
    pub(crate) pools: HashMap<PoolKey, Pool>,
}

impl<R> PgContext<R> {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        events: Box<dyn EventLoop>,
        configs: Arc<PoolRegistry>,
    ) -> Self {
        Self {
            factory,
            events,
            configs,
            conns: Arena::new(),
            registry: Vec::new(),
            pools: HashMap::new(),
        }
    }

    /// Start a non-pooled connection from keyword/value parameters.
    ///
    /// `on_connect` fires exactly once, when the handshake completes or
    /// fails, which may happen before this call returns. A failure reported
    /// through the callback is also returned as `Err`.
    pub fn connect(
        &mut self,
        request: Option<R>,
        on_connect: Option<ConnectCallback<R>>,
        keys: &[&str],
        values: &[&str],
        expand_dbname: bool,
    ) -> PoolResult<ConnId> {
        let target = ConnTarget::params(keys, values, expand_dbname)?;
        self.open(&target, request, on_connect, Membership::Registry)
    }

    /// Start a non-pooled connection from a connection string or URI.
    pub fn connect_uri(
        &mut self,
        request: Option<R>,
        on_connect: Option<ConnectCallback<R>>,
        uri: &str,
    ) -> PoolResult<ConnId> {
        self.open(&ConnTarget::uri(uri), request, on_connect, Membership::Registry)
    }

    /// Close a connection.
    ///
    /// A connected connection is released immediately and `on_disconnect`
    /// fires with OK. While the handshake is still running the request is
    /// only recorded; the release happens when the handshake ends. Idle
    /// pooled connections have no borrower to wait for and are always
    /// released immediately.
    pub fn disconnect(
        &mut self,
        id: ConnId,
        on_disconnect: Option<DisconnectCallback<R>>,
    ) -> PoolResult<()> {
        let conn = self
            .conns
            .get_mut(id)
            .ok_or(PoolError::UnknownConnection(id))?;
        conn.on_disconnect = on_disconnect;

        let idle = matches!(conn.membership, Membership::Free(_));
        if conn.state != ConnState::Connected && !idle {
            conn.disconnect = DisconnectRequest::RequestedWhilePending;
            tracing::debug!(conn = %id, state = %conn.state, "disconnect deferred until handshake ends");
            return Ok(());
        }

        self.release(id, Ok(()));
        Ok(())
    }

    /// Feed one readiness notification for `id` from the host event loop.
    ///
    /// Returns the connection's state afterwards, or `None` if it is gone
    /// (released by this event, or released earlier and the id is stale).
    pub fn advance(&mut self, id: ConnId, event: Readiness) -> Option<ConnState> {
        let Some(state) = self.conns.get(id).map(|conn| conn.state) else {
            tracing::trace!(conn = %id, ?event, "readiness for released connection ignored");
            return None;
        };

        match (state, event) {
            (ConnState::Connecting, Readiness::Readable | Readiness::Writable) => {
                if let Err(e) = self.drive(id) {
                    tracing::debug!(conn = %id, error = %e, "handshake step ended connection");
                }
            }
            (ConnState::Connecting, Readiness::Error | Readiness::Closed | Readiness::Timeout) => {
                let reason = match event {
                    Readiness::Timeout => "handshake timed out".to_string(),
                    Readiness::Closed => "server closed the connection during handshake".to_string(),
                    _ => self.error_text(id, "socket error during handshake"),
                };
                tracing::error!(conn = %id, ?event, error = %reason, "handshake aborted");
                self.fail(id, PoolError::Handshake(reason));
            }
            (ConnState::Connected, Readiness::Error | Readiness::Closed) => {
                let reason = self.error_text(id, "socket closed");
                tracing::warn!(conn = %id, ?event, error = %reason, "established connection lost");
                self.release(id, Err(PoolError::ConnectionLost(reason)));
            }
            // Steady-state traffic belongs to the query layer.
            (ConnState::Connected, _) | (ConnState::Closed, _) => {
                tracing::trace!(conn = %id, ?event, %state, "readiness not handled by lifecycle");
            }
        }

        self.state(id)
    }

    pub fn state(&self, id: ConnId) -> Option<ConnState> {
        self.conns.get(id).map(|conn| conn.state)
    }

    pub fn socket(&self, id: ConnId) -> Option<RawSocket> {
        self.conns.get(id).map(|conn| conn.socket)
    }

    /// Last poll step observed for the connection's handshake.
    pub fn last_poll(&self, id: ConnId) -> Option<PollStatus> {
        self.conns.get(id).and_then(|conn| conn.last_poll)
    }

    /// Whether the connection belongs to a pool (free or busy).
    pub fn is_pooled(&self, id: ConnId) -> bool {
        self.conns
            .get(id)
            .is_some_and(|conn| conn.membership.pool().is_some())
    }

    /// The underlying session, for the query layer.
    pub fn session_mut(&mut self, id: ConnId) -> Option<&mut dyn Session> {
        let conn = self.conns.get_mut(id)?;
        Some(conn.session.as_mut())
    }

    /// Number of live non-pooled connections.
    pub fn registry_len(&self) -> usize {
        self.registry.len()
    }

    /// Ids of all live connections, pooled or not.
    pub fn connection_ids(&self) -> Vec<ConnId> {
        self.conns.ids()
    }

    /// Number of live connections of every kind.
    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    /// Check that every live connection is listed in exactly the one
    /// collection its membership names, that no collection lists a dead
    /// connection, and that pool counters are within bounds.
    pub fn audit(&self) -> Result<(), String> {
        for (id, conn) in self.conns.iter() {
            let in_registry = self.registry.iter().filter(|c| **c == id).count();
            let mut in_free = 0;
            let mut in_busy = 0;
            for pool in self.pools.values() {
                in_free += pool.free.iter().filter(|c| **c == id).count();
                in_busy += pool.busy.iter().filter(|c| **c == id).count();
            }
            if in_registry + in_free + in_busy != 1 {
                return Err(format!(
                    "{id} listed {in_registry}x in registry, {in_free}x free, {in_busy}x busy"
                ));
            }
            let listed = match &conn.membership {
                Membership::Registry => in_registry == 1,
                Membership::Free(key) => self.pools.get(key).is_some_and(|p| p.free.contains(&id)),
                Membership::Busy(key) => self.pools.get(key).is_some_and(|p| p.busy.contains(&id)),
            };
            if !listed {
                return Err(format!("{id} is not listed where its membership {:?} says", conn.membership));
            }
        }

        let dangling = self
            .registry
            .iter()
            .chain(self.pools.values().flat_map(|p| p.free.iter().chain(p.busy.iter())))
            .find(|id| !self.conns.contains(**id));
        if let Some(id) = dangling {
            return Err(format!("{id} is listed but no longer live"));
        }

        for (key, pool) in &self.pools {
            if pool.free_size() > pool.size() || pool.size() > pool.config.max_size {
                return Err(format!(
                    "pool `{key}` out of bounds: free {} size {} max {}",
                    pool.free_size(),
                    pool.size(),
                    pool.config.max_size
                ));
            }
        }
        Ok(())
    }

    /// Release every live connection and drop all pool instances.
    ///
    /// Handshakes still in flight report `Shutdown` through their connect
    /// callback; disconnect callbacks fire with OK. Returns the number of
    /// connections released.
    pub fn shutdown(&mut self) -> usize {
        let ids = self.conns.ids();
        for &id in &ids {
            if let Some(mut conn) = self.detach(id) {
                conn.state = ConnState::Closed;
                conn.fire_connect(id, Err(PoolError::Shutdown));
                conn.fire_disconnect(id, Ok(()));
            }
        }
        self.pools.clear();
        tracing::info!(released = ids.len(), "execution context shut down");
        ids.len()
    }

    // ── Lifecycle internals ─────────────────────────────────────────

    /// Start a session towards `target` and drive its handshake once. On
    /// success the connection is linked into `membership`'s collection.
    pub(crate) fn open(
        &mut self,
        target: &ConnTarget,
        request: Option<R>,
        on_connect: Option<ConnectCallback<R>>,
        membership: Membership,
    ) -> PoolResult<ConnId> {
        let Some(mut session) = self.factory.start(target) else {
            tracing::warn!(target_kind = target.kind(), "could not allocate database session");
            return Err(PoolError::Allocation(format!(
                "no session for {} target",
                target.kind()
            )));
        };

        if session.status() == SessionStatus::Bad {
            let msg = session.error_message();
            tracing::error!(target_kind = target.kind(), error = %msg, "connect error");
            let id = self
                .conns
                .insert(Connection::new(session, request, on_connect, membership));
            return Err(self.fail(id, PoolError::Handshake(msg)));
        }

        if let Err(e) = session.set_nonblocking() {
            tracing::error!(target_kind = target.kind(), error = %e, "could not set socket non-blocking");
            return Err(PoolError::SocketMode(e));
        }

        let socket = session.socket();
        let mut conn = Connection::new(session, request, on_connect, membership);
        conn.socket = socket;
        let id = self.conns.insert(conn);

        self.drive(id)?;
        self.link(id);
        tracing::debug!(conn = %id, socket, state = ?self.state(id), "opened connection");
        Ok(id)
    }

    /// Run one poll step and apply the resulting transition.
    fn drive(&mut self, id: ConnId) -> PoolResult<()> {
        let conn = self
            .conns
            .get_mut(id)
            .ok_or(PoolError::UnknownConnection(id))?;
        let poll = conn.session.connect_poll();
        conn.last_poll = Some(poll);
        let disconnect_requested = conn.disconnect == DisconnectRequest::RequestedWhilePending;
        tracing::trace!(conn = %id, ?poll, disconnect_requested, "handshake step");

        match poll {
            PollStatus::Failed => {
                let msg = conn.session.error_message();
                tracing::error!(conn = %id, error = %msg, "handshake failed");
                Err(self.fail(id, PoolError::Handshake(msg)))
            }
            PollStatus::Ok if disconnect_requested => {
                conn.state = ConnState::Connected;
                tracing::debug!(conn = %id, "handshake complete, releasing on deferred disconnect");
                self.release(id, Ok(()));
                Ok(())
            }
            PollStatus::Ok => {
                conn.state = ConnState::Connected;
                let socket = conn.socket;
                self.watch(id, socket, Interest::NONE)?;
                tracing::debug!(conn = %id, socket, "handshake complete");
                if let Some(conn) = self.conns.get_mut(id) {
                    conn.fire_connect(id, Ok(()));
                }
                Ok(())
            }
            PollStatus::Reading | PollStatus::Writing => {
                conn.state = ConnState::Connecting;
                let socket = conn.socket;
                self.watch(id, socket, poll.interest())
            }
        }
    }

    fn watch(&mut self, id: ConnId, socket: RawSocket, interest: Interest) -> PoolResult<()> {
        match self.events.register(socket, interest, id) {
            Ok(()) => {
                if let Some(conn) = self.conns.get_mut(id) {
                    conn.registered = true;
                }
                Ok(())
            }
            Err(e) => {
                tracing::error!(conn = %id, socket, error = %e, "event loop registration failed");
                Err(self.fail(id, PoolError::Registration(e)))
            }
        }
    }

    /// Tear down a connection whose handshake failed. The connect callback
    /// reports the failure; a pending disconnect is answered with the same
    /// failure afterwards. Returns `err` for propagation.
    pub(crate) fn fail(&mut self, id: ConnId, err: PoolError) -> PoolError {
        if let Some(mut conn) = self.detach(id) {
            conn.state = ConnState::Closed;
            conn.fire_connect(id, Err(err.clone()));
            if conn.disconnect == DisconnectRequest::RequestedWhilePending {
                conn.fire_disconnect(id, Err(err.clone()));
            }
        }
        err
    }

    /// Tear down a connection, reporting `status` to its disconnect
    /// callback. Returns false if the connection was already gone.
    pub(crate) fn release(&mut self, id: ConnId, status: Status) -> bool {
        let Some(mut conn) = self.detach(id) else {
            return false;
        };
        conn.state = ConnState::Closed;
        tracing::debug!(conn = %id, socket = conn.socket, ok = status.is_ok(), "released connection");
        conn.fire_disconnect(id, status);
        true
    }

    /// Remove a connection from the arena, the event loop and its
    /// collection. The session is torn down when the returned value drops.
    fn detach(&mut self, id: ConnId) -> Option<Connection<R>> {
        let conn = self.conns.remove(id)?;
        if conn.registered {
            self.events.deregister(conn.socket);
        }
        self.unlink(id, &conn.membership);
        Some(conn)
    }

    fn link(&mut self, id: ConnId) {
        let Some(membership) = self.conns.get(id).map(|conn| conn.membership.clone()) else {
            return;
        };
        match membership {
            Membership::Registry => self.registry.push(id),
            Membership::Free(key) => {
                if let Some(pool) = self.pools.get_mut(&key) {
                    pool.free.push_back(id);
                }
            }
            Membership::Busy(key) => {
                if let Some(pool) = self.pools.get_mut(&key) {
                    pool.busy.push(id);
                }
            }
        }
    }

    pub(crate) fn unlink(&mut self, id: ConnId, membership: &Membership) {
        match membership {
            Membership::Registry => self.registry.retain(|c| *c != id),
            Membership::Free(key) => {
                if let Some(pool) = self.pools.get_mut(key) {
                    pool.free.retain(|c| *c != id);
                }
            }
            Membership::Busy(key) => {
                if let Some(pool) = self.pools.get_mut(key) {
                    pool.busy.retain(|c| *c != id);
                }
            }
        }
    }

    fn error_text(&self, id: ConnId, fallback: &str) -> String {
        self.conns
            .get(id)
            .map(|conn| conn.session.error_message())
            .filter(|msg| !msg.is_empty())
            .unwrap_or_else(|| fallback.to_string())
    }
}

impl<R> fmt::Debug for PgContext<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgContext")
            .field("connections", &self.conns.len())
            .field("registry", &self.registry.len())
            .field("pools", &self.pools.len())
            .finish_non_exhaustive()
    }
}
