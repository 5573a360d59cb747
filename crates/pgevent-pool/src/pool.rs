//! Per-context connection pools.
//!
//! Each execution context keeps one [`Pool`] per configured key, created on
//! first [`acquire`](PgContext::acquire). A pool holds its connections in two
//! disjoint sets:
//!
//! ```text
//! acquire(key)
//!   → free non-empty            → lend (prefer CONNECTED), free → busy
//!   → free empty, size < max    → spawn(spawn_count) → lend
//!   → free empty, size == max   → direct connection, not counted in size
//!
//! reclaim(id)
//!   → busy                      → clear caller, busy → free, shrink
//!   → overflow direct conn      → adopt into free if room, else release
//!
//! shrink: while free*2 > size && size > min_size → release oldest free
//! ```
//!
//! `size` is always `free + busy`; it is derived from the sets rather than
//! tracked separately.

use std::collections::VecDeque;

use crate::arena::ConnId;
use crate::config::{PoolConfig, PoolKey};
use crate::connection::{ConnState, ConnectCallback, Membership};
use crate::context::PgContext;
use crate::error::{PoolError, PoolResult};

/// One pool instance, private to an execution context.
#[derive(Debug)]
pub(crate) struct Pool {
    pub(crate) config: PoolConfig,
    /// Idle connections, oldest first.
    pub(crate) free: VecDeque<ConnId>,
    /// Connections lent to callers.
    pub(crate) busy: Vec<ConnId>,
    /// Direct connections opened because the pool was at `max_size`.
    overflow_count: u64,
}

impl Pool {
    fn new(config: PoolConfig) -> Self {
        Self {
            config,
            free: VecDeque::new(),
            busy: Vec::new(),
            overflow_count: 0,
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.free.len() + self.busy.len()
    }

    pub(crate) fn free_size(&self) -> usize {
        self.free.len()
    }

    fn should_shrink(&self) -> bool {
        self.free_size() * 2 > self.size() && self.size() > self.config.min_size
    }
}

/// Pool-level statistics for a single pool key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections owned by the pool (free + busy).
    pub size: usize,
    /// Connections sitting idle in the pool.
    pub free: usize,
    /// Connections currently lent to callers.
    pub busy: usize,
    pub min_size: usize,
    pub max_size: usize,
    /// Number of acquires served by a direct connection because the pool
    /// was full.
    pub overflow_count: u64,
}

impl<R> PgContext<R> {
    /// Borrow a connection from the pool registered under `key`.
    ///
    /// A connection that is already connected fires `on_connect` before this
    /// returns; one still handshaking fires it when the handshake ends. When
    /// the pool is full the returned connection is a direct one that is not
    /// counted in the pool; [`reclaim`](Self::reclaim) still accepts it.
    pub fn acquire(
        &mut self,
        key: &PoolKey,
        request: Option<R>,
        on_connect: Option<ConnectCallback<R>>,
    ) -> PoolResult<ConnId> {
        let (has_free, size, max_size, spawn) = {
            let pool = self.pool_for(key)?;
            (
                !pool.free.is_empty(),
                pool.size(),
                pool.config.max_size,
                pool.config.spawn_count(pool.size()),
            )
        };

        if !has_free {
            if size < max_size {
                self.spawn(key, spawn)?;
            } else {
                return self.open_overflow(key, request, on_connect);
            }
        }

        self.checkout(key, request, on_connect)
    }

    /// Return a borrowed connection to its pool.
    ///
    /// The caller context and callbacks are cleared, the connection joins
    /// the back of the free set and the pool shrinks if too many are idle.
    pub fn reclaim(&mut self, id: ConnId) -> PoolResult<()> {
        let conn = self
            .conns
            .get_mut(id)
            .ok_or(PoolError::UnknownConnection(id))?;

        let key = match (&conn.membership, &conn.overflow_of) {
            (Membership::Busy(key), _) => key.clone(),
            (Membership::Registry, Some(key)) => {
                let key = key.clone();
                return self.reclaim_overflow(id, &key);
            }
            _ => return Err(PoolError::NotBorrowed(id)),
        };

        conn.clear_caller();
        conn.membership = Membership::Free(key.clone());
        let state = conn.state;

        let pool = self
            .pools
            .get_mut(&key)
            .ok_or_else(|| PoolError::ConfigurationNotFound(key.clone()))?;
        pool.busy.retain(|c| *c != id);
        pool.free.push_back(id);

        tracing::debug!(
            conn = %id,
            pool = %key,
            %state,
            size = pool.size(),
            free = pool.free_size(),
            "reclaimed connection"
        );

        self.shrink(&key);
        Ok(())
    }

    /// Open up to `count` warm connections into the free set of `key`,
    /// never growing the pool past `max_size`.
    ///
    /// Stops at the first connection that cannot be started. Fails with
    /// [`PoolError::PoolExhausted`] if the free set is still empty.
    pub fn spawn(&mut self, key: &PoolKey, count: usize) -> PoolResult<()> {
        let (target, count) = {
            let pool = self.pool_for(key)?;
            let room = pool.config.max_size.saturating_sub(pool.size());
            (pool.config.target.clone(), count.min(room))
        };

        let mut opened = 0;
        for _ in 0..count {
            match self.open(&target, None, None, Membership::Free(key.clone())) {
                Ok(_) => opened += 1,
                Err(e) => {
                    tracing::warn!(pool = %key, error = %e, opened, requested = count, "spawn stopped early");
                    break;
                }
            }
        }

        let pool = self
            .pools
            .get(key)
            .ok_or_else(|| PoolError::ConfigurationNotFound(key.clone()))?;
        tracing::debug!(
            pool = %key,
            requested = count,
            opened,
            size = pool.size(),
            free = pool.free_size(),
            "spawned pool connections"
        );

        if pool.free.is_empty() {
            return Err(PoolError::PoolExhausted(key.clone()));
        }
        Ok(())
    }

    /// Statistics for the pool instance of `key`, if one exists yet.
    pub fn pool_stats(&self, key: &PoolKey) -> Option<PoolStats> {
        self.pools.get(key).map(|pool| PoolStats {
            size: pool.size(),
            free: pool.free_size(),
            busy: pool.busy.len(),
            min_size: pool.config.min_size,
            max_size: pool.config.max_size,
            overflow_count: pool.overflow_count,
        })
    }

    /// Log pool statistics for all pools at `tracing::info` level.
    pub fn log_stats(&self) {
        for (key, pool) in &self.pools {
            tracing::info!(
                pool = %key,
                size = pool.size(),
                free = pool.free_size(),
                busy = pool.busy.len(),
                min_size = pool.config.min_size,
                max_size = pool.config.max_size,
                overflow_count = pool.overflow_count,
                "pool statistics"
            );
        }
    }

    // ── Internals ───────────────────────────────────────────────────

    fn pool_for(&mut self, key: &PoolKey) -> PoolResult<&mut Pool> {
        if !self.pools.contains_key(key) {
            let config = self
                .configs
                .get(key)
                .ok_or_else(|| PoolError::ConfigurationNotFound(key.clone()))?
                .clone();
            tracing::debug!(
                pool = %key,
                min_size = config.min_size,
                max_size = config.max_size,
                "created pool instance"
            );
            self.pools.insert(key.clone(), Pool::new(config));
        }
        self.pools
            .get_mut(key)
            .ok_or_else(|| PoolError::ConfigurationNotFound(key.clone()))
    }

    /// Move a free connection to busy and bind the caller to it.
    fn checkout(
        &mut self,
        key: &PoolKey,
        request: Option<R>,
        on_connect: Option<ConnectCallback<R>>,
    ) -> PoolResult<ConnId> {
        let pool = self
            .pools
            .get_mut(key)
            .ok_or_else(|| PoolError::ConfigurationNotFound(key.clone()))?;

        let conns = &self.conns;
        let pos = pool
            .free
            .iter()
            .position(|id| conns.get(*id).is_some_and(|c| c.state == ConnState::Connected))
            .unwrap_or(0);
        let id = pool
            .free
            .remove(pos)
            .ok_or_else(|| PoolError::PoolExhausted(key.clone()))?;
        pool.busy.push(id);
        let (size, free) = (pool.size(), pool.free_size());

        let conn = self
            .conns
            .get_mut(id)
            .ok_or(PoolError::UnknownConnection(id))?;
        conn.membership = Membership::Busy(key.clone());
        conn.request = request;
        conn.on_connect = on_connect;

        tracing::debug!(conn = %id, pool = %key, state = %conn.state, size, free, "lent pooled connection");

        // A connection still handshaking fires on completion instead.
        if conn.state == ConnState::Connected {
            conn.fire_connect(id, Ok(()));
        }
        Ok(id)
    }

    fn open_overflow(
        &mut self,
        key: &PoolKey,
        request: Option<R>,
        on_connect: Option<ConnectCallback<R>>,
    ) -> PoolResult<ConnId> {
        let pool = self
            .pools
            .get_mut(key)
            .ok_or_else(|| PoolError::ConfigurationNotFound(key.clone()))?;
        let target = pool.config.target.clone();
        tracing::debug!(
            pool = %key,
            size = pool.size(),
            max_size = pool.config.max_size,
            "pool full, opening direct connection"
        );

        let id = self.open(&target, request, on_connect, Membership::Registry)?;
        if let Some(conn) = self.conns.get_mut(id) {
            conn.overflow_of = Some(key.clone());
        }
        if let Some(pool) = self.pools.get_mut(key) {
            pool.overflow_count += 1;
        }
        Ok(id)
    }

    /// Reclaim a direct connection opened because `key` was full: adopt it
    /// if the pool has room again, otherwise close it.
    fn reclaim_overflow(&mut self, id: ConnId, key: &PoolKey) -> PoolResult<()> {
        let has_room = self
            .pools
            .get(key)
            .is_some_and(|pool| pool.size() < pool.config.max_size);

        let conn = self
            .conns
            .get_mut(id)
            .ok_or(PoolError::UnknownConnection(id))?;
        conn.clear_caller();

        if !has_room {
            tracing::debug!(conn = %id, pool = %key, "pool still full, closing direct connection");
            self.release(id, Ok(()));
            return Ok(());
        }

        conn.overflow_of = None;
        self.unlink(id, &Membership::Registry);
        if let Some(conn) = self.conns.get_mut(id) {
            conn.membership = Membership::Free(key.clone());
        }
        if let Some(pool) = self.pools.get_mut(key) {
            pool.free.push_back(id);
            tracing::debug!(conn = %id, pool = %key, size = pool.size(), "adopted direct connection into pool");
        }

        self.shrink(key);
        Ok(())
    }

    /// Release the oldest free connections while more than half the pool is
    /// idle and the pool is above its floor.
    fn shrink(&mut self, key: &PoolKey) {
        loop {
            let Some(pool) = self.pools.get_mut(key) else {
                return;
            };
            if !pool.should_shrink() {
                return;
            }
            let Some(&oldest) = pool.free.front() else {
                return;
            };
            tracing::debug!(
                conn = %oldest,
                pool = %key,
                size = pool.size(),
                free = pool.free_size(),
                "shrinking pool"
            );
            if !self.release(oldest, Ok(())) {
                // Not live; drop the stale entry so the loop advances.
                if let Some(pool) = self.pools.get_mut(key) {
                    pool.free.pop_front();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnTarget, PoolRegistry};
    use crate::event::{EventLoop, Interest, RawSocket};
    use crate::session::{PollStatus, Session, SessionFactory, SessionStatus};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI32, Ordering};

    // ── Mocks ───────────────────────────────────────────────────────

    #[derive(Debug)]
    struct InstantSession {
        socket: RawSocket,
    }

    impl Session for InstantSession {
        fn status(&self) -> SessionStatus {
            SessionStatus::Ok
        }
        fn set_nonblocking(&mut self) -> Result<(), String> {
            Ok(())
        }
        fn socket(&self) -> RawSocket {
            self.socket
        }
        fn connect_poll(&mut self) -> PollStatus {
            PollStatus::Ok
        }
        fn error_message(&self) -> String {
            String::new()
        }
    }

    #[derive(Default)]
    struct InstantFactory {
        next_socket: AtomicI32,
    }

    impl SessionFactory for InstantFactory {
        fn start(&self, _target: &ConnTarget) -> Option<Box<dyn Session>> {
            let socket = self.next_socket.fetch_add(1, Ordering::Relaxed) + 100;
            Some(Box::new(InstantSession { socket }))
        }
    }

    struct NoopLoop;

    impl EventLoop for NoopLoop {
        fn register(&mut self, _: RawSocket, _: Interest, _: ConnId) -> Result<(), String> {
            Ok(())
        }
        fn deregister(&mut self, _: RawSocket) {}
    }

    fn key() -> PoolKey {
        PoolKey::new("main")
    }

    fn context(min: usize, max: usize) -> PgContext {
        let mut registry = PoolRegistry::new();
        registry
            .register_uri(key(), min, max, "postgres://localhost/app")
            .unwrap();
        PgContext::new(
            Arc::new(InstantFactory::default()),
            Box::new(NoopLoop),
            Arc::new(registry),
        )
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[test]
    fn first_acquire_fills_pool_to_min_size() {
        let mut ctx = context(3, 5);
        let id = ctx.acquire(&key(), None, None).unwrap();

        let stats = ctx.pool_stats(&key()).unwrap();
        assert_eq!(stats.size, 3);
        assert_eq!(stats.busy, 1);
        assert_eq!(stats.free, 2);
        assert!(ctx.is_pooled(id));
        ctx.audit().unwrap();
    }

    #[test]
    fn reclaimed_connection_is_reused() {
        let mut ctx = context(1, 2);
        let first = ctx.acquire(&key(), None, None).unwrap();
        ctx.reclaim(first).unwrap();

        let second = ctx.acquire(&key(), None, None).unwrap();
        assert_eq!(first, second);
        assert_eq!(ctx.pool_stats(&key()).unwrap().size, 1);
    }

    #[test]
    fn overflow_connection_closed_while_pool_full() {
        let mut ctx = context(1, 1);
        let pooled = ctx.acquire(&key(), None, None).unwrap();
        let direct = ctx.acquire(&key(), None, None).unwrap();
        assert!(!ctx.is_pooled(direct));
        assert_eq!(ctx.pool_stats(&key()).unwrap().overflow_count, 1);

        // Pool still full: the direct connection is closed.
        ctx.reclaim(direct).unwrap();
        assert_eq!(ctx.state(direct), None);
        assert_eq!(ctx.registry_len(), 0);

        ctx.reclaim(pooled).unwrap();
        ctx.audit().unwrap();
    }

    #[test]
    fn overflow_adopted_into_free_set() {
        let mut ctx = context(1, 1);
        let pooled = ctx.acquire(&key(), None, None).unwrap();
        let direct = ctx.acquire(&key(), None, None).unwrap();

        // Losing the pooled connection makes room for the direct one.
        ctx.disconnect(pooled, None).unwrap();
        ctx.reclaim(direct).unwrap();

        assert!(ctx.is_pooled(direct));
        let stats = ctx.pool_stats(&key()).unwrap();
        assert_eq!((stats.size, stats.free), (1, 1));
        ctx.audit().unwrap();
    }

    #[test]
    fn shrink_keeps_floor() {
        let mut ctx = context(2, 6);
        let ids: Vec<_> = (0..6)
            .map(|_| ctx.acquire(&key(), None, None).unwrap())
            .collect();
        assert_eq!(ctx.pool_stats(&key()).unwrap().size, 6);

        for id in ids {
            ctx.reclaim(id).unwrap();
            let stats = ctx.pool_stats(&key()).unwrap();
            assert!(stats.size >= 2);
            assert!(stats.free * 2 <= stats.size || stats.size == 2);
        }
        let stats = ctx.pool_stats(&key()).unwrap();
        assert_eq!((stats.size, stats.free, stats.busy), (2, 2, 0));
    }

    #[test]
    fn stats_absent_before_first_acquire() {
        let ctx = context(1, 2);
        assert_eq!(ctx.pool_stats(&key()), None);
    }
}
