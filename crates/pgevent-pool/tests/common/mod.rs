//! Shared fixtures for the integration tests.
//!
//! The test stack: `PgContext` → `MockFactory` (scripted handshakes) and
//! `MockEventLoop` (records registrations), with callbacks captured by a
//! `Recorder`.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once};

use pgevent_pool::{
    ConnId, ConnTarget, ConnectCallback, EventLoop, Interest, PgContext, PollStatus, PoolRegistry,
    RawSocket, Session, SessionFactory, SessionStatus, Status,
};

static TRACING_INIT: Once = Once::new();

pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

// ── Scripted sessions ───────────────────────────────────────────────

/// How one started session behaves.
#[derive(Clone, Debug)]
pub struct Script {
    /// Poll results in order; once exhausted every poll reports `Ok`.
    pub polls: Vec<PollStatus>,
    pub status: SessionStatus,
    pub nonblocking_fails: bool,
    pub error: String,
}

impl Script {
    /// Handshake completes on the first poll.
    pub fn instant() -> Self {
        Self::steps(&[PollStatus::Ok])
    }

    pub fn steps(polls: &[PollStatus]) -> Self {
        Self {
            polls: polls.to_vec(),
            status: SessionStatus::Ok,
            nonblocking_fails: false,
            error: String::new(),
        }
    }

    /// Session reports `Bad` right after start.
    pub fn bad(error: &str) -> Self {
        Self {
            status: SessionStatus::Bad,
            error: error.to_string(),
            ..Self::instant()
        }
    }

    pub fn nonblocking_fails() -> Self {
        Self {
            nonblocking_fails: true,
            ..Self::instant()
        }
    }

    pub fn with_error(self, error: &str) -> Self {
        Self {
            error: error.to_string(),
            ..self
        }
    }
}

#[derive(Debug)]
struct MockSession {
    polls: VecDeque<PollStatus>,
    status: SessionStatus,
    nonblocking_fails: bool,
    error: String,
    socket: RawSocket,
    dropped: Arc<AtomicU64>,
}

impl Session for MockSession {
    fn status(&self) -> SessionStatus {
        self.status
    }

    fn set_nonblocking(&mut self) -> Result<(), String> {
        if self.nonblocking_fails {
            Err("fcntl(O_NONBLOCK) refused".to_string())
        } else {
            Ok(())
        }
    }

    fn socket(&self) -> RawSocket {
        self.socket
    }

    fn connect_poll(&mut self) -> PollStatus {
        self.polls.pop_front().unwrap_or(PollStatus::Ok)
    }

    fn error_message(&self) -> String {
        self.error.clone()
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Session factory handing out scripted sessions in FIFO order. Without a
/// queued script the session connects instantly.
pub struct MockFactory {
    scripts: Mutex<VecDeque<Script>>,
    refuse_starts: AtomicBool,
    next_socket: AtomicI32,
    started: AtomicU64,
    dropped: Arc<AtomicU64>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(VecDeque::new()),
            refuse_starts: AtomicBool::new(false),
            next_socket: AtomicI32::new(10),
            started: AtomicU64::new(0),
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    /// Make every start fail as if the session could not be allocated.
    pub fn refuse_starts(&self, refuse: bool) {
        self.refuse_starts.store(refuse, Ordering::SeqCst);
    }

    pub fn started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    /// Sessions torn down so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> u64 {
        self.started() - self.dropped()
    }
}

impl SessionFactory for MockFactory {
    fn start(&self, _target: &ConnTarget) -> Option<Box<dyn Session>> {
        if self.refuse_starts.load(Ordering::SeqCst) {
            return None;
        }
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Script::instant);
        self.started.fetch_add(1, Ordering::SeqCst);
        Some(Box::new(MockSession {
            polls: script.polls.into(),
            status: script.status,
            nonblocking_fails: script.nonblocking_fails,
            error: script.error,
            socket: self.next_socket.fetch_add(1, Ordering::SeqCst),
            dropped: Arc::clone(&self.dropped),
        }))
    }
}

// ── Event loop ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct LoopState {
    /// Currently watched sockets.
    pub watched: HashMap<RawSocket, (Interest, ConnId)>,
    /// Every register call, in order.
    pub registrations: Vec<(RawSocket, Interest)>,
    pub deregistered: Vec<RawSocket>,
    pub refuse_registration: bool,
}

/// Event loop that only records what it was asked to do.
pub struct MockEventLoop {
    state: Rc<RefCell<LoopState>>,
}

impl EventLoop for MockEventLoop {
    fn register(&mut self, socket: RawSocket, interest: Interest, conn: ConnId) -> Result<(), String> {
        let mut state = self.state.borrow_mut();
        if state.refuse_registration {
            return Err("epoll_ctl: no space left".to_string());
        }
        state.registrations.push((socket, interest));
        state.watched.insert(socket, (interest, conn));
        Ok(())
    }

    fn deregister(&mut self, socket: RawSocket) {
        let mut state = self.state.borrow_mut();
        state.watched.remove(&socket);
        state.deregistered.push(socket);
    }
}

/// Test-side view of the mock event loop.
#[derive(Clone, Default)]
pub struct LoopHandle {
    state: Rc<RefCell<LoopState>>,
}

impl LoopHandle {
    pub fn event_loop(&self) -> Box<dyn EventLoop> {
        Box::new(MockEventLoop {
            state: Rc::clone(&self.state),
        })
    }

    pub fn interest(&self, socket: RawSocket) -> Option<Interest> {
        self.state.borrow().watched.get(&socket).map(|(i, _)| *i)
    }

    pub fn is_watched(&self, socket: RawSocket) -> bool {
        self.state.borrow().watched.contains_key(&socket)
    }

    pub fn watched_count(&self) -> usize {
        self.state.borrow().watched.len()
    }

    pub fn deregistrations(&self, socket: RawSocket) -> usize {
        self.state
            .borrow()
            .deregistered
            .iter()
            .filter(|s| **s == socket)
            .count()
    }

    pub fn refuse_registration(&self, refuse: bool) {
        self.state.borrow_mut().refuse_registration = refuse;
    }
}

// ── Callbacks ───────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct Call {
    pub id: ConnId,
    pub status: Status,
    pub request: Option<String>,
}

/// Captures callback invocations.
#[derive(Clone, Default)]
pub struct Recorder {
    calls: Rc<RefCell<Vec<Call>>>,
}

impl Recorder {
    pub fn callback(&self) -> ConnectCallback<String> {
        let calls = Rc::clone(&self.calls);
        Box::new(move |id: ConnId, status: Status, request: Option<&String>| {
            calls.borrow_mut().push(Call {
                id,
                status,
                request: request.cloned(),
            });
        })
    }

    pub fn count(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn last(&self) -> Option<Call> {
        self.calls.borrow().last().cloned()
    }
}

// ── Context setup ───────────────────────────────────────────────────

pub const POOL: &str = "main";

pub struct Fixture {
    pub ctx: PgContext<String>,
    pub factory: Arc<MockFactory>,
    pub events: LoopHandle,
}

impl Fixture {
    /// Context with one pool `main` registered by parameters.
    pub fn with_pool(min_size: usize, max_size: usize) -> Self {
        let mut registry = PoolRegistry::new();
        registry
            .register_params(
                POOL.into(),
                min_size,
                max_size,
                &["host", "dbname", "user"],
                &["db.internal", "app", "app_rw"],
                false,
            )
            .unwrap();
        Self::with_registry(registry)
    }

    pub fn with_registry(registry: PoolRegistry) -> Self {
        init_tracing();
        let factory = MockFactory::new();
        let events = LoopHandle::default();
        let ctx = PgContext::new(factory.clone(), events.event_loop(), Arc::new(registry));
        Self {
            ctx,
            factory,
            events,
        }
    }
}
