//! Inbound command router
//!
//! The bus network task hands every received publish to [`CommandRouter::enqueue`],
//! which copies it into a bounded FIFO and returns immediately. One dedicated
//! worker thread pops messages, looks the topic up in the route table and runs
//! the matching command. Commands therefore never overlap, so at most one SSH
//! session to the device exists at a time.

use bytes::Bytes;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::kind::CommandKind;
use crate::protocol::limits;

/// Runs one routed command on the worker thread
pub trait Execute: Send + Sync {
    fn execute(&self, kind: CommandKind, payload: &[u8]);

    /// The command panicked; the worker keeps running
    fn panicked(&self, kind: CommandKind, detail: &str);
}

/// Owned copy of a received publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    QueueFull,
    ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    Dropped(DropReason),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("route table full ({0} entries)")]
    TableFull(usize),

    #[error("duplicate route for {0}")]
    DuplicateRoute(String),

    #[error("router already started")]
    AlreadyStarted,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub topic: String,
    pub kind: CommandKind,
}

/// Exact-match topic lookup over a small fixed table
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn register(&mut self, topic: impl Into<String>, kind: CommandKind) -> Result<(), RouterError> {
        let topic = topic.into();
        if self.entries.len() >= limits::MAX_ROUTES {
            return Err(RouterError::TableFull(limits::MAX_ROUTES));
        }
        if self.entries.iter().any(|e| e.topic == topic) {
            return Err(RouterError::DuplicateRoute(topic));
        }
        self.entries.push(RouteEntry { topic, kind });
        Ok(())
    }

    pub fn lookup(&self, topic: &str) -> Option<CommandKind> {
        self.entries.iter().find(|e| e.topic == topic).map(|e| e.kind)
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.topic.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Running,
    Stopped,
}

struct Queue {
    messages: VecDeque<InboundMessage>,
    phase: Phase,
    dropped: u64,
}

struct Shared {
    queue: Mutex<Queue>,
    /// Signalled on enqueue and on stop
    wake: Condvar,
    capacity: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct CommandRouter {
    shared: Arc<Shared>,
    routes: Mutex<RouteTable>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Default for CommandRouter {
    fn default() -> Self {
        Self::new(limits::INBOUND_QUEUE_CAPACITY)
    }
}

impl CommandRouter {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    messages: VecDeque::with_capacity(capacity),
                    phase: Phase::Created,
                    dropped: 0,
                }),
                wake: Condvar::new(),
                capacity,
            }),
            routes: Mutex::new(RouteTable::default()),
            worker: Mutex::new(None),
        }
    }

    /// Add a route. Only allowed before [`start`](Self::start).
    pub fn register_route(&self, topic: impl Into<String>, kind: CommandKind) -> Result<(), RouterError> {
        if self.shared.lock().phase != Phase::Created {
            return Err(RouterError::AlreadyStarted);
        }
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .register(topic, kind)
    }

    /// Topics with a registered route
    pub fn topics(&self) -> Vec<String> {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .topics()
            .map(str::to_string)
            .collect()
    }

    /// Copy a message into the queue. Never blocks.
    pub fn enqueue(&self, topic: &str, payload: &[u8]) -> EnqueueOutcome {
        let mut queue = self.shared.lock();

        if queue.phase == Phase::Stopped {
            debug!("[ROUTER] Shutting down, dropped message on {}", topic);
            return EnqueueOutcome::Dropped(DropReason::ShuttingDown);
        }
        if queue.messages.len() >= self.shared.capacity {
            queue.dropped += 1;
            let dropped = queue.dropped;
            drop(queue);
            warn!(
                "[ROUTER] Queue full ({}), dropped message on {} ({} dropped so far)",
                self.shared.capacity, topic, dropped
            );
            return EnqueueOutcome::Dropped(DropReason::QueueFull);
        }

        queue.messages.push_back(InboundMessage {
            topic: topic.to_string(),
            payload: Bytes::copy_from_slice(payload),
        });
        drop(queue);
        self.shared.wake.notify_one();
        EnqueueOutcome::Queued
    }

    /// Messages waiting for the worker
    pub fn pending(&self) -> usize {
        self.shared.lock().messages.len()
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().phase == Phase::Running
    }

    /// Spawn the worker thread. The route table is frozen from here on.
    pub fn start(&self, executor: Arc<dyn Execute>) -> Result<(), RouterError> {
        let mut queue = self.shared.lock();
        if queue.phase != Phase::Created {
            return Err(RouterError::AlreadyStarted);
        }

        let routes = self
            .routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("command-worker".into())
            .spawn(move || worker_loop(shared, routes, executor))
            .map_err(|e| RouterError::Spawn(e.to_string()))?;

        queue.phase = Phase::Running;
        drop(queue);

        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!("[ROUTER] Worker started");
        Ok(())
    }

    /// Stop the worker, wait for the in-flight command, then discard the rest.
    ///
    /// Nothing is dispatched once this has been called.
    pub fn stop(&self) {
        {
            let mut queue = self.shared.lock();
            if queue.phase == Phase::Stopped {
                return;
            }
            queue.phase = Phase::Stopped;
        }
        self.shared.wake.notify_all();

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("[ROUTER] Worker thread panicked");
            }
        }

        let discarded = {
            let mut queue = self.shared.lock();
            let count = queue.messages.len();
            queue.messages.clear();
            count
        };
        info!("[ROUTER] Stopped, {} queued messages discarded", discarded);
    }
}

impl Drop for CommandRouter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: Arc<Shared>, routes: RouteTable, executor: Arc<dyn Execute>) {
    debug!("[ROUTER] Worker running with {} routes", routes.len());

    loop {
        let message = {
            let mut queue = shared.lock();
            loop {
                if queue.phase == Phase::Stopped {
                    debug!("[ROUTER] Worker exiting");
                    return;
                }
                if let Some(message) = queue.messages.pop_front() {
                    break message;
                }
                queue = shared
                    .wake
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        dispatch(&routes, executor.as_ref(), &message);
    }
}

fn dispatch(routes: &RouteTable, executor: &dyn Execute, message: &InboundMessage) {
    let Some(kind) = routes.lookup(&message.topic) else {
        warn!("[ROUTER] No route for topic {}", message.topic);
        return;
    };

    debug!("[ROUTER] {} ({} bytes)", kind, message.payload.len());
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        executor.execute(kind, &message.payload)
    }));

    if let Err(panic) = result {
        let detail = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!("[ROUTER] Command {} panicked: {}", kind, detail);
        executor.panicked(kind, &detail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    const TOPIC: &str = "cht/doorbell-mqtt/default/cmd/test_config";

    /// Records payloads; optionally blocks on the first command until released
    struct Recorder {
        seen: Mutex<Vec<String>>,
        notify: Mutex<mpsc::Sender<String>>,
        gate: Mutex<Option<mpsc::Receiver<()>>>,
        panicked: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn new(notify: mpsc::Sender<String>, gate: Option<mpsc::Receiver<()>>) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                notify: Mutex::new(notify),
                gate: Mutex::new(gate),
                panicked: Mutex::new(Vec::new()),
            })
        }
    }

    impl Execute for Recorder {
        fn execute(&self, _kind: CommandKind, payload: &[u8]) {
            let text = String::from_utf8_lossy(payload).into_owned();
            if text == "boom" {
                panic!("handler exploded");
            }
            self.seen.lock().unwrap().push(text.clone());
            let _ = self.notify.lock().unwrap().send(text);
            if let Some(gate) = self.gate.lock().unwrap().take() {
                let _ = gate.recv();
            }
        }

        fn panicked(&self, _kind: CommandKind, detail: &str) {
            self.panicked.lock().unwrap().push(detail.to_string());
        }
    }

    fn router(capacity: usize) -> CommandRouter {
        let router = CommandRouter::new(capacity);
        router.register_route(TOPIC, CommandKind::TestConfig).unwrap();
        router
    }

    #[test]
    fn test_dispatches_in_order() {
        let router = router(8);
        let (tx, rx) = mpsc::channel();
        let recorder = Recorder::new(tx, None);
        router.start(recorder.clone()).unwrap();

        for i in 0..3 {
            assert_eq!(router.enqueue(TOPIC, i.to_string().as_bytes()), EnqueueOutcome::Queued);
        }
        for _ in 0..3 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        router.stop();

        assert_eq!(*recorder.seen.lock().unwrap(), vec!["0", "1", "2"]);
    }

    #[test]
    fn test_overflow_drops_without_blocking() {
        let router = router(limits::INBOUND_QUEUE_CAPACITY);

        let started = Instant::now();
        for i in 0..limits::INBOUND_QUEUE_CAPACITY {
            assert_eq!(router.enqueue(TOPIC, i.to_string().as_bytes()), EnqueueOutcome::Queued);
        }
        assert_eq!(
            router.enqueue(TOPIC, b"overflow"),
            EnqueueOutcome::Dropped(DropReason::QueueFull)
        );
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(router.pending(), limits::INBOUND_QUEUE_CAPACITY);

        let (tx, rx) = mpsc::channel();
        let recorder = Recorder::new(tx, None);
        router.start(recorder.clone()).unwrap();
        for _ in 0..limits::INBOUND_QUEUE_CAPACITY {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        router.stop();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), limits::INBOUND_QUEUE_CAPACITY);
        assert!(!seen.iter().any(|p| p == "overflow"));
    }

    #[test]
    fn test_nothing_dispatched_after_stop() {
        let router = Arc::new(router(8));
        let (tx, rx) = mpsc::channel();
        let (release, gate) = mpsc::channel();
        let recorder = Recorder::new(tx, Some(gate));

        router.enqueue(TOPIC, b"first");
        router.enqueue(TOPIC, b"second");
        router.enqueue(TOPIC, b"third");
        router.start(recorder.clone()).unwrap();

        // Worker is now blocked inside "first"
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "first");

        let stopper = {
            let router = router.clone();
            thread::spawn(move || router.stop())
        };
        while router.is_running() {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(
            router.enqueue(TOPIC, b"late"),
            EnqueueOutcome::Dropped(DropReason::ShuttingDown)
        );

        release.send(()).unwrap();
        stopper.join().unwrap();

        assert_eq!(*recorder.seen.lock().unwrap(), vec!["first"]);
        assert_eq!(router.pending(), 0);
    }

    #[test]
    fn test_unknown_topic_is_dropped() {
        let router = router(8);
        let (tx, rx) = mpsc::channel();
        let recorder = Recorder::new(tx, None);
        router.start(recorder.clone()).unwrap();

        router.enqueue("cht/doorbell-mqtt/default/cmd/unknown", b"x");
        router.enqueue(TOPIC, b"known");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "known");
        router.stop();

        assert_eq!(*recorder.seen.lock().unwrap(), vec!["known"]);
    }

    #[test]
    fn test_panicking_command_is_reported_and_worker_survives() {
        let router = router(8);
        let (tx, rx) = mpsc::channel();
        let recorder = Recorder::new(tx, None);
        router.start(recorder.clone()).unwrap();

        router.enqueue(TOPIC, b"boom");
        router.enqueue(TOPIC, b"after");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "after");
        router.stop();

        assert_eq!(*recorder.panicked.lock().unwrap(), vec!["handler exploded"]);
    }

    #[test]
    fn test_route_table_limits() {
        let mut table = RouteTable::default();
        for i in 0..limits::MAX_ROUTES {
            table.register(format!("t/{i}"), CommandKind::TestConfig).unwrap();
        }
        assert_eq!(
            table.register("t/extra", CommandKind::TestConfig),
            Err(RouterError::TableFull(limits::MAX_ROUTES))
        );
        assert_eq!(table.lookup("t/3"), Some(CommandKind::TestConfig));
        assert_eq!(table.lookup("t/3/"), None);

        let mut table = RouteTable::default();
        table.register("a", CommandKind::PresetSet).unwrap();
        assert!(matches!(
            table.register("a", CommandKind::ApplyCustom),
            Err(RouterError::DuplicateRoute(_))
        ));
    }

    #[test]
    fn test_routes_frozen_after_start() {
        let router = router(8);
        let (tx, _rx) = mpsc::channel();
        router.start(Recorder::new(tx, None)).unwrap();

        assert_eq!(
            router.register_route("other", CommandKind::DownloadAssets),
            Err(RouterError::AlreadyStarted)
        );
        router.stop();
    }
}
