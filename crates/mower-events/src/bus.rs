//! [`EventBus`] – priority-tagged publish/subscribe with a dedicated worker
//! thread and bounded history.
//!
//! Components subscribe a callback either to a single [`EventType`] or to
//! every event (wildcard).  Published events are appended to an unbounded
//! FIFO queue drained by one worker thread, so delivery never blocks the
//! publisher; events of the same type reach a given subscriber in publish
//! order.  [`EventPriority::Critical`] events bypass the queue and are
//! dispatched inline on the publishing thread, as is anything sent through
//! [`EventBus::publish_sync`].
//!
//! A panicking subscriber is caught and logged; it never affects peer
//! subscribers or the worker.  The last `max_history` events are retained in
//! a ring for post-mortem inspection.

use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tracing::{debug, error, warn};

use mower_types::{Event, EventPriority, EventType, ShutdownFlag, Worker};

const DEFAULT_MAX_HISTORY: usize = 100;
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle returned by the subscribe methods; pass to
/// [`EventBus::unsubscribe`] to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
struct Registry {
    by_type: HashMap<EventType, Vec<(SubscriberId, Callback)>>,
    wildcard: Vec<(SubscriberId, Callback)>,
}

struct Inner {
    registry: RwLock<Registry>,
    history: Mutex<VecDeque<Event>>,
    max_history: usize,
    sender: Sender<Event>,
    receiver: Mutex<Option<Receiver<Event>>>,
    next_id: AtomicU64,
    shutdown: ShutdownFlag,
    worker: Mutex<Option<Worker>>,
}

/// Shared event bus.  Clones are cheap and share the same queue, registry,
/// and history.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl EventBus {
    /// Create a stopped bus retaining at most `max_history` events.
    pub fn new(max_history: usize) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            inner: Arc::new(Inner {
                registry: RwLock::new(Registry::default()),
                history: Mutex::new(VecDeque::with_capacity(max_history)),
                max_history,
                sender,
                receiver: Mutex::new(Some(receiver)),
                next_id: AtomicU64::new(1),
                shutdown: ShutdownFlag::new(),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Start the dispatch worker.  Idempotent; a second call is a no-op.
    pub fn start(&self) {
        let mut slot = self.inner.worker.lock().expect("worker lock poisoned");
        if slot.is_some() {
            warn!("event bus is already running");
            return;
        }
        let Some(receiver) = self
            .inner
            .receiver
            .lock()
            .expect("receiver lock poisoned")
            .take()
        else {
            warn!("event bus was stopped; cannot restart a drained queue");
            return;
        };
        let inner = Arc::clone(&self.inner);
        *slot = Some(Worker::spawn("event-bus", move || {
            loop {
                match receiver.recv_timeout(Duration::from_millis(100)) {
                    Ok(event) => dispatch(&inner, &event),
                    Err(RecvTimeoutError::Timeout) => {
                        if inner.shutdown.is_triggered() {
                            return;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
        }));
        debug!("event bus started");
    }

    /// Stop the worker, draining nothing further; bounded by a 5 s join.
    pub fn stop(&self) {
        self.inner.shutdown.trigger();
        let worker = self.inner.worker.lock().expect("worker lock poisoned").take();
        if let Some(worker) = worker {
            worker.join_timeout(STOP_JOIN_TIMEOUT);
            debug!("event bus stopped");
        }
    }

    /// Subscribe `callback` to events of `event_type`.
    pub fn subscribe(
        &self,
        event_type: EventType,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> SubscriberId {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut registry = self.inner.registry.write().expect("registry lock poisoned");
        registry
            .by_type
            .entry(event_type)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Subscribe `callback` to every event regardless of type.
    pub fn subscribe_all(&self, callback: impl Fn(&Event) + Send + Sync + 'static) -> SubscriberId {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut registry = self.inner.registry.write().expect("registry lock poisoned");
        registry.wildcard.push((id, Arc::new(callback)));
        id
    }

    /// Remove a subscriber wherever it is registered.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let mut registry = self.inner.registry.write().expect("registry lock poisoned");
        for subs in registry.by_type.values_mut() {
            subs.retain(|(sid, _)| *sid != id);
        }
        registry.wildcard.retain(|(sid, _)| *sid != id);
    }

    /// Publish an event.
    ///
    /// [`EventPriority::Critical`] events are dispatched synchronously on
    /// this thread; everything else is enqueued for the worker.
    pub fn publish(&self, event: Event) {
        self.record_history(&event);
        if event.priority == EventPriority::Critical {
            dispatch(&self.inner, &event);
            return;
        }
        if self.inner.sender.send(event).is_err() {
            warn!("event queue disconnected; event dropped");
        }
    }

    /// Publish with inline dispatch regardless of priority.  Used for safety
    /// events where queueing latency is unacceptable.
    pub fn publish_sync(&self, event: Event) {
        self.record_history(&event);
        dispatch(&self.inner, &event);
    }

    /// The retained event history, oldest first.
    pub fn history(&self) -> Vec<Event> {
        self.inner
            .history
            .lock()
            .expect("history lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Drop all retained history.
    pub fn clear_history(&self) {
        self.inner
            .history
            .lock()
            .expect("history lock poisoned")
            .clear();
    }

    fn record_history(&self, event: &Event) {
        let mut history = self.inner.history.lock().expect("history lock poisoned");
        if history.len() == self.inner.max_history {
            history.pop_front();
        }
        history.push_back(event.clone());
    }
}

/// Deliver `event` to every matching subscriber, isolating panics.
fn dispatch(inner: &Inner, event: &Event) {
    let subscribers: Vec<Callback> = {
        let registry = inner.registry.read().expect("registry lock poisoned");
        let mut subs: Vec<Callback> = registry
            .by_type
            .get(&event.event_type)
            .map(|v| v.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();
        subs.extend(registry.wildcard.iter().map(|(_, cb)| Arc::clone(cb)));
        subs
    };

    for callback in subscribers {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(event))) {
            let what = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "<non-string panic>".to_string());
            error!(event_type = ?event.event_type, panic = %what, "subscriber panicked");
        }
    }
}
