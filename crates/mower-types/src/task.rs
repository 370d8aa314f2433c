//! Typed task supervisor: named worker threads with a cooperative shutdown
//! flag and bounded joins.
//!
//! Every long-running loop in the core (sensor pollers, the event bus
//! worker, the fusion aggregator, the avoidance monitor, the bridge writer)
//! is spawned through [`Worker::spawn`] and observes a shared
//! [`ShutdownFlag`] at each suspension point.  [`Worker::join_timeout`]
//! bounds the join; a thread that overruns its deadline is detached and the
//! overrun logged, never waited on forever.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::warn;

/// Process- or component-wide cooperative stop signal.
///
/// Clones share the flag.  Triggering is one-way: there is no reset.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown.  Idempotent.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early when the flag trips.  Returns
    /// `true` when the sleep completed without a shutdown request.
    pub fn sleep(&self, duration: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(20);
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            if self.is_triggered() {
                return false;
            }
            std::thread::sleep(SLICE.min(deadline.saturating_duration_since(Instant::now())));
        }
        !self.is_triggered()
    }
}

/// A named, joinable worker thread.
pub struct Worker {
    name: String,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn `body` on a named OS thread.
    pub fn spawn(name: impl Into<String>, body: impl FnOnce() + Send + 'static) -> Self {
        let name = name.into();
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(body)
            .unwrap_or_else(|e| panic!("failed to spawn worker '{name}': {e}"));
        Self {
            name,
            handle: Some(handle),
        }
    }

    /// Worker name, as given at spawn time.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Join the thread, giving up after `timeout`.
    ///
    /// Returns `true` when the thread exited within the deadline.  On
    /// overrun the handle is dropped (the thread is detached) and a warning
    /// is logged; the caller proceeds with shutdown regardless.
    pub fn join_timeout(mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(worker = %self.name, timeout_ms = timeout.as_millis() as u64,
                      "worker did not stop within deadline; detaching");
                drop(handle);
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        if handle.join().is_err() {
            warn!(worker = %self.name, "worker thread panicked");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn worker_runs_and_joins() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let worker = Worker::spawn("test-worker", move || {
            c.store(7, Ordering::SeqCst);
        });
        assert!(worker.join_timeout(Duration::from_secs(1)));
        assert_eq!(counter.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn shutdown_flag_stops_loop() {
        let flag = ShutdownFlag::new();
        let f = flag.clone();
        let worker = Worker::spawn("loop-worker", move || {
            while f.sleep(Duration::from_millis(5)) {}
        });
        flag.trigger();
        assert!(worker.join_timeout(Duration::from_secs(1)));
    }

    #[test]
    fn join_timeout_detaches_stuck_worker() {
        let flag = ShutdownFlag::new();
        let f = flag.clone();
        let worker = Worker::spawn("stuck-worker", move || {
            // Ignores its deadline for longer than the join budget.
            while !f.is_triggered() {
                std::thread::sleep(Duration::from_millis(10));
            }
        });
        assert!(!worker.join_timeout(Duration::from_millis(50)));
        flag.trigger();
    }

    #[test]
    fn sleep_returns_false_when_already_triggered() {
        let flag = ShutdownFlag::new();
        flag.trigger();
        assert!(!flag.sleep(Duration::from_millis(50)));
    }

    #[test]
    fn panicking_worker_still_joins() {
        let worker = Worker::spawn("panicky", || panic!("boom"));
        assert!(worker.join_timeout(Duration::from_secs(1)));
    }
}
