//! Per-sensor polling workers.
//!
//! Each sensor gets one worker running the read cycle:
//!
//! 1. attempt a read under the sensor's timeout budget;
//! 2. on success, reset the failure counters and store the reading;
//! 3. on failure, bump the counters and retry after an exponential
//!    backoff, up to `max_retries` per cycle;
//! 4. a cycle that exhausts its retries leaves the last-good reading in
//!    place (the aggregator downgrades it) and, for I²C sensors past the
//!    failure threshold, requests a bus recovery.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use mower_hal::registry::SensorHandle;
use mower_types::{MowerError, SensorReading, SensorStatus, ShutdownFlag, Worker};

use crate::backoff::retry_delay;
use crate::recovery;
use crate::shared::{Readings, Shared};

pub(crate) struct PollerSpec {
    pub name: &'static str,
    pub interval: Duration,
    pub read_timeout: Duration,
    pub uses_i2c: bool,
}

/// Spawn the polling worker for one sensor.  `store` writes a successful
/// reading into the shared [`Readings`].
pub(crate) fn spawn<R: Send + 'static>(
    spec: PollerSpec,
    sensor: SensorHandle<R>,
    shared: Arc<Shared>,
    shutdown: ShutdownFlag,
    store: impl Fn(&mut Readings, SensorReading<R>) + Send + 'static,
) -> Worker {
    shared
        .health
        .lock()
        .expect("health lock poisoned")
        .insert(spec.name.to_string(), SensorStatus::new(spec.name));

    Worker::spawn(format!("poll-{}", spec.name), move || {
        let mut seen_generation = shared.recovery_generation.load(Ordering::SeqCst);
        while shutdown.sleep(spec.interval) {
            if spec.uses_i2c && shared.i2c_paused.load(Ordering::SeqCst) {
                continue;
            }

            // Re-initialize after a bus recovery (addresses may have been
            // remapped while the sensor was held off the bus).
            let generation = shared.recovery_generation.load(Ordering::SeqCst);
            if generation != seen_generation {
                seen_generation = generation;
                if spec.uses_i2c
                    && let Ok(mut sensor) = sensor.lock()
                    && let Err(e) = sensor.initialize()
                {
                    warn!(sensor = spec.name, error = %e, "re-initialize after bus recovery failed");
                }
            }

            match read_cycle(&spec, &sensor, &shared, &shutdown) {
                CycleOutcome::Success(reading) => {
                    if let Some(status) = shared
                        .health
                        .lock()
                        .expect("health lock poisoned")
                        .get_mut(spec.name)
                    {
                        status.record_success();
                    }
                    store(
                        &mut shared.readings.lock().expect("readings lock poisoned"),
                        reading,
                    );
                }
                CycleOutcome::Exhausted => {
                    let consecutive = shared
                        .health
                        .lock()
                        .expect("health lock poisoned")
                        .get(spec.name)
                        .map(|s| s.consecutive_failures)
                        .unwrap_or(0);
                    if spec.uses_i2c && consecutive >= shared.config.failure_threshold {
                        recovery::try_bus_recovery(&shared);
                    }
                }
                CycleOutcome::Shutdown => return,
            }
        }
    })
}

enum CycleOutcome<R> {
    Success(SensorReading<R>),
    Exhausted,
    Shutdown,
}

fn read_cycle<R: Send + 'static>(
    spec: &PollerSpec,
    sensor: &SensorHandle<R>,
    shared: &Shared,
    shutdown: &ShutdownFlag,
) -> CycleOutcome<R> {
    let max_retries = shared.config.max_retries;
    for attempt in 1..=max_retries {
        let result = timed_read(spec, sensor);
        match result {
            Ok(value) => return CycleOutcome::Success(SensorReading::ok(spec.name, value)),
            Err(e) => {
                let consecutive = {
                    let mut health = shared.health.lock().expect("health lock poisoned");
                    let status = health
                        .entry(spec.name.to_string())
                        .or_insert_with(|| SensorStatus::new(spec.name));
                    status.record_failure(e.to_string(), shared.config.failure_threshold);
                    status.consecutive_failures
                };
                debug!(
                    sensor = spec.name,
                    attempt,
                    consecutive,
                    error = %e,
                    "sensor read failed"
                );
                if attempt == max_retries {
                    return CycleOutcome::Exhausted;
                }
                let delay = retry_delay(
                    shared.config.retry_base,
                    consecutive,
                    shared.config.retry_cap,
                );
                if !shutdown.sleep(delay) {
                    return CycleOutcome::Shutdown;
                }
            }
        }
    }
    CycleOutcome::Exhausted
}

/// One read attempt; an attempt that overruns the sensor's budget is
/// treated identically to a read failure.
fn timed_read<R: Send + 'static>(spec: &PollerSpec, sensor: &SensorHandle<R>) -> Result<R, MowerError> {
    let start = Instant::now();
    let result = sensor
        .lock()
        .map_err(|_| MowerError::Channel(format!("{} sensor lock poisoned", spec.name)))?
        .read();
    let elapsed = start.elapsed();
    if elapsed > spec.read_timeout {
        return Err(MowerError::Timeout {
            component: spec.name.to_string(),
            millis: elapsed.as_millis() as u64,
        });
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::SensorInterfaceConfig;
    use crate::shared::RecoveryState;
    use mower_events::EventBus;
    use mower_hal::Sensor;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize};

    fn test_shared() -> Arc<Shared> {
        Arc::new(Shared {
            config: SensorInterfaceConfig {
                retry_base: Duration::from_millis(1),
                retry_cap: Duration::from_millis(4),
                ..SensorInterfaceConfig::default()
            },
            readings: Mutex::new(Readings::default()),
            health: Mutex::new(HashMap::new()),
            snapshot: Mutex::new(mower_types::Snapshot::default()),
            bus: EventBus::default(),
            estop: AtomicBool::new(false),
            i2c_paused: AtomicBool::new(false),
            recovery_generation: AtomicU64::new(0),
            recovery: Mutex::new(RecoveryState { last_attempt: None }),
            i2c: None,
            remap_tof: None,
            critical_reported: Mutex::new(HashSet::new()),
            started_at: Instant::now(),
        })
    }

    struct FlakySensor {
        failures_before_success: usize,
        reads: Arc<AtomicUsize>,
        slow: bool,
    }

    impl Sensor for FlakySensor {
        type Reading = f64;
        fn name(&self) -> &str {
            "flaky"
        }
        fn initialize(&mut self) -> Result<(), MowerError> {
            Ok(())
        }
        fn read(&mut self) -> Result<f64, MowerError> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            if self.slow {
                std::thread::sleep(Duration::from_millis(20));
            }
            if n < self.failures_before_success {
                Err(MowerError::hardware(
                    mower_types::ErrorCode::SensorFailure,
                    "flaky",
                    "injected",
                ))
            } else {
                Ok(42.0)
            }
        }
    }

    fn handle(sensor: FlakySensor) -> SensorHandle<f64> {
        Arc::new(Mutex::new(Box::new(sensor)))
    }

    fn spec() -> PollerSpec {
        PollerSpec {
            name: "flaky",
            interval: Duration::from_millis(5),
            read_timeout: Duration::from_millis(100),
            uses_i2c: false,
        }
    }

    #[test]
    fn retries_within_a_cycle_until_success() {
        let shared = test_shared();
        let reads = Arc::new(AtomicUsize::new(0));
        let sensor = handle(FlakySensor {
            failures_before_success: 2,
            reads: reads.clone(),
            slow: false,
        });
        let shutdown = ShutdownFlag::new();

        let worker = spawn(spec(), sensor, shared.clone(), shutdown.clone(), |r, v| {
            r.tof_left = Some(v)
        });

        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if shared.readings.lock().unwrap().tof_left.is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        shutdown.trigger();
        worker.join_timeout(Duration::from_secs(1));

        let reading = shared.readings.lock().unwrap().tof_left.clone().unwrap();
        assert_eq!(reading.value, 42.0);
        let status = shared.status_of("flaky").unwrap();
        assert!(status.working);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.total_failures, 2);
    }

    #[test]
    fn exhausted_cycle_marks_sensor_not_working() {
        let shared = test_shared();
        let reads = Arc::new(AtomicUsize::new(0));
        let sensor = handle(FlakySensor {
            failures_before_success: usize::MAX,
            reads: reads.clone(),
            slow: false,
        });
        let shutdown = ShutdownFlag::new();

        let worker = spawn(spec(), sensor, shared.clone(), shutdown.clone(), |r, v| {
            r.tof_left = Some(v)
        });

        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            let failed = shared
                .status_of("flaky")
                .map(|s| !s.working)
                .unwrap_or(false);
            if failed {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        shutdown.trigger();
        worker.join_timeout(Duration::from_secs(1));

        let status = shared.status_of("flaky").unwrap();
        assert!(!status.working);
        assert!(status.consecutive_failures >= shared.config.failure_threshold);
        assert!(shared.readings.lock().unwrap().tof_left.is_none());
    }

    #[test]
    fn slow_reads_count_as_timeouts() {
        let shared = test_shared();
        let reads = Arc::new(AtomicUsize::new(0));
        let sensor = handle(FlakySensor {
            failures_before_success: 0,
            reads: reads.clone(),
            slow: true,
        });
        let tight = PollerSpec {
            read_timeout: Duration::from_millis(5),
            ..spec()
        };
        let shutdown = ShutdownFlag::new();
        let worker = spawn(tight, sensor, shared.clone(), shutdown.clone(), |r, v| {
            r.tof_left = Some(v)
        });

        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if shared
                .status_of("flaky")
                .is_some_and(|s| s.total_failures > 0)
            {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        shutdown.trigger();
        worker.join_timeout(Duration::from_secs(1));

        let status = shared.status_of("flaky").unwrap();
        assert!(status.total_failures > 0);
        assert!(
            status
                .last_error
                .as_deref()
                .unwrap_or_default()
                .contains("timed out")
        );
        // The value was produced but arrived too late to be stored.
        assert!(shared.readings.lock().unwrap().tof_left.is_none());
    }

    #[test]
    fn paused_i2c_poller_does_not_read() {
        let shared = test_shared();
        shared.i2c_paused.store(true, Ordering::SeqCst);
        let reads = Arc::new(AtomicUsize::new(0));
        let sensor = handle(FlakySensor {
            failures_before_success: 0,
            reads: reads.clone(),
            slow: false,
        });
        let i2c_spec = PollerSpec {
            uses_i2c: true,
            ..spec()
        };
        let shutdown = ShutdownFlag::new();
        let worker = spawn(i2c_spec, sensor, shared.clone(), shutdown.clone(), |r, v| {
            r.tof_left = Some(v)
        });

        std::thread::sleep(Duration::from_millis(60));
        shutdown.trigger();
        worker.join_timeout(Duration::from_secs(1));
        assert_eq!(reads.load(Ordering::SeqCst), 0);
    }
}
