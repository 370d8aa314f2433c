//! [`SensorInterface`] – the façade owning pollers, aggregator, and health.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::info;

use mower_events::EventBus;
use mower_hal::registry::SensorHandle;
use mower_hal::{HardwareRegistry, SharedI2c};
use mower_types::{
    EnvironmentSection, GpsSection, ImuSection, PowerSection, SensorStatus, ShutdownFlag,
    Snapshot, Worker,
};

use crate::aggregator::{self, SnapshotSink};
use crate::poller::{self, PollerSpec};
use crate::safety::{self, SafetyLimits};
use crate::shared::{Readings, RecoveryState, RemapFn, Shared};

/// Tuning for the polling and fusion machinery.
#[derive(Clone)]
pub struct SensorInterfaceConfig {
    /// Per-sensor poll cadence.
    pub poll_interval: Duration,
    /// Fusion cadence (default 10 Hz).
    pub aggregate_interval: Duration,
    pub imu_timeout: Duration,
    pub tof_timeout: Duration,
    pub default_timeout: Duration,
    /// Read attempts per poll cycle.
    pub max_retries: u32,
    pub retry_base: Duration,
    pub retry_cap: Duration,
    /// Consecutive failures after which a sensor is marked not working.
    pub failure_threshold: u32,
    /// Reading age beyond which it is carried as stale.
    pub stale_after: Duration,
    /// Reading age beyond which sentinel defaults take over.
    pub sentinel_after: Duration,
    /// Required-sensor failure dwell that raises a critical error.
    pub critical_failure_after: Duration,
    pub bus_recovery_enabled: bool,
    pub bus_recovery_min_interval: Duration,
    pub safety: SafetyLimits,
}

impl Default for SensorInterfaceConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            aggregate_interval: Duration::from_millis(100),
            imu_timeout: Duration::from_millis(50),
            tof_timeout: Duration::from_millis(30),
            default_timeout: Duration::from_millis(100),
            max_retries: 5,
            retry_base: Duration::from_millis(20),
            retry_cap: Duration::from_secs(2),
            failure_threshold: 3,
            stale_after: Duration::from_secs(5),
            sentinel_after: Duration::from_secs(10),
            critical_failure_after: Duration::from_secs(10),
            bus_recovery_enabled: true,
            bus_recovery_min_interval: Duration::from_secs(30),
            safety: SafetyLimits::default(),
        }
    }
}

/// Hardware handles the interface polls, borrowed from the registry at
/// startup.  Absent optional sensors simply get no poller.
pub struct SensorHandles {
    pub imu: Option<SensorHandle<ImuSection>>,
    pub tof_left: Option<SensorHandle<f64>>,
    pub tof_right: Option<SensorHandle<f64>>,
    pub environment: Option<SensorHandle<EnvironmentSection>>,
    pub power: Option<SensorHandle<PowerSection>>,
    pub gps: Option<SensorHandle<GpsSection>>,
    pub i2c: Option<SharedI2c>,
    pub remap_tof: Option<RemapFn>,
}

impl SensorHandles {
    pub fn from_registry(registry: &HardwareRegistry) -> Self {
        Self {
            imu: registry.imu(),
            tof_left: registry.tof_left(),
            tof_right: registry.tof_right(),
            environment: registry.environment(),
            power: registry.power(),
            gps: registry.gps(),
            i2c: registry.i2c(),
            remap_tof: registry.tof_remapper(),
        }
    }
}

/// Cloneable read-only view of the latest fused snapshot.
#[derive(Clone)]
pub struct SnapshotHandle {
    shared: Arc<Shared>,
}

impl SnapshotHandle {
    pub fn latest(&self) -> Snapshot {
        self.shared.latest_snapshot()
    }
}

pub struct SensorInterface {
    shared: Arc<Shared>,
    shutdown: ShutdownFlag,
    workers: Vec<Worker>,
}

impl SensorInterface {
    /// Spawn the polling workers and the aggregator.
    ///
    /// `sink` receives every composed snapshot (wired to the cross-process
    /// bridge by the supervisor).
    pub fn start(
        config: SensorInterfaceConfig,
        handles: SensorHandles,
        bus: EventBus,
        sink: Option<SnapshotSink>,
    ) -> Self {
        let shared = Arc::new(Shared {
            config: config.clone(),
            readings: Mutex::new(Readings::default()),
            health: Mutex::new(HashMap::new()),
            snapshot: Mutex::new(Snapshot::default()),
            bus,
            estop: AtomicBool::new(false),
            i2c_paused: AtomicBool::new(false),
            recovery_generation: AtomicU64::new(0),
            recovery: Mutex::new(RecoveryState { last_attempt: None }),
            i2c: handles.i2c,
            remap_tof: handles.remap_tof,
            critical_reported: Mutex::new(HashSet::new()),
            started_at: Instant::now(),
        });
        let shutdown = ShutdownFlag::new();
        let mut workers = Vec::new();

        if let Some(imu) = handles.imu {
            workers.push(poller::spawn(
                PollerSpec {
                    name: "bno085",
                    interval: config.poll_interval,
                    read_timeout: config.imu_timeout,
                    uses_i2c: false,
                },
                imu,
                Arc::clone(&shared),
                shutdown.clone(),
                |readings, reading| readings.imu = Some(reading),
            ));
        }
        if let Some(tof_left) = handles.tof_left {
            workers.push(poller::spawn(
                PollerSpec {
                    name: "tof_left",
                    interval: config.poll_interval,
                    read_timeout: config.tof_timeout,
                    uses_i2c: true,
                },
                tof_left,
                Arc::clone(&shared),
                shutdown.clone(),
                |readings, reading| readings.tof_left = Some(reading),
            ));
        }
        if let Some(tof_right) = handles.tof_right {
            workers.push(poller::spawn(
                PollerSpec {
                    name: "tof_right",
                    interval: config.poll_interval,
                    read_timeout: config.tof_timeout,
                    uses_i2c: true,
                },
                tof_right,
                Arc::clone(&shared),
                shutdown.clone(),
                |readings, reading| readings.tof_right = Some(reading),
            ));
        }
        if let Some(environment) = handles.environment {
            workers.push(poller::spawn(
                PollerSpec {
                    name: "bme280",
                    interval: config.poll_interval,
                    read_timeout: config.default_timeout,
                    uses_i2c: true,
                },
                environment,
                Arc::clone(&shared),
                shutdown.clone(),
                |readings, reading| readings.environment = Some(reading),
            ));
        }
        if let Some(power) = handles.power {
            workers.push(poller::spawn(
                PollerSpec {
                    name: "ina3221",
                    interval: config.poll_interval,
                    read_timeout: config.default_timeout,
                    uses_i2c: true,
                },
                power,
                Arc::clone(&shared),
                shutdown.clone(),
                |readings, reading| readings.power = Some(reading),
            ));
        }
        if let Some(gps) = handles.gps {
            workers.push(poller::spawn(
                PollerSpec {
                    name: "gps",
                    interval: config.poll_interval,
                    read_timeout: config.default_timeout,
                    uses_i2c: false,
                },
                gps,
                Arc::clone(&shared),
                shutdown.clone(),
                |readings, reading| readings.gps = Some(reading),
            ));
        }

        workers.push(aggregator::spawn(
            Arc::clone(&shared),
            shutdown.clone(),
            sink,
        ));
        info!(workers = workers.len(), "sensor interface started");

        Self {
            shared,
            shutdown,
            workers,
        }
    }

    /// The most recent fused snapshot (copy).
    pub fn latest_snapshot(&self) -> Snapshot {
        self.shared.latest_snapshot()
    }

    /// Cloneable handle for other components that need snapshots.
    pub fn snapshot_handle(&self) -> SnapshotHandle {
        SnapshotHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Health record of one sensor.
    pub fn sensor_status(&self, name: &str) -> Option<SensorStatus> {
        self.shared.status_of(name)
    }

    /// Health records of every polled sensor, sorted by name.
    pub fn all_statuses(&self) -> Vec<SensorStatus> {
        let mut statuses: Vec<SensorStatus> = self
            .shared
            .health
            .lock()
            .expect("health lock poisoned")
            .values()
            .cloned()
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Assert or release the external emergency-stop input.
    pub fn set_emergency_stop_input(&self, asserted: bool) {
        self.shared.estop.store(asserted, Ordering::SeqCst);
    }

    /// The safety gate, derived from the latest snapshot and IMU health.
    pub fn is_safe_to_operate(&self) -> bool {
        let snapshot = self.shared.latest_snapshot();
        let imu_status = self.shared.status_of("bno085");
        safety::is_safe_to_operate(
            &self.shared.config.safety,
            &snapshot,
            imu_status.as_ref(),
            self.shared.estop.load(Ordering::SeqCst),
        )
    }

    /// Stop all workers; each join is bounded.
    pub fn stop(mut self) {
        self.shutdown.trigger();
        for worker in self.workers.drain(..) {
            worker.join_timeout(Duration::from_secs(5));
        }
        info!("sensor interface stopped");
    }
}
