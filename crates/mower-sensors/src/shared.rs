//! State shared between the pollers, the aggregator, and the recovery
//! procedure.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Mutex;
use std::time::Instant;

use mower_events::EventBus;
use mower_hal::SharedI2c;
use mower_types::{
    EnvironmentSection, GpsSection, ImuSection, MowerError, PowerSection, SensorReading,
    SensorStatus, Snapshot,
};

use crate::interface::SensorInterfaceConfig;

/// Closure that re-runs the ToF XSHUT address sequencing after a bus
/// recovery (provided by the hardware registry).
pub type RemapFn = Box<dyn Fn() -> Result<(), MowerError> + Send + Sync>;

/// Latest raw reading per sensor; written by pollers, composed by the
/// aggregator.
#[derive(Default)]
pub(crate) struct Readings {
    pub imu: Option<SensorReading<ImuSection>>,
    pub tof_left: Option<SensorReading<f64>>,
    pub tof_right: Option<SensorReading<f64>>,
    pub environment: Option<SensorReading<EnvironmentSection>>,
    pub power: Option<SensorReading<PowerSection>>,
    pub gps: Option<SensorReading<GpsSection>>,
}

pub(crate) struct RecoveryState {
    pub last_attempt: Option<Instant>,
}

pub(crate) struct Shared {
    pub config: SensorInterfaceConfig,
    pub readings: Mutex<Readings>,
    pub health: Mutex<HashMap<String, SensorStatus>>,
    pub snapshot: Mutex<Snapshot>,
    pub bus: EventBus,
    /// Emergency-stop input (hardware button or remote command).
    pub estop: AtomicBool,
    /// While set, I²C pollers skip their reads (bus recovery running).
    pub i2c_paused: AtomicBool,
    /// Bumped after every successful bus recovery; pollers re-initialize
    /// their sensor when they observe a new generation.
    pub recovery_generation: AtomicU64,
    pub recovery: Mutex<RecoveryState>,
    pub i2c: Option<SharedI2c>,
    pub remap_tof: Option<RemapFn>,
    /// Required sensors already reported as critically failed (cleared on
    /// recovery) so the event fires once per episode.
    pub critical_reported: Mutex<HashSet<String>>,
    /// Interface start time; used as the failure-dwell baseline for
    /// sensors that never succeeded.
    pub started_at: Instant,
}

impl Shared {
    pub fn status_of(&self, name: &str) -> Option<SensorStatus> {
        self.health
            .lock()
            .expect("health lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn latest_snapshot(&self) -> Snapshot {
        *self.snapshot.lock().expect("snapshot lock poisoned")
    }
}
