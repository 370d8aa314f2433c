//! Fusion aggregator: composes the latest readings into a complete
//! [`Snapshot`] at a fixed cadence.
//!
//! Every snapshot carries all five sections.  A reading within the
//! freshness budget contributes its value; an older one contributes its
//! last-good value until the sentinel deadline; after that (or when the
//! sensor never produced anything) the section falls back to the safe
//! sentinel defaults.  Failed ToF channels are `null`, never absent.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, trace};

use mower_types::{
    Event, EventPriority, EventType, SensorReading, ShutdownFlag, Snapshot, Worker,
};

use crate::shared::Shared;

/// Sink invoked with every composed snapshot (the cross-process bridge).
pub type SnapshotSink = Box<dyn Fn(&Snapshot) + Send>;

/// Required sensors whose sustained failure raises a critical error.
const REQUIRED_SENSORS: [&str; 3] = ["bno085", "tof_left", "tof_right"];

pub(crate) fn spawn(
    shared: Arc<Shared>,
    shutdown: ShutdownFlag,
    sink: Option<SnapshotSink>,
) -> Worker {
    Worker::spawn("sensor-aggregator", move || {
        while shutdown.sleep(shared.config.aggregate_interval) {
            let snapshot = compose(&shared);
            *shared.snapshot.lock().expect("snapshot lock poisoned") = snapshot;

            publish(&shared, &snapshot);
            if let Some(sink) = &sink {
                sink(&snapshot);
            }
            check_required_sensors(&shared);
        }
    })
}

/// How a reading contributes to the snapshot.
enum Contribution<T> {
    Fresh(T),
    Stale(T),
    Sentinel,
}

fn contribution<T: Copy>(
    reading: &Option<SensorReading<T>>,
    working: bool,
    stale_after: Duration,
    sentinel_after: Duration,
) -> Contribution<T> {
    let Some(reading) = reading else {
        return Contribution::Sentinel;
    };
    let age = (Utc::now() - reading.timestamp)
        .to_std()
        .unwrap_or(Duration::ZERO);
    if working && age <= stale_after {
        Contribution::Fresh(reading.value)
    } else if age <= sentinel_after {
        Contribution::Stale(reading.value)
    } else {
        Contribution::Sentinel
    }
}

pub(crate) fn compose(shared: &Shared) -> Snapshot {
    let readings = shared.readings.lock().expect("readings lock poisoned");
    let health = shared.health.lock().expect("health lock poisoned");
    let working = |name: &str| health.get(name).map(|s| s.working).unwrap_or(false);
    let stale = shared.config.stale_after;
    let sentinel = shared.config.sentinel_after;

    let mut snapshot = Snapshot {
        timestamp: Utc::now(),
        ..Snapshot::default()
    };

    match contribution(&readings.imu, working("bno085"), stale, sentinel) {
        Contribution::Fresh(v) | Contribution::Stale(v) => snapshot.imu = v,
        Contribution::Sentinel => {}
    }
    match contribution(&readings.environment, working("bme280"), stale, sentinel) {
        Contribution::Fresh(v) | Contribution::Stale(v) => snapshot.environment = v,
        Contribution::Sentinel => {}
    }
    match contribution(&readings.power, working("ina3221"), stale, sentinel) {
        Contribution::Fresh(v) | Contribution::Stale(v) => snapshot.power = v,
        Contribution::Sentinel => {}
    }
    match contribution(&readings.gps, working("gps"), stale, sentinel) {
        Contribution::Fresh(v) | Contribution::Stale(v) => snapshot.gps = v,
        Contribution::Sentinel => {}
    }
    // ToF channels degrade to null rather than to a fake distance; a
    // stale obstacle distance is still more useful than none for the
    // safety gate, so stale values are kept.
    snapshot.tof.left = match contribution(&readings.tof_left, working("tof_left"), stale, sentinel)
    {
        Contribution::Fresh(v) | Contribution::Stale(v) => Some(v),
        Contribution::Sentinel => None,
    };
    snapshot.tof.right =
        match contribution(&readings.tof_right, working("tof_right"), stale, sentinel) {
            Contribution::Fresh(v) | Contribution::Stale(v) => Some(v),
            Contribution::Sentinel => None,
        };

    trace!(timestamp = %snapshot.timestamp, "snapshot composed");
    snapshot
}

fn publish(shared: &Shared, snapshot: &Snapshot) {
    let payload = match serde_json::to_value(snapshot) {
        Ok(value) => value,
        Err(e) => {
            error!(error = %e, "snapshot serialization failed");
            return;
        }
    };
    shared.bus.publish(
        Event::new(EventType::HardwareSensorData, "sensor_interface").with_data("snapshot", payload),
    );
    shared.bus.publish(
        Event::new(EventType::HardwareImuData, "sensor_interface")
            .with_data("heading", snapshot.imu.heading)
            .with_data("roll", snapshot.imu.roll)
            .with_data("pitch", snapshot.imu.pitch)
            .with_data("is_safe", snapshot.imu.safety.is_safe),
    );
    shared.bus.publish(
        Event::new(EventType::HardwareBatteryStatus, "sensor_interface")
            .with_data("voltage", snapshot.power.voltage)
            .with_data("percentage", snapshot.power.percentage)
            .with_data("charging", snapshot.power.charging),
    );
}

/// Raise one critical error per failure episode of a required sensor.
fn check_required_sensors(shared: &Shared) {
    let now = Utc::now();
    let dwell_limit = shared.config.critical_failure_after;
    let health = shared.health.lock().expect("health lock poisoned");
    let mut reported = shared
        .critical_reported
        .lock()
        .expect("critical lock poisoned");

    for name in REQUIRED_SENSORS {
        let Some(status) = health.get(name) else {
            continue;
        };
        if status.working {
            reported.remove(name);
            continue;
        }
        let dwell = match status.last_success {
            Some(t) => (now - t).to_std().unwrap_or(Duration::ZERO),
            None => shared.started_at.elapsed(),
        };
        if dwell > dwell_limit && !reported.contains(name) {
            reported.insert(name.to_string());
            error!(sensor = name, dwell_ms = dwell.as_millis() as u64,
                   "required sensor failed past the dwell threshold");
            shared.bus.publish(
                Event::new(EventType::ErrorOccurred, "sensor_interface")
                    .with_data("sensor", name)
                    .with_data("code", 1001)
                    .with_data("critical", true)
                    .with_priority(EventPriority::Critical),
            );
        }
    }
}
