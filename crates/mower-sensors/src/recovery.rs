//! Software I²C bus recovery.
//!
//! A wedged device can hold SDA low forever; the standard unstick is to
//! clock up to nine SCL pulses with SDA released, then reinitialize the
//! controller.  The transport implements the electrical part
//! ([`I2cBus::recover`][mower_hal::I2cBus::recover]); this module owns the
//! orchestration: pause all I²C polling, run the reset, re-run the ToF
//! address remapping (XSHUT toggling resets the sensors to the default
//! address), bump the recovery generation so pollers re-initialize, and
//! resume.  Attempts are rate-limited.

use std::sync::atomic::Ordering;
use std::time::Instant;

use tracing::{info, warn};

use mower_types::{Event, EventPriority, EventType};

use crate::shared::Shared;

/// Sensors flagged while the bus is down.
const I2C_SENSORS: [&str; 4] = ["bme280", "ina3221", "tof_left", "tof_right"];

/// Attempt a bus recovery.  Returns `true` when a recovery actually ran
/// (successfully or not); `false` when disabled or rate-limited.
pub(crate) fn try_bus_recovery(shared: &Shared) -> bool {
    if !shared.config.bus_recovery_enabled {
        return false;
    }
    let Some(i2c) = &shared.i2c else {
        return false;
    };

    {
        let mut state = shared.recovery.lock().expect("recovery lock poisoned");
        if let Some(last) = state.last_attempt
            && last.elapsed() < shared.config.bus_recovery_min_interval
        {
            return false;
        }
        state.last_attempt = Some(Instant::now());
    }

    info!("i2c bus recovery starting");
    shared.i2c_paused.store(true, Ordering::SeqCst);
    {
        let mut health = shared.health.lock().expect("health lock poisoned");
        for name in I2C_SENSORS {
            if let Some(status) = health.get_mut(name) {
                status.flag_not_working("i2c bus recovery in progress");
            }
        }
    }

    let result = i2c
        .recover()
        .and_then(|()| match &shared.remap_tof {
            Some(remap) => remap(),
            None => Ok(()),
        });

    match result {
        Ok(()) => {
            shared.recovery_generation.fetch_add(1, Ordering::SeqCst);
            info!("i2c bus recovery complete");
            shared.bus.publish(
                Event::new(EventType::WarningOccurred, "sensor_interface")
                    .with_data("warning", "i2c_bus_recovered"),
            );
        }
        Err(ref e) => {
            warn!(error = %e, "i2c bus recovery failed");
            shared.bus.publish(
                Event::new(EventType::ErrorOccurred, "sensor_interface")
                    .with_data("error", "i2c_bus_recovery_failed")
                    .with_priority(EventPriority::High),
            );
        }
    }

    shared.i2c_paused.store(false, Ordering::SeqCst);
    result.is_ok()
}
