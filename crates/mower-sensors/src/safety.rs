//! Safety gate: is it safe to run the blade and drive?

use std::time::Duration;

use chrono::Utc;

use mower_types::{SensorStatus, Snapshot};

/// Thresholds feeding [`is_safe_to_operate`].
#[derive(Debug, Clone, Copy)]
pub struct SafetyLimits {
    /// Roll/pitch magnitude at or beyond which operation is unsafe,
    /// degrees.
    pub tilt_limit_deg: f64,
    /// Maximum IMU silence before operation is unsafe.
    pub imu_silence_limit: Duration,
    /// ToF distance below which an emergency stop is demanded,
    /// millimetres.
    pub emergency_distance_mm: f64,
    /// Battery percentage below which operation is unsafe.
    pub battery_critical_percent: f64,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            tilt_limit_deg: mower_hal::TILT_LIMIT_DEG,
            imu_silence_limit: Duration::from_secs(2),
            emergency_distance_mm: 100.0,
            battery_critical_percent: 10.0,
        }
    }
}

/// Evaluate the safety gate.  Any single violated condition makes the
/// answer `false`:
///
/// - IMU tilt at or beyond the tilt limit (or the IMU itself reports
///   unsafe);
/// - no successful IMU read within the silence limit;
/// - any ToF distance below the emergency-stop threshold;
/// - battery below the critical percentage;
/// - the emergency-stop input asserted.
pub fn is_safe_to_operate(
    limits: &SafetyLimits,
    snapshot: &Snapshot,
    imu_status: Option<&SensorStatus>,
    estop_asserted: bool,
) -> bool {
    if estop_asserted {
        return false;
    }
    if !snapshot.imu.safety.is_safe
        || snapshot.imu.roll.abs() >= limits.tilt_limit_deg
        || snapshot.imu.pitch.abs() >= limits.tilt_limit_deg
    {
        return false;
    }
    let imu_alive = imu_status
        .and_then(|s| s.last_success)
        .map(|t| {
            (Utc::now() - t).to_std().unwrap_or(Duration::ZERO) <= limits.imu_silence_limit
        })
        .unwrap_or(false);
    if !imu_alive {
        return false;
    }
    for distance in [snapshot.tof.left, snapshot.tof.right, snapshot.tof.front]
        .into_iter()
        .flatten()
    {
        if distance < limits.emergency_distance_mm {
            return false;
        }
    }
    if snapshot.power.percentage < limits.battery_critical_percent {
        return false;
    }
    true
}
