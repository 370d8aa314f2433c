//! Per-sensor reading and health records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Freshness classification of a [`SensorReading`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingStatus {
    /// The value was read successfully within its freshness budget.
    Ok,
    /// The sensor has not produced a fresh value; the carried value is the
    /// last good one.
    Stale,
    /// The sensor exhausted its retries; the carried value is a sentinel.
    Failed,
}

/// A single timestamped sensor value.
///
/// `status == Ok` implies the value was produced within the sensor's
/// freshness budget; consumers must check the status before trusting the
/// value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading<T> {
    pub value: T,
    pub timestamp: DateTime<Utc>,
    pub status: ReadingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub sensor_name: String,
}

impl<T> SensorReading<T> {
    /// A fresh, successful reading taken now.
    pub fn ok(sensor_name: impl Into<String>, value: T) -> Self {
        Self {
            value,
            timestamp: Utc::now(),
            status: ReadingStatus::Ok,
            error: None,
            sensor_name: sensor_name.into(),
        }
    }

    /// A failed reading carrying a sentinel `value` and the error text.
    pub fn failed(sensor_name: impl Into<String>, value: T, error: impl Into<String>) -> Self {
        Self {
            value,
            timestamp: Utc::now(),
            status: ReadingStatus::Failed,
            error: Some(error.into()),
            sensor_name: sensor_name.into(),
        }
    }

    /// Age of the reading relative to now.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.timestamp
    }

    /// Downgrade an `Ok` reading to `Stale`, keeping its value.
    pub fn into_stale(mut self) -> Self {
        if self.status == ReadingStatus::Ok {
            self.status = ReadingStatus::Stale;
        }
        self
    }
}

/// Health ledger entry for one sensor.
///
/// `working == false` exactly when `consecutive_failures` has reached the
/// configured threshold or bus recovery has flagged the sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorStatus {
    pub name: String,
    pub working: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SensorStatus {
    /// Fresh ledger entry for a sensor that has not been polled yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            working: true,
            last_success: None,
            consecutive_failures: 0,
            total_failures: 0,
            last_error: None,
        }
    }

    /// Record a successful read.
    pub fn record_success(&mut self) {
        self.working = true;
        self.consecutive_failures = 0;
        self.last_success = Some(Utc::now());
        self.last_error = None;
    }

    /// Record a failed read; marks the sensor not working once
    /// `failure_threshold` consecutive failures accumulate.
    pub fn record_failure(&mut self, error: impl Into<String>, failure_threshold: u32) {
        self.consecutive_failures += 1;
        self.total_failures += 1;
        self.last_error = Some(error.into());
        if self.consecutive_failures >= failure_threshold {
            self.working = false;
        }
    }

    /// Flag the sensor as not working regardless of its counters (used by
    /// bus recovery while the bus is down).
    pub fn flag_not_working(&mut self, reason: impl Into<String>) {
        self.working = false;
        self.last_error = Some(reason.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_reading_has_no_error() {
        let r = SensorReading::ok("imu", 1.25_f64);
        assert_eq!(r.status, ReadingStatus::Ok);
        assert!(r.error.is_none());
        assert_eq!(r.sensor_name, "imu");
    }

    #[test]
    fn failed_reading_keeps_sentinel_and_error() {
        let r = SensorReading::failed("tof_left", f64::NAN, "read timed out");
        assert_eq!(r.status, ReadingStatus::Failed);
        assert!(r.value.is_nan());
        assert_eq!(r.error.as_deref(), Some("read timed out"));
    }

    #[test]
    fn into_stale_only_downgrades_ok() {
        let r = SensorReading::ok("imu", 0.0_f64).into_stale();
        assert_eq!(r.status, ReadingStatus::Stale);
        let r = SensorReading::failed("imu", 0.0_f64, "x").into_stale();
        assert_eq!(r.status, ReadingStatus::Failed);
    }

    #[test]
    fn status_flips_working_at_threshold() {
        let mut s = SensorStatus::new("bme280");
        for _ in 0..2 {
            s.record_failure("i2c nack", 3);
            assert!(s.working);
        }
        s.record_failure("i2c nack", 3);
        assert!(!s.working);
        assert_eq!(s.consecutive_failures, 3);
        assert_eq!(s.total_failures, 3);
    }

    #[test]
    fn success_resets_consecutive_but_not_total() {
        let mut s = SensorStatus::new("ina3221");
        s.record_failure("nack", 3);
        s.record_failure("nack", 3);
        s.record_success();
        assert!(s.working);
        assert_eq!(s.consecutive_failures, 0);
        assert_eq!(s.total_failures, 2);
        assert!(s.last_success.is_some());
        assert!(s.last_error.is_none());
    }

    #[test]
    fn bus_recovery_flag_overrides_counters() {
        let mut s = SensorStatus::new("tof_right");
        assert!(s.working);
        s.flag_not_working("i2c bus recovery in progress");
        assert!(!s.working);
        assert_eq!(s.consecutive_failures, 0);
    }
}
