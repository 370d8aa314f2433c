//! The fused sensor [`Snapshot`].
//!
//! A snapshot is an immutable, always-complete aggregate: every top-level
//! section (`imu`, `tof`, `environment`, `power`, `gps`) is present in every
//! snapshot, so consumers never need schema discovery.  Sensors that have
//! produced no data contribute the safe sentinel defaults below; missing ToF
//! distances are `null`, never absent keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// IMU safety sub-record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetySection {
    pub is_safe: bool,
}

impl Default for SafetySection {
    fn default() -> Self {
        Self { is_safe: true }
    }
}

/// Orientation from the BNO085.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuSection {
    /// Heading in degrees, 0–360, clockwise from north.
    pub heading: f64,
    /// Roll in degrees.
    pub roll: f64,
    /// Pitch in degrees.
    pub pitch: f64,
    pub safety: SafetySection,
}

impl Default for ImuSection {
    fn default() -> Self {
        Self {
            heading: 0.0,
            roll: 0.0,
            pitch: 0.0,
            safety: SafetySection::default(),
        }
    }
}

/// Time-of-flight distances in millimetres.  `None` means the sensor has
/// produced no usable value.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TofSection {
    pub left: Option<f64>,
    pub right: Option<f64>,
    pub front: Option<f64>,
}

/// BME280 environment readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSection {
    /// Degrees Celsius.
    pub temperature: f64,
    /// Relative humidity, percent.
    pub humidity: f64,
    /// Hectopascal.
    pub pressure: f64,
}

impl Default for EnvironmentSection {
    fn default() -> Self {
        Self {
            temperature: 20.0,
            humidity: 50.0,
            pressure: 1013.25,
        }
    }
}

/// INA3221 battery/power readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerSection {
    pub voltage: f64,
    pub current: f64,
    /// Charge estimate, percent.
    pub percentage: f64,
    pub charging: bool,
}

impl Default for PowerSection {
    fn default() -> Self {
        Self {
            voltage: 12.0,
            current: 1.0,
            percentage: 75.0,
            charging: false,
        }
    }
}

/// GPS fix data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsSection {
    pub latitude: f64,
    pub longitude: f64,
    pub fix: bool,
    pub satellites: u32,
    pub hdop: f64,
}

impl Default for GpsSection {
    fn default() -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            fix: false,
            satellites: 0,
            hdop: 99.9,
        }
    }
}

/// Immutable fused aggregate published at the aggregator cadence.
///
/// Published by value: readers receive a copy and never hold writer locks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub imu: ImuSection,
    pub tof: TofSection,
    pub environment: EnvironmentSection,
    pub power: PowerSection,
    pub gps: GpsSection,
    pub timestamp: DateTime<Utc>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            imu: ImuSection::default(),
            tof: TofSection::default(),
            environment: EnvironmentSection::default(),
            power: PowerSection::default(),
            gps: GpsSection::default(),
            timestamp: Utc::now(),
        }
    }
}
