//! Hardware abstraction layer for the mower.
//!
//! The crate is split along two seams:
//!
//! - **Transport traits** ([`I2cBus`], [`GpioPin`], [`PwmChannel`],
//!   [`SerialPort`], [`Camera`]) describe what the platform must provide.
//!   Drivers only ever talk to the traits, so a Raspberry Pi backend, a
//!   bench rig, or the in-process simulation can be swapped without touching
//!   behavior code.
//! - **Device drivers** (BNO085, VL53L0X, BME280, INA3221, NMEA GPS, RoboHAT
//!   motor controller, blade driver, relay bank) implement the mower-facing
//!   capability surface on top of those transports.
//!
//! [`HardwareRegistry`] owns every device, constructs them exactly once in
//! dependency order, and tears them down in exact reverse order.

pub mod blade;
pub mod bme280;
pub mod bus;
pub mod camera;
pub mod gpio;
pub mod gps;
pub mod imu;
pub mod ina3221;
pub mod linux;
pub mod motor;
pub mod registry;
pub mod relay;
pub mod sensor;
pub mod serial;
pub mod sim;
pub mod tof;

pub use blade::{BladeController, BladeDirection, BladePins};
pub use bus::{I2cBus, SharedI2c};
pub use camera::{Camera, CameraFrame};
pub use gpio::{GpioPin, PwmChannel};
pub use imu::TILT_LIMIT_DEG;
pub use linux::LinuxPlatform;
pub use motor::{MotionRates, MotorCommand, RoboHat};
pub use registry::{HalConfig, HardwareRegistry, Platform, SensorHandle};
pub use relay::RelayBank;
pub use sensor::Sensor;
pub use serial::SerialPort;
pub use sim::{SimPlatform, SimWorld};
