//! In-process simulation backend for tests and `USE_SIMULATION` runs.
//!
//! [`SimWorld`] is the single source of truth: tests inject sensor values
//! and fault conditions through it and inspect everything the actuators
//! were commanded to do (pin levels, PWM duties, serial traffic).
//! [`SimPlatform`] implements the [`Platform`] seam on top of the world, so
//! the [`HardwareRegistry`][crate::registry::HardwareRegistry] runs the
//! exact same construction and teardown paths as on hardware.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use mower_types::{
    EnvironmentSection, ErrorCode, GpsSection, ImuSection, MowerError, PowerSection,
};

use crate::bus::{I2cBus, SharedI2c};
use crate::camera::{Camera, CameraFrame};
use crate::gpio::{GpioPin, PwmChannel};
use crate::registry::{HalConfig, Platform};
use crate::sensor::Sensor;
use crate::serial::SerialPort;

#[derive(Default)]
struct SimState {
    imu: ImuSection,
    environment: EnvironmentSection,
    power: PowerSection,
    gps: GpsSection,
    tof_left_mm: Option<f64>,
    tof_right_mm: Option<f64>,
    bus_stuck: bool,
    failed_sensors: HashSet<String>,
    pin_levels: HashMap<u8, bool>,
    pwm_duties: HashMap<u8, f64>,
    serial_writes: HashMap<String, Vec<String>>,
    frame_counter: u64,
}

/// Shared handle to the simulated world.  Clones share state.
#[derive(Clone, Default)]
pub struct SimWorld {
    state: Arc<Mutex<SimState>>,
}

impl SimWorld {
    pub fn new() -> Self {
        let world = Self::default();
        {
            let mut state = world.state.lock().unwrap();
            state.tof_left_mm = Some(2000.0);
            state.tof_right_mm = Some(2000.0);
            state.gps = GpsSection {
                latitude: 51.0,
                longitude: -0.1,
                fix: true,
                satellites: 10,
                hdop: 0.9,
            };
        }
        world
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().expect("sim world lock poisoned")
    }

    // ── Injection ────────────────────────────────────────────────────────

    pub fn set_imu(&self, heading: f64, roll: f64, pitch: f64) {
        let mut state = self.lock();
        state.imu.heading = heading;
        state.imu.roll = roll;
        state.imu.pitch = pitch;
        state.imu.safety.is_safe = roll.abs() < crate::imu::TILT_LIMIT_DEG
            && pitch.abs() < crate::imu::TILT_LIMIT_DEG;
    }

    pub fn set_environment(&self, environment: EnvironmentSection) {
        self.lock().environment = environment;
    }

    pub fn set_power(&self, power: PowerSection) {
        self.lock().power = power;
    }

    pub fn set_gps(&self, gps: GpsSection) {
        self.lock().gps = gps;
    }

    /// `None` simulates an out-of-range target (driver read error).
    pub fn set_tof_left(&self, distance_mm: Option<f64>) {
        self.lock().tof_left_mm = distance_mm;
    }

    pub fn set_tof_right(&self, distance_mm: Option<f64>) {
        self.lock().tof_right_mm = distance_mm;
    }

    /// Wedge or unwedge the simulated I²C bus.  While stuck, every bus
    /// transaction and every I²C-backed sensor read fails; recovery clears
    /// the condition.
    pub fn set_bus_stuck(&self, stuck: bool) {
        self.lock().bus_stuck = stuck;
    }

    /// Make the named sensor fail every operation until restored.
    pub fn fail_sensor(&self, name: &str) {
        self.lock().failed_sensors.insert(name.to_string());
    }

    pub fn restore_sensor(&self, name: &str) {
        self.lock().failed_sensors.remove(name);
    }

    // ── Inspection ───────────────────────────────────────────────────────

    pub fn pin_level(&self, pin: u8) -> bool {
        self.lock().pin_levels.get(&pin).copied().unwrap_or(false)
    }

    pub fn pwm_duty(&self, pin: u8) -> f64 {
        self.lock().pwm_duties.get(&pin).copied().unwrap_or(0.0)
    }

    /// Lines written to the serial port opened at `path`.
    pub fn serial_log(&self, path: &str) -> Vec<String> {
        self.lock()
            .serial_writes
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_bus_stuck(&self) -> bool {
        self.lock().bus_stuck
    }

    fn check(&self, sensor: &str, uses_i2c: bool) -> Result<(), MowerError> {
        let state = self.lock();
        if uses_i2c && state.bus_stuck {
            return Err(MowerError::hardware(
                ErrorCode::I2cError,
                sensor,
                "simulated bus stuck",
            ));
        }
        if state.failed_sensors.contains(sensor) {
            return Err(MowerError::hardware(
                ErrorCode::SensorFailure,
                sensor,
                "simulated sensor failure",
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Simulated transports
// ─────────────────────────────────────────────────────────────────────────

/// Permissive I²C bus stub: acknowledges writes, answers identity probes,
/// and fails wholesale while the world's bus is stuck.
struct SimI2cBus {
    world: SimWorld,
}

impl I2cBus for SimI2cBus {
    fn write(&mut self, _addr: u8, _bytes: &[u8]) -> Result<(), MowerError> {
        self.world.check("i2c", true)
    }

    fn write_read(&mut self, _addr: u8, write: &[u8], read: &mut [u8]) -> Result<(), MowerError> {
        self.world.check("i2c", true)?;
        read.fill(0);
        // Identity registers answered so probe paths succeed.
        if let Some(&reg) = write.first() {
            match reg {
                0xC0 => read[0] = 0xEE, // VL53L0X model id
                0xD0 => read[0] = 0x60, // BME280 chip id
                0xFE if read.len() == 2 => read.copy_from_slice(&0x5449u16.to_be_bytes()),
                _ => {}
            }
        }
        Ok(())
    }

    fn recover(&mut self) -> Result<(), MowerError> {
        self.world.set_bus_stuck(false);
        Ok(())
    }
}

struct SimPin {
    world: SimWorld,
    pin: u8,
}

impl GpioPin for SimPin {
    fn pin(&self) -> u8 {
        self.pin
    }
    fn set_high(&mut self) -> Result<(), MowerError> {
        self.world.lock().pin_levels.insert(self.pin, true);
        Ok(())
    }
    fn set_low(&mut self) -> Result<(), MowerError> {
        self.world.lock().pin_levels.insert(self.pin, false);
        Ok(())
    }
    fn is_high(&self) -> bool {
        self.world.pin_level(self.pin)
    }
}

struct SimPwm {
    world: SimWorld,
    pin: u8,
}

impl PwmChannel for SimPwm {
    fn set_duty(&mut self, duty: f64) -> Result<(), MowerError> {
        self.world
            .lock()
            .pwm_duties
            .insert(self.pin, duty.clamp(0.0, 1.0));
        Ok(())
    }
    fn duty(&self) -> f64 {
        self.world.pwm_duty(self.pin)
    }
    fn stop(&mut self) -> Result<(), MowerError> {
        self.world.lock().pwm_duties.insert(self.pin, 0.0);
        Ok(())
    }
}

struct SimSerial {
    world: SimWorld,
    path: String,
}

impl SerialPort for SimSerial {
    fn write(&mut self, bytes: &[u8]) -> Result<(), MowerError> {
        self.world
            .lock()
            .serial_writes
            .entry(self.path.clone())
            .or_default()
            .push(String::from_utf8_lossy(bytes).into_owned());
        Ok(())
    }
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, MowerError> {
        Ok(0)
    }
    fn clear_input(&mut self) -> Result<(), MowerError> {
        Ok(())
    }
}

struct SimCamera {
    world: SimWorld,
}

impl Camera for SimCamera {
    fn capture(&mut self) -> Result<CameraFrame, MowerError> {
        self.world.check("camera", false)?;
        let mut state = self.world.lock();
        state.frame_counter += 1;
        // Minimal JPEG wrapper around a grey payload.
        let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0];
        data.extend(std::iter::repeat_n(0x80, 64));
        data.extend([0xFF, 0xD9]);
        Ok(CameraFrame {
            width: 64,
            height: 48,
            data,
            sequence: state.frame_counter,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Simulated sensors
// ─────────────────────────────────────────────────────────────────────────

macro_rules! sim_sensor {
    ($name:ident, $sensor_name:literal, $reading:ty, $uses_i2c:expr, $extract:expr) => {
        struct $name {
            world: SimWorld,
        }

        impl Sensor for $name {
            type Reading = $reading;

            fn name(&self) -> &str {
                $sensor_name
            }

            fn initialize(&mut self) -> Result<(), MowerError> {
                self.world.check($sensor_name, $uses_i2c)
            }

            fn read(&mut self) -> Result<Self::Reading, MowerError> {
                self.world.check($sensor_name, $uses_i2c)?;
                let extract: fn(&SimState) -> Result<Self::Reading, MowerError> = $extract;
                extract(&self.world.lock())
            }

            fn uses_i2c_bus(&self) -> bool {
                $uses_i2c
            }
        }
    };
}

sim_sensor!(SimImu, "bno085", ImuSection, false, |s| Ok(s.imu));
sim_sensor!(SimEnvironment, "bme280", EnvironmentSection, true, |s| Ok(
    s.environment
));
sim_sensor!(SimPower, "ina3221", PowerSection, true, |s| Ok(s.power));
sim_sensor!(SimGps, "gps", GpsSection, false, |s| Ok(s.gps));

struct SimTof {
    world: SimWorld,
    name: &'static str,
    left: bool,
}

impl Sensor for SimTof {
    type Reading = f64;

    fn name(&self) -> &str {
        self.name
    }

    fn initialize(&mut self) -> Result<(), MowerError> {
        self.world.check(self.name, true)
    }

    fn read(&mut self) -> Result<f64, MowerError> {
        self.world.check(self.name, true)?;
        let state = self.world.lock();
        let value = if self.left {
            state.tof_left_mm
        } else {
            state.tof_right_mm
        };
        value.ok_or_else(|| {
            MowerError::hardware(ErrorCode::I2cError, self.name, "target out of range")
        })
    }

    fn uses_i2c_bus(&self) -> bool {
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Platform
// ─────────────────────────────────────────────────────────────────────────

/// [`Platform`] implementation backed by a [`SimWorld`].
pub struct SimPlatform {
    world: SimWorld,
}

impl SimPlatform {
    pub fn new(world: SimWorld) -> Self {
        Self { world }
    }
}

impl Platform for SimPlatform {
    fn open_i2c(&mut self) -> Result<Box<dyn I2cBus>, MowerError> {
        Ok(Box::new(SimI2cBus {
            world: self.world.clone(),
        }))
    }

    fn claim_pin(&mut self, pin: u8) -> Result<Box<dyn GpioPin>, MowerError> {
        Ok(Box::new(SimPin {
            world: self.world.clone(),
            pin,
        }))
    }

    fn claim_pwm(&mut self, pin: u8) -> Result<Box<dyn PwmChannel>, MowerError> {
        Ok(Box::new(SimPwm {
            world: self.world.clone(),
            pin,
        }))
    }

    fn open_serial(&mut self, path: &str, _baud: u32) -> Result<Box<dyn SerialPort>, MowerError> {
        Ok(Box::new(SimSerial {
            world: self.world.clone(),
            path: path.to_string(),
        }))
    }

    fn open_camera(&mut self) -> Result<Box<dyn Camera>, MowerError> {
        self.world.check("camera", false)?;
        Ok(Box::new(SimCamera {
            world: self.world.clone(),
        }))
    }

    fn imu_sensor(
        &mut self,
        _config: &HalConfig,
    ) -> Result<Box<dyn Sensor<Reading = ImuSection>>, MowerError> {
        Ok(Box::new(SimImu {
            world: self.world.clone(),
        }))
    }

    fn environment_sensor(
        &mut self,
        _i2c: &SharedI2c,
    ) -> Result<Box<dyn Sensor<Reading = EnvironmentSection>>, MowerError> {
        Ok(Box::new(SimEnvironment {
            world: self.world.clone(),
        }))
    }

    fn power_sensor(
        &mut self,
        _i2c: &SharedI2c,
    ) -> Result<Box<dyn Sensor<Reading = PowerSection>>, MowerError> {
        Ok(Box::new(SimPower {
            world: self.world.clone(),
        }))
    }

    fn tof_sensors(
        &mut self,
        _i2c: &SharedI2c,
    ) -> Result<
        (
            Box<dyn Sensor<Reading = f64>>,
            Box<dyn Sensor<Reading = f64>>,
        ),
        MowerError,
    > {
        Ok((
            Box::new(SimTof {
                world: self.world.clone(),
                name: "tof_left",
                left: true,
            }),
            Box::new(SimTof {
                world: self.world.clone(),
                name: "tof_right",
                left: false,
            }),
        ))
    }

    fn gps_sensor(
        &mut self,
        _config: &HalConfig,
    ) -> Result<Box<dyn Sensor<Reading = GpsSection>>, MowerError> {
        Ok(Box::new(SimGps {
            world: self.world.clone(),
        }))
    }
}
