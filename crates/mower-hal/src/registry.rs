//! [`HardwareRegistry`] – process-wide hardware lifecycle authority.
//!
//! Constructs every hardware abstraction exactly once, in a fixed
//! dependency order, and tears them down in the exact reverse order:
//!
//! 1. I²C bus
//! 2. BME280 environment sensor *(optional)*
//! 3. INA3221 power monitor *(optional)*
//! 4. BNO085 IMU *(required)*
//! 5. VL53L0X ToF pair via XSHUT address sequencing *(required)*
//! 6. Blade driver GPIO + PWM *(required)*
//! 7. Relay outputs *(required)*
//! 8. RoboHAT motor controller UART *(required)*
//! 9. GPS receiver *(optional)*
//! 10. Camera *(optional)*
//!
//! A failed optional component logs at INFO and its accessor returns
//! `None`; a failed required component aborts initialization with a fatal
//! error.  [`HardwareRegistry::cleanup`] runs on every process-exit path
//! and is idempotent.

use std::sync::{Arc, Mutex};

use mower_types::{
    EnvironmentSection, ErrorCode, GpsSection, ImuSection, MowerError, PowerSection,
};
use tracing::{debug, info, warn};

use crate::blade::{BladeController, BladePins};
use crate::bme280::{BME280_ADDR, Bme280};
use crate::bus::{I2cBus, SharedI2c};
use crate::camera::Camera;
use crate::gpio::{GpioPin, PwmChannel};
use crate::gps::NmeaGps;
use crate::imu::Bno085;
use crate::ina3221::{INA3221_ADDR, Ina3221};
use crate::motor::{MotionRates, RoboHat};
use crate::relay::RelayBank;
use crate::sensor::Sensor;
use crate::serial::SerialPort;
use crate::tof::{TOF_DEFAULT_ADDR, TOF_RIGHT_ADDR, TofArrangement, Vl53l0x};

/// Shared, lockable handle to a pollable sensor.
pub type SensorHandle<R> = Arc<Mutex<Box<dyn Sensor<Reading = R>>>>;

/// Static hardware wiring and port configuration.
#[derive(Debug, Clone)]
pub struct HalConfig {
    pub imu_port: String,
    pub imu_baud: u32,
    pub mm1_port: String,
    pub mm1_baud: u32,
    pub gps_port: String,
    pub gps_baud: u32,
    pub blade_pins: BladePins,
    pub relay_pins: Vec<u8>,
    pub tof_xshut_left: u8,
    pub tof_xshut_right: u8,
    pub motion_rates: MotionRates,
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            imu_port: "/dev/ttyAMA2".to_string(),
            imu_baud: 3_000_000,
            mm1_port: "/dev/ttyACM1".to_string(),
            mm1_baud: 115_200,
            gps_port: "/dev/ttyACM0".to_string(),
            gps_baud: 115_200,
            blade_pins: BladePins {
                forward: 24,
                reverse: 25,
                pwm: 12,
            },
            relay_pins: vec![5, 6],
            tof_xshut_left: 22,
            tof_xshut_right: 23,
            motion_rates: MotionRates::default(),
        }
    }
}

/// What a concrete deployment must provide: raw transports plus, where a
/// backend wants to bypass the register-level drivers (the simulation
/// does), whole sensors.  The sensor methods default to constructing the
/// real drivers over the raw transports.
pub trait Platform: Send {
    fn open_i2c(&mut self) -> Result<Box<dyn I2cBus>, MowerError>;

    fn claim_pin(&mut self, pin: u8) -> Result<Box<dyn GpioPin>, MowerError>;

    fn claim_pwm(&mut self, pin: u8) -> Result<Box<dyn PwmChannel>, MowerError>;

    fn open_serial(&mut self, path: &str, baud: u32) -> Result<Box<dyn SerialPort>, MowerError>;

    fn open_camera(&mut self) -> Result<Box<dyn Camera>, MowerError>;

    fn imu_sensor(
        &mut self,
        config: &HalConfig,
    ) -> Result<Box<dyn Sensor<Reading = ImuSection>>, MowerError> {
        let port = self.open_serial(&config.imu_port, config.imu_baud)?;
        Ok(Box::new(Bno085::new(port)))
    }

    fn environment_sensor(
        &mut self,
        i2c: &SharedI2c,
    ) -> Result<Box<dyn Sensor<Reading = EnvironmentSection>>, MowerError> {
        Ok(Box::new(Bme280::new(i2c.clone(), BME280_ADDR)))
    }

    fn power_sensor(
        &mut self,
        i2c: &SharedI2c,
    ) -> Result<Box<dyn Sensor<Reading = PowerSection>>, MowerError> {
        Ok(Box::new(Ina3221::new(i2c.clone(), INA3221_ADDR)))
    }

    fn tof_sensors(
        &mut self,
        i2c: &SharedI2c,
    ) -> Result<
        (
            Box<dyn Sensor<Reading = f64>>,
            Box<dyn Sensor<Reading = f64>>,
        ),
        MowerError,
    > {
        Ok((
            Box::new(Vl53l0x::new(i2c.clone(), TOF_DEFAULT_ADDR, "tof_left")),
            Box::new(Vl53l0x::new(i2c.clone(), TOF_RIGHT_ADDR, "tof_right")),
        ))
    }

    fn gps_sensor(
        &mut self,
        config: &HalConfig,
    ) -> Result<Box<dyn Sensor<Reading = GpsSection>>, MowerError> {
        let port = self.open_serial(&config.gps_port, config.gps_baud)?;
        Ok(Box::new(NmeaGps::new(port)))
    }
}

pub struct HardwareRegistry {
    config: HalConfig,
    platform: Box<dyn Platform>,
    initialized: bool,

    i2c: Option<SharedI2c>,
    environment: Option<SensorHandle<EnvironmentSection>>,
    power: Option<SensorHandle<PowerSection>>,
    imu: Option<SensorHandle<ImuSection>>,
    tof_left: Option<SensorHandle<f64>>,
    tof_right: Option<SensorHandle<f64>>,
    tof_arrangement: Option<Arc<Mutex<TofArrangement>>>,
    blade: Option<Arc<BladeController>>,
    relays: Option<Arc<Mutex<RelayBank>>>,
    motor: Option<Arc<Mutex<RoboHat>>>,
    gps: Option<SensorHandle<GpsSection>>,
    camera: Option<Arc<Mutex<Box<dyn Camera>>>>,
}

impl HardwareRegistry {
    pub fn new(config: HalConfig, platform: Box<dyn Platform>) -> Self {
        Self {
            config,
            platform,
            initialized: false,
            i2c: None,
            environment: None,
            power: None,
            imu: None,
            tof_left: None,
            tof_right: None,
            tof_arrangement: None,
            blade: None,
            relays: None,
            motor: None,
            gps: None,
            camera: None,
        }
    }

    /// Bring up all hardware in dependency order.  Idempotent: a second
    /// call on an initialized registry returns success without touching
    /// any device.
    pub fn initialize(&mut self) -> Result<(), MowerError> {
        if self.initialized {
            debug!("hardware registry already initialized");
            return Ok(());
        }

        // 1. The shared bus everything I²C hangs off.
        let i2c = SharedI2c::new(self.platform.open_i2c()?);

        // 2–3. Optional I²C sensors.
        self.environment = match self
            .platform
            .environment_sensor(&i2c)
            .and_then(|mut s| s.initialize().map(|()| s))
        {
            Ok(sensor) => Some(Arc::new(Mutex::new(sensor))),
            Err(e) => {
                info!(error = %e, "bme280 unavailable; environment readings will use defaults");
                None
            }
        };
        self.power = match self
            .platform
            .power_sensor(&i2c)
            .and_then(|mut s| s.initialize().map(|()| s))
        {
            Ok(sensor) => Some(Arc::new(Mutex::new(sensor))),
            Err(e) => {
                info!(error = %e, "ina3221 unavailable; power readings will use defaults");
                None
            }
        };

        // 4. IMU (required).
        let mut imu = self.platform.imu_sensor(&self.config)?;
        imu.initialize().map_err(Self::fatal("bno085"))?;
        self.imu = Some(Arc::new(Mutex::new(imu)));

        // 5. ToF pair (required): XSHUT sequencing first, then probe both.
        let mut arrangement = TofArrangement::new(
            self.platform.claim_pin(self.config.tof_xshut_left)?,
            self.platform.claim_pin(self.config.tof_xshut_right)?,
        );
        arrangement.sequence(&i2c).map_err(Self::fatal("tof"))?;
        let (mut left, mut right) = self.platform.tof_sensors(&i2c)?;
        left.initialize().map_err(Self::fatal("tof_left"))?;
        right.initialize().map_err(Self::fatal("tof_right"))?;
        self.tof_arrangement = Some(Arc::new(Mutex::new(arrangement)));
        self.tof_left = Some(Arc::new(Mutex::new(left)));
        self.tof_right = Some(Arc::new(Mutex::new(right)));

        // 6. Blade driver (required), brought up disabled.
        let blade = BladeController::new(
            self.platform.claim_pin(self.config.blade_pins.forward)?,
            self.platform.claim_pin(self.config.blade_pins.reverse)?,
            self.platform.claim_pwm(self.config.blade_pins.pwm)?,
        );
        blade.disable().map_err(Self::fatal("blade"))?;
        self.blade = Some(Arc::new(blade));

        // 7. Relays (required), all released.
        let mut relays = RelayBank::new(
            self.config
                .relay_pins
                .iter()
                .map(|&pin| self.platform.claim_pin(pin))
                .collect::<Result<Vec<_>, _>>()?,
        );
        relays.all_off().map_err(Self::fatal("relay"))?;
        self.relays = Some(Arc::new(Mutex::new(relays)));

        // 8. Motor controller (required).
        let port = self
            .platform
            .open_serial(&self.config.mm1_port, self.config.mm1_baud)?;
        let mut motor = RoboHat::new(port).with_rates(self.config.motion_rates);
        motor.initialize().map_err(Self::fatal("robohat"))?;
        self.motor = Some(Arc::new(Mutex::new(motor)));

        // 9. GPS (optional).
        self.gps = match self
            .platform
            .gps_sensor(&self.config)
            .and_then(|mut s| s.initialize().map(|()| s))
        {
            Ok(sensor) => Some(Arc::new(Mutex::new(sensor))),
            Err(e) => {
                info!(error = %e, "gps unavailable; position readings will use defaults");
                None
            }
        };

        // 10. Camera (optional).
        self.camera = match self.platform.open_camera() {
            Ok(camera) => Some(Arc::new(Mutex::new(camera))),
            Err(e) => {
                info!(error = %e, "camera unavailable; vision features disabled");
                None
            }
        };

        self.i2c = Some(i2c);
        self.initialized = true;
        info!("hardware registry initialized");
        Ok(())
    }

    /// Tear everything down in exact reverse construction order.  Safe to
    /// call repeatedly and on a registry that never finished initializing.
    pub fn cleanup(&mut self) {
        // 10–9. Camera and GPS.
        self.camera = None;
        if let Some(gps) = self.gps.take()
            && let Ok(mut gps) = gps.lock()
        {
            gps.cleanup();
        }

        // 8. Motor to neutral before the link drops.
        if let Some(motor) = self.motor.take()
            && let Ok(mut motor) = motor.lock()
            && motor.stop().is_err()
        {
            warn!("motor did not acknowledge neutral during cleanup");
        }

        // 7. Relays released.
        if let Some(relays) = self.relays.take()
            && let Ok(mut relays) = relays.lock()
            && relays.all_off().is_err()
        {
            warn!("relay release failed during cleanup");
        }

        // 6. Blade: direction pins low, PWM stopped.
        if let Some(blade) = self.blade.take()
            && blade.disable().is_err()
        {
            warn!("blade disable failed during cleanup");
        }

        // 5. ToF sensors, then their XSHUT pins low.
        for handle in [self.tof_left.take(), self.tof_right.take()].into_iter().flatten() {
            if let Ok(mut sensor) = handle.lock() {
                sensor.cleanup();
            }
        }
        if let Some(arrangement) = self.tof_arrangement.take()
            && let Ok(mut arrangement) = arrangement.lock()
        {
            arrangement.shutdown();
        }

        // 4–2. IMU and the optional I²C sensors.
        if let Some(imu) = self.imu.take()
            && let Ok(mut imu) = imu.lock()
        {
            imu.cleanup();
        }
        if let Some(power) = self.power.take()
            && let Ok(mut power) = power.lock()
        {
            power.cleanup();
        }
        if let Some(environment) = self.environment.take()
            && let Ok(mut environment) = environment.lock()
        {
            environment.cleanup();
        }

        // 1. The bus handle last.
        self.i2c = None;

        if self.initialized {
            info!("hardware registry cleaned up");
        }
        self.initialized = false;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Re-run the ToF XSHUT address sequencing (bus recovery path).
    pub fn remap_tof(&self) -> Result<(), MowerError> {
        let (Some(arrangement), Some(i2c)) = (&self.tof_arrangement, &self.i2c) else {
            return Err(MowerError::hardware(
                ErrorCode::I2cError,
                "tof",
                "registry not initialized",
            ));
        };
        let mut arrangement = arrangement.lock().map_err(|_| {
            MowerError::hardware(ErrorCode::GpioError, "tof", "arrangement lock poisoned")
        })?;
        arrangement.sequence(i2c)
    }

    /// Detached remap closure for the sensor interface's bus recovery: it
    /// holds only the XSHUT arrangement and the bus handle, so the
    /// interface never needs the registry itself.
    pub fn tof_remapper(
        &self,
    ) -> Option<Box<dyn Fn() -> Result<(), MowerError> + Send + Sync>> {
        let arrangement = self.tof_arrangement.clone()?;
        let i2c = self.i2c.clone()?;
        Some(Box::new(move || {
            let mut arrangement = arrangement.lock().map_err(|_| {
                MowerError::hardware(ErrorCode::GpioError, "tof", "arrangement lock poisoned")
            })?;
            arrangement.sequence(&i2c)
        }))
    }

    // ── Accessors ────────────────────────────────────────────────────────
    // All return `None` until `initialize` has run; optional components
    // additionally return `None` when they failed to come up.

    pub fn i2c(&self) -> Option<SharedI2c> {
        self.i2c.clone()
    }

    pub fn imu(&self) -> Option<SensorHandle<ImuSection>> {
        self.imu.clone()
    }

    pub fn tof_left(&self) -> Option<SensorHandle<f64>> {
        self.tof_left.clone()
    }

    pub fn tof_right(&self) -> Option<SensorHandle<f64>> {
        self.tof_right.clone()
    }

    pub fn environment(&self) -> Option<SensorHandle<EnvironmentSection>> {
        self.environment.clone()
    }

    pub fn power(&self) -> Option<SensorHandle<PowerSection>> {
        self.power.clone()
    }

    pub fn gps(&self) -> Option<SensorHandle<GpsSection>> {
        self.gps.clone()
    }

    pub fn blade(&self) -> Option<Arc<BladeController>> {
        self.blade.clone()
    }

    pub fn relays(&self) -> Option<Arc<Mutex<RelayBank>>> {
        self.relays.clone()
    }

    pub fn motor(&self) -> Option<Arc<Mutex<RoboHat>>> {
        self.motor.clone()
    }

    pub fn camera(&self) -> Option<Arc<Mutex<Box<dyn Camera>>>> {
        self.camera.clone()
    }

    fn fatal(component: &'static str) -> impl FnOnce(MowerError) -> MowerError {
        move |cause| {
            MowerError::hardware(
                ErrorCode::InitializationFailed,
                component,
                format!("required component failed to initialize: {cause}"),
            )
        }
    }
}

impl Drop for HardwareRegistry {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimPlatform, SimWorld};

    fn sim_registry(world: &SimWorld) -> HardwareRegistry {
        HardwareRegistry::new(
            HalConfig::default(),
            Box::new(SimPlatform::new(world.clone())),
        )
    }

    #[test]
    fn initialize_is_idempotent() {
        let world = SimWorld::new();
        let mut registry = sim_registry(&world);
        registry.initialize().unwrap();
        registry.initialize().unwrap();
        assert!(registry.is_initialized());
        assert!(registry.imu().is_some());
    }

    #[test]
    fn optional_sensor_failure_still_initializes() {
        let world = SimWorld::new();
        world.fail_sensor("bme280");
        let mut registry = sim_registry(&world);
        registry.initialize().unwrap();
        assert!(registry.environment().is_none());
        assert!(registry.power().is_some());
        assert!(registry.imu().is_some());
    }

    #[test]
    fn required_sensor_failure_is_fatal() {
        let world = SimWorld::new();
        world.fail_sensor("bno085");
        let mut registry = sim_registry(&world);
        let err = registry.initialize().unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InitializationFailed));
        assert!(!registry.is_initialized());
    }

    #[test]
    fn xshut_sequencing_leaves_both_pins_high() {
        let world = SimWorld::new();
        let mut registry = sim_registry(&world);
        registry.initialize().unwrap();
        let config = HalConfig::default();
        assert!(world.pin_level(config.tof_xshut_left));
        assert!(world.pin_level(config.tof_xshut_right));
    }

    #[test]
    fn cleanup_reverses_and_parks_everything() {
        let world = SimWorld::new();
        let mut registry = sim_registry(&world);
        registry.initialize().unwrap();
        let blade = registry.blade().unwrap();
        blade
            .enable(crate::blade::BladeDirection::Forward, 0.6)
            .unwrap();

        registry.cleanup();
        let config = HalConfig::default();
        // Blade direction pins low, PWM zero, XSHUT low, accessors empty.
        assert!(!world.pin_level(config.blade_pins.forward));
        assert!(!world.pin_level(config.blade_pins.reverse));
        assert_eq!(world.pwm_duty(config.blade_pins.pwm), 0.0);
        assert!(!world.pin_level(config.tof_xshut_left));
        assert!(registry.imu().is_none());
        assert!(!registry.is_initialized());

        // Neutral was commanded on the motor link during cleanup.
        let log = world.serial_log(&config.mm1_port);
        assert_eq!(log.last().unwrap(), "1500, 1500\r");
    }

    #[test]
    fn cleanup_is_idempotent_and_safe_before_initialize() {
        let world = SimWorld::new();
        let mut registry = sim_registry(&world);
        registry.cleanup();
        registry.initialize().unwrap();
        registry.cleanup();
        registry.cleanup();
    }

    #[test]
    fn remap_tof_requires_initialization() {
        let world = SimWorld::new();
        let registry = sim_registry(&world);
        assert!(registry.remap_tof().is_err());
    }

    #[test]
    fn remap_tof_reruns_sequencing() {
        let world = SimWorld::new();
        let mut registry = sim_registry(&world);
        registry.initialize().unwrap();
        registry.remap_tof().unwrap();
        let config = HalConfig::default();
        assert!(world.pin_level(config.tof_xshut_left));
    }
}
