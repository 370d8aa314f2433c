//! VL53L0X time-of-flight distance sensor pair.
//!
//! Both sensors power up at the bus default address, so a two-address
//! topology must be created by XSHUT sequencing: hold the left sensor in
//! shutdown, bring the right one up and rewrite its address register, then
//! release the left sensor at the default address.  The sequencing is rerun
//! after every bus recovery because toggling XSHUT resets a sensor to the
//! default address.

use std::time::{Duration, Instant};

use mower_types::{ErrorCode, MowerError};
use tracing::{debug, info};

use crate::bus::SharedI2c;
use crate::gpio::GpioPin;
use crate::sensor::Sensor;

/// Power-on default address of every VL53L0X.
pub const TOF_DEFAULT_ADDR: u8 = 0x29;
/// Address assigned to the right sensor by XSHUT sequencing.
pub const TOF_RIGHT_ADDR: u8 = 0x30;

const REG_MODEL_ID: u8 = 0xC0;
const REG_I2C_ADDRESS: u8 = 0x8A;
const REG_SYSRANGE_START: u8 = 0x00;
const REG_INTERRUPT_STATUS: u8 = 0x13;
const REG_INTERRUPT_CLEAR: u8 = 0x0B;
const REG_RESULT_RANGE: u8 = 0x1E;

const MODEL_ID: u8 = 0xEE;
const RANGE_POLL_BUDGET: Duration = Duration::from_millis(25);
const XSHUT_SETTLE: Duration = Duration::from_millis(10);

/// One VL53L0X on the shared bus.
pub struct Vl53l0x {
    i2c: SharedI2c,
    addr: u8,
    name: &'static str,
}

impl Vl53l0x {
    pub fn new(i2c: SharedI2c, addr: u8, name: &'static str) -> Self {
        Self { i2c, addr, name }
    }

    fn fault(&self, message: impl Into<String>) -> MowerError {
        MowerError::hardware(ErrorCode::I2cError, self.name, message)
    }

    /// Verify the model id register answers at this sensor's address.
    fn probe(&self) -> Result<(), MowerError> {
        let id = self.i2c.read_reg(self.addr, REG_MODEL_ID)?;
        if id != MODEL_ID {
            return Err(self.fault(format!("unexpected model id 0x{id:02X}")));
        }
        Ok(())
    }

    /// Rewrite the device's bus address (volatile; lost on XSHUT reset).
    fn set_address(i2c: &SharedI2c, current: u8, new: u8) -> Result<(), MowerError> {
        i2c.write_reg(current, REG_I2C_ADDRESS, new & 0x7F)
    }
}

impl Sensor for Vl53l0x {
    type Reading = f64;

    fn name(&self) -> &str {
        self.name
    }

    fn initialize(&mut self) -> Result<(), MowerError> {
        self.probe()
    }

    /// Single-shot ranging: start a measurement, poll the interrupt status,
    /// read the range result in millimetres, clear the interrupt.
    fn read(&mut self) -> Result<f64, MowerError> {
        self.i2c.write_reg(self.addr, REG_SYSRANGE_START, 0x01)?;

        let deadline = Instant::now() + RANGE_POLL_BUDGET;
        loop {
            let status = self.i2c.read_reg(self.addr, REG_INTERRUPT_STATUS)?;
            if status & 0x07 != 0 {
                break;
            }
            if Instant::now() >= deadline {
                return Err(self.fault("range measurement timed out"));
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        let range_mm = self.i2c.read_reg16(self.addr, REG_RESULT_RANGE)?;
        self.i2c.write_reg(self.addr, REG_INTERRUPT_CLEAR, 0x01)?;

        // 8190/8191 are the device's out-of-range sentinels.
        if range_mm >= 8190 {
            return Err(self.fault("target out of range"));
        }
        Ok(range_mm as f64)
    }

    fn uses_i2c_bus(&self) -> bool {
        true
    }
}

/// XSHUT wiring of the ToF pair; owns the shutdown pins so the remap can be
/// rerun after bus recovery.
pub struct TofArrangement {
    left_xshut: Box<dyn GpioPin>,
    right_xshut: Box<dyn GpioPin>,
}

impl TofArrangement {
    pub fn new(left_xshut: Box<dyn GpioPin>, right_xshut: Box<dyn GpioPin>) -> Self {
        Self {
            left_xshut,
            right_xshut,
        }
    }

    /// Run the address remap sequence, yielding the two-address topology:
    /// right sensor at [`TOF_RIGHT_ADDR`], left at [`TOF_DEFAULT_ADDR`].
    pub fn sequence(&mut self, i2c: &SharedI2c) -> Result<(), MowerError> {
        // Power both sensors down; both forget any previous address.
        self.left_xshut.set_low()?;
        self.right_xshut.set_low()?;
        std::thread::sleep(XSHUT_SETTLE);

        // Bring the right sensor up alone and move it off the default.
        self.right_xshut.set_high()?;
        std::thread::sleep(XSHUT_SETTLE);
        Vl53l0x::set_address(i2c, TOF_DEFAULT_ADDR, TOF_RIGHT_ADDR)?;

        // Now the left sensor can own the default address.
        self.left_xshut.set_high()?;
        std::thread::sleep(XSHUT_SETTLE);

        info!(
            left_addr = TOF_DEFAULT_ADDR,
            right_addr = TOF_RIGHT_ADDR,
            "tof address remap complete"
        );
        Ok(())
    }

    /// Hold both sensors in shutdown (teardown path).
    pub fn shutdown(&mut self) {
        let left = self.left_xshut.set_low();
        let right = self.right_xshut.set_low();
        if left.is_err() || right.is_err() {
            debug!("tof xshut teardown failed; pins already released");
        }
    }
}
