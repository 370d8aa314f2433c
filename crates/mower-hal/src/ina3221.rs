//! INA3221 triple-channel power monitor driver.
//!
//! Channel 1 carries the battery.  Bus voltage LSB is 8 mV (13-bit,
//! left-aligned), shunt voltage LSB is 40 µV; current is derived from the
//! shunt drop across the configured resistor.

use mower_types::{ErrorCode, MowerError, PowerSection};
use tracing::debug;

use crate::bus::SharedI2c;
use crate::sensor::Sensor;

/// Default bus address (A0 to GND).
pub const INA3221_ADDR: u8 = 0x40;

const REG_CONFIG: u8 = 0x00;
const REG_SHUNT_CH1: u8 = 0x01;
const REG_BUS_CH1: u8 = 0x02;
const REG_MANUFACTURER_ID: u8 = 0xFE;

/// "TI" in the manufacturer id register.
const MANUFACTURER_TI: u16 = 0x5449;
/// Enable all channels, continuous shunt+bus mode.
const CONFIG_DEFAULT: u16 = 0x7127;

/// Battery voltage window used for the charge estimate (12 V lead-acid).
const BATTERY_EMPTY_V: f64 = 10.5;
const BATTERY_FULL_V: f64 = 12.6;
/// Currents more negative than this are treated as charge current.
const CHARGING_THRESHOLD_A: f64 = -0.05;

pub struct Ina3221 {
    i2c: SharedI2c,
    addr: u8,
    shunt_ohms: f64,
}

impl Ina3221 {
    pub fn new(i2c: SharedI2c, addr: u8) -> Self {
        Self {
            i2c,
            addr,
            shunt_ohms: 0.1,
        }
    }

    /// Override the shunt resistor value (ohms).
    pub fn with_shunt_ohms(mut self, ohms: f64) -> Self {
        self.shunt_ohms = ohms;
        self
    }

    /// Bus voltage of a channel (1–3), volts.
    fn bus_voltage(&self, channel: u8) -> Result<f64, MowerError> {
        let reg = REG_BUS_CH1 + (channel - 1) * 2;
        let raw = self.i2c.read_reg16(self.addr, reg)? as i16;
        Ok((raw >> 3) as f64 * 0.008)
    }

    /// Shunt drop of a channel (1–3), volts.
    fn shunt_voltage(&self, channel: u8) -> Result<f64, MowerError> {
        let reg = REG_SHUNT_CH1 + (channel - 1) * 2;
        let raw = self.i2c.read_reg16(self.addr, reg)? as i16;
        Ok((raw >> 3) as f64 * 40e-6)
    }

    /// Linear charge estimate from the battery voltage window.
    fn percentage(voltage: f64) -> f64 {
        ((voltage - BATTERY_EMPTY_V) / (BATTERY_FULL_V - BATTERY_EMPTY_V) * 100.0)
            .clamp(0.0, 100.0)
    }
}

impl Sensor for Ina3221 {
    type Reading = PowerSection;

    fn name(&self) -> &str {
        "ina3221"
    }

    fn initialize(&mut self) -> Result<(), MowerError> {
        let id = self.i2c.read_reg16(self.addr, REG_MANUFACTURER_ID)?;
        if id != MANUFACTURER_TI {
            return Err(MowerError::hardware(
                ErrorCode::I2cError,
                "ina3221",
                format!("unexpected manufacturer id 0x{id:04X}"),
            ));
        }
        let config = CONFIG_DEFAULT.to_be_bytes();
        self.i2c
            .write(self.addr, &[REG_CONFIG, config[0], config[1]])?;
        debug!(addr = self.addr, "ina3221 initialized");
        Ok(())
    }

    fn read(&mut self) -> Result<PowerSection, MowerError> {
        let voltage = self.bus_voltage(1)?;
        let current = self.shunt_voltage(1)? / self.shunt_ohms;
        Ok(PowerSection {
            voltage,
            current,
            percentage: Self::percentage(voltage),
            charging: current < CHARGING_THRESHOLD_A,
        })
    }

    fn uses_i2c_bus(&self) -> bool {
        true
    }
}
