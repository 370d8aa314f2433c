//! BME280 environment sensor driver (temperature / humidity / pressure).
//!
//! Register-level driver over the shared I²C bus using the Bosch
//! floating-point compensation formulas.  Forced-mode, oversampling ×1 on
//! all channels; one conversion is triggered per [`Sensor::read`] call.

use mower_types::{EnvironmentSection, ErrorCode, MowerError};
use tracing::debug;

use crate::bus::SharedI2c;
use crate::sensor::Sensor;

/// Default bus address (SDO low).
pub const BME280_ADDR: u8 = 0x76;

const REG_CHIP_ID: u8 = 0xD0;
const REG_RESET: u8 = 0xE0;
const REG_CTRL_HUM: u8 = 0xF2;
const REG_CTRL_MEAS: u8 = 0xF4;
const REG_CALIB_TP: u8 = 0x88;
const REG_CALIB_H1: u8 = 0xA1;
const REG_CALIB_H2: u8 = 0xE1;
const REG_DATA: u8 = 0xF7;

const CHIP_ID: u8 = 0x60;
const RESET_WORD: u8 = 0xB6;
/// Forced mode, osrs_t = osrs_p = ×1.
const CTRL_MEAS_FORCED: u8 = 0b001_001_01;

/// Trimming parameters read once at initialization.
#[derive(Debug, Clone, Copy, Default)]
struct Calibration {
    t1: u16,
    t2: i16,
    t3: i16,
    p1: u16,
    p2: i16,
    p3: i16,
    p4: i16,
    p5: i16,
    p6: i16,
    p7: i16,
    p8: i16,
    p9: i16,
    h1: u8,
    h2: i16,
    h3: u8,
    h4: i16,
    h5: i16,
    h6: i8,
}

pub struct Bme280 {
    i2c: SharedI2c,
    addr: u8,
    calib: Calibration,
}

impl Bme280 {
    pub fn new(i2c: SharedI2c, addr: u8) -> Self {
        Self {
            i2c,
            addr,
            calib: Calibration::default(),
        }
    }

    fn fault(&self, message: impl Into<String>) -> MowerError {
        MowerError::hardware(ErrorCode::I2cError, "bme280", message)
    }

    fn read_calibration(&mut self) -> Result<(), MowerError> {
        let mut tp = [0u8; 24];
        self.i2c.read_regs(self.addr, REG_CALIB_TP, &mut tp)?;
        let mut h = [0u8; 7];
        self.i2c.read_regs(self.addr, REG_CALIB_H2, &mut h)?;
        let h1 = self.i2c.read_reg(self.addr, REG_CALIB_H1)?;

        let le16 = |hi: u8, lo: u8| u16::from_le_bytes([lo, hi]);
        self.calib = Calibration {
            t1: le16(tp[1], tp[0]),
            t2: le16(tp[3], tp[2]) as i16,
            t3: le16(tp[5], tp[4]) as i16,
            p1: le16(tp[7], tp[6]),
            p2: le16(tp[9], tp[8]) as i16,
            p3: le16(tp[11], tp[10]) as i16,
            p4: le16(tp[13], tp[12]) as i16,
            p5: le16(tp[15], tp[14]) as i16,
            p6: le16(tp[17], tp[16]) as i16,
            p7: le16(tp[19], tp[18]) as i16,
            p8: le16(tp[21], tp[20]) as i16,
            p9: le16(tp[23], tp[22]) as i16,
            h1,
            h2: le16(h[1], h[0]) as i16,
            h3: h[2],
            // H4/H5 are signed 12-bit values sharing the nibble register
            // 0xE5; the high byte carries the sign.
            h4: ((h[3] as i8 as i16) << 4) | (h[4] & 0x0F) as i16,
            h5: ((h[5] as i8 as i16) << 4) | ((h[4] >> 4) as i16),
            h6: h[6] as i8,
        };
        Ok(())
    }

    /// Bosch floating-point compensation (datasheet §4.2.3).
    fn compensate(&self, adc_t: i32, adc_p: i32, adc_h: i32) -> EnvironmentSection {
        let c = &self.calib;

        let var1 = (adc_t as f64 / 16384.0 - c.t1 as f64 / 1024.0) * c.t2 as f64;
        let var2 = {
            let d = adc_t as f64 / 131072.0 - c.t1 as f64 / 8192.0;
            d * d * c.t3 as f64
        };
        let t_fine = var1 + var2;
        let temperature = t_fine / 5120.0;

        let pressure = {
            let mut var1 = t_fine / 2.0 - 64000.0;
            let mut var2 = var1 * var1 * c.p6 as f64 / 32768.0;
            var2 += var1 * c.p5 as f64 * 2.0;
            var2 = var2 / 4.0 + c.p4 as f64 * 65536.0;
            var1 = (c.p3 as f64 * var1 * var1 / 524288.0 + c.p2 as f64 * var1) / 524288.0;
            var1 = (1.0 + var1 / 32768.0) * c.p1 as f64;
            if var1 == 0.0 {
                0.0
            } else {
                let mut p = 1048576.0 - adc_p as f64;
                p = (p - var2 / 4096.0) * 6250.0 / var1;
                let var1 = c.p9 as f64 * p * p / 2147483648.0;
                let var2 = p * c.p8 as f64 / 32768.0;
                (p + (var1 + var2 + c.p7 as f64) / 16.0) / 100.0
            }
        };

        let humidity = {
            let h = t_fine - 76800.0;
            let h = (adc_h as f64 - (c.h4 as f64 * 64.0 + c.h5 as f64 / 16384.0 * h))
                * (c.h2 as f64 / 65536.0
                    * (1.0
                        + c.h6 as f64 / 67108864.0
                            * h
                            * (1.0 + c.h3 as f64 / 67108864.0 * h)));
            let h = h * (1.0 - c.h1 as f64 * h / 524288.0);
            h.clamp(0.0, 100.0)
        };

        EnvironmentSection {
            temperature,
            humidity,
            pressure,
        }
    }
}

impl Sensor for Bme280 {
    type Reading = EnvironmentSection;

    fn name(&self) -> &str {
        "bme280"
    }

    fn initialize(&mut self) -> Result<(), MowerError> {
        let id = self.i2c.read_reg(self.addr, REG_CHIP_ID)?;
        if id != CHIP_ID {
            return Err(self.fault(format!("unexpected chip id 0x{id:02X}")));
        }
        self.i2c.write_reg(self.addr, REG_RESET, RESET_WORD)?;
        self.read_calibration()?;
        // ctrl_hum must be written before ctrl_meas to take effect.
        self.i2c.write_reg(self.addr, REG_CTRL_HUM, 0x01)?;
        self.i2c.write_reg(self.addr, REG_CTRL_MEAS, CTRL_MEAS_FORCED)?;
        debug!(addr = self.addr, "bme280 initialized");
        Ok(())
    }

    fn read(&mut self) -> Result<EnvironmentSection, MowerError> {
        // Trigger a forced conversion, then burst-read the data block.
        self.i2c.write_reg(self.addr, REG_CTRL_MEAS, CTRL_MEAS_FORCED)?;
        let mut data = [0u8; 8];
        self.i2c.read_regs(self.addr, REG_DATA, &mut data)?;

        let adc_p =
            ((data[0] as i32) << 12) | ((data[1] as i32) << 4) | ((data[2] as i32) >> 4);
        let adc_t =
            ((data[3] as i32) << 12) | ((data[4] as i32) << 4) | ((data[5] as i32) >> 4);
        let adc_h = ((data[6] as i32) << 8) | data[7] as i32;

        if adc_t == 0x80000 && adc_p == 0x80000 {
            return Err(self.fault("conversion not ready"));
        }
        Ok(self.compensate(adc_t, adc_p, adc_h))
    }

    fn uses_i2c_bus(&self) -> bool {
        true
    }
}
