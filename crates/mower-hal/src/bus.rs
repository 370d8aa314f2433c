//! I²C transport seam and the process-wide shared bus handle.

use std::sync::{Arc, Mutex};

use mower_types::{ErrorCode, MowerError};

/// A raw I²C bus.
///
/// Implementations must be usable from any thread but need not be
/// re-entrant; [`SharedI2c`] serializes transactions behind a mutex so only
/// one transaction is in flight at a time.
pub trait I2cBus: Send {
    /// Write `bytes` to the device at `addr`.
    fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<(), MowerError>;

    /// Write `write` then read `read.len()` bytes in one transaction.
    fn write_read(&mut self, addr: u8, write: &[u8], read: &mut [u8]) -> Result<(), MowerError>;

    /// Software bus recovery: clock up to 9 SCL pulses with SDA released so
    /// a device stuck mid-transaction lets go of the bus, then reinitialize
    /// the controller.
    fn recover(&mut self) -> Result<(), MowerError>;
}

/// Process-wide, mutex-guarded handle to the single I²C bus.
///
/// Clones share the bus.  Every helper locks for exactly one transaction,
/// so drivers on different polling threads interleave at transaction
/// granularity and never interleave within one.
#[derive(Clone)]
pub struct SharedI2c {
    bus: Arc<Mutex<Box<dyn I2cBus>>>,
}

impl SharedI2c {
    pub fn new(bus: Box<dyn I2cBus>) -> Self {
        Self {
            bus: Arc::new(Mutex::new(bus)),
        }
    }

    /// Write raw bytes to `addr`.
    pub fn write(&self, addr: u8, bytes: &[u8]) -> Result<(), MowerError> {
        self.lock()?.write(addr, bytes)
    }

    /// Combined write-then-read transaction.
    pub fn write_read(&self, addr: u8, write: &[u8], read: &mut [u8]) -> Result<(), MowerError> {
        self.lock()?.write_read(addr, write, read)
    }

    /// Write a single register.
    pub fn write_reg(&self, addr: u8, reg: u8, value: u8) -> Result<(), MowerError> {
        self.write(addr, &[reg, value])
    }

    /// Read a single register.
    pub fn read_reg(&self, addr: u8, reg: u8) -> Result<u8, MowerError> {
        let mut buf = [0u8; 1];
        self.write_read(addr, &[reg], &mut buf)?;
        Ok(buf[0])
    }

    /// Read a big-endian u16 register pair.
    pub fn read_reg16(&self, addr: u8, reg: u8) -> Result<u16, MowerError> {
        let mut buf = [0u8; 2];
        self.write_read(addr, &[reg], &mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Burst-read `buf.len()` bytes starting at `reg`.
    pub fn read_regs(&self, addr: u8, reg: u8, buf: &mut [u8]) -> Result<(), MowerError> {
        self.write_read(addr, &[reg], buf)
    }

    /// Run the software bus recovery procedure.  Callers must have paused
    /// all polling first; the bus lock is held for the whole procedure.
    pub fn recover(&self) -> Result<(), MowerError> {
        self.lock()?.recover()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Box<dyn I2cBus>>, MowerError> {
        self.bus.lock().map_err(|_| {
            MowerError::hardware(ErrorCode::I2cError, "i2c", "bus mutex poisoned")
        })
    }
}
