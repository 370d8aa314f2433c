//! Blade driver: two direction pins plus a PWM speed channel.
//!
//! Enable/disable and speed updates never interleave: all pin access goes
//! through one dedicated internal lock, independent of the I²C bus lock.
//! `disable` is the safety-relevant operation — it drives both direction
//! pins low and the PWM to zero and is called from the teardown path, the
//! emergency-stop callback, and the panic hook.

use std::sync::Mutex;
use std::time::Duration;

use mower_types::{ErrorCode, MowerError};
use tracing::{debug, info};

use crate::gpio::{GpioPin, PwmChannel};

/// GPIO assignment for the blade driver.  Numbers are configuration, not
/// contract; the defaults live in the supervisor's config layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BladePins {
    pub forward: u8,
    pub reverse: u8,
    pub pwm: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BladeDirection {
    Forward,
    Reverse,
}

struct BladeInner {
    forward: Box<dyn GpioPin>,
    reverse: Box<dyn GpioPin>,
    pwm: Box<dyn PwmChannel>,
    running: bool,
}

/// Thread-safe blade controller.
pub struct BladeController {
    inner: Mutex<BladeInner>,
}

impl BladeController {
    pub fn new(
        forward: Box<dyn GpioPin>,
        reverse: Box<dyn GpioPin>,
        pwm: Box<dyn PwmChannel>,
    ) -> Self {
        Self {
            inner: Mutex::new(BladeInner {
                forward,
                reverse,
                pwm,
                running: false,
            }),
        }
    }

    /// Spin up the blade in `direction` at `speed` (0–1).
    pub fn enable(&self, direction: BladeDirection, speed: f64) -> Result<(), MowerError> {
        let mut inner = self.lock()?;
        match direction {
            BladeDirection::Forward => {
                inner.reverse.set_low()?;
                inner.forward.set_high()?;
            }
            BladeDirection::Reverse => {
                inner.forward.set_low()?;
                inner.reverse.set_high()?;
            }
        }
        inner.pwm.set_duty(speed.clamp(0.0, 1.0))?;
        inner.running = true;
        info!(?direction, speed, "blade enabled");
        Ok(())
    }

    /// Adjust speed without touching direction.  No-op when disabled.
    pub fn set_speed(&self, speed: f64) -> Result<(), MowerError> {
        let mut inner = self.lock()?;
        if !inner.running {
            return Ok(());
        }
        inner.pwm.set_duty(speed.clamp(0.0, 1.0))
    }

    /// Drive both direction pins low and the PWM to zero.  Idempotent.
    pub fn disable(&self) -> Result<(), MowerError> {
        let mut inner = self.lock()?;
        inner.forward.set_low()?;
        inner.reverse.set_low()?;
        inner.pwm.set_duty(0.0)?;
        inner.pwm.stop()?;
        if inner.running {
            info!("blade disabled");
        }
        inner.running = false;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.lock().map(|inner| inner.running).unwrap_or(false)
    }

    /// Diagnostics self-test: pulse the blade briefly in each direction at
    /// low speed and verify the commanded state reads back, ending disabled.
    pub fn self_test(&self) -> Result<(), MowerError> {
        for direction in [BladeDirection::Forward, BladeDirection::Reverse] {
            self.enable(direction, 0.2)?;
            std::thread::sleep(Duration::from_millis(50));
            if !self.is_running() {
                return Err(MowerError::hardware(
                    ErrorCode::BladeFailure,
                    "blade",
                    "blade did not report running during self-test",
                ));
            }
            self.disable()?;
        }
        debug!("blade self-test passed");
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BladeInner>, MowerError> {
        self.inner.lock().map_err(|_| {
            MowerError::hardware(ErrorCode::GpioError, "blade", "blade lock poisoned")
        })
    }
}
