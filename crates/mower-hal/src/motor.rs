//! RoboHAT MM1 drive motor controller (UART).
//!
//! The RoboHAT firmware accepts plain-text command pairs
//! `"<steering_pwm>, <throttle_pwm>\r"` in RC microsecond units: 1000–2000
//! with 1500 neutral on both channels.  On top of that wire protocol the
//! driver offers the small motion vocabulary the avoidance layer needs
//! (stop, timed rotation, timed advance) and keeps a bounded command
//! history for diagnostics and tests.

use std::time::Duration;

use mower_types::{ErrorCode, MowerError};
use tracing::debug;

use crate::serial::SerialPort;

/// RC PWM endpoints understood by the firmware.
pub const PWM_MIN: u16 = 1000;
pub const PWM_NEUTRAL: u16 = 1500;
pub const PWM_MAX: u16 = 2000;

const HISTORY_CAP: usize = 256;

/// High-level motion commands recorded in the history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotorCommand {
    Stop,
    /// Proportional drive: steering and throttle in `[-1, 1]`.
    Drive { steering: f64, throttle: f64 },
    /// Turn in place; positive is clockwise (to the right).
    Rotate { degrees: f64 },
    /// Drive straight; positive is forward, metres.
    Advance { meters: f64 },
}

/// Open-loop motion rates used to convert rotations/advances into timed
/// PWM commands.  Tests shrink these to keep strategies fast.
#[derive(Debug, Clone, Copy)]
pub struct MotionRates {
    /// In-place rotation rate at the fixed turn throttle, degrees/second.
    pub rotation_deg_s: f64,
    /// Straight-line speed at the fixed travel throttle, metres/second.
    pub speed_m_s: f64,
}

impl Default for MotionRates {
    fn default() -> Self {
        Self {
            rotation_deg_s: 90.0,
            speed_m_s: 0.3,
        }
    }
}

pub struct RoboHat {
    port: Box<dyn SerialPort>,
    rates: MotionRates,
    history: Vec<MotorCommand>,
}

impl RoboHat {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self {
            port,
            rates: MotionRates::default(),
            history: Vec::new(),
        }
    }

    pub fn with_rates(mut self, rates: MotionRates) -> Self {
        self.rates = rates;
        self
    }

    /// Verify the link by commanding neutral.
    pub fn initialize(&mut self) -> Result<(), MowerError> {
        self.send_pwm(PWM_NEUTRAL, PWM_NEUTRAL)?;
        debug!("robohat link verified at neutral");
        Ok(())
    }

    /// Proportional drive.  `steering` and `throttle` in `[-1, 1]`.
    pub fn drive(&mut self, steering: f64, throttle: f64) -> Result<(), MowerError> {
        let steering = steering.clamp(-1.0, 1.0);
        let throttle = throttle.clamp(-1.0, 1.0);
        self.send_pwm(Self::to_pwm(steering), Self::to_pwm(throttle))?;
        self.record(MotorCommand::Drive { steering, throttle });
        Ok(())
    }

    /// Immediate stop: both channels to neutral.
    pub fn stop(&mut self) -> Result<(), MowerError> {
        self.send_pwm(PWM_NEUTRAL, PWM_NEUTRAL)?;
        self.record(MotorCommand::Stop);
        Ok(())
    }

    /// Rotate in place by `degrees` (positive clockwise), then stop.
    /// Blocks for the open-loop duration implied by the configured rates.
    pub fn rotate(&mut self, degrees: f64) -> Result<(), MowerError> {
        let steering = if degrees >= 0.0 { 1.0 } else { -1.0 };
        self.send_pwm(Self::to_pwm(steering), Self::to_pwm(0.5))?;
        std::thread::sleep(self.duration(degrees.abs() / self.rates.rotation_deg_s));
        self.send_pwm(PWM_NEUTRAL, PWM_NEUTRAL)?;
        self.record(MotorCommand::Rotate { degrees });
        Ok(())
    }

    /// Drive straight for `meters` (negative backs up), then stop.
    /// Blocks for the open-loop duration implied by the configured rates.
    pub fn advance(&mut self, meters: f64) -> Result<(), MowerError> {
        let throttle = if meters >= 0.0 { 0.5 } else { -0.5 };
        self.send_pwm(PWM_NEUTRAL, Self::to_pwm(throttle))?;
        std::thread::sleep(self.duration(meters.abs() / self.rates.speed_m_s));
        self.send_pwm(PWM_NEUTRAL, PWM_NEUTRAL)?;
        self.record(MotorCommand::Advance { meters });
        Ok(())
    }

    /// Commands issued so far, oldest first (bounded).
    pub fn history(&self) -> &[MotorCommand] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    fn duration(&self, seconds: f64) -> Duration {
        Duration::from_secs_f64(seconds.clamp(0.0, 30.0))
    }

    fn to_pwm(value: f64) -> u16 {
        (PWM_NEUTRAL as f64 + value * 500.0).round().clamp(PWM_MIN as f64, PWM_MAX as f64) as u16
    }

    fn send_pwm(&mut self, steering: u16, throttle: u16) -> Result<(), MowerError> {
        let line = format!("{steering}, {throttle}\r");
        self.port.write(line.as_bytes()).map_err(|e| {
            MowerError::hardware(
                ErrorCode::SerialError,
                "robohat",
                format!("pwm write failed: {e}"),
            )
        })
    }

    fn record(&mut self, command: MotorCommand) {
        if self.history.len() == HISTORY_CAP {
            self.history.remove(0);
        }
        self.history.push(command);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct RecordingPort {
        lines: Arc<Mutex<Vec<String>>>,
    }

    impl SerialPort for RecordingPort {
        fn write(&mut self, bytes: &[u8]) -> Result<(), MowerError> {
            self.lines
                .lock()
                .unwrap()
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

    fn test_motor() -> (RoboHat, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let motor = RoboHat::new(Box::new(RecordingPort {
            lines: Arc::clone(&lines),
        }))
        .with_rates(MotionRates {
            rotation_deg_s: 100_000.0,
            speed_m_s: 100_000.0,
        });
        (motor, lines)
    }

    #[test]
    fn stop_sends_neutral_on_both_channels() {
        let (mut motor, lines) = test_motor();
        motor.stop().unwrap();
        assert_eq!(lines.lock().unwrap()[0], "1500, 1500\r");
        assert_eq!(motor.history(), &[MotorCommand::Stop]);
    }

    #[test]
    fn drive_maps_unit_range_to_pwm() {
        let (mut motor, lines) = test_motor();
        motor.drive(1.0, -1.0).unwrap();
        assert_eq!(lines.lock().unwrap()[0], "2000, 1000\r");
    }

    #[test]
    fn drive_clamps_out_of_range_inputs() {
        let (mut motor, lines) = test_motor();
        motor.drive(5.0, -5.0).unwrap();
        assert_eq!(lines.lock().unwrap()[0], "2000, 1000\r");
        assert_eq!(
            motor.history(),
            &[MotorCommand::Drive {
                steering: 1.0,
                throttle: -1.0
            }]
        );
    }

    #[test]
    fn rotate_steers_toward_sign_then_neutralizes() {
        let (mut motor, lines) = test_motor();
        motor.rotate(45.0).unwrap();
        let lines = lines.lock().unwrap();
        assert_eq!(lines[0], "2000, 1750\r");
        assert_eq!(lines[1], "1500, 1500\r");
        assert_eq!(motor.history(), &[MotorCommand::Rotate { degrees: 45.0 }]);
    }

    #[test]
    fn reverse_advance_uses_negative_throttle() {
        let (mut motor, lines) = test_motor();
        motor.advance(-0.3).unwrap();
        let lines = lines.lock().unwrap();
        assert_eq!(lines[0], "1500, 1250\r");
        assert_eq!(lines[1], "1500, 1500\r");
    }

    #[test]
    fn history_is_bounded() {
        let (mut motor, _) = test_motor();
        for _ in 0..(HISTORY_CAP + 10) {
            motor.stop().unwrap();
        }
        assert_eq!(motor.history().len(), HISTORY_CAP);
    }
}
