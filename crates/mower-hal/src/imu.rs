//! BNO085 IMU driver (UART-RVC mode).
//!
//! In RVC mode the sensor streams 19-byte frames at 100 Hz with no host
//! protocol: `0xAA 0xAA index yaw pitch roll ax ay az r r r checksum`, all
//! multi-byte fields little-endian `i16`, angles scaled by 0.01 degree.
//! The driver scans the byte stream for a frame with a valid checksum and
//! converts yaw into a 0–360° compass heading.

use mower_types::{ErrorCode, ImuSection, MowerError, SafetySection};
use tracing::debug;

use crate::sensor::Sensor;
use crate::serial::SerialPort;

const FRAME_LEN: usize = 19;
const HEADER: u8 = 0xAA;

/// Roll/pitch magnitude beyond which the mower must not run the blade.
pub const TILT_LIMIT_DEG: f64 = 45.0;

pub struct Bno085 {
    port: Box<dyn SerialPort>,
    buf: Vec<u8>,
}

impl Bno085 {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self {
            port,
            buf: Vec::with_capacity(4 * FRAME_LEN),
        }
    }

    /// Locate and decode the most recent valid frame in `buf`, draining
    /// everything up to and including it.
    fn take_frame(&mut self) -> Option<ImuSection> {
        let mut latest: Option<(usize, ImuSection)> = None;
        let mut i = 0;
        while i + FRAME_LEN <= self.buf.len() {
            if self.buf[i] == HEADER && self.buf[i + 1] == HEADER {
                let frame = &self.buf[i..i + FRAME_LEN];
                if Self::checksum_ok(frame) {
                    latest = Some((i + FRAME_LEN, Self::decode(frame)));
                    i += FRAME_LEN;
                    continue;
                }
            }
            i += 1;
        }
        if let Some((consumed, section)) = latest {
            self.buf.drain(..consumed);
            return Some(section);
        }
        // Keep at most one partial frame of unscanned tail.
        if self.buf.len() > 2 * FRAME_LEN {
            let drop = self.buf.len() - FRAME_LEN;
            self.buf.drain(..drop);
        }
        None
    }

    fn checksum_ok(frame: &[u8]) -> bool {
        let sum: u8 = frame[2..FRAME_LEN - 1]
            .iter()
            .fold(0u8, |acc, b| acc.wrapping_add(*b));
        sum == frame[FRAME_LEN - 1]
    }

    fn decode(frame: &[u8]) -> ImuSection {
        let field = |offset: usize| i16::from_le_bytes([frame[offset], frame[offset + 1]]);
        let yaw = field(3) as f64 * 0.01;
        let pitch = field(5) as f64 * 0.01;
        let roll = field(7) as f64 * 0.01;
        let heading = yaw.rem_euclid(360.0);
        ImuSection {
            heading,
            roll,
            pitch,
            safety: SafetySection {
                is_safe: roll.abs() < TILT_LIMIT_DEG && pitch.abs() < TILT_LIMIT_DEG,
            },
        }
    }
}

impl Sensor for Bno085 {
    type Reading = ImuSection;

    fn name(&self) -> &str {
        "bno085"
    }

    fn initialize(&mut self) -> Result<(), MowerError> {
        self.port.clear_input()?;
        self.buf.clear();
        debug!("bno085 serial input cleared");
        Ok(())
    }

    fn read(&mut self) -> Result<ImuSection, MowerError> {
        let mut chunk = [0u8; 2 * FRAME_LEN];
        // Two read attempts cover a frame boundary straddling the first
        // chunk; the poll loop's timeout bounds the overall budget.
        for _ in 0..2 {
            let n = self.port.read(&mut chunk)?;
            self.buf.extend_from_slice(&chunk[..n]);
            if let Some(section) = self.take_frame() {
                return Ok(section);
            }
        }
        Err(MowerError::hardware(
            ErrorCode::ImuError,
            "bno085",
            "no valid rvc frame in stream",
        ))
    }
}
