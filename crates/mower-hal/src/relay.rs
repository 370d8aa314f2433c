//! Relay bank over GPIO outputs.

use mower_types::{ErrorCode, MowerError};
use tracing::debug;

use crate::gpio::GpioPin;

/// A bank of relay channels, each driven by one GPIO output.
pub struct RelayBank {
    channels: Vec<Box<dyn GpioPin>>,
}

impl RelayBank {
    pub fn new(channels: Vec<Box<dyn GpioPin>>) -> Self {
        Self { channels }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Energize or release channel `index`.
    pub fn set(&mut self, index: usize, on: bool) -> Result<(), MowerError> {
        let channel = self.channels.get_mut(index).ok_or_else(|| {
            MowerError::hardware(
                ErrorCode::GpioError,
                "relay",
                format!("no relay channel {index}"),
            )
        })?;
        if on {
            channel.set_high()
        } else {
            channel.set_low()
        }
    }

    pub fn is_on(&self, index: usize) -> bool {
        self.channels.get(index).is_some_and(|c| c.is_high())
    }

    /// Release every channel (teardown path).
    pub fn all_off(&mut self) -> Result<(), MowerError> {
        for channel in &mut self.channels {
            channel.set_low()?;
        }
        debug!(channels = self.channels.len(), "all relays released");
        Ok(())
    }
}
