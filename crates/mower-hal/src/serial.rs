//! Serial (UART) transport seam.

use mower_types::MowerError;

/// A byte-oriented serial port with a short internal read timeout.
///
/// `read` returns the number of bytes actually read; `Ok(0)` means the
/// timeout elapsed with nothing available, which drivers treat as "no data
/// yet", not as an error.
pub trait SerialPort: Send {
    fn write(&mut self, bytes: &[u8]) -> Result<(), MowerError>;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, MowerError>;

    /// Discard any buffered input.
    fn clear_input(&mut self) -> Result<(), MowerError>;
}
