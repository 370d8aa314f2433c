//! Camera transport seam.

use mower_types::MowerError;

/// One captured frame, JPEG-encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    /// JPEG bytes.
    pub data: Vec<u8>,
    /// Monotonic frame counter assigned by the driver.
    pub sequence: u64,
}

/// A camera that produces JPEG frames on demand.
pub trait Camera: Send {
    fn capture(&mut self) -> Result<CameraFrame, MowerError>;
}
