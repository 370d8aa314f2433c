//! Capability interface shared by every pollable sensor.

use mower_types::MowerError;

/// A pollable sensor producing one typed reading per call.
///
/// Concrete drivers (and their simulated stand-ins) implement this trait;
/// the sensor interface polls them through `dyn Sensor<Reading = T>`
/// handles, so driver swaps never touch the polling machinery.
pub trait Sensor: Send {
    type Reading: Send + 'static;

    /// Stable sensor name used in health records and logs,
    /// e.g. `"tof_left"`.
    fn name(&self) -> &str;

    /// Bring the device up.  Called once by the registry before the first
    /// `read`; must be cheap to call again after bus recovery.
    fn initialize(&mut self) -> Result<(), MowerError>;

    /// Take one reading.
    fn read(&mut self) -> Result<Self::Reading, MowerError>;

    /// Release device resources.  Default: nothing to do.
    fn cleanup(&mut self) {}

    /// Whether the sensor sits on the shared I²C bus (and therefore
    /// participates in bus recovery).
    fn uses_i2c_bus(&self) -> bool {
        false
    }
}
