//! Shared vocabulary of the mower coordination core.
//!
//! Every other crate in the workspace depends on this one: the error
//! taxonomy, the event model, sensor reading/health records, the fused
//! [`Snapshot`] aggregate, the [`MowerState`] machine vocabulary, planar
//! geometry, and the typed task supervisor all live here so the subsystem
//! crates never need to depend on each other for plain data.

pub mod error;
pub mod event;
pub mod geo;
pub mod reading;
pub mod snapshot;
pub mod state;
pub mod task;

pub use error::{ErrorCategory, ErrorCode, MowerError};
pub use event::{Event, EventPriority, EventType};
pub use geo::Point;
pub use reading::{ReadingStatus, SensorReading, SensorStatus};
pub use snapshot::{
    EnvironmentSection, GpsSection, ImuSection, PowerSection, SafetySection, Snapshot, TofSection,
};
pub use state::{MowerState, StateCategory};
pub use task::{ShutdownFlag, Worker};
