//! Concurrent sensor fusion layer.
//!
//! One polling worker per sensor with per-sensor timeouts, retry with
//! exponential backoff, and per-sensor health ledgers; a software I²C bus
//! recovery procedure for wedged buses; and a fixed-cadence aggregator
//! that fuses the latest readings into an always-complete [`Snapshot`]
//! published to the event bus and to an injected sink (the cross-process
//! bridge).
//!
//! [`Snapshot`]: mower_types::Snapshot

pub mod aggregator;
pub mod backoff;
pub mod interface;
pub mod poller;
pub mod recovery;
pub mod safety;
mod shared;

pub use aggregator::SnapshotSink;
pub use interface::{SensorHandles, SensorInterface, SensorInterfaceConfig, SnapshotHandle};
pub use safety::SafetyLimits;
