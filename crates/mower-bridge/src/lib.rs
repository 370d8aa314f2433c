//! File-backed atomic exchange between the controller process and the UI
//! process.
//!
//! Two independent channels share a common discipline — the controller is
//! the only writer, readers never delete, and the writer's `cleanup`
//! removes everything it created:
//!
//! - the **snapshot file** (`sensor_data.json` shape): rename-on-write so a
//!   reader never observes a half-written document;
//! - the **camera frame** (`current_frame.jpg` + metadata sidecar): guarded
//!   by an advisory `frame.lock` file carrying the writer's PID.

pub mod frames;
pub mod snapshot;

pub use frames::{FrameMetadata, FrameShare};
pub use snapshot::{SnapshotExporter, SnapshotReader};
