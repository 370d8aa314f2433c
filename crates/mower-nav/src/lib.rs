//! Navigation: coverage path planning and reactive obstacle avoidance.
//!
//! The planner side generates waypoint sequences over the user's boundary
//! polygon (parallel, spiral, zig-zag) with circular exclusion zones and an
//! online ε-greedy pattern selector.  The avoidance side is a background
//! monitor that consumes fused sensor snapshots and camera classifications,
//! executes an avoidance strategy, and feeds observed obstacles back into
//! the planner's exclusion set.

pub mod avoidance;
pub mod boundary;
pub mod mapper;
pub mod pattern;
pub mod planner;
pub mod polygon;
pub mod selector;

pub use avoidance::{
    AvoidanceConfig, AvoidanceDeps, AvoidanceMonitor, CameraDetection, NoVision, SnapshotSource,
    VisionSource,
};
pub use mapper::{Obstacle, ObstacleKind, ObstacleMap};
pub use pattern::{PatternConfig, PatternType};
pub use planner::{ExclusionZone, PathPlanner};
pub use selector::{PatternSelector, RewardWeights, SessionOutcome};
