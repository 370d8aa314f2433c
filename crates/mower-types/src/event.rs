//! Event model for the in-process bus.
//!
//! Events are immutable once published: they carry a v4 id, a type tag used
//! for subscription routing, a free-form JSON data map, advisory priority,
//! the publishing component's name, and a wall-clock timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Types of events routed over the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    // Hardware
    HardwareSensorData,
    HardwareMotorStatus,
    HardwareBladeStatus,
    HardwareBatteryStatus,
    HardwareGpsData,
    HardwareImuData,
    HardwareCameraData,

    // Navigation
    NavigationPositionUpdated,
    NavigationPathUpdated,
    NavigationWaypointReached,
    NavigationDestinationReached,

    // Obstacle detection
    ObstacleDetected,
    ObstacleCleared,
    DropDetected,

    // State
    StateChanged,
    ErrorOccurred,
    WarningOccurred,

    // System
    SystemStartup,
    SystemShutdown,
    SystemHeartbeat,

    /// Escape hatch for subsystems with no dedicated type.
    Custom,
}

/// Advisory priority attached to an event.
///
/// Priority does not reorder the queue; its only hard semantic is that
/// [`EventPriority::Critical`] forces synchronous dispatch on the publishing
/// thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventPriority {
    Low,
    Normal,
    High,
    Critical,
}

/// An immutable bus event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub event_type: EventType,
    pub data: serde_json::Map<String, Value>,
    pub priority: EventPriority,
    /// Publishing component, e.g. `"sensor_interface"`.
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create a [`EventPriority::Normal`] event with an empty data map.
    pub fn new(event_type: EventType, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            data: serde_json::Map::new(),
            priority: EventPriority::Normal,
            source: source.into(),
            timestamp: Utc::now(),
        }
    }

    /// Attach a data field.  Consumed builder-style so publish sites read as
    /// one expression.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Override the advisory priority.
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }
}
