//! [`MowerState`] vocabulary and the fixed transition table.
//!
//! The table is data, not policy: the state *manager* (in `mower-state`)
//! enforces it, runs callbacks, and keeps history.  Keeping the enum here
//! lets events and errors carry typed states without a crate cycle.

use serde::{Deserialize, Serialize};

/// Category a state belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateCategory {
    /// Normal operating states.
    Operational,
    /// Fault states requiring recovery.
    Error,
    /// Lifecycle states (startup, shutdown, pause).
    Special,
}

/// Unified behavior state of the mower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MowerState {
    // Operational
    Idle,
    Mowing,
    Docking,
    Manual,
    Avoiding,
    ReturningHome,
    Docked,

    // Error
    Error,
    EmergencyStop,
    Stuck,
    LowBattery,

    // Special
    Initializing,
    ShuttingDown,
    Paused,
}

impl std::fmt::Display for MowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

impl MowerState {
    /// All states, in declaration order.
    pub const ALL: [MowerState; 14] = [
        MowerState::Idle,
        MowerState::Mowing,
        MowerState::Docking,
        MowerState::Manual,
        MowerState::Avoiding,
        MowerState::ReturningHome,
        MowerState::Docked,
        MowerState::Error,
        MowerState::EmergencyStop,
        MowerState::Stuck,
        MowerState::LowBattery,
        MowerState::Initializing,
        MowerState::ShuttingDown,
        MowerState::Paused,
    ];

    /// Category of this state.
    pub fn category(self) -> StateCategory {
        match self {
            MowerState::Idle
            | MowerState::Mowing
            | MowerState::Docking
            | MowerState::Manual
            | MowerState::Avoiding
            | MowerState::ReturningHome
            | MowerState::Docked => StateCategory::Operational,
            MowerState::Error
            | MowerState::EmergencyStop
            | MowerState::Stuck
            | MowerState::LowBattery => StateCategory::Error,
            MowerState::Initializing | MowerState::ShuttingDown | MowerState::Paused => {
                StateCategory::Special
            }
        }
    }

    /// Human-readable name for operator-facing surfaces.
    pub fn display_name(self) -> &'static str {
        match self {
            MowerState::Idle => "Idle",
            MowerState::Mowing => "Mowing",
            MowerState::Docking => "Docking",
            MowerState::Manual => "Manual Control",
            MowerState::Avoiding => "Avoiding Obstacle",
            MowerState::ReturningHome => "Returning Home",
            MowerState::Docked => "Docked",
            MowerState::Error => "Error",
            MowerState::EmergencyStop => "Emergency Stop",
            MowerState::Stuck => "Stuck",
            MowerState::LowBattery => "Low Battery",
            MowerState::Initializing => "Initializing",
            MowerState::ShuttingDown => "Shutting Down",
            MowerState::Paused => "Paused",
        }
    }

    /// States this state may transition to.
    ///
    /// [`MowerState::EmergencyStop`] is additionally reachable from every
    /// state except [`MowerState::ShuttingDown`]; see
    /// [`MowerState::can_transition_to`].
    pub fn allowed_transitions(self) -> &'static [MowerState] {
        use MowerState::*;
        match self {
            Initializing => &[Idle, Error, EmergencyStop],
            Idle => &[Mowing, Manual, Docking, ShuttingDown, Error, EmergencyStop],
            Mowing => &[
                Idle,
                Paused,
                Avoiding,
                ReturningHome,
                Docking,
                Error,
                EmergencyStop,
                Stuck,
                LowBattery,
            ],
            Avoiding => &[Mowing, Idle, ReturningHome, Error, EmergencyStop, Stuck],
            ReturningHome => &[
                Idle,
                Docked,
                Avoiding,
                Error,
                EmergencyStop,
                Stuck,
                LowBattery,
            ],
            Docking => &[Idle, Docked, Avoiding, Error, EmergencyStop, Stuck],
            Docked => &[Idle, ShuttingDown, Error, EmergencyStop],
            Manual => &[Idle, Error, EmergencyStop],
            Paused => &[Mowing, Idle, ReturningHome, Error, EmergencyStop],
            Error => &[Idle, EmergencyStop, ShuttingDown],
            EmergencyStop => &[Idle, ShuttingDown],
            Stuck => &[Idle, Mowing, ReturningHome, Error, EmergencyStop],
            LowBattery => &[Idle, Docking, ReturningHome, Error, EmergencyStop],
            ShuttingDown => &[],
        }
    }

    /// Whether a transition from `self` to `target` is valid.
    pub fn can_transition_to(self, target: MowerState) -> bool {
        // Emergency stop overrides the table from every live state.
        if target == MowerState::EmergencyStop {
            return self != MowerState::ShuttingDown;
        }
        self.allowed_transitions().contains(&target)
    }
}
