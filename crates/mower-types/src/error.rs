//! Error taxonomy spanning hardware faults, navigation failures, and the
//! software/configuration/security layers.
//!
//! Every error carries a stable [`ErrorCode`] grouped by decade (hardware
//! 1000–1999, navigation 2000–2999, software 3000–3999, configuration
//! 4000–4999, communication 5000–5999, security 6000–6999).  Criticality and
//! the need for human intervention are derived from the code, so consumers
//! can route an error without matching on message text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::MowerState;

/// Coarse error category, derived from the code's thousand block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Hardware,
    Navigation,
    Software,
    Configuration,
    Communication,
    Security,
}

/// Stable integer error codes.
///
/// The numeric values are part of the external contract (they appear in
/// `ErrorOccurred` events and logs) and must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    // Hardware (1000–1999)
    HardwareGeneric = 1000,
    SensorFailure = 1001,
    MotorFailure = 1002,
    BladeFailure = 1003,
    BatteryLow = 1004,
    BatteryCritical = 1005,
    Overheating = 1006,
    GpioError = 1007,
    I2cError = 1008,
    SerialError = 1009,
    CameraError = 1010,

    // Navigation (2000–2999)
    NavigationGeneric = 2000,
    GpsSignalLost = 2001,
    PositionUnknown = 2002,
    PathBlocked = 2003,
    BoundaryViolation = 2004,
    NoPathFound = 2005,
    LocalizationError = 2006,
    ImuError = 2007,

    // Software (3000–3999)
    SoftwareGeneric = 3000,
    InitializationFailed = 3001,
    ThreadError = 3002,
    Timeout = 3004,
    StateError = 3006,

    // Configuration (4000–4999)
    ConfigurationGeneric = 4000,
    InvalidParameter = 4001,
    MissingParameter = 4002,

    // Communication (5000–5999)
    CommunicationGeneric = 5000,
    ConnectionLost = 5001,

    // Security (6000–6999)
    SecurityGeneric = 6000,
    AuthenticationFailed = 6001,
    EncryptionError = 6003,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value())
    }
}

impl ErrorCode {
    /// Numeric value of the code as it appears on the wire.
    pub fn value(self) -> u16 {
        self as u16
    }

    /// Category implied by the code's thousand block.
    pub fn category(self) -> ErrorCategory {
        match self.value() {
            1000..2000 => ErrorCategory::Hardware,
            2000..3000 => ErrorCategory::Navigation,
            3000..4000 => ErrorCategory::Software,
            4000..5000 => ErrorCategory::Configuration,
            5000..6000 => ErrorCategory::Communication,
            _ => ErrorCategory::Security,
        }
    }

    /// Whether this code describes a condition that prevents safe operation
    /// and must force an emergency stop.
    pub fn is_critical(self) -> bool {
        matches!(
            self,
            ErrorCode::BatteryCritical
                | ErrorCode::Overheating
                | ErrorCode::BoundaryViolation
                | ErrorCode::SecurityGeneric
                | ErrorCode::AuthenticationFailed
        )
    }

    /// Whether recovery from this code requires a human on site.
    pub fn requires_human_intervention(self) -> bool {
        matches!(
            self,
            ErrorCode::SensorFailure
                | ErrorCode::MotorFailure
                | ErrorCode::BladeFailure
                | ErrorCode::BatteryCritical
                | ErrorCode::Overheating
                | ErrorCode::PathBlocked
                | ErrorCode::BoundaryViolation
                | ErrorCode::SecurityGeneric
                | ErrorCode::AuthenticationFailed
        )
    }
}

/// Global error type for the coordination core.
#[derive(Error, Debug)]
pub enum MowerError {
    #[error("hardware fault on {component}: {message} (code {code})")]
    Hardware {
        code: ErrorCode,
        component: String,
        message: String,
    },

    #[error("navigation error: {message} (code {code})")]
    Navigation { code: ErrorCode, message: String },

    #[error("invalid state transition {from} -> {to}")]
    InvalidTransition { from: MowerState, to: MowerState },

    #[error("component '{component}' timed out after {millis} ms")]
    Timeout { component: String, millis: u64 },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("security error: {message}")]
    Security { code: ErrorCode, message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("channel closed: {0}")]
    Channel(String),
}

impl MowerError {
    /// Convenience constructor for hardware faults.
    pub fn hardware(code: ErrorCode, component: impl Into<String>, message: impl Into<String>) -> Self {
        MowerError::Hardware {
            code,
            component: component.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for navigation errors.
    pub fn navigation(code: ErrorCode, message: impl Into<String>) -> Self {
        MowerError::Navigation {
            code,
            message: message.into(),
        }
    }

    /// The stable code carried by this error, where one applies.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            MowerError::Hardware { code, .. }
            | MowerError::Navigation { code, .. }
            | MowerError::Security { code, .. } => Some(*code),
            MowerError::Timeout { .. } => Some(ErrorCode::Timeout),
            MowerError::InvalidTransition { .. } => Some(ErrorCode::StateError),
            MowerError::Configuration { .. } => Some(ErrorCode::ConfigurationGeneric),
            _ => None,
        }
    }

    /// Whether the error must force an emergency stop.
    pub fn is_critical(&self) -> bool {
        self.code().is_some_and(ErrorCode::is_critical)
    }
}
