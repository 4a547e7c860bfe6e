//! [`SomaError`] – the workspace-wide error taxonomy.
//!
//! Every fallible operation in the orchestrator returns this type.  None of
//! the variants is fatal to the process: persistent failure shows up as a
//! depressed health score, not as a crash.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Global error type spanning constraint rejections, device faults, recovery
/// failures and configuration problems.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SomaError {
    /// A motor command violated the motor's [`Constraints`][crate::Constraints].
    /// The command was never sent to the device.
    #[error("Constraint violation on {component}: {details}")]
    ConstraintViolation { component: String, details: String },

    /// The component is not in an enabled state.
    #[error("Component {0} is not initialized")]
    NotInitialized(String),

    /// A device hook failed.
    #[error("Device error on {component}: {details}")]
    DeviceError { component: String, details: String },

    /// No registered motor can execute a command of the given type.
    #[error("No motor available for command type '{0}'")]
    NoMotorAvailable(String),

    /// A device call exceeded the configured timeout.
    #[error("Timeout on {component} after {after_ms} ms")]
    Timeout { component: String, after_ms: u64 },

    /// A reconnection or calibration attempt failed.
    #[error("Recovery failed on {component}: {details}")]
    RecoveryFailure { component: String, details: String },

    /// The id is not present in the registry.
    #[error("Unknown component: {0}")]
    UnknownComponent(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Event channel error: {0}")]
    Channel(String),
}

impl SomaError {
    /// Shorthand for a [`SomaError::DeviceError`].
    pub fn device(component: impl Into<String>, details: impl Into<String>) -> Self {
        SomaError::DeviceError {
            component: component.into(),
            details: details.into(),
        }
    }

    /// The component id the error refers to, when it refers to one.
    pub fn component(&self) -> Option<&str> {
        match self {
            SomaError::ConstraintViolation { component, .. }
            | SomaError::DeviceError { component, .. }
            | SomaError::Timeout { component, .. }
            | SomaError::RecoveryFailure { component, .. } => Some(component),
            SomaError::NotInitialized(id) | SomaError::UnknownComponent(id) => Some(id),
            SomaError::NoMotorAvailable(_) | SomaError::Config(_) | SomaError::Channel(_) => None,
        }
    }
}
