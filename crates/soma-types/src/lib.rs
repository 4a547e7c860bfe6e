//! `soma-types` – shared vocabulary of the SomaOS workspace.
//!
//! # Modules
//!
//! - [`model`] – readings, commands, quality, constraints, calibration and the
//!   [`IntegrationError`] record.
//! - [`health`] – per-component health reports, [`DiagnosticsSnapshot`] and
//!   [`SystemHealth`].
//! - [`config`] – component descriptors, [`SystemConfig`] and
//!   [`MonitorConfig`].
//! - [`event`] – the [`Event`] envelope and every [`EventPayload`] the
//!   orchestrator publishes.
//! - [`error`] – [`SomaError`].

pub mod config;
pub mod error;
pub mod event;
pub mod health;
pub mod model;

pub use config::{
    ComponentDescriptor, ComponentOptions, ErrorHandlingConfig, MonitorConfig, SystemConfig,
    TimeoutHandling,
};
pub use error::SomaError;
pub use event::{DetectionFlags, Event, EventKind, EventPayload};
pub use health::{
    ComponentHealth, DiagnosticsSnapshot, HealthSource, HealthStatus, MotorHealth, SafetyStatus,
    SensorHealth, SystemHealth,
};
pub use model::{
    CalibrationData, CalibrationStatus, Command, CommandTarget, ComponentKind, Constraints,
    IntegrationError, IntegrationErrorKind, LifecycleState, Quality, Reading, SensorValue,
    Severity,
};
