//! Notifications published on the per-instance event buses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::health::DiagnosticsSnapshot;
use crate::model::{Command, IntegrationError, Reading};

/// Which detectors fired during one monitoring cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionFlags {
    pub latency: bool,
    pub data_loss: bool,
    pub integration: bool,
}

impl DetectionFlags {
    pub fn any(&self) -> bool {
        self.latency || self.data_loss || self.integration
    }
}

/// Envelope wrapping every notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Publishing instance, e.g. `"soma-runtime::manager"` or a component id.
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// Every notification the orchestrator emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    // ── registry ────────────────────────────────────────────────────────────
    SensorRegistered { id: String },
    MotorRegistered { id: String },
    ComponentUnregistered { id: String },

    // ── perception ──────────────────────────────────────────────────────────
    SensorDataReceived(Reading),
    SensorError { id: String, error: String },
    PerceptionUpdate(Vec<Reading>),

    // ── action ──────────────────────────────────────────────────────────────
    ActionQueued(Command),
    ActionExecuted(Command),
    ActionFailed { command: Command, error: Option<String> },
    CommandComplete { motor_id: String, command: Command },
    CommandFailed { motor_id: String, command: Command, error: Option<String> },

    // ── processing loop ─────────────────────────────────────────────────────
    ProcessingStarted,
    ProcessingStopped,

    // ── meta-monitor ────────────────────────────────────────────────────────
    ErrorRecorded(IntegrationError),
    IssuesDetected(DetectionFlags),
    CalibrationStarted { id: String },
    CalibrationSucceeded { id: String },
    CalibrationFailed { id: String, error: Option<String> },
    ReconnectionStarted { id: String },
    ReconnectionSucceeded { id: String },
    ReconnectionFailed { id: String, error: String },
    MonitoringStarted,
    MonitoringStopped,
    MonitoringCycle(Box<DiagnosticsSnapshot>),
    AutomaticRecoveryAttempted,
}

/// Discriminant of [`EventPayload`], used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SensorRegistered,
    MotorRegistered,
    ComponentUnregistered,
    SensorDataReceived,
    SensorError,
    PerceptionUpdate,
    ActionQueued,
    ActionExecuted,
    ActionFailed,
    CommandComplete,
    CommandFailed,
    ProcessingStarted,
    ProcessingStopped,
    ErrorRecorded,
    IssuesDetected,
    CalibrationStarted,
    CalibrationSucceeded,
    CalibrationFailed,
    ReconnectionStarted,
    ReconnectionSucceeded,
    ReconnectionFailed,
    MonitoringStarted,
    MonitoringStopped,
    MonitoringCycle,
    AutomaticRecoveryAttempted,
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::SensorRegistered { .. } => EventKind::SensorRegistered,
            EventPayload::MotorRegistered { .. } => EventKind::MotorRegistered,
            EventPayload::ComponentUnregistered { .. } => EventKind::ComponentUnregistered,
            EventPayload::SensorDataReceived(_) => EventKind::SensorDataReceived,
            EventPayload::SensorError { .. } => EventKind::SensorError,
            EventPayload::PerceptionUpdate(_) => EventKind::PerceptionUpdate,
            EventPayload::ActionQueued(_) => EventKind::ActionQueued,
            EventPayload::ActionExecuted(_) => EventKind::ActionExecuted,
            EventPayload::ActionFailed { .. } => EventKind::ActionFailed,
            EventPayload::CommandComplete { .. } => EventKind::CommandComplete,
            EventPayload::CommandFailed { .. } => EventKind::CommandFailed,
            EventPayload::ProcessingStarted => EventKind::ProcessingStarted,
            EventPayload::ProcessingStopped => EventKind::ProcessingStopped,
            EventPayload::ErrorRecorded(_) => EventKind::ErrorRecorded,
            EventPayload::IssuesDetected(_) => EventKind::IssuesDetected,
            EventPayload::CalibrationStarted { .. } => EventKind::CalibrationStarted,
            EventPayload::CalibrationSucceeded { .. } => EventKind::CalibrationSucceeded,
            EventPayload::CalibrationFailed { .. } => EventKind::CalibrationFailed,
            EventPayload::ReconnectionStarted { .. } => EventKind::ReconnectionStarted,
            EventPayload::ReconnectionSucceeded { .. } => EventKind::ReconnectionSucceeded,
            EventPayload::ReconnectionFailed { .. } => EventKind::ReconnectionFailed,
            EventPayload::MonitoringStarted => EventKind::MonitoringStarted,
            EventPayload::MonitoringStopped => EventKind::MonitoringStopped,
            EventPayload::MonitoringCycle(_) => EventKind::MonitoringCycle,
            EventPayload::AutomaticRecoveryAttempted => EventKind::AutomaticRecoveryAttempted,
        }
    }
}
