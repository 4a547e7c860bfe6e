//! Core data model: readings, commands, quality descriptors and the
//! integration-error record.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Component identity & lifecycle
// ────────────────────────────────────────────────────────────────────────────

/// The two families of embodied components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Sensor,
    Motor,
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentKind::Sensor => write!(f, "sensor"),
            ComponentKind::Motor => write!(f, "motor"),
        }
    }
}

/// Lifecycle of a component.
///
/// ```text
/// Uninitialized ──initialize──▶ Idle ◀──▶ Active
///                                 │          │
///                                 └─shutdown─┴──▶ Disabled
/// ```
///
/// `Idle` and `Active` together form the *enabled* super-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    /// Enabled, no operation in flight.
    Idle,
    /// Enabled and currently reading (sensor) or executing (motor).
    Active,
    Disabled,
}

impl LifecycleState {
    pub fn is_enabled(self) -> bool {
        matches!(self, LifecycleState::Idle | LifecycleState::Active)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Quality
// ────────────────────────────────────────────────────────────────────────────

/// Derived reliability descriptor attached to readings and commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quality {
    /// In `[0, 1]`; decays as the component's error count grows.
    pub reliability: f64,
    pub latency_ms: u64,
    /// In `[0, 1]`.
    pub completeness: f64,
    pub error_flags: Vec<String>,
}

impl Quality {
    /// Reliability for a component that has failed `error_count` times:
    /// `max(0, 1 - error_count / 100)`.
    pub fn reliability_for(error_count: u32) -> f64 {
        (1.0 - f64::from(error_count) / 100.0).max(0.0)
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self {
            reliability: 1.0,
            latency_ms: 0,
            completeness: 1.0,
            error_flags: Vec::new(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sensor readings
// ────────────────────────────────────────────────────────────────────────────

/// A value observed by a sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SensorValue {
    Scalar(f64),
    Vector(Vec<f64>),
    Flag(bool),
}

impl SensorValue {
    /// `true` when the value carries no data (an empty vector).
    pub fn is_empty(&self) -> bool {
        matches!(self, SensorValue::Vector(v) if v.is_empty())
    }
}

/// Calibration parameters applied to raw sensor values:
/// `calibrated = raw * scale + offset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationData {
    pub offset: f64,
    pub scale: f64,
    pub last_calibrated: Option<DateTime<Utc>>,
    pub valid: bool,
}

impl Default for CalibrationData {
    fn default() -> Self {
        Self {
            offset: 0.0,
            scale: 1.0,
            last_calibrated: None,
            valid: false,
        }
    }
}

impl CalibrationData {
    /// Apply the calibration to a raw value.  Flags pass through untouched.
    pub fn apply(&self, raw: SensorValue) -> SensorValue {
        match raw {
            SensorValue::Scalar(v) => SensorValue::Scalar(v * self.scale + self.offset),
            SensorValue::Vector(vs) => {
                SensorValue::Vector(vs.into_iter().map(|v| v * self.scale + self.offset).collect())
            }
            flag @ SensorValue::Flag(_) => flag,
        }
    }

    /// Classify this calibration at `now`, treating anything older than
    /// `ttl` as expired.
    pub fn status(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> CalibrationStatus {
        match self.last_calibrated {
            _ if !self.valid => CalibrationStatus::Invalid,
            None => CalibrationStatus::Invalid,
            Some(at) if now - at > ttl => CalibrationStatus::Expired,
            Some(_) => CalibrationStatus::Valid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationStatus {
    Valid,
    Expired,
    Invalid,
}

/// One timestamped sensor observation.  Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source_id: String,
    pub sensor_type: String,
    pub value: SensorValue,
    pub quality: Quality,
    pub calibration: Option<CalibrationData>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Reading {
    /// Construct a reading stamped with a fresh id and the current time.
    pub fn new(
        source_id: impl Into<String>,
        sensor_type: impl Into<String>,
        value: SensorValue,
        quality: Quality,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source_id: source_id.into(),
            sensor_type: sensor_type.into(),
            value,
            quality,
            calibration: None,
            metadata: HashMap::new(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Motor commands
// ────────────────────────────────────────────────────────────────────────────

/// Physical set-points a command asks a motor to reach.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandTarget {
    pub position: Option<f64>,
    pub velocity: Option<f64>,
    pub force: Option<f64>,
}

/// One timestamped motor instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Component (or collaborator) that produced the command.
    pub source_id: String,
    /// Motor type this command is meant for, e.g. `"servo"`.
    pub command_type: String,
    pub target: CommandTarget,
    #[serde(default)]
    pub priority: u8,
    pub quality: Option<Quality>,
}

impl Command {
    pub fn new(
        source_id: impl Into<String>,
        command_type: impl Into<String>,
        target: CommandTarget,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source_id: source_id.into(),
            command_type: command_type.into(),
            target,
            priority: 0,
            quality: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

/// Physical limits enforced on every motor command before execution.
///
/// Updates replace the whole set; fields are never merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    pub max_velocity: Option<f64>,
    pub max_force: Option<f64>,
    /// Inclusive `(min, max)` joint position range.
    pub joint_limits: Option<(f64, f64)>,
}

// ────────────────────────────────────────────────────────────────────────────
// Integration errors
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationErrorKind {
    SensorTimeout,
    ProcessingDelay,
    DataLoss,
    ConnectionLost,
    CalibrationFailure,
    DeviceError,
    IntegrationFailure,
}

/// One anomaly recorded by the meta-monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationError {
    pub kind: IntegrationErrorKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub component: String,
}

impl IntegrationError {
    pub fn new(
        kind: IntegrationErrorKind,
        severity: Severity,
        component: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            severity,
            component: component.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reliability_decays_with_error_count() {
        assert!((Quality::reliability_for(0) - 1.0).abs() < f64::EPSILON);
        assert!((Quality::reliability_for(25) - 0.75).abs() < 1e-9);
        assert_eq!(Quality::reliability_for(150), 0.0);
    }

    #[test]
    fn calibration_applies_scale_then_offset() {
        let cal = CalibrationData {
            offset: 1.0,
            scale: 2.0,
            last_calibrated: None,
            valid: true,
        };
        assert_eq!(cal.apply(SensorValue::Scalar(3.0)), SensorValue::Scalar(7.0));
        assert_eq!(
            cal.apply(SensorValue::Vector(vec![0.0, 1.0])),
            SensorValue::Vector(vec![1.0, 3.0])
        );
        assert_eq!(cal.apply(SensorValue::Flag(true)), SensorValue::Flag(true));
    }

    #[test]
    fn calibration_status_classification() {
        let now = Utc::now();
        let ttl = chrono::Duration::hours(1);

        let never = CalibrationData::default();
        assert_eq!(never.status(now, ttl), CalibrationStatus::Invalid);

        let fresh = CalibrationData {
            last_calibrated: Some(now),
            valid: true,
            ..CalibrationData::default()
        };
        assert_eq!(fresh.status(now, ttl), CalibrationStatus::Valid);

        let stale = CalibrationData {
            last_calibrated: Some(now - chrono::Duration::hours(2)),
            valid: true,
            ..CalibrationData::default()
        };
        assert_eq!(stale.status(now, ttl), CalibrationStatus::Expired);
    }

    #[test]
    fn lifecycle_enabled_super_state() {
        assert!(LifecycleState::Idle.is_enabled());
        assert!(LifecycleState::Active.is_enabled());
        assert!(!LifecycleState::Uninitialized.is_enabled());
        assert!(!LifecycleState::Disabled.is_enabled());
    }

    #[test]
    fn severity_orders_low_to_high() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
    }

    #[test]
    fn command_serializes_with_snake_case_kind() {
        let cmd = Command::new("planner", "servo", CommandTarget {
            velocity: Some(1.0),
            ..CommandTarget::default()
        });
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"command_type\":\"servo\""));
        let err = IntegrationError::new(
            IntegrationErrorKind::SensorTimeout,
            Severity::High,
            "imu",
            "slow",
        );
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("sensor_timeout"));
    }
}
