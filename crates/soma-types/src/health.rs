//! Health reports produced by components and aggregated by the meta-monitor.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::CalibrationStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Online,
    Degraded,
    Offline,
}

/// Motor safety classification derived purely from the error count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyStatus {
    Safe,
    Warning,
    Error,
}

impl SafetyStatus {
    /// `> 10 → Error`, `> 5 → Warning`, otherwise `Safe`.
    pub fn from_error_count(error_count: u32) -> Self {
        if error_count > 10 {
            SafetyStatus::Error
        } else if error_count > 5 {
            SafetyStatus::Warning
        } else {
            SafetyStatus::Safe
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorHealth {
    pub status: HealthStatus,
    /// `false` when the health query itself failed.
    pub reachable: bool,
    /// Configured rate in Hz while sensing, `0` otherwise.
    pub expected_rate: f64,
    /// Measured rate in Hz.
    pub actual_rate: f64,
    pub latency_ms: u64,
    pub error_count: u32,
    /// Fraction of read attempts that failed, in `[0, 1]`.
    pub error_rate: f64,
    pub calibration_status: CalibrationStatus,
    pub sensing: bool,
}

impl SensorHealth {
    /// The report used when a sensor cannot be queried at all.
    pub fn unreachable() -> Self {
        Self {
            status: HealthStatus::Offline,
            reachable: false,
            expected_rate: 0.0,
            actual_rate: 0.0,
            latency_ms: 0,
            error_count: 0,
            error_rate: 1.0,
            calibration_status: CalibrationStatus::Invalid,
            sensing: false,
        }
    }

    /// Health contribution in `[0, 1]`.
    pub fn score(&self) -> f64 {
        match self.status {
            HealthStatus::Offline => 0.0,
            _ => (1.0 - self.error_rate).clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorHealth {
    pub status: HealthStatus,
    pub reachable: bool,
    pub average_response_time_ms: f64,
    pub error_count: u32,
    pub error_rate: f64,
    pub safety_status: SafetyStatus,
    /// Number of commands waiting in the motor's own pending queue.
    pub queue_length: usize,
    pub executing: bool,
}

impl MotorHealth {
    pub fn unreachable() -> Self {
        Self {
            status: HealthStatus::Offline,
            reachable: false,
            average_response_time_ms: 0.0,
            error_count: 0,
            error_rate: 1.0,
            safety_status: SafetyStatus::Error,
            queue_length: 0,
            executing: false,
        }
    }

    pub fn score(&self) -> f64 {
        match self.status {
            HealthStatus::Offline => 0.0,
            _ => (1.0 - self.error_rate).clamp(0.0, 1.0),
        }
    }
}

/// Health returned by the component contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ComponentHealth {
    Sensor(SensorHealth),
    Motor(MotorHealth),
}

/// One point-in-time health report produced by the meta-monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    /// In `[0, 1]`.
    pub overall_health: f64,
    pub sensor_health: BTreeMap<String, SensorHealth>,
    pub motor_health: BTreeMap<String, MotorHealth>,
    pub integration_health: f64,
    pub last_update: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthSource {
    /// Taken from the meta-monitor's diagnostics.
    Monitor,
    /// Computed by the manager from registry state alone.
    Fallback,
}

/// System-wide health summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub overall_health: f64,
    pub sensor_online_ratio: f64,
    pub motor_online_ratio: f64,
    pub data_loss_rate: f64,
    pub source: HealthSource,
}
