//! Configuration surface: component descriptors, the system-level manager
//! configuration and the meta-monitor's tuning constants.
//!
//! Every struct deserializes with per-field defaults so a partial TOML table
//! is always valid.

use serde::{Deserialize, Serialize};

use crate::error::SomaError;
use crate::model::Constraints;

// ────────────────────────────────────────────────────────────────────────────
// Component descriptors
// ────────────────────────────────────────────────────────────────────────────

/// Declarative description of one sensor or motor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    pub id: String,
    /// Device type, e.g. `"imu"` or `"servo"`.  Motor commands are routed by
    /// exact match on this field.
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Sampling (sensor) or control (motor) frequency in Hz.
    #[serde(default = "default_frequency")]
    pub frequency: f64,
    #[serde(default)]
    pub precision: Option<f64>,
    #[serde(default)]
    pub range: Option<(f64, f64)>,
    #[serde(default)]
    pub safety_limits: Option<Constraints>,
}

impl ComponentDescriptor {
    pub fn new(id: impl Into<String>, component_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            component_type: component_type.into(),
            enabled: true,
            frequency: default_frequency(),
            precision: None,
            range: None,
            safety_limits: None,
        }
    }

    pub fn with_frequency(mut self, frequency: f64) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn with_safety_limits(mut self, limits: Constraints) -> Self {
        self.safety_limits = Some(limits);
        self
    }

    /// The runtime-configurable subset of this descriptor.
    pub fn options(&self) -> ComponentOptions {
        ComponentOptions {
            frequency: Some(self.frequency),
            precision: self.precision,
            range: self.range,
            safety_limits: self.safety_limits.clone(),
        }
    }
}

/// Options accepted by `Component::configure`.  `None` leaves the current
/// value untouched; `safety_limits` replaces the constraint set wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentOptions {
    pub frequency: Option<f64>,
    pub precision: Option<f64>,
    pub range: Option<(f64, f64)>,
    pub safety_limits: Option<Constraints>,
}

impl ComponentOptions {
    pub fn frequency(hz: f64) -> Self {
        Self {
            frequency: Some(hz),
            ..Self::default()
        }
    }

    /// Merge `other` over `self`; set fields in `other` win.
    pub fn merged(mut self, other: ComponentOptions) -> Self {
        if other.frequency.is_some() {
            self.frequency = other.frequency;
        }
        if other.precision.is_some() {
            self.precision = other.precision;
        }
        if other.range.is_some() {
            self.range = other.range;
        }
        if other.safety_limits.is_some() {
            self.safety_limits = other.safety_limits;
        }
        self
    }
}

// ────────────────────────────────────────────────────────────────────────────
// System configuration
// ────────────────────────────────────────────────────────────────────────────

/// What the manager does when a device call fails or times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutHandling {
    /// Report the failure and move on.
    #[default]
    Fail,
    /// Retry up to `retry_attempts` times before reporting.
    Retry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorHandlingConfig {
    pub retry_attempts: u32,
    pub timeout_handling: TimeoutHandling,
    /// Data-loss ratio above which a sensor is flagged.
    pub data_loss_threshold: f64,
    pub latency_threshold_ms: u64,
}

impl Default for ErrorHandlingConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 0,
            timeout_handling: TimeoutHandling::Fail,
            data_loss_threshold: 0.05,
            latency_threshold_ms: 100,
        }
    }
}

/// Manager-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Processing loop period.
    pub update_rate_ms: u64,
    /// Capacity of both the perception buffer and the action queue.
    pub buffer_size: usize,
    /// Upper bound applied to device calls made by the loops.
    pub timeout_ms: u64,
    /// A `PerceptionUpdate` is published every this many buffered readings.
    pub perception_batch_size: usize,
    /// Maximum commands dispatched per action cycle.
    pub action_batch_size: usize,
    /// Integrated perceptions above this significance trigger action
    /// generation.
    pub significance_threshold: f64,
    pub error_handling: ErrorHandlingConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            update_rate_ms: 100,
            buffer_size: 1000,
            timeout_ms: 5000,
            perception_batch_size: 10,
            action_batch_size: 10,
            significance_threshold: 0.7,
            error_handling: ErrorHandlingConfig::default(),
        }
    }
}

impl SystemConfig {
    /// Reject values that would make a loop spin or a container unusable.
    pub fn validate(&self) -> Result<(), SomaError> {
        if self.update_rate_ms == 0 {
            return Err(SomaError::Config("update_rate_ms must be > 0".into()));
        }
        if self.buffer_size == 0 {
            return Err(SomaError::Config("buffer_size must be > 0".into()));
        }
        if self.timeout_ms == 0 {
            return Err(SomaError::Config("timeout_ms must be > 0".into()));
        }
        if self.perception_batch_size == 0 || self.action_batch_size == 0 {
            return Err(SomaError::Config("batch sizes must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.error_handling.data_loss_threshold) {
            return Err(SomaError::Config(
                "data_loss_threshold must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Meta-monitor configuration
// ────────────────────────────────────────────────────────────────────────────

/// Tuning constants for the meta-monitor's detectors and recovery routines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub period_ms: u64,
    pub latency_threshold_ms: u64,
    pub data_loss_threshold: f64,
    /// Loss ratio above which a data-loss error is `high` severity.
    pub high_data_loss_threshold: f64,
    pub error_window_secs: u64,
    /// More errors than this inside the window flags the integration layer.
    pub max_window_errors: usize,
    /// More critical-kind errors than this inside the window flags the
    /// integration layer.
    pub max_critical_errors: usize,
    /// Errors per millisecond above which a sensor is throttled.
    pub throttle_error_rate: f64,
    /// Errors per millisecond below which a sensor is sped up.
    pub boost_error_rate: f64,
    pub throttled_frequency_hz: f64,
    pub boosted_frequency_hz: f64,
    /// Motors with more pending commands than this are force-stopped.
    pub max_motor_queue: usize,
    pub reconnect_settle_ms: u64,
    pub health_timeout_ms: u64,
    pub calibration_ttl_secs: u64,
    pub diagnostics_capacity: usize,
    pub error_capacity: usize,
    pub metric_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            period_ms: 1000,
            latency_threshold_ms: 100,
            data_loss_threshold: 0.05,
            high_data_loss_threshold: 0.20,
            error_window_secs: 60,
            max_window_errors: 10,
            max_critical_errors: 3,
            throttle_error_rate: 0.01,
            boost_error_rate: 0.001,
            throttled_frequency_hz: 5.0,
            boosted_frequency_hz: 20.0,
            max_motor_queue: 10,
            reconnect_settle_ms: 1000,
            health_timeout_ms: 1000,
            calibration_ttl_secs: 24 * 60 * 60,
            diagnostics_capacity: 100,
            error_capacity: 1000,
            metric_capacity: 100,
        }
    }
}

impl MonitorConfig {
    /// Derive monitor thresholds from the system-level error-handling block.
    pub fn from_system(system: &SystemConfig) -> Self {
        Self {
            latency_threshold_ms: system.error_handling.latency_threshold_ms,
            data_loss_threshold: system.error_handling.data_loss_threshold,
            health_timeout_ms: system.timeout_ms,
            ..Self::default()
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_frequency() -> f64 {
    10.0
}
