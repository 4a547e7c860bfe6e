//! Pure anomaly detectors over one [`DiagnosticsSnapshot`] or the error
//! history.
//!
//! Detectors never touch components.  They return the
//! [`IntegrationError`]s that the meta-monitor should record; an empty result
//! means the detector did not fire.

use chrono::{DateTime, Utc};
use soma_types::{
    DiagnosticsSnapshot, IntegrationError, IntegrationErrorKind, MonitorConfig, Severity,
};

/// Component name used for errors about the integration layer as a whole.
pub const INTEGRATION_SYSTEM: &str = "integration_system";

const CRITICAL_KINDS: [IntegrationErrorKind; 2] = [
    IntegrationErrorKind::DataLoss,
    IntegrationErrorKind::ConnectionLost,
];

/// Report the first component whose latency exceeds `threshold_ms`.
///
/// Sensors are checked before motors.  A slow sensor yields a
/// `sensor_timeout` error, a slow motor a `processing_delay` error.
pub fn detect_latency(snapshot: &DiagnosticsSnapshot, threshold_ms: u64) -> Option<IntegrationError> {
    let slow_sensor = snapshot
        .sensor_health
        .iter()
        .find(|(_, h)| h.latency_ms > threshold_ms)
        .map(|(id, h)| {
            IntegrationError::new(
                IntegrationErrorKind::SensorTimeout,
                Severity::Medium,
                id.clone(),
                format!("sensor latency {} ms exceeds {} ms", h.latency_ms, threshold_ms),
            )
        });
    if slow_sensor.is_some() {
        return slow_sensor;
    }

    snapshot
        .motor_health
        .iter()
        .find(|(_, h)| h.average_response_time_ms > threshold_ms as f64)
        .map(|(id, h)| {
            IntegrationError::new(
                IntegrationErrorKind::ProcessingDelay,
                Severity::Medium,
                id.clone(),
                format!(
                    "motor response time {:.1} ms exceeds {} ms",
                    h.average_response_time_ms, threshold_ms
                ),
            )
        })
}

/// Fraction of expected samples a sensor failed to deliver.
///
/// `None` for reachable sensors that are not expected to produce data.
pub fn data_loss_ratio(expected_rate: f64, actual_rate: f64, reachable: bool) -> Option<f64> {
    if !reachable {
        return Some(1.0);
    }
    if expected_rate <= 0.0 {
        return None;
    }
    Some(((expected_rate - actual_rate) / expected_rate).clamp(0.0, 1.0))
}

/// One `data_loss` error per sensor whose loss ratio exceeds
/// `config.data_loss_threshold`.
pub fn detect_data_loss(snapshot: &DiagnosticsSnapshot, config: &MonitorConfig) -> Vec<IntegrationError> {
    snapshot
        .sensor_health
        .iter()
        .filter_map(|(id, h)| {
            let loss = data_loss_ratio(h.expected_rate, h.actual_rate, h.reachable)?;
            if loss <= config.data_loss_threshold {
                return None;
            }
            let severity = if loss > config.high_data_loss_threshold {
                Severity::High
            } else {
                Severity::Medium
            };
            Some(IntegrationError::new(
                IntegrationErrorKind::DataLoss,
                severity,
                id.clone(),
                format!("data loss {:.0}%", loss * 100.0),
            ))
        })
        .collect()
}

fn windowed<'a>(
    errors: impl IntoIterator<Item = &'a IntegrationError>,
    now: DateTime<Utc>,
    config: &MonitorConfig,
) -> impl Iterator<Item = &'a IntegrationError> {
    let window = chrono::Duration::seconds(config.error_window_secs as i64);
    errors
        .into_iter()
        .filter(move |e| now.signed_duration_since(e.timestamp) <= window)
}

/// Flag the integration layer when the trailing error window holds too many
/// errors overall or too many critical ones.
pub fn detect_integration_errors<'a>(
    errors: impl IntoIterator<Item = &'a IntegrationError>,
    now: DateTime<Utc>,
    config: &MonitorConfig,
) -> Option<IntegrationError> {
    let (total, critical) = windowed(errors, now, config).fold((0usize, 0usize), |(t, c), e| {
        (t + 1, c + usize::from(CRITICAL_KINDS.contains(&e.kind)))
    });
    if total <= config.max_window_errors && critical <= config.max_critical_errors {
        return None;
    }
    Some(IntegrationError::new(
        IntegrationErrorKind::IntegrationFailure,
        Severity::High,
        INTEGRATION_SYSTEM,
        format!("{total} errors ({critical} critical) in the last {}s", config.error_window_secs),
    ))
}

/// Integration health in `[0, 1]`: `1` with an empty error window, `0` once
/// the window reaches the overall error limit.
pub fn integration_health<'a>(
    errors: impl IntoIterator<Item = &'a IntegrationError>,
    now: DateTime<Utc>,
    config: &MonitorConfig,
) -> f64 {
    let total = windowed(errors, now, config).count();
    let limit = config.max_window_errors.max(1) as f64;
    (1.0 - total as f64 / limit).clamp(0.0, 1.0)
}
