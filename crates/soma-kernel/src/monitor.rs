//! [`MetaMonitor`] – periodic health diagnostics, anomaly detection and
//! automatic recovery.
//!
//! The monitor holds only [`Weak`] views of the components the manager owns.
//! A component that has been dropped without being unregistered is reported
//! as unreachable rather than kept alive.
//!
//! # Cycle
//!
//! Every `period_ms` the monitor:
//!
//! 1. builds a [`DiagnosticsSnapshot`] (each health query bounded by
//!    `health_timeout_ms`),
//! 2. appends it to the diagnostics history and records performance samples,
//! 3. runs the latency, data-loss and integration-error detectors in that
//!    order,
//! 4. publishes [`EventPayload::IssuesDetected`] and runs
//!    [`attempt_recovery`][MetaMonitor::attempt_recovery] if any detector
//!    fired,
//! 5. publishes [`EventPayload::MonitoringCycle`].
//!
//! Cycles never overlap: the loop awaits each cycle and an atomic busy flag
//! makes a concurrent [`run_cycle`][MetaMonitor::run_cycle] return `None`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use soma_hal::{Component, Motor, Sensor};
use soma_middleware::EventBus;
use soma_types::{
    CalibrationStatus, ComponentOptions, DetectionFlags, DiagnosticsSnapshot, EventPayload,
    HealthSource, HealthStatus, IntegrationError, IntegrationErrorKind, MonitorConfig,
    MotorHealth, SensorHealth, Severity, SomaError, SystemHealth,
};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::detectors;
use crate::history::BoundedLog;

// ────────────────────────────────────────────────────────────────────────────
// Internal types
// ────────────────────────────────────────────────────────────────────────────

struct Watched<T> {
    id: String,
    component: Weak<T>,
    first_seen: Instant,
}

impl<T> Watched<T> {
    fn new(id: &str, component: &Arc<T>) -> Self {
        Self {
            id: id.to_string(),
            component: Arc::downgrade(component),
            first_seen: Instant::now(),
        }
    }
}

struct MonitorTask {
    token: CancellationToken,
    _handle: JoinHandle<()>,
}

/// Clears the busy flag when a cycle ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Target {
    Sensor(Arc<Sensor>),
    Motor(Arc<Motor>),
}

struct Inner {
    config: MonitorConfig,
    bus: EventBus,
    sensors: Mutex<Vec<Watched<Sensor>>>,
    motors: Mutex<Vec<Watched<Motor>>>,
    diagnostics: Mutex<BoundedLog<DiagnosticsSnapshot>>,
    errors: Mutex<BoundedLog<IntegrationError>>,
    metrics: Mutex<HashMap<String, BoundedLog<f64>>>,
    busy: AtomicBool,
    task: Mutex<Option<MonitorTask>>,
}

// ────────────────────────────────────────────────────────────────────────────
// MetaMonitor
// ────────────────────────────────────────────────────────────────────────────

/// Cloneable handle to one meta-monitor.  All clones share state.
#[derive(Clone)]
pub struct MetaMonitor {
    inner: Arc<Inner>,
}

impl Default for MetaMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

impl MetaMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                bus: EventBus::named("meta_monitor"),
                sensors: Mutex::new(Vec::new()),
                motors: Mutex::new(Vec::new()),
                diagnostics: Mutex::new(BoundedLog::new(config.diagnostics_capacity)),
                errors: Mutex::new(BoundedLog::new(config.error_capacity)),
                metrics: Mutex::new(HashMap::new()),
                busy: AtomicBool::new(false),
                task: Mutex::new(None),
                config,
            }),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// The monitor's own notification bus.
    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Watch `sensor`.  Re-registering an id replaces the previous entry.
    pub fn register_sensor(&self, sensor: &Arc<Sensor>) {
        let entry = Watched::new(sensor.id(), sensor);
        let mut sensors = self.inner.sensors.lock();
        match sensors.iter_mut().find(|w| w.id == entry.id) {
            Some(slot) => *slot = entry,
            None => sensors.push(entry),
        }
    }

    /// Watch `motor`.  Re-registering an id replaces the previous entry.
    pub fn register_motor(&self, motor: &Arc<Motor>) {
        let entry = Watched::new(motor.id(), motor);
        let mut motors = self.inner.motors.lock();
        match motors.iter_mut().find(|w| w.id == entry.id) {
            Some(slot) => *slot = entry,
            None => motors.push(entry),
        }
    }

    /// Stop watching `id`.  Returns `false` when it was not watched.
    pub fn unregister(&self, id: &str) -> bool {
        let mut removed = false;
        self.inner.sensors.lock().retain(|w| {
            let keep = w.id != id;
            removed |= !keep;
            keep
        });
        self.inner.motors.lock().retain(|w| {
            let keep = w.id != id;
            removed |= !keep;
            keep
        });
        removed
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Start the periodic monitoring loop.  Returns `false` when it is
    /// already running.
    pub fn start(&self) -> bool {
        let mut slot = self.inner.task.lock();
        if slot.is_some() {
            return false;
        }
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let monitor = self.clone();
        let period = Duration::from_millis(self.inner.config.period_ms.max(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                monitor.run_cycle().await;
            }
            debug!("monitoring loop exited");
        });
        *slot = Some(MonitorTask {
            token,
            _handle: handle,
        });
        drop(slot);

        info!(period_ms = period.as_millis() as u64, "meta-monitor started");
        self.inner.bus.emit(EventPayload::MonitoringStarted);
        true
    }

    /// Stop the monitoring loop.  Returns `false` when it was not running.
    pub fn stop(&self) -> bool {
        let Some(task) = self.inner.task.lock().take() else {
            return false;
        };
        task.token.cancel();
        info!("meta-monitor stopped");
        self.inner.bus.emit(EventPayload::MonitoringStopped);
        true
    }

    pub fn is_running(&self) -> bool {
        self.inner.task.lock().is_some()
    }

    // -------------------------------------------------------------------------
    // Monitoring cycle
    // -------------------------------------------------------------------------

    /// Run one monitoring cycle and return its snapshot.
    ///
    /// Returns `None` without doing anything when another cycle is in
    /// progress.
    #[instrument(skip(self), name = "monitor_cycle")]
    pub async fn run_cycle(&self) -> Option<DiagnosticsSnapshot> {
        let Some(_busy) = BusyGuard::acquire(&self.inner.busy) else {
            debug!("monitoring cycle already in progress, skipping");
            return None;
        };

        let snapshot = self.collect_diagnostics().await;
        self.inner.diagnostics.lock().push(snapshot.clone());
        self.record_metrics(&snapshot);

        let flags = DetectionFlags {
            latency: self.detect_latency_issues(&snapshot),
            data_loss: self.detect_data_loss(&snapshot),
            integration: self.detect_integration_issues(),
        };
        debug!(overall_health = snapshot.overall_health, ?flags, "monitoring cycle complete");

        if flags.any() {
            self.inner.bus.emit(EventPayload::IssuesDetected(flags));
            self.attempt_recovery().await;
        }
        self.inner
            .bus
            .emit(EventPayload::MonitoringCycle(Box::new(snapshot.clone())));
        Some(snapshot)
    }

    /// Query every watched component and assemble a snapshot.
    pub async fn collect_diagnostics(&self) -> DiagnosticsSnapshot {
        let timeout = Duration::from_millis(self.inner.config.health_timeout_ms);

        let mut sensor_health = BTreeMap::new();
        for (id, sensor) in self.live_sensors_by_id() {
            let health = match sensor {
                Some(sensor) => match tokio::time::timeout(timeout, sensor.sensor_health()).await {
                    Ok(health) => health,
                    Err(_) => {
                        warn!(sensor = %id, "sensor health query timed out");
                        SensorHealth::unreachable()
                    }
                },
                None => SensorHealth::unreachable(),
            };
            sensor_health.insert(id, health);
        }

        let mut motor_health = BTreeMap::new();
        for (id, motor) in self.live_motors_by_id() {
            let health = match motor {
                Some(motor) => match tokio::time::timeout(timeout, motor.motor_health()).await {
                    Ok(health) => health,
                    Err(_) => {
                        warn!(motor = %id, "motor health query timed out");
                        MotorHealth::unreachable()
                    }
                },
                None => MotorHealth::unreachable(),
            };
            motor_health.insert(id, health);
        }

        let now = Utc::now();
        let integration_health =
            detectors::integration_health(self.inner.errors.lock().iter(), now, &self.inner.config);

        let sensor_score = mean_or_one(sensor_health.values().map(SensorHealth::score));
        let motor_score = mean_or_one(motor_health.values().map(MotorHealth::score));

        DiagnosticsSnapshot {
            overall_health: (sensor_score + motor_score + integration_health) / 3.0,
            sensor_health,
            motor_health,
            integration_health,
            last_update: now,
        }
    }

    // -------------------------------------------------------------------------
    // Detectors
    // -------------------------------------------------------------------------

    /// Run the latency detector; records at most one error.
    pub fn detect_latency_issues(&self, snapshot: &DiagnosticsSnapshot) -> bool {
        match detectors::detect_latency(snapshot, self.inner.config.latency_threshold_ms) {
            Some(error) => {
                self.record_error(error);
                true
            }
            None => false,
        }
    }

    /// Run the data-loss detector; records one error per flagged sensor.
    pub fn detect_data_loss(&self, snapshot: &DiagnosticsSnapshot) -> bool {
        let errors = detectors::detect_data_loss(snapshot, &self.inner.config);
        let fired = !errors.is_empty();
        for error in errors {
            self.record_error(error);
        }
        fired
    }

    /// Run the integration-error detector over the trailing error window.
    pub fn detect_integration_issues(&self) -> bool {
        let found = detectors::detect_integration_errors(
            self.inner.errors.lock().iter(),
            Utc::now(),
            &self.inner.config,
        );
        match found {
            Some(error) => {
                self.record_error(error);
                true
            }
            None => false,
        }
    }

    /// Append `error` to the bounded error history and publish it.
    pub fn record_error(&self, error: IntegrationError) {
        match error.severity {
            Severity::High => warn!(kind = ?error.kind, component = %error.component, message = %error.message, "integration error"),
            _ => debug!(kind = ?error.kind, component = %error.component, message = %error.message, "integration error"),
        }
        self.inner.errors.lock().push(error.clone());
        self.inner.bus.emit(EventPayload::ErrorRecorded(error));
    }

    // -------------------------------------------------------------------------
    // Recovery
    // -------------------------------------------------------------------------

    /// Adjust data flow and recalibrate sensors whose calibration lapsed.
    pub async fn attempt_recovery(&self) {
        self.inner.bus.emit(EventPayload::AutomaticRecoveryAttempted);
        self.optimize_data_flow().await;
        self.recalibrate_sensors().await;
    }

    async fn optimize_data_flow(&self) {
        let config = &self.inner.config;
        let now = Instant::now();

        for (sensor, first_seen) in self.live_sensors() {
            let elapsed_ms = now.duration_since(first_seen).as_millis().max(1) as f64;
            let error_rate = f64::from(sensor.error_count()) / elapsed_ms;
            let target_hz = if error_rate > config.throttle_error_rate {
                config.throttled_frequency_hz
            } else if error_rate < config.boost_error_rate {
                config.boosted_frequency_hz
            } else {
                continue;
            };
            if (sensor.frequency() - target_hz).abs() < f64::EPSILON {
                continue;
            }
            debug!(sensor = %sensor.id(), error_rate, target_hz, "adjusting sensor frequency");
            if let Err(e) = sensor.configure(ComponentOptions::frequency(target_hz)).await {
                warn!(sensor = %sensor.id(), error = %e, "frequency adjustment failed");
            }
        }

        for (motor, _) in self.live_motors() {
            let queued = motor.queue_len();
            if queued > config.max_motor_queue {
                warn!(motor = %motor.id(), queued, "motor queue overloaded, stopping");
                if let Err(e) = motor.stop().await {
                    warn!(motor = %motor.id(), error = %e, "overload stop failed");
                }
            }
        }
    }

    async fn recalibrate_sensors(&self) {
        let Some(latest) = self.latest_diagnostics() else {
            return;
        };
        for (sensor, _) in self.live_sensors() {
            let needs_calibration = matches!(
                latest.sensor_health.get(sensor.id()).map(|h| h.calibration_status),
                Some(CalibrationStatus::Expired | CalibrationStatus::Invalid)
            );
            if !needs_calibration || !sensor.is_enabled() {
                continue;
            }

            let id = sensor.id().to_string();
            self.inner
                .bus
                .emit(EventPayload::CalibrationStarted { id: id.clone() });
            if sensor.calibrate().await {
                self.inner.bus.emit(EventPayload::CalibrationSucceeded { id });
            } else {
                self.record_error(IntegrationError::new(
                    IntegrationErrorKind::CalibrationFailure,
                    Severity::Medium,
                    id.clone(),
                    "automatic recalibration failed",
                ));
                self.inner.bus.emit(EventPayload::CalibrationFailed { id, error: None });
            }
        }
    }

    /// Cycle a component through shutdown and initialize.
    ///
    /// A sensor that was sensing resumes sensing on success.  Failure is
    /// recorded as a high-severity `connection_lost` error and is not retried.
    ///
    /// # Errors
    ///
    /// * [`SomaError::UnknownComponent`] when `id` is not watched or has been
    ///   dropped.
    /// * [`SomaError::RecoveryFailure`] when re-initialization fails.
    pub async fn attempt_reconnection(&self, id: &str) -> Result<(), SomaError> {
        let target = self
            .find(id)
            .ok_or_else(|| SomaError::UnknownComponent(id.to_string()))?;
        self.inner
            .bus
            .emit(EventPayload::ReconnectionStarted { id: id.to_string() });
        info!(component = %id, "attempting reconnection");

        let (component, resume_sensing): (Arc<dyn Component>, Option<Arc<Sensor>>) = match target {
            Target::Sensor(sensor) => {
                let resume = sensor.is_sensing().then(|| Arc::clone(&sensor));
                (sensor as Arc<dyn Component>, resume)
            }
            Target::Motor(motor) => (motor as Arc<dyn Component>, None),
        };

        if let Err(e) = component.shutdown().await {
            debug!(component = %id, error = %e, "shutdown before reconnection failed");
        }
        tokio::time::sleep(Duration::from_millis(self.inner.config.reconnect_settle_ms)).await;

        match component.initialize().await {
            Ok(()) => {
                if let Some(sensor) = resume_sensing {
                    sensor.start_sensing();
                }
                info!(component = %id, "reconnection succeeded");
                self.inner
                    .bus
                    .emit(EventPayload::ReconnectionSucceeded { id: id.to_string() });
                Ok(())
            }
            Err(e) => {
                self.record_error(IntegrationError::new(
                    IntegrationErrorKind::ConnectionLost,
                    Severity::High,
                    id,
                    format!("reconnection failed: {e}"),
                ));
                self.inner.bus.emit(EventPayload::ReconnectionFailed {
                    id: id.to_string(),
                    error: e.to_string(),
                });
                Err(SomaError::RecoveryFailure {
                    component: id.to_string(),
                    details: e.to_string(),
                })
            }
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn latest_diagnostics(&self) -> Option<DiagnosticsSnapshot> {
        self.inner.diagnostics.lock().latest().cloned()
    }

    /// Oldest first.
    pub fn diagnostics_history(&self) -> Vec<DiagnosticsSnapshot> {
        self.inner.diagnostics.lock().to_vec()
    }

    /// Oldest first.
    pub fn error_history(&self) -> Vec<IntegrationError> {
        self.inner.errors.lock().to_vec()
    }

    /// Samples of one performance series, oldest first.  Series are named
    /// `"<component>.<metric>"` plus `"overall_health"`.
    pub fn metric_samples(&self, series: &str) -> Vec<f64> {
        self.inner
            .metrics
            .lock()
            .get(series)
            .map(BoundedLog::to_vec)
            .unwrap_or_default()
    }

    /// System health derived from the latest snapshot.
    ///
    /// `None` until the first cycle has completed.
    pub fn system_health(&self) -> Option<SystemHealth> {
        let snapshot = self.latest_diagnostics()?;
        let sensors = &snapshot.sensor_health;
        let motors = &snapshot.motor_health;

        let online_ratio = |online: usize, total: usize| {
            if total == 0 {
                1.0
            } else {
                online as f64 / total as f64
            }
        };
        let losses: Vec<f64> = sensors
            .values()
            .filter_map(|h| detectors::data_loss_ratio(h.expected_rate, h.actual_rate, h.reachable))
            .collect();

        Some(SystemHealth {
            overall_health: snapshot.overall_health,
            sensor_online_ratio: online_ratio(
                sensors.values().filter(|h| h.status != HealthStatus::Offline).count(),
                sensors.len(),
            ),
            motor_online_ratio: online_ratio(
                motors.values().filter(|h| h.status != HealthStatus::Offline).count(),
                motors.len(),
            ),
            data_loss_rate: if losses.is_empty() {
                0.0
            } else {
                losses.iter().sum::<f64>() / losses.len() as f64
            },
            source: HealthSource::Monitor,
        })
    }

    // -------------------------------------------------------------------------
    // Private helpers
    // -------------------------------------------------------------------------

    fn record_metrics(&self, snapshot: &DiagnosticsSnapshot) {
        let capacity = self.inner.config.metric_capacity;
        let mut metrics = self.inner.metrics.lock();
        let mut sample = |series: String, value: f64| {
            metrics
                .entry(series)
                .or_insert_with(|| BoundedLog::new(capacity))
                .push(value);
        };
        sample("overall_health".to_string(), snapshot.overall_health);
        for (id, h) in &snapshot.sensor_health {
            sample(format!("{id}.latency_ms"), h.latency_ms as f64);
            sample(format!("{id}.actual_rate"), h.actual_rate);
        }
        for (id, h) in &snapshot.motor_health {
            sample(format!("{id}.response_time_ms"), h.average_response_time_ms);
            sample(format!("{id}.queue_length"), h.queue_length as f64);
        }
    }

    fn live_sensors_by_id(&self) -> Vec<(String, Option<Arc<Sensor>>)> {
        self.inner
            .sensors
            .lock()
            .iter()
            .map(|w| (w.id.clone(), w.component.upgrade()))
            .collect()
    }

    fn live_motors_by_id(&self) -> Vec<(String, Option<Arc<Motor>>)> {
        self.inner
            .motors
            .lock()
            .iter()
            .map(|w| (w.id.clone(), w.component.upgrade()))
            .collect()
    }

    fn live_sensors(&self) -> Vec<(Arc<Sensor>, Instant)> {
        self.inner
            .sensors
            .lock()
            .iter()
            .filter_map(|w| w.component.upgrade().map(|s| (s, w.first_seen)))
            .collect()
    }

    fn live_motors(&self) -> Vec<(Arc<Motor>, Instant)> {
        self.inner
            .motors
            .lock()
            .iter()
            .filter_map(|w| w.component.upgrade().map(|m| (m, w.first_seen)))
            .collect()
    }

    fn find(&self, id: &str) -> Option<Target> {
        let sensor = self
            .inner
            .sensors
            .lock()
            .iter()
            .find(|w| w.id == id)
            .and_then(|w| w.component.upgrade());
        if let Some(sensor) = sensor {
            return Some(Target::Sensor(sensor));
        }
        self.inner
            .motors
            .lock()
            .iter()
            .find(|w| w.id == id)
            .and_then(|w| w.component.upgrade())
            .map(Target::Motor)
    }
}

fn mean_or_one(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 { 1.0 } else { sum / count as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soma_hal::sim::{SimControls, SimMotorDriver, SimSensorDriver};
    use soma_types::{Command, CommandTarget, ComponentDescriptor, EventKind};

    async fn sim_sensor(id: &str) -> (Arc<SimControls>, Arc<Sensor>) {
        let driver = SimSensorDriver::new();
        let controls = driver.controls();
        let sensor = Arc::new(Sensor::new(&ComponentDescriptor::new(id, "imu"), driver));
        sensor.initialize().await.unwrap();
        (controls, sensor)
    }

    async fn sim_motor(id: &str) -> (Arc<SimControls>, Arc<Motor>) {
        let driver = SimMotorDriver::new();
        let controls = driver.controls();
        let motor = Arc::new(Motor::new(&ComponentDescriptor::new(id, "servo"), driver));
        motor.initialize().await.unwrap();
        (controls, motor)
    }

    // ------------------------------------------------------------------ lifecycle

    #[tokio::test(start_paused = true)]
    async fn start_and_stop_are_idempotent() {
        let monitor = MetaMonitor::default();
        let mut sub = monitor
            .events()
            .subscribe_kinds(&[EventKind::MonitoringStarted, EventKind::MonitoringStopped]);

        assert!(monitor.start());
        assert!(!monitor.start());
        assert!(monitor.is_running());
        assert!(monitor.stop());
        assert!(!monitor.stop());

        let kinds: Vec<EventKind> = sub.drain().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec![EventKind::MonitoringStarted, EventKind::MonitoringStopped]);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_produces_one_snapshot_per_period() {
        let monitor = MetaMonitor::default();
        monitor.start();
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        monitor.stop();
        // Ticks at 0, 1000 and 2000 ms.
        assert_eq!(monitor.diagnostics_history().len(), 3);
    }

    #[tokio::test]
    async fn empty_system_is_fully_healthy() {
        let monitor = MetaMonitor::default();
        let snapshot = monitor.run_cycle().await.unwrap();
        assert!((snapshot.overall_health - 1.0).abs() < f64::EPSILON);
        assert_eq!(monitor.system_health().map(|h| h.source), Some(HealthSource::Monitor));
    }

    #[tokio::test]
    async fn diagnostics_history_is_bounded() {
        let monitor = MetaMonitor::new(MonitorConfig {
            diagnostics_capacity: 2,
            ..MonitorConfig::default()
        });
        for _ in 0..3 {
            monitor.run_cycle().await;
        }
        assert_eq!(monitor.diagnostics_history().len(), 2);
        assert_eq!(monitor.metric_samples("overall_health").len(), 3);
    }

    // ------------------------------------------------------------------ detection

    #[tokio::test(start_paused = true)]
    async fn slow_sensor_records_exactly_one_timeout() {
        let monitor = MetaMonitor::default();
        let (controls, sensor) = sim_sensor("imu_0").await;
        monitor.register_sensor(&sensor);

        controls.set_delay(Duration::from_millis(150));
        sensor.read().await.unwrap();

        let snapshot = monitor.run_cycle().await.unwrap();
        assert_eq!(snapshot.sensor_health["imu_0"].latency_ms, 150);

        let timeouts: Vec<_> = monitor
            .error_history()
            .into_iter()
            .filter(|e| e.kind == IntegrationErrorKind::SensorTimeout)
            .collect();
        assert_eq!(timeouts.len(), 1);
        assert_eq!(timeouts[0].component, "imu_0");
    }

    #[tokio::test]
    async fn dropped_sensor_counts_as_unreachable() {
        let monitor = MetaMonitor::default();
        let (_controls, sensor) = sim_sensor("ghost").await;
        monitor.register_sensor(&sensor);
        drop(sensor);

        let snapshot = monitor.run_cycle().await.unwrap();
        assert!(!snapshot.sensor_health["ghost"].reachable);
        let loss: Vec<_> = monitor
            .error_history()
            .into_iter()
            .filter(|e| e.kind == IntegrationErrorKind::DataLoss)
            .collect();
        assert_eq!(loss.len(), 1);
        assert_eq!(loss[0].severity, Severity::High);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_cycles_do_not_overlap() {
        let monitor = MetaMonitor::default();
        let (controls, sensor) = sim_sensor("imu_0").await;
        monitor.register_sensor(&sensor);
        controls.set_delay(Duration::from_millis(50));

        let (first, second) = tokio::join!(monitor.run_cycle(), monitor.run_cycle());
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(monitor.diagnostics_history().len(), 1);
        assert!(monitor.run_cycle().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_health_query_counts_as_unreachable() {
        let monitor = MetaMonitor::default();
        let (controls, sensor) = sim_sensor("imu_0").await;
        monitor.register_sensor(&sensor);
        controls.set_delay(Duration::from_secs(2));

        let snapshot = monitor.collect_diagnostics().await;
        assert_eq!(snapshot.sensor_health["imu_0"], SensorHealth::unreachable());
    }

    #[tokio::test]
    async fn record_error_publishes_and_caps_history() {
        let monitor = MetaMonitor::new(MonitorConfig {
            error_capacity: 3,
            ..MonitorConfig::default()
        });
        let mut sub = monitor.events().subscribe_kinds(&[EventKind::ErrorRecorded]);
        for _ in 0..5 {
            monitor.record_error(IntegrationError::new(
                IntegrationErrorKind::DeviceError,
                Severity::Low,
                "x",
                "boom",
            ));
        }
        assert_eq!(monitor.error_history().len(), 3);
        assert_eq!(sub.drain().len(), 5);
    }

    // ------------------------------------------------------------------ recovery

    #[tokio::test(start_paused = true)]
    async fn error_prone_sensor_is_throttled() {
        let monitor = MetaMonitor::default();
        let (controls, sensor) = sim_sensor("imu_0").await;
        monitor.register_sensor(&sensor);

        controls.set_failing(true);
        for _ in 0..5 {
            let _ = sensor.read().await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        monitor.attempt_recovery().await;
        assert!((sensor.frequency() - 5.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_sensor_is_sped_up() {
        let monitor = MetaMonitor::default();
        let (_controls, sensor) = sim_sensor("imu_0").await;
        monitor.register_sensor(&sensor);
        tokio::time::sleep(Duration::from_secs(1)).await;

        monitor.attempt_recovery().await;
        assert!((sensor.frequency() - 20.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn overloaded_motor_is_stopped() {
        let monitor = MetaMonitor::default();
        let (_controls, motor) = sim_motor("arm").await;
        monitor.register_motor(&motor);
        for _ in 0..11 {
            motor.enqueue(Command::new("t", "servo", CommandTarget::default()));
        }

        monitor.attempt_recovery().await;
        assert_eq!(motor.queue_len(), 0);
    }

    #[tokio::test]
    async fn recovery_recalibrates_uncalibrated_sensors() {
        let monitor = MetaMonitor::default();
        let (_controls, sensor) = sim_sensor("imu_0").await;
        monitor.register_sensor(&sensor);
        let mut sub = monitor.events().subscribe_kinds(&[EventKind::CalibrationSucceeded]);

        monitor.run_cycle().await;
        monitor.attempt_recovery().await;
        assert!(sensor.calibration().valid);
        assert!(sub.try_recv().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reconnection_records_connection_lost() {
        let monitor = MetaMonitor::default();
        let (controls, motor) = sim_motor("arm").await;
        monitor.register_motor(&motor);
        let mut sub = monitor.events().subscribe_kinds(&[EventKind::ReconnectionFailed]);

        controls.set_failing(true);
        let result = monitor.attempt_reconnection("arm").await;
        assert!(matches!(result, Err(SomaError::RecoveryFailure { .. })));

        let errors = monitor.error_history();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, IntegrationErrorKind::ConnectionLost);
        assert_eq!(errors[0].severity, Severity::High);
        assert!(sub.try_recv().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnection_resumes_sensing() {
        let monitor = MetaMonitor::default();
        let (_controls, sensor) = sim_sensor("imu_0").await;
        monitor.register_sensor(&sensor);
        sensor.start_sensing();

        monitor.attempt_reconnection("imu_0").await.unwrap();
        assert!(sensor.is_enabled());
        assert!(sensor.is_sensing());
        sensor.stop_sensing();
    }

    #[tokio::test]
    async fn reconnecting_unknown_component_fails() {
        let monitor = MetaMonitor::default();
        assert!(matches!(
            monitor.attempt_reconnection("nope").await,
            Err(SomaError::UnknownComponent(_))
        ));
    }
}
