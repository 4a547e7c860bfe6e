//! [`Sensor`] – shared orchestration for every sensor device.
//!
//! A `Sensor` owns the bookkeeping every sensor needs (lifecycle, error
//! count, quality scoring, calibration status, rate measurement) and
//! delegates device access to an injected [`SensorDriver`].
//!
//! # Continuous sensing
//!
//! [`Sensor::start_sensing`] spawns a task driven by a
//! [`tokio::time::interval`] ticker at the configured frequency and a
//! [`CancellationToken`].  After a failed read the task backs off for
//! [`backoff_delay`]`(error_count)` before the next attempt.  Cancellation is
//! cooperative: a read already in flight is allowed to finish, but its result
//! is not published once the token has been cancelled.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use soma_hal::{Component, Sensor, sim::SimSensorDriver};
//! use soma_types::ComponentDescriptor;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let sensor = Arc::new(Sensor::new(
//!     &ComponentDescriptor::new("imu_0", "imu"),
//!     SimSensorDriver::new(),
//! ));
//! sensor.initialize().await.unwrap();
//! let reading = sensor.read().await.unwrap();
//! assert_eq!(reading.source_id, "imu_0");
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use soma_middleware::EventBus;
use soma_types::{
    CalibrationData, ComponentDescriptor, ComponentHealth, ComponentKind, ComponentOptions,
    EventPayload, HealthStatus, LifecycleState, Quality, Reading, SensorHealth, SensorValue,
    SomaError,
};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::component::Component;
use crate::driver::SensorDriver;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

const BASE_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF_MS: u64 = 10_000;

/// Window over which the actual data rate is measured.
const RATE_WINDOW: Duration = Duration::from_secs(5);

/// Error rate above which an enabled sensor reports itself degraded.
const DEGRADED_ERROR_RATE: f64 = 0.1;

/// Delay before the next sensing attempt after a failure:
/// `min(1000 * 2^error_count, 10000)` milliseconds.
pub fn backoff_delay(error_count: u32) -> Duration {
    let factor = 2u64.checked_pow(error_count).unwrap_or(u64::MAX);
    Duration::from_millis(BASE_BACKOFF_MS.saturating_mul(factor).min(MAX_BACKOFF_MS))
}

fn period_for(frequency_hz: f64) -> Duration {
    if frequency_hz > 0.0 && frequency_hz.is_finite() {
        Duration::from_secs_f64(1.0 / frequency_hz)
    } else {
        Duration::from_secs(1)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal state
// ─────────────────────────────────────────────────────────────────────────────

struct SensorState {
    lifecycle: LifecycleState,
    options: ComponentOptions,
    calibration: CalibrationData,
    last_reading: Option<Reading>,
    last_read_at: Option<Instant>,
    last_latency_ms: u64,
    error_count: u32,
    read_count: u64,
    recent_reads: VecDeque<Instant>,
    sensing_since: Option<Instant>,
}

impl SensorState {
    fn frequency(&self) -> f64 {
        self.options.frequency.unwrap_or(0.0)
    }

    fn quality_for(&self, value: &SensorValue, latency_ms: u64, now: Instant) -> Quality {
        let mut error_flags = Vec::new();
        if !self.calibration.valid {
            error_flags.push("uncalibrated".to_string());
        }
        if let Some(prev) = self.last_read_at {
            if now.duration_since(prev) > period_for(self.frequency()) * 2 {
                error_flags.push("stale".to_string());
            }
        }
        Quality {
            reliability: Quality::reliability_for(self.error_count),
            latency_ms,
            completeness: if value.is_empty() { 0.0 } else { 1.0 },
            error_flags,
        }
    }

    fn prune_reads(&mut self, now: Instant) {
        while let Some(front) = self.recent_reads.front() {
            if now.duration_since(*front) > RATE_WINDOW {
                self.recent_reads.pop_front();
            } else {
                break;
            }
        }
    }

    fn actual_rate(&mut self, now: Instant) -> f64 {
        self.prune_reads(now);
        match self.sensing_since {
            // Not enough history yet: report the expected rate.
            Some(since) if now.duration_since(since) < RATE_WINDOW => self.frequency(),
            Some(_) => self.recent_reads.len() as f64 / RATE_WINDOW.as_secs_f64(),
            None => 0.0,
        }
    }
}

struct SensingTask {
    token: CancellationToken,
    _handle: JoinHandle<()>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Sensor
// ─────────────────────────────────────────────────────────────────────────────

/// Orchestration wrapper around one sensor device.
pub struct Sensor {
    id: String,
    sensor_type: String,
    driver: Box<dyn SensorDriver>,
    calibration_ttl: chrono::Duration,
    state: Mutex<SensorState>,
    sensing: Mutex<Option<SensingTask>>,
    bus: EventBus,
}

impl Sensor {
    /// Build an uninitialized sensor from its descriptor and device driver.
    pub fn new(descriptor: &ComponentDescriptor, driver: Box<dyn SensorDriver>) -> Self {
        Self {
            id: descriptor.id.clone(),
            sensor_type: descriptor.component_type.clone(),
            driver,
            calibration_ttl: chrono::Duration::hours(24),
            state: Mutex::new(SensorState {
                lifecycle: LifecycleState::Uninitialized,
                options: descriptor.options(),
                calibration: CalibrationData::default(),
                last_reading: None,
                last_read_at: None,
                last_latency_ms: 0,
                error_count: 0,
                read_count: 0,
                recent_reads: VecDeque::new(),
                sensing_since: None,
            }),
            sensing: Mutex::new(None),
            bus: EventBus::named(descriptor.id.clone()),
        }
    }

    /// Calibrations older than `ttl` are reported as expired.
    pub fn with_calibration_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.calibration_ttl = ttl;
        self
    }

    /// Configured sampling frequency in Hz.
    pub fn frequency(&self) -> f64 {
        self.state.lock().frequency()
    }

    pub fn error_count(&self) -> u32 {
        self.state.lock().error_count
    }

    pub fn last_reading(&self) -> Option<Reading> {
        self.state.lock().last_reading.clone()
    }

    pub fn calibration(&self) -> CalibrationData {
        self.state.lock().calibration.clone()
    }

    pub fn is_sensing(&self) -> bool {
        self.sensing.lock().is_some()
    }

    /// Read one value from the device.
    ///
    /// On success the reading is stored as the last reading and published as
    /// [`EventPayload::SensorDataReceived`].
    ///
    /// # Errors
    ///
    /// * [`SomaError::NotInitialized`] when the sensor is not enabled.
    /// * The driver's error when the raw read fails; the error count is
    ///   incremented and [`EventPayload::SensorError`] is published.  No retry
    ///   happens at this layer.
    pub async fn read(&self) -> Result<Reading, SomaError> {
        let result = self.sample().await;
        self.publish_outcome(&result);
        result
    }

    /// Run the device calibration routine.
    ///
    /// Returns `false` (keeping the previous calibration untouched) when the
    /// sensor is disabled or the device routine fails.
    pub async fn calibrate(&self) -> bool {
        if !self.is_enabled() {
            warn!(sensor = %self.id, "calibration skipped: sensor not enabled");
            return false;
        }
        match self.driver.calibrate_device().await {
            Ok(mut data) => {
                data.last_calibrated = Some(Utc::now());
                data.valid = true;
                self.state.lock().calibration = data;
                info!(sensor = %self.id, "sensor calibrated");
                true
            }
            Err(e) => {
                warn!(sensor = %self.id, error = %e, "sensor calibration failed");
                false
            }
        }
    }

    /// Health report for this sensor.  Never fails.
    pub async fn sensor_health(&self) -> SensorHealth {
        let reachable = match self.driver.probe().await {
            Ok(()) => true,
            Err(e) => {
                debug!(sensor = %self.id, error = %e, "sensor probe failed");
                false
            }
        };
        let now = Instant::now();
        let mut st = self.state.lock();
        let attempts = st.read_count + u64::from(st.error_count);
        let error_rate = if attempts == 0 {
            0.0
        } else {
            f64::from(st.error_count) / attempts as f64
        };
        let sensing = st.sensing_since.is_some();
        let status = if !reachable || !st.lifecycle.is_enabled() {
            HealthStatus::Offline
        } else if error_rate > DEGRADED_ERROR_RATE {
            HealthStatus::Degraded
        } else {
            HealthStatus::Online
        };
        SensorHealth {
            status,
            reachable,
            expected_rate: if sensing { st.frequency() } else { 0.0 },
            actual_rate: st.actual_rate(now),
            latency_ms: st.last_latency_ms,
            error_count: st.error_count,
            error_rate,
            calibration_status: st.calibration.status(Utc::now(), self.calibration_ttl),
            sensing,
        }
    }

    // -------------------------------------------------------------------------
    // Continuous sensing
    // -------------------------------------------------------------------------

    /// Start the continuous sensing task.
    ///
    /// Returns `false` without side effects when the sensor is not enabled or
    /// is already sensing.
    pub fn start_sensing(self: &Arc<Self>) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let mut slot = self.sensing.lock();
        if slot.is_some() {
            return false;
        }
        let token = CancellationToken::new();
        let sensor = Arc::clone(self);
        let loop_token = token.clone();
        let handle = tokio::spawn(async move { sensor.sensing_loop(loop_token).await });
        *slot = Some(SensingTask {
            token,
            _handle: handle,
        });

        let mut st = self.state.lock();
        st.sensing_since = Some(Instant::now());
        st.recent_reads.clear();
        if st.lifecycle == LifecycleState::Idle {
            st.lifecycle = LifecycleState::Active;
        }
        info!(sensor = %self.id, frequency = st.frequency(), "sensing started");
        true
    }

    /// Cancel the sensing task.  Returns `false` when it was not running.
    pub fn stop_sensing(&self) -> bool {
        let Some(task) = self.sensing.lock().take() else {
            return false;
        };
        task.token.cancel();

        let mut st = self.state.lock();
        st.sensing_since = None;
        if st.lifecycle == LifecycleState::Active {
            st.lifecycle = LifecycleState::Idle;
        }
        info!(sensor = %self.id, "sensing stopped");
        true
    }

    async fn sensing_loop(self: Arc<Self>, token: CancellationToken) {
        let mut period = period_for(self.frequency());
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // Pick up frequency changes made through `configure`.
            let wanted = period_for(self.frequency());
            if wanted != period {
                period = wanted;
                ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            }

            let result = self.sample().await;
            if token.is_cancelled() {
                break;
            }
            self.publish_outcome(&result);

            if result.is_err() {
                let delay = backoff_delay(self.error_count());
                debug!(sensor = %self.id, delay_ms = delay.as_millis() as u64, "backing off after read failure");
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        debug!(sensor = %self.id, "sensing loop exited");
    }

    // -------------------------------------------------------------------------
    // Private helpers
    // -------------------------------------------------------------------------

    /// Hook call plus bookkeeping, without publishing.
    async fn sample(&self) -> Result<Reading, SomaError> {
        if !self.is_enabled() {
            return Err(SomaError::NotInitialized(self.id.clone()));
        }

        let started = Instant::now();
        let raw = match self.driver.read_raw().await {
            Ok(raw) => raw,
            Err(e) => {
                let count = {
                    let mut st = self.state.lock();
                    st.error_count = st.error_count.saturating_add(1);
                    st.error_count
                };
                warn!(sensor = %self.id, error = %e, error_count = count, "sensor read failed");
                return Err(e);
            }
        };
        let now = Instant::now();
        let latency_ms = now.duration_since(started).as_millis() as u64;

        let calibration = self.state.lock().calibration.clone();
        let value = self.driver.process_value(raw, &calibration);

        let mut st = self.state.lock();
        let quality = st.quality_for(&value, latency_ms, now);
        let mut reading = Reading::new(self.id.clone(), self.sensor_type.clone(), value, quality);
        if calibration.valid {
            reading.calibration = Some(calibration);
        }
        st.read_count += 1;
        st.last_latency_ms = latency_ms;
        st.last_read_at = Some(now);
        st.recent_reads.push_back(now);
        st.prune_reads(now);
        st.last_reading = Some(reading.clone());
        Ok(reading)
    }

    fn publish_outcome(&self, result: &Result<Reading, SomaError>) {
        match result {
            Ok(reading) => {
                self.bus.emit(EventPayload::SensorDataReceived(reading.clone()));
            }
            Err(SomaError::NotInitialized(_)) => {}
            Err(e) => {
                self.bus.emit(EventPayload::SensorError {
                    id: self.id.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
}

#[async_trait]
impl Component for Sensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Sensor
    }

    fn component_type(&self) -> &str {
        &self.sensor_type
    }

    fn state(&self) -> LifecycleState {
        self.state.lock().lifecycle
    }

    async fn initialize(&self) -> Result<(), SomaError> {
        if self.is_enabled() {
            return Ok(());
        }
        if let Err(e) = self.driver.initialize_device().await {
            warn!(sensor = %self.id, error = %e, "sensor initialization failed");
            return Err(e);
        }
        let options = self.state.lock().options.clone();
        if let Err(e) = self.driver.apply_config(&options).await {
            warn!(sensor = %self.id, error = %e, "applying stored configuration failed");
        }
        self.state.lock().lifecycle = LifecycleState::Idle;
        info!(sensor = %self.id, sensor_type = %self.sensor_type, "sensor initialized");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), SomaError> {
        self.stop_sensing();
        let result = self.driver.shutdown_device().await;
        self.state.lock().lifecycle = LifecycleState::Disabled;
        match &result {
            Ok(()) => info!(sensor = %self.id, "sensor shut down"),
            Err(e) => warn!(sensor = %self.id, error = %e, "sensor teardown failed"),
        }
        result
    }

    async fn configure(&self, options: ComponentOptions) -> Result<(), SomaError> {
        let enabled = {
            let mut st = self.state.lock();
            st.options = st.options.clone().merged(options.clone());
            st.lifecycle.is_enabled()
        };
        if enabled {
            self.driver.apply_config(&options).await
        } else {
            debug!(sensor = %self.id, "configuration stored until initialization");
            Ok(())
        }
    }

    async fn health(&self) -> ComponentHealth {
        ComponentHealth::Sensor(self.sensor_health().await)
    }

    fn events(&self) -> &EventBus {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soma_types::{CalibrationStatus, EventKind};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Scriptable in-process sensor device used only for tests.
    #[derive(Default)]
    struct MockDevice {
        fail_init: AtomicBool,
        fail_reads: AtomicBool,
        fail_calibration: AtomicBool,
        fail_teardown: AtomicBool,
        fail_probe: AtomicBool,
        read_delay_ms: AtomicUsize,
        reads: AtomicUsize,
        applied: Mutex<Vec<ComponentOptions>>,
    }

    struct MockDriver(Arc<MockDevice>);

    fn fault(msg: &str) -> SomaError {
        SomaError::device("mock", msg)
    }

    #[async_trait]
    impl SensorDriver for MockDriver {
        async fn initialize_device(&self) -> Result<(), SomaError> {
            if self.0.fail_init.load(Ordering::SeqCst) {
                return Err(fault("init"));
            }
            Ok(())
        }

        async fn shutdown_device(&self) -> Result<(), SomaError> {
            if self.0.fail_teardown.load(Ordering::SeqCst) {
                return Err(fault("teardown"));
            }
            Ok(())
        }

        async fn read_raw(&self) -> Result<SensorValue, SomaError> {
            self.0.reads.fetch_add(1, Ordering::SeqCst);
            let delay = self.0.read_delay_ms.load(Ordering::SeqCst) as u64;
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if self.0.fail_reads.load(Ordering::SeqCst) {
                return Err(fault("read"));
            }
            Ok(SensorValue::Scalar(2.0))
        }

        async fn calibrate_device(&self) -> Result<CalibrationData, SomaError> {
            if self.0.fail_calibration.load(Ordering::SeqCst) {
                return Err(fault("calibrate"));
            }
            Ok(CalibrationData {
                offset: 1.0,
                scale: 10.0,
                ..CalibrationData::default()
            })
        }

        async fn apply_config(&self, options: &ComponentOptions) -> Result<(), SomaError> {
            self.0.applied.lock().push(options.clone());
            Ok(())
        }

        async fn probe(&self) -> Result<(), SomaError> {
            if self.0.fail_probe.load(Ordering::SeqCst) {
                return Err(fault("probe"));
            }
            Ok(())
        }
    }

    fn make_sensor(frequency: f64) -> (Arc<MockDevice>, Arc<Sensor>) {
        let device = Arc::new(MockDevice::default());
        let sensor = Sensor::new(
            &ComponentDescriptor::new("imu_0", "imu").with_frequency(frequency),
            Box::new(MockDriver(Arc::clone(&device))),
        );
        (device, Arc::new(sensor))
    }

    // ------------------------------------------------------------------ lifecycle

    #[tokio::test]
    async fn failed_initialize_stays_uninitialized() {
        let (device, sensor) = make_sensor(10.0);
        device.fail_init.store(true, Ordering::SeqCst);

        assert!(sensor.initialize().await.is_err());
        assert_eq!(sensor.state(), LifecycleState::Uninitialized);
    }

    #[tokio::test]
    async fn read_before_initialize_is_rejected() {
        let (_device, sensor) = make_sensor(10.0);
        assert!(matches!(
            sensor.read().await,
            Err(SomaError::NotInitialized(id)) if id == "imu_0"
        ));
    }

    #[tokio::test]
    async fn shutdown_disables_even_when_teardown_fails() {
        let (device, sensor) = make_sensor(10.0);
        sensor.initialize().await.unwrap();
        device.fail_teardown.store(true, Ordering::SeqCst);

        assert!(sensor.shutdown().await.is_err());
        assert_eq!(sensor.state(), LifecycleState::Disabled);
    }

    #[tokio::test]
    async fn configure_while_disabled_is_applied_on_initialize() {
        let (device, sensor) = make_sensor(10.0);
        sensor.configure(ComponentOptions::frequency(5.0)).await.unwrap();
        assert!(device.applied.lock().is_empty());

        sensor.initialize().await.unwrap();
        let applied = device.applied.lock().clone();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].frequency, Some(5.0));
        assert!((sensor.frequency() - 5.0).abs() < f64::EPSILON);
    }

    // ------------------------------------------------------------------ reads

    #[tokio::test]
    async fn successful_read_is_stored_and_published() {
        let (_device, sensor) = make_sensor(10.0);
        sensor.initialize().await.unwrap();
        let mut sub = sensor.events().subscribe_kinds(&[EventKind::SensorDataReceived]);

        let reading = sensor.read().await.unwrap();
        assert_eq!(reading.value, SensorValue::Scalar(2.0));
        assert_eq!(reading.sensor_type, "imu");
        assert!((reading.quality.reliability - 1.0).abs() < f64::EPSILON);
        assert!(reading.quality.error_flags.contains(&"uncalibrated".to_string()));
        assert_eq!(sensor.last_reading().map(|r| r.id), Some(reading.id));
        assert!(sub.try_recv().is_some());
    }

    #[tokio::test]
    async fn failed_read_counts_error_and_notifies() {
        let (device, sensor) = make_sensor(10.0);
        sensor.initialize().await.unwrap();
        let mut sub = sensor.events().subscribe_kinds(&[EventKind::SensorError]);
        device.fail_reads.store(true, Ordering::SeqCst);

        assert!(sensor.read().await.is_err());
        assert_eq!(sensor.error_count(), 1);
        assert!(sub.try_recv().is_some());

        device.fail_reads.store(false, Ordering::SeqCst);
        let reading = sensor.read().await.unwrap();
        assert!((reading.quality.reliability - 0.99).abs() < 1e-9);
    }

    // ------------------------------------------------------------------ calibration

    #[tokio::test]
    async fn calibration_success_is_applied_to_readings() {
        let (_device, sensor) = make_sensor(10.0);
        sensor.initialize().await.unwrap();

        assert!(sensor.calibrate().await);
        let cal = sensor.calibration();
        assert!(cal.valid);
        assert!(cal.last_calibrated.is_some());

        let reading = sensor.read().await.unwrap();
        assert_eq!(reading.value, SensorValue::Scalar(21.0));
        assert!(reading.calibration.is_some());
    }

    #[tokio::test]
    async fn calibration_failure_keeps_previous_data() {
        let (device, sensor) = make_sensor(10.0);
        sensor.initialize().await.unwrap();
        assert!(sensor.calibrate().await);
        let before = sensor.calibration();

        device.fail_calibration.store(true, Ordering::SeqCst);
        assert!(!sensor.calibrate().await);
        assert_eq!(sensor.calibration(), before);
    }

    // ------------------------------------------------------------------ health

    #[tokio::test]
    async fn probe_failure_degrades_health_instead_of_failing() {
        let (device, sensor) = make_sensor(10.0);
        sensor.initialize().await.unwrap();
        device.fail_probe.store(true, Ordering::SeqCst);

        let health = sensor.sensor_health().await;
        assert!(!health.reachable);
        assert_eq!(health.status, HealthStatus::Offline);
        assert_eq!(health.calibration_status, CalibrationStatus::Invalid);
    }

    #[tokio::test(start_paused = true)]
    async fn read_latency_is_measured() {
        let (device, sensor) = make_sensor(10.0);
        sensor.initialize().await.unwrap();
        device.read_delay_ms.store(150, Ordering::SeqCst);

        let reading = sensor.read().await.unwrap();
        assert_eq!(reading.quality.latency_ms, 150);
        assert_eq!(sensor.sensor_health().await.latency_ms, 150);
    }

    // ------------------------------------------------------------------ sensing loop

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(1), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(3), Duration::from_millis(8_000));
        assert_eq!(backoff_delay(4), Duration::from_millis(10_000));
        assert_eq!(backoff_delay(200), Duration::from_millis(10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn sensing_loop_reads_at_configured_frequency() {
        let (device, sensor) = make_sensor(10.0);
        sensor.initialize().await.unwrap();

        assert!(sensor.start_sensing());
        assert!(!sensor.start_sensing(), "second start must be a no-op");
        assert_eq!(sensor.state(), LifecycleState::Active);

        tokio::time::sleep(Duration::from_millis(950)).await;
        assert_eq!(device.reads.load(Ordering::SeqCst), 10);

        assert!(sensor.stop_sensing());
        assert_eq!(sensor.state(), LifecycleState::Idle);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(device.reads.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn sensing_loop_backs_off_after_failures() {
        let (device, sensor) = make_sensor(10.0);
        sensor.initialize().await.unwrap();
        device.fail_reads.store(true, Ordering::SeqCst);

        sensor.start_sensing();
        // t=0 fails (errors=1) → 2 s backoff; t=2 s fails (errors=2) → 4 s.
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(device.reads.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(device.reads.load(Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_millis(3_000)).await;
        assert_eq!(device.reads.load(Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(device.reads.load(Ordering::SeqCst), 3);
        sensor.stop_sensing();
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_read_is_discarded_after_stop() {
        let (device, sensor) = make_sensor(10.0);
        sensor.initialize().await.unwrap();
        device.read_delay_ms.store(500, Ordering::SeqCst);
        let mut sub = sensor.events().subscribe_kinds(&[EventKind::SensorDataReceived]);

        sensor.start_sensing();
        tokio::time::sleep(Duration::from_millis(100)).await;
        sensor.stop_sensing();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(device.reads.load(Ordering::SeqCst), 1);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn shutdown_stops_sensing() {
        let (_device, sensor) = make_sensor(10.0);
        sensor.initialize().await.unwrap();
        sensor.start_sensing();

        sensor.shutdown().await.unwrap();
        assert!(!sensor.is_sensing());
        assert!(!sensor.start_sensing(), "disabled sensors cannot sense");
    }
}
