//! [`Manager`] – component registry and the processing loop.
//!
//! The manager is the sole owner of every registered [`Sensor`] and
//! [`Motor`].  It:
//!
//! * forwards each component's notifications onto its own [`EventBus`]
//!   (sensor readings land in the perception buffer, sensor faults become
//!   `ErrorRecorded`, motor outcomes become `ActionExecuted` / `ActionFailed`),
//! * buffers readings and queued commands in bounded drop-oldest containers,
//! * runs a processing loop whose every tick executes a perception cycle and
//!   then an action cycle,
//! * reports system health, delegating to an attached [`MetaMonitor`] when
//!   one is available.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use soma_hal::{Sensor, sim::SimSensorDriver};
//! use soma_runtime::Manager;
//! use soma_types::{ComponentDescriptor, SystemConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), soma_types::SomaError> {
//! let manager = Manager::new(SystemConfig::default())?;
//! let sensor = Sensor::new(&ComponentDescriptor::new("imu_0", "imu"), SimSensorDriver::new());
//! manager.register_sensor(Arc::new(sensor)).await?;
//! assert_eq!(manager.sensor_ids(), vec!["imu_0".to_string()]);
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use soma_hal::{Component, Motor, Sensor};
use soma_kernel::MetaMonitor;
use soma_middleware::{EventBus, KindSubscriber};
use soma_types::{
    Command, EventKind, EventPayload, HealthSource, IntegrationError, IntegrationErrorKind,
    Reading, Severity, SomaError, SystemConfig, SystemHealth, TimeoutHandling,
};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::integration::{Goal, Integration};

/// Component name used for errors raised by the manager's own loops.
const MANAGER_COMPONENT: &str = "manager";

// ─────────────────────────────────────────────────────────────────────────────
// Internal types
// ─────────────────────────────────────────────────────────────────────────────

/// A registry entry.  Dropping it stops the event forwarder.
struct Registered<T> {
    id: String,
    component: Arc<T>,
    forwarder: JoinHandle<()>,
}

impl<T> Drop for Registered<T> {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

#[derive(Default)]
struct PerceptionBuffer {
    readings: VecDeque<Reading>,
    since_flush: usize,
}

struct ProcessingTask {
    token: CancellationToken,
    _handle: JoinHandle<()>,
}

struct Inner {
    config: SystemConfig,
    bus: EventBus,
    sensors: Mutex<Vec<Registered<Sensor>>>,
    motors: Mutex<Vec<Registered<Motor>>>,
    perception: Mutex<PerceptionBuffer>,
    actions: Mutex<VecDeque<Command>>,
    monitor: Mutex<Option<MetaMonitor>>,
    integration: Mutex<Option<Arc<dyn Integration>>>,
    goal: Mutex<Option<Goal>>,
    task: Mutex<Option<ProcessingTask>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────────────────

/// Cloneable handle to one manager.  All clones share state.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<Inner>,
}

impl Manager {
    /// Build a manager after validating `config`.
    pub fn new(config: SystemConfig) -> Result<Self, SomaError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                bus: EventBus::named("manager"),
                sensors: Mutex::new(Vec::new()),
                motors: Mutex::new(Vec::new()),
                perception: Mutex::new(PerceptionBuffer::default()),
                actions: Mutex::new(VecDeque::new()),
                monitor: Mutex::new(None),
                integration: Mutex::new(None),
                goal: Mutex::new(None),
                task: Mutex::new(None),
                config,
            }),
        })
    }

    pub fn config(&self) -> &SystemConfig {
        &self.inner.config
    }

    /// The manager's own notification bus.
    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    // -------------------------------------------------------------------------
    // Collaborators
    // -------------------------------------------------------------------------

    /// Attach a meta-monitor.  Every registered component is handed to it,
    /// and it is started right away when processing is running.
    pub fn attach_monitor(&self, monitor: MetaMonitor) {
        for sensor in self.sensors() {
            monitor.register_sensor(&sensor);
        }
        for motor in self.motors() {
            monitor.register_motor(&motor);
        }
        if self.is_running() {
            monitor.start();
        }
        *self.inner.monitor.lock() = Some(monitor);
    }

    pub fn monitor(&self) -> Option<MetaMonitor> {
        self.inner.monitor.lock().clone()
    }

    pub fn set_integration(&self, integration: Arc<dyn Integration>) {
        *self.inner.integration.lock() = Some(integration);
    }

    pub fn set_goal(&self, goal: Option<Goal>) {
        *self.inner.goal.lock() = goal;
    }

    // -------------------------------------------------------------------------
    // Registry
    // -------------------------------------------------------------------------

    /// Initialize `sensor` and add it to the registry.
    ///
    /// A sensor with an already registered id replaces the previous one in
    /// place.  The replaced sensor is left running; shutting it down is up to
    /// the caller.
    ///
    /// # Errors
    ///
    /// Returns the initialization error; nothing is registered in that case.
    pub async fn register_sensor(&self, sensor: Arc<Sensor>) -> Result<(), SomaError> {
        sensor.initialize().await?;

        let id = sensor.id().to_string();
        let subscriber = sensor
            .events()
            .subscribe_kinds(&[EventKind::SensorDataReceived, EventKind::SensorError]);
        let forwarder = tokio::spawn(forward_sensor_events(
            Arc::downgrade(&self.inner),
            subscriber,
        ));
        let entry = Registered {
            id: id.clone(),
            component: Arc::clone(&sensor),
            forwarder,
        };
        if let Some(old) = replace_or_push(&mut self.inner.sensors.lock(), entry) {
            debug!(sensor = %old.id, "replaced registered sensor");
        }

        if let Some(monitor) = self.monitor() {
            monitor.register_sensor(&sensor);
        }
        if self.is_running() {
            sensor.start_sensing();
        }
        info!(sensor = %id, sensor_type = %sensor.component_type(), "sensor registered");
        self.inner.bus.emit(EventPayload::SensorRegistered { id });
        Ok(())
    }

    /// Initialize `motor` and add it to the registry.
    ///
    /// # Errors
    ///
    /// Returns the initialization error; nothing is registered in that case.
    pub async fn register_motor(&self, motor: Arc<Motor>) -> Result<(), SomaError> {
        motor.initialize().await?;

        let id = motor.id().to_string();
        let subscriber = motor
            .events()
            .subscribe_kinds(&[EventKind::CommandComplete, EventKind::CommandFailed]);
        let forwarder = tokio::spawn(forward_motor_events(
            Arc::downgrade(&self.inner),
            subscriber,
        ));
        let entry = Registered {
            id: id.clone(),
            component: Arc::clone(&motor),
            forwarder,
        };
        if let Some(old) = replace_or_push(&mut self.inner.motors.lock(), entry) {
            debug!(motor = %old.id, "replaced registered motor");
        }

        if let Some(monitor) = self.monitor() {
            monitor.register_motor(&motor);
        }
        info!(motor = %id, motor_type = %motor.component_type(), "motor registered");
        self.inner.bus.emit(EventPayload::MotorRegistered { id });
        Ok(())
    }

    /// Shut down and remove the sensor or motor registered as `id`.
    ///
    /// A failing shutdown hook is logged; the component is removed anyway.
    ///
    /// # Errors
    ///
    /// Returns [`SomaError::UnknownComponent`] when nothing is registered
    /// under `id`.
    pub async fn unregister_component(&self, id: &str) -> Result<(), SomaError> {
        let component: Arc<dyn Component> = if let Some(entry) = take_entry(&mut self.inner.sensors.lock(), id) {
            Arc::clone(&entry.component) as Arc<dyn Component>
        } else if let Some(entry) = take_entry(&mut self.inner.motors.lock(), id) {
            Arc::clone(&entry.component) as Arc<dyn Component>
        } else {
            return Err(SomaError::UnknownComponent(id.to_string()));
        };

        if let Err(e) = component.shutdown().await {
            warn!(component = %id, error = %e, "shutdown during unregistration failed");
        }
        if let Some(monitor) = self.monitor() {
            monitor.unregister(id);
        }
        info!(component = %id, "component unregistered");
        self.inner
            .bus
            .emit(EventPayload::ComponentUnregistered { id: id.to_string() });
        Ok(())
    }

    /// Registered sensors in registration order.
    pub fn sensors(&self) -> Vec<Arc<Sensor>> {
        self.inner
            .sensors
            .lock()
            .iter()
            .map(|r| Arc::clone(&r.component))
            .collect()
    }

    /// Registered motors in registration order.
    pub fn motors(&self) -> Vec<Arc<Motor>> {
        self.inner
            .motors
            .lock()
            .iter()
            .map(|r| Arc::clone(&r.component))
            .collect()
    }

    pub fn sensor_ids(&self) -> Vec<String> {
        self.inner.sensors.lock().iter().map(|r| r.id.clone()).collect()
    }

    pub fn motor_ids(&self) -> Vec<String> {
        self.inner.motors.lock().iter().map(|r| r.id.clone()).collect()
    }

    // -------------------------------------------------------------------------
    // Buffers
    // -------------------------------------------------------------------------

    /// Insert a reading into the perception buffer, dropping the oldest when
    /// full.
    ///
    /// Publishes `SensorDataReceived`, and a `PerceptionUpdate` with the
    /// latest batch every `perception_batch_size` insertions.
    pub fn push_reading(&self, reading: Reading) {
        let config = &self.inner.config;
        let batch = {
            let mut buffer = self.inner.perception.lock();
            if buffer.readings.len() >= config.buffer_size {
                buffer.readings.pop_front();
                debug!("perception buffer full, dropped oldest reading");
            }
            buffer.readings.push_back(reading.clone());
            buffer.since_flush += 1;
            if buffer.since_flush >= config.perception_batch_size {
                buffer.since_flush = 0;
                let skip = buffer.readings.len().saturating_sub(config.perception_batch_size);
                Some(buffer.readings.iter().skip(skip).cloned().collect::<Vec<_>>())
            } else {
                None
            }
        };

        self.inner.bus.emit(EventPayload::SensorDataReceived(reading));
        if let Some(batch) = batch {
            self.inner.bus.emit(EventPayload::PerceptionUpdate(batch));
        }
    }

    /// Queue a command for the action cycle, dropping the oldest when full.
    pub fn enqueue_action(&self, command: Command) {
        {
            let mut queue = self.inner.actions.lock();
            if queue.len() >= self.inner.config.buffer_size {
                if let Some(dropped) = queue.pop_front() {
                    debug!(command_id = %dropped.id, "action queue full, dropped oldest command");
                }
            }
            queue.push_back(command.clone());
        }
        self.inner.bus.emit(EventPayload::ActionQueued(command));
    }

    /// Snapshot of the perception buffer, oldest first.
    pub fn buffered_readings(&self) -> Vec<Reading> {
        self.inner.perception.lock().readings.iter().cloned().collect()
    }

    pub fn perception_len(&self) -> usize {
        self.inner.perception.lock().readings.len()
    }

    pub fn action_queue_len(&self) -> usize {
        self.inner.actions.lock().len()
    }

    // -------------------------------------------------------------------------
    // Cycles
    // -------------------------------------------------------------------------

    /// Hand the buffered readings to the integration collaborator.
    ///
    /// Without a collaborator the buffer is left untouched and `0` is
    /// returned.  Otherwise the buffer is drained and, when the integrated
    /// significance exceeds the threshold and a goal is set, generated
    /// commands are queued.  Returns the number of readings processed.
    pub async fn run_perception_cycle(&self) -> Result<usize, SomaError> {
        let Some(integration) = self.inner.integration.lock().clone() else {
            return Ok(0);
        };
        let readings: Vec<Reading> = self.inner.perception.lock().readings.drain(..).collect();
        if readings.is_empty() {
            return Ok(0);
        }

        let timeout = self.device_timeout();
        let perception = tokio::time::timeout(timeout, integration.integrate_perception(&readings))
            .await
            .map_err(|_| self.timeout_error("integration"))??;
        debug!(readings = readings.len(), significance = perception.significance, "perception integrated");

        if perception.significance <= self.inner.config.significance_threshold {
            return Ok(readings.len());
        }
        let Some(goal) = self.inner.goal.lock().clone() else {
            return Ok(readings.len());
        };
        let commands = tokio::time::timeout(timeout, integration.generate_action(&perception.context, &goal))
            .await
            .map_err(|_| self.timeout_error("integration"))??;
        for command in commands {
            self.enqueue_action(command);
        }
        Ok(readings.len())
    }

    /// Dispatch up to `action_batch_size` queued commands in FIFO order.
    ///
    /// Returns the number of commands taken off the queue.  Dispatch failures
    /// are reported and never stop the batch.
    pub async fn run_action_cycle(&self) -> usize {
        let batch: Vec<Command> = {
            let mut queue = self.inner.actions.lock();
            let n = queue.len().min(self.inner.config.action_batch_size);
            queue.drain(..n).collect()
        };
        let taken = batch.len();

        for command in batch {
            let Err(e) = self.dispatch(&command).await else {
                continue;
            };
            warn!(command_id = %command.id, command_type = %command.command_type, error = %e, "action dispatch failed");
            // Motor-side failures already surfaced through the forwarder.
            if matches!(
                e,
                SomaError::NoMotorAvailable(_) | SomaError::Timeout { .. } | SomaError::NotInitialized(_)
            ) {
                self.inner.bus.emit(EventPayload::ActionFailed {
                    command: command.clone(),
                    error: Some(e.to_string()),
                });
            }
            let component = e.component().unwrap_or(MANAGER_COMPONENT).to_string();
            self.report_error(IntegrationErrorKind::DeviceError, Severity::Medium, component, e.to_string());
        }
        taken
    }

    /// Route one command to a motor and execute it.
    ///
    /// The first motor whose type equals the command type is chosen, else the
    /// first enabled motor.  Each attempt is bounded by `timeout_ms`; with
    /// `timeout_handling = retry` a failed attempt is repeated up to
    /// `retry_attempts` times.
    pub async fn dispatch(&self, command: &Command) -> Result<bool, SomaError> {
        let motor = self
            .route(&command.command_type)
            .ok_or_else(|| SomaError::NoMotorAvailable(command.command_type.clone()))?;

        let handling = &self.inner.config.error_handling;
        let attempts = match handling.timeout_handling {
            TimeoutHandling::Retry => handling.retry_attempts.saturating_add(1),
            TimeoutHandling::Fail => 1,
        };
        let timeout = self.device_timeout();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match tokio::time::timeout(timeout, motor.execute_command(command.clone())).await {
                Ok(Ok(done)) => return Ok(done),
                Ok(Err(e)) => e,
                Err(_) => self.timeout_error(motor.id()),
            };
            if attempt >= attempts {
                return Err(err);
            }
            debug!(motor = %motor.id(), attempt, error = %err, "retrying command");
        }
    }

    // -------------------------------------------------------------------------
    // Processing loop
    // -------------------------------------------------------------------------

    /// Start sensing on enabled sensors, start the attached monitor and spawn
    /// the processing loop.  Returns `false` when already running.
    pub fn start(&self) -> bool {
        let mut slot = self.inner.task.lock();
        if slot.is_some() {
            return false;
        }
        let token = CancellationToken::new();
        let handle = tokio::spawn(processing_loop(
            Arc::downgrade(&self.inner),
            token.clone(),
            Duration::from_millis(self.inner.config.update_rate_ms),
        ));
        *slot = Some(ProcessingTask {
            token,
            _handle: handle,
        });
        drop(slot);

        for sensor in self.sensors() {
            if sensor.is_enabled() {
                sensor.start_sensing();
            }
        }
        if let Some(monitor) = self.monitor() {
            monitor.start();
        }
        info!(update_rate_ms = self.inner.config.update_rate_ms, "processing started");
        self.inner.bus.emit(EventPayload::ProcessingStarted);
        true
    }

    /// Stop the loop, every sensor and motor, and the attached monitor.  The
    /// registry is kept.  Returns `false` when not running.
    pub async fn stop(&self) -> bool {
        let Some(task) = self.inner.task.lock().take() else {
            return false;
        };
        task.token.cancel();

        for sensor in self.sensors() {
            sensor.stop_sensing();
        }
        for motor in self.motors() {
            if let Err(e) = motor.stop().await {
                warn!(motor = %motor.id(), error = %e, "motor stop failed");
            }
        }
        if let Some(monitor) = self.monitor() {
            monitor.stop();
        }
        info!("processing stopped");
        self.inner.bus.emit(EventPayload::ProcessingStopped);
        true
    }

    pub fn is_running(&self) -> bool {
        self.inner.task.lock().is_some()
    }

    /// One processing tick: the perception cycle strictly before the action
    /// cycle.
    #[instrument(skip(self), name = "processing_tick")]
    pub async fn tick(&self) {
        if let Err(e) = self.run_perception_cycle().await {
            warn!(error = %e, "perception cycle failed");
            self.report_error(
                IntegrationErrorKind::IntegrationFailure,
                Severity::Medium,
                MANAGER_COMPONENT,
                e.to_string(),
            );
        }
        let dispatched = self.run_action_cycle().await;
        if dispatched > 0 {
            debug!(dispatched, "action cycle complete");
        }
    }

    // -------------------------------------------------------------------------
    // Health
    // -------------------------------------------------------------------------

    /// System health from the monitor's latest diagnostics, or computed from
    /// registry state when no monitor (or no diagnostics yet) is available.
    pub fn system_health(&self) -> SystemHealth {
        if let Some(health) = self.monitor().and_then(|m| m.system_health()) {
            return health;
        }

        let sensors = self.sensors();
        let motors = self.motors();
        let online_sensors = sensors.iter().filter(|s| s.is_enabled()).count();
        let online_motors = motors.iter().filter(|m| m.is_enabled()).count();

        let ratio = |online: usize, total: usize| {
            if total == 0 {
                1.0
            } else {
                online as f64 / total as f64
            }
        };
        let sensor_online_ratio = ratio(online_sensors, sensors.len());
        let motor_online_ratio = ratio(online_motors, motors.len());
        let data_loss_rate = 1.0 - sensor_online_ratio;

        SystemHealth {
            overall_health: (sensor_online_ratio + motor_online_ratio + (1.0 - data_loss_rate)) / 3.0,
            sensor_online_ratio,
            motor_online_ratio,
            data_loss_rate,
            source: HealthSource::Fallback,
        }
    }

    // -------------------------------------------------------------------------
    // Private helpers
    // -------------------------------------------------------------------------

    fn route(&self, command_type: &str) -> Option<Arc<Motor>> {
        let motors = self.inner.motors.lock();
        motors
            .iter()
            .find(|r| r.component.component_type() == command_type)
            .or_else(|| motors.iter().find(|r| r.component.is_enabled()))
            .map(|r| Arc::clone(&r.component))
    }

    fn device_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.config.timeout_ms)
    }

    fn timeout_error(&self, component: &str) -> SomaError {
        SomaError::Timeout {
            component: component.to_string(),
            after_ms: self.inner.config.timeout_ms,
        }
    }

    /// Publish `ErrorRecorded` and hand the record to the attached monitor.
    fn report_error(
        &self,
        kind: IntegrationErrorKind,
        severity: Severity,
        component: impl Into<String>,
        message: impl Into<String>,
    ) {
        let record = IntegrationError::new(kind, severity, component, message);
        if let Some(monitor) = self.monitor() {
            monitor.record_error(record.clone());
        }
        self.inner.bus.emit(EventPayload::ErrorRecorded(record));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Background tasks
// ─────────────────────────────────────────────────────────────────────────────

async fn processing_loop(manager: Weak<Inner>, token: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(inner) = manager.upgrade() else {
            break;
        };
        Manager { inner }.tick().await;
    }
    debug!("processing loop exited");
}

async fn forward_sensor_events(manager: Weak<Inner>, mut events: KindSubscriber) {
    while let Some(event) = events.recv().await {
        let Some(inner) = manager.upgrade() else {
            break;
        };
        let manager = Manager { inner };
        match event.payload {
            EventPayload::SensorDataReceived(reading) => manager.push_reading(reading),
            EventPayload::SensorError { id, error } => {
                manager.inner.bus.emit(EventPayload::SensorError {
                    id: id.clone(),
                    error: error.clone(),
                });
                manager.report_error(IntegrationErrorKind::DeviceError, Severity::Medium, id, error);
            }
            _ => {}
        }
    }
}

async fn forward_motor_events(manager: Weak<Inner>, mut events: KindSubscriber) {
    while let Some(event) = events.recv().await {
        let Some(inner) = manager.upgrade() else {
            break;
        };
        let payload = match event.payload {
            EventPayload::CommandComplete { command, .. } => EventPayload::ActionExecuted(command),
            EventPayload::CommandFailed { command, error, .. } => EventPayload::ActionFailed { command, error },
            _ => continue,
        };
        inner.bus.emit(payload);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry helpers
// ─────────────────────────────────────────────────────────────────────────────

fn replace_or_push<T>(registry: &mut Vec<Registered<T>>, entry: Registered<T>) -> Option<Registered<T>> {
    match registry.iter_mut().find(|r| r.id == entry.id) {
        Some(slot) => Some(std::mem::replace(slot, entry)),
        None => {
            registry.push(entry);
            None
        }
    }
}

fn take_entry<T>(registry: &mut Vec<Registered<T>>, id: &str) -> Option<Registered<T>> {
    let index = registry.iter().position(|r| r.id == id)?;
    Some(registry.remove(index))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::IntegratedPerception;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use soma_hal::sim::{SimMotorDriver, SimSensorDriver};
    use soma_types::{CommandTarget, ComponentDescriptor, Constraints, Quality, SensorValue};

    fn reading(n: f64) -> Reading {
        Reading::new("imu_0", "imu", SensorValue::Scalar(n), Quality::default())
    }

    fn command(command_type: &str, position: f64) -> Command {
        Command::new(
            "test",
            command_type,
            CommandTarget {
                position: Some(position),
                ..CommandTarget::default()
            },
        )
    }

    fn manager_with(config: SystemConfig) -> Manager {
        Manager::new(config).unwrap()
    }

    fn sim_sensor(id: &str) -> Arc<Sensor> {
        Arc::new(Sensor::new(&ComponentDescriptor::new(id, "imu"), SimSensorDriver::new()))
    }

    fn sim_motor(id: &str, motor_type: &str) -> Arc<Motor> {
        Arc::new(Motor::new(
            &ComponentDescriptor::new(id, motor_type).with_safety_limits(Constraints {
                joint_limits: Some((-90.0, 90.0)),
                ..Constraints::default()
            }),
            SimMotorDriver::new(),
        ))
    }

    /// Integration stub: significance is the mean scalar value; every
    /// significant batch yields one servo command.
    struct MeanIntegration;

    #[async_trait]
    impl Integration for MeanIntegration {
        async fn integrate_perception(&self, readings: &[Reading]) -> Result<IntegratedPerception, SomaError> {
            let values: Vec<f64> = readings
                .iter()
                .filter_map(|r| match r.value {
                    SensorValue::Scalar(v) => Some(v),
                    _ => None,
                })
                .collect();
            let mean = values.iter().sum::<f64>() / values.len().max(1) as f64;
            Ok(IntegratedPerception {
                significance: mean,
                context: json!({ "mean": mean }),
            })
        }

        async fn generate_action(&self, context: &Value, _goal: &Goal) -> Result<Vec<Command>, SomaError> {
            let mean = context["mean"].as_f64().unwrap_or_default();
            Ok(vec![command("servo", mean)])
        }
    }

    // ---------------------------------------------------------------- config

    #[test]
    fn invalid_config_is_rejected() {
        let config = SystemConfig {
            update_rate_ms: 0,
            ..SystemConfig::default()
        };
        assert!(matches!(Manager::new(config), Err(SomaError::Config(_))));
    }

    // ---------------------------------------------------------------- registry

    #[tokio::test]
    async fn registration_replaces_in_place() {
        let manager = manager_with(SystemConfig::default());
        manager.register_sensor(sim_sensor("a")).await.unwrap();
        manager.register_sensor(sim_sensor("b")).await.unwrap();
        let first = manager.sensors()[0].clone();

        manager.register_sensor(sim_sensor("a")).await.unwrap();
        assert_eq!(manager.sensor_ids(), vec!["a".to_string(), "b".to_string()]);
        assert!(!Arc::ptr_eq(&first, &manager.sensors()[0]));
        assert!(first.is_enabled(), "replaced sensor is left to the caller");
    }

    #[tokio::test]
    async fn sensor_faults_are_recorded_with_the_monitor() {
        let manager = manager_with(SystemConfig::default());
        let monitor = MetaMonitor::default();
        manager.attach_monitor(monitor.clone());
        let driver = SimSensorDriver::new();
        let controls = driver.controls();
        let sensor = Arc::new(Sensor::new(&ComponentDescriptor::new("imu_0", "imu"), driver));
        manager.register_sensor(Arc::clone(&sensor)).await.unwrap();
        let mut sub = manager
            .events()
            .subscribe_kinds(&[EventKind::SensorError, EventKind::ErrorRecorded]);

        controls.set_failing(true);
        assert!(sensor.read().await.is_err());
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let kinds: Vec<EventKind> = sub.drain().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec![EventKind::SensorError, EventKind::ErrorRecorded]);
        let errors = monitor.error_history();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].component, "imu_0");
        assert_eq!(errors[0].kind, IntegrationErrorKind::DeviceError);
    }

    #[tokio::test]
    async fn failed_initialization_aborts_registration() {
        let manager = manager_with(SystemConfig::default());
        let driver = SimMotorDriver::new();
        driver.controls().set_failing(true);
        let motor = Arc::new(Motor::new(&ComponentDescriptor::new("m", "servo"), driver));

        assert!(manager.register_motor(motor).await.is_err());
        assert!(manager.motor_ids().is_empty());
    }

    #[tokio::test]
    async fn unregister_shuts_down_and_removes() {
        let manager = manager_with(SystemConfig::default());
        let motor = sim_motor("arm", "servo");
        manager.register_motor(Arc::clone(&motor)).await.unwrap();
        let mut sub = manager
            .events()
            .subscribe_kinds(&[EventKind::ComponentUnregistered]);

        manager.unregister_component("arm").await.unwrap();
        assert!(manager.motor_ids().is_empty());
        assert!(!motor.is_enabled());
        assert!(sub.try_recv().is_some());

        assert!(matches!(
            manager.unregister_component("arm").await,
            Err(SomaError::UnknownComponent(_))
        ));
    }

    #[tokio::test]
    async fn sensor_readings_are_forwarded_into_the_buffer() {
        let manager = manager_with(SystemConfig::default());
        let sensor = sim_sensor("imu_0");
        manager.register_sensor(Arc::clone(&sensor)).await.unwrap();

        sensor.read().await.unwrap();
        sensor.read().await.unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(manager.perception_len(), 2);
    }

    // ---------------------------------------------------------------- buffers

    #[test]
    fn overflowing_buffer_keeps_newest_in_order() {
        let manager = manager_with(SystemConfig {
            buffer_size: 5,
            ..SystemConfig::default()
        });
        for i in 0..8 {
            manager.push_reading(reading(f64::from(i)));
        }
        let values: Vec<SensorValue> = manager.buffered_readings().into_iter().map(|r| r.value).collect();
        let expected: Vec<SensorValue> = (3..8).map(|i| SensorValue::Scalar(f64::from(i))).collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn perception_update_every_batch() {
        let manager = manager_with(SystemConfig::default());
        let mut sub = manager.events().subscribe_kinds(&[EventKind::PerceptionUpdate]);
        for i in 0..25 {
            manager.push_reading(reading(f64::from(i)));
        }
        let updates = sub.drain();
        assert_eq!(updates.len(), 2);
        match &updates[1].payload {
            EventPayload::PerceptionUpdate(batch) => {
                assert_eq!(batch.len(), 10);
                assert_eq!(batch[0].value, SensorValue::Scalar(10.0));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn action_queue_drops_oldest() {
        let manager = manager_with(SystemConfig {
            buffer_size: 3,
            ..SystemConfig::default()
        });
        for i in 0..5 {
            manager.enqueue_action(command("servo", f64::from(i)));
        }
        assert_eq!(manager.action_queue_len(), 3);
    }

    // ---------------------------------------------------------------- action cycle

    #[tokio::test]
    async fn action_cycle_dispatches_one_batch() {
        let manager = manager_with(SystemConfig::default());
        manager.register_motor(sim_motor("arm", "servo")).await.unwrap();
        for i in 0..25 {
            manager.enqueue_action(command("servo", f64::from(i)));
        }

        assert_eq!(manager.run_action_cycle().await, 10);
        assert_eq!(manager.action_queue_len(), 15);
    }

    #[tokio::test]
    async fn routing_prefers_matching_type_then_first_enabled() {
        let manager = manager_with(SystemConfig::default());
        let wheel = sim_motor("wheel", "drive");
        let arm = sim_motor("arm", "servo");
        manager.register_motor(Arc::clone(&wheel)).await.unwrap();
        manager.register_motor(Arc::clone(&arm)).await.unwrap();

        let routed = manager.route("servo").unwrap();
        assert!(Arc::ptr_eq(&routed, &arm));
        let fallback = manager.route("gripper").unwrap();
        assert!(Arc::ptr_eq(&fallback, &wheel));
    }

    #[tokio::test]
    async fn no_motor_available_is_reported() {
        let manager = manager_with(SystemConfig::default());
        let mut sub = manager.events().subscribe_kinds(&[EventKind::ActionFailed]);
        manager.enqueue_action(command("servo", 0.0));

        assert_eq!(manager.run_action_cycle().await, 1);
        assert!(matches!(
            manager.dispatch(&command("servo", 0.0)).await,
            Err(SomaError::NoMotorAvailable(_))
        ));
        assert!(sub.try_recv().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_motor_times_out_and_is_retried() {
        let mut config = SystemConfig {
            timeout_ms: 100,
            ..SystemConfig::default()
        };
        config.error_handling.timeout_handling = TimeoutHandling::Retry;
        config.error_handling.retry_attempts = 2;
        let manager = manager_with(config);

        let driver = SimMotorDriver::new();
        let controls = driver.controls();
        controls.set_delay(Duration::from_millis(500));
        let motor = Arc::new(Motor::new(&ComponentDescriptor::new("arm", "servo"), driver));
        manager.register_motor(Arc::clone(&motor)).await.unwrap();

        let result = manager.dispatch(&command("servo", 0.0)).await;
        assert!(matches!(result, Err(SomaError::Timeout { after_ms: 100, .. })));
        assert_eq!(controls.calls(), 3);
        assert!(!motor.is_executing());
    }

    // ---------------------------------------------------------------- perception cycle

    #[tokio::test]
    async fn perception_cycle_without_integration_is_a_no_op() {
        let manager = manager_with(SystemConfig::default());
        manager.push_reading(reading(1.0));
        assert_eq!(manager.run_perception_cycle().await.unwrap(), 0);
        assert_eq!(manager.perception_len(), 1);
    }

    #[tokio::test]
    async fn significant_perception_generates_actions() {
        let manager = manager_with(SystemConfig::default());
        manager.set_integration(Arc::new(MeanIntegration));
        manager.set_goal(Some(Goal::new("reach", "move the arm")));

        manager.push_reading(reading(0.9));
        manager.push_reading(reading(0.9));
        assert_eq!(manager.run_perception_cycle().await.unwrap(), 2);
        assert_eq!(manager.perception_len(), 0);
        assert_eq!(manager.action_queue_len(), 1);

        manager.push_reading(reading(0.7));
        manager.run_perception_cycle().await.unwrap();
        assert_eq!(manager.action_queue_len(), 1, "significance must exceed the threshold");
    }

    #[tokio::test]
    async fn no_actions_without_goal() {
        let manager = manager_with(SystemConfig::default());
        manager.set_integration(Arc::new(MeanIntegration));
        manager.push_reading(reading(0.95));
        manager.run_perception_cycle().await.unwrap();
        assert_eq!(manager.action_queue_len(), 0);
    }

    // ---------------------------------------------------------------- lifecycle

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent_and_stop_keeps_registry() {
        let manager = manager_with(SystemConfig::default());
        let sensor = sim_sensor("imu_0");
        manager.register_sensor(Arc::clone(&sensor)).await.unwrap();
        let mut sub = manager.events().subscribe_kinds(&[EventKind::ProcessingStarted]);

        assert!(manager.start());
        assert!(!manager.start());
        assert_eq!(sub.drain().len(), 1);
        assert!(sensor.is_sensing());

        assert!(manager.stop().await);
        assert!(!manager.stop().await);
        assert!(!sensor.is_sensing());
        assert_eq!(manager.sensor_ids(), vec!["imu_0".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn processing_loop_drives_both_cycles() {
        let manager = manager_with(SystemConfig::default());
        let motor = sim_motor("arm", "servo");
        manager.register_motor(Arc::clone(&motor)).await.unwrap();
        manager.set_integration(Arc::new(MeanIntegration));
        manager.set_goal(Some(Goal::new("reach", "move the arm")));
        manager.push_reading(reading(0.8));

        manager.start();
        tokio::time::sleep(Duration::from_millis(250)).await;
        manager.stop().await;

        assert_eq!(manager.perception_len(), 0);
        assert_eq!(manager.action_queue_len(), 0);
    }

    // ---------------------------------------------------------------- health

    #[tokio::test]
    async fn fallback_health_without_monitor() {
        let manager = manager_with(SystemConfig::default());
        manager.register_sensor(sim_sensor("s1")).await.unwrap();
        manager.register_sensor(sim_sensor("s2")).await.unwrap();
        let broken = sim_motor("m2", "servo");
        manager.register_motor(sim_motor("m1", "servo")).await.unwrap();
        manager.register_motor(Arc::clone(&broken)).await.unwrap();
        broken.shutdown().await.unwrap();

        let health = manager.system_health();
        assert_eq!(health.source, HealthSource::Fallback);
        assert!((health.sensor_online_ratio - 1.0).abs() < f64::EPSILON);
        assert!((health.motor_online_ratio - 0.5).abs() < f64::EPSILON);
        assert!((health.overall_health - (1.0 + 0.5 + 1.0) / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn empty_registry_is_healthy() {
        let manager = manager_with(SystemConfig::default());
        let health = manager.system_health();
        assert!((health.overall_health - 1.0).abs() < f64::EPSILON);
        assert!(health.data_loss_rate.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn monitor_health_is_preferred_once_available() {
        let manager = manager_with(SystemConfig::default());
        let monitor = MetaMonitor::default();
        manager.attach_monitor(monitor.clone());
        assert_eq!(manager.system_health().source, HealthSource::Fallback);

        monitor.run_cycle().await;
        assert_eq!(manager.system_health().source, HealthSource::Monitor);
    }
}
