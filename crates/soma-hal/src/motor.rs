//! [`Motor`] – shared orchestration for every motor device.
//!
//! Every command passes the constraint check before it reaches the
//! [`MotorDriver`].  While the driver hook runs the motor is marked as
//! executing and the command is held as the current command; an
//! [`ExecutingGuard`] clears both on every exit path, including early
//! returns and a dropped future.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use soma_middleware::EventBus;
use soma_types::{
    Command, CommandTarget, ComponentDescriptor, ComponentHealth, ComponentKind, ComponentOptions,
    Constraints, EventPayload, HealthStatus, LifecycleState, MotorHealth, Quality, SafetyStatus,
    SomaError,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::component::Component;
use crate::driver::MotorDriver;

/// Number of response-time samples kept for the moving average.
const RESPONSE_SAMPLES: usize = 100;

// ────────────────────────────────────────────────────────────────────────────
// Constraint validation
// ────────────────────────────────────────────────────────────────────────────

/// Check `target` against `constraints`.
///
/// Returns a human readable description of the first violated limit.
pub fn validate_target(constraints: &Constraints, target: &CommandTarget) -> Result<(), String> {
    if let (Some(max), Some(velocity)) = (constraints.max_velocity, target.velocity) {
        if velocity.abs() > max {
            return Err(format!("velocity {velocity} exceeds limit {max}"));
        }
    }
    if let (Some(max), Some(force)) = (constraints.max_force, target.force) {
        if force.abs() > max {
            return Err(format!("force {force} exceeds limit {max}"));
        }
    }
    if let (Some((min, max)), Some(position)) = (constraints.joint_limits, target.position) {
        if position < min || position > max {
            return Err(format!("position {position} outside joint limits [{min}, {max}]"));
        }
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Internal state
// ────────────────────────────────────────────────────────────────────────────

struct MotorState {
    lifecycle: LifecycleState,
    options: ComponentOptions,
    constraints: Constraints,
    current_command: Option<Command>,
    queue: VecDeque<Command>,
    error_count: u32,
    executions: u64,
    failures: u64,
    response_times_ms: VecDeque<f64>,
}

impl MotorState {
    fn record_response(&mut self, elapsed_ms: f64) {
        if self.response_times_ms.len() == RESPONSE_SAMPLES {
            self.response_times_ms.pop_front();
        }
        self.response_times_ms.push_back(elapsed_ms);
    }

    fn average_response_ms(&self) -> f64 {
        if self.response_times_ms.is_empty() {
            return 0.0;
        }
        self.response_times_ms.iter().sum::<f64>() / self.response_times_ms.len() as f64
    }
}

/// Marks a motor as executing `command` for as long as it is alive.
struct ExecutingGuard<'a> {
    motor: &'a Motor,
}

impl<'a> ExecutingGuard<'a> {
    fn engage(motor: &'a Motor, command: &Command) -> Self {
        {
            let mut st = motor.state.lock();
            st.current_command = Some(command.clone());
            if st.lifecycle == LifecycleState::Idle {
                st.lifecycle = LifecycleState::Active;
            }
        }
        motor.executing.store(true, Ordering::SeqCst);
        Self { motor }
    }
}

impl Drop for ExecutingGuard<'_> {
    fn drop(&mut self) {
        self.motor.executing.store(false, Ordering::SeqCst);
        let mut st = self.motor.state.lock();
        st.current_command = None;
        // A motor disabled mid-command stays disabled.
        if st.lifecycle == LifecycleState::Active {
            st.lifecycle = LifecycleState::Idle;
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Motor
// ────────────────────────────────────────────────────────────────────────────

/// Orchestration wrapper around one motor device.
pub struct Motor {
    id: String,
    motor_type: String,
    driver: Box<dyn MotorDriver>,
    state: Mutex<MotorState>,
    executing: AtomicBool,
    bus: EventBus,
}

impl Motor {
    /// Build an uninitialized motor.  The descriptor's safety limits become
    /// the initial constraint set.
    pub fn new(descriptor: &ComponentDescriptor, driver: Box<dyn MotorDriver>) -> Self {
        Self {
            id: descriptor.id.clone(),
            motor_type: descriptor.component_type.clone(),
            driver,
            state: Mutex::new(MotorState {
                lifecycle: LifecycleState::Uninitialized,
                options: descriptor.options(),
                constraints: descriptor.safety_limits.clone().unwrap_or_default(),
                current_command: None,
                queue: VecDeque::new(),
                error_count: 0,
                executions: 0,
                failures: 0,
                response_times_ms: VecDeque::with_capacity(RESPONSE_SAMPLES),
            }),
            executing: AtomicBool::new(false),
            bus: EventBus::named(descriptor.id.clone()),
        }
    }

    pub fn constraints(&self) -> Constraints {
        self.state.lock().constraints.clone()
    }

    pub fn error_count(&self) -> u32 {
        self.state.lock().error_count
    }

    pub fn safety_status(&self) -> SafetyStatus {
        SafetyStatus::from_error_count(self.error_count())
    }

    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::SeqCst)
    }

    pub fn current_command(&self) -> Option<Command> {
        self.state.lock().current_command.clone()
    }

    /// Number of commands waiting in the pending queue.
    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Validate and execute one command.
    ///
    /// Returns `Ok(true)` when the device completed the command and
    /// `Ok(false)` when the command violated a constraint or the device
    /// reported that it did not complete.
    ///
    /// # Errors
    ///
    /// * [`SomaError::NotInitialized`] when the motor is not enabled.
    /// * The driver's error when the device call fails; the error count is
    ///   incremented.
    pub async fn execute_command(&self, mut command: Command) -> Result<bool, SomaError> {
        let (constraints, reliability) = {
            let st = self.state.lock();
            if !st.lifecycle.is_enabled() {
                return Err(SomaError::NotInitialized(self.id.clone()));
            }
            (st.constraints.clone(), Quality::reliability_for(st.error_count))
        };

        if let Err(reason) = validate_target(&constraints, &command.target) {
            warn!(motor = %self.id, command_id = %command.id, %reason, "command rejected by constraints");
            self.state.lock().failures += 1;
            self.bus.emit(EventPayload::CommandFailed {
                motor_id: self.id.clone(),
                command,
                error: Some(reason),
            });
            return Ok(false);
        }

        command.quality.get_or_insert_with(|| Quality {
            reliability,
            ..Quality::default()
        });

        let _guard = ExecutingGuard::engage(self, &command);
        let started = Instant::now();
        let outcome = self.driver.execute_device_command(&command).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let mut st = self.state.lock();
        st.record_response(elapsed_ms);
        match outcome {
            Ok(true) => {
                st.executions += 1;
                drop(st);
                debug!(motor = %self.id, command_id = %command.id, elapsed_ms, "command complete");
                self.bus.emit(EventPayload::CommandComplete {
                    motor_id: self.id.clone(),
                    command,
                });
                Ok(true)
            }
            Ok(false) => {
                st.failures += 1;
                drop(st);
                warn!(motor = %self.id, command_id = %command.id, "device reported command failure");
                self.bus.emit(EventPayload::CommandFailed {
                    motor_id: self.id.clone(),
                    command,
                    error: None,
                });
                Ok(false)
            }
            Err(e) => {
                st.failures += 1;
                st.error_count = st.error_count.saturating_add(1);
                let count = st.error_count;
                drop(st);
                warn!(motor = %self.id, command_id = %command.id, error = %e, error_count = count, "command execution failed");
                self.bus.emit(EventPayload::CommandFailed {
                    motor_id: self.id.clone(),
                    command,
                    error: Some(e.to_string()),
                });
                Err(e)
            }
        }
    }

    /// Append a command to the pending queue.
    pub fn enqueue(&self, command: Command) {
        self.state.lock().queue.push_back(command);
    }

    /// Execute every queued command in FIFO order.
    ///
    /// Execution errors are logged and do not stop the drain.  Returns the
    /// number of commands that completed.
    pub async fn process_queue(&self) -> usize {
        let mut completed = 0;
        loop {
            let Some(command) = self.state.lock().queue.pop_front() else {
                break;
            };
            match self.execute_command(command).await {
                Ok(true) => completed += 1,
                Ok(false) => {}
                Err(e) => debug!(motor = %self.id, error = %e, "queued command failed"),
            }
        }
        completed
    }

    /// Emergency stop.
    ///
    /// Runs the device's emergency-stop hook and then, whatever its outcome,
    /// clears the executing state and drops every pending command.
    pub async fn stop(&self) -> Result<(), SomaError> {
        let result = self.driver.emergency_stop_device().await;
        self.executing.store(false, Ordering::SeqCst);
        let dropped = {
            let mut st = self.state.lock();
            st.current_command = None;
            let dropped = st.queue.len();
            st.queue.clear();
            dropped
        };
        match &result {
            Ok(()) => info!(motor = %self.id, dropped, "motor stopped"),
            Err(e) => warn!(motor = %self.id, dropped, error = %e, "emergency stop hook failed"),
        }
        result
    }

    /// Health report for this motor.  Never fails.
    pub async fn motor_health(&self) -> MotorHealth {
        let reachable = match self.driver.probe().await {
            Ok(()) => true,
            Err(e) => {
                debug!(motor = %self.id, error = %e, "motor probe failed");
                false
            }
        };
        let st = self.state.lock();
        let attempts = st.executions + st.failures;
        let error_rate = if attempts == 0 {
            0.0
        } else {
            st.failures as f64 / attempts as f64
        };
        let safety_status = SafetyStatus::from_error_count(st.error_count);
        let status = if !reachable || !st.lifecycle.is_enabled() {
            HealthStatus::Offline
        } else if safety_status != SafetyStatus::Safe {
            HealthStatus::Degraded
        } else {
            HealthStatus::Online
        };
        MotorHealth {
            status,
            reachable,
            average_response_time_ms: st.average_response_ms(),
            error_count: st.error_count,
            error_rate,
            safety_status,
            queue_length: st.queue.len(),
            executing: self.is_executing(),
        }
    }
}

#[async_trait]
impl Component for Motor {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Motor
    }

    fn component_type(&self) -> &str {
        &self.motor_type
    }

    fn state(&self) -> LifecycleState {
        self.state.lock().lifecycle
    }

    async fn initialize(&self) -> Result<(), SomaError> {
        if self.is_enabled() {
            return Ok(());
        }
        if let Err(e) = self.driver.initialize_device().await {
            warn!(motor = %self.id, error = %e, "motor initialization failed");
            return Err(e);
        }
        let (options, constraints) = {
            let st = self.state.lock();
            (st.options.clone(), st.constraints.clone())
        };
        if let Err(e) = self.driver.apply_config(&options).await {
            warn!(motor = %self.id, error = %e, "applying stored configuration failed");
        }
        if let Err(e) = self.driver.apply_constraints(&constraints).await {
            warn!(motor = %self.id, error = %e, "applying stored constraints failed");
        }
        self.state.lock().lifecycle = LifecycleState::Idle;
        info!(motor = %self.id, motor_type = %self.motor_type, "motor initialized");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), SomaError> {
        if let Err(e) = self.stop().await {
            debug!(motor = %self.id, error = %e, "stop during shutdown failed");
        }
        let result = self.driver.shutdown_device().await;
        self.state.lock().lifecycle = LifecycleState::Disabled;
        match &result {
            Ok(()) => info!(motor = %self.id, "motor shut down"),
            Err(e) => warn!(motor = %self.id, error = %e, "motor teardown failed"),
        }
        result
    }

    /// Safety limits in `options` replace the whole constraint set.
    async fn configure(&self, options: ComponentOptions) -> Result<(), SomaError> {
        let (enabled, constraints) = {
            let mut st = self.state.lock();
            st.options = st.options.clone().merged(options.clone());
            if let Some(limits) = &options.safety_limits {
                st.constraints = limits.clone();
            }
            (st.lifecycle.is_enabled(), options.safety_limits.clone())
        };
        if !enabled {
            debug!(motor = %self.id, "configuration stored until initialization");
            return Ok(());
        }
        self.driver.apply_config(&options).await?;
        if let Some(constraints) = constraints {
            self.driver.apply_constraints(&constraints).await?;
        }
        Ok(())
    }

    async fn health(&self) -> ComponentHealth {
        ComponentHealth::Motor(self.motor_health().await)
    }

    fn events(&self) -> &EventBus {
        &self.bus
    }
}
