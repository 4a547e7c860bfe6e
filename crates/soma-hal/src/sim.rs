//! In-process simulated devices for CI/CD testing without physical hardware.
//!
//! [`SimSensorDriver`] produces a slowly drifting scalar signal and
//! [`SimMotorDriver`] records the last commanded target.  Both expose a
//! shared [`SimControls`] handle so tests and the CLI's fault-injection
//! switches can make the device fail, stall or go unreachable at runtime.
//!
//! # Example
//!
//! ```rust
//! use soma_hal::sim::SimMotorDriver;
//!
//! let driver = SimMotorDriver::new();
//! let controls = driver.controls();
//! controls.set_failing(true);
//! assert!(controls.is_failing());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use soma_types::{CalibrationData, Command, CommandTarget, SensorValue, SomaError};

use crate::driver::{MotorDriver, SensorDriver};

// ────────────────────────────────────────────────────────────────────────────
// Fault injection
// ────────────────────────────────────────────────────────────────────────────

/// Runtime switches shared between a simulated driver and its owner.
#[derive(Debug, Default)]
pub struct SimControls {
    failing: AtomicBool,
    unreachable: AtomicBool,
    delay_ms: AtomicU64,
    calls: AtomicU64,
}

impl SimControls {
    /// Make every device operation return a device error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn is_failing(&self) -> bool {
        self.failing.load(Ordering::SeqCst)
    }

    /// Make health probes fail.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Add an artificial delay to every read, command and health probe.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis().min(u128::from(u64::MAX)) as u64, Ordering::SeqCst);
    }

    /// Number of reads or commands the device has served.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn operate(&self, what: &str) -> Result<(), SomaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check(what)
    }

    fn check(&self, what: &str) -> Result<(), SomaError> {
        if self.is_failing() {
            return Err(SomaError::device("sim", format!("simulated {what} failure")));
        }
        Ok(())
    }

    async fn probe(&self) -> Result<(), SomaError> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SomaError::device("sim", "simulated device unreachable"));
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated sensor
// ────────────────────────────────────────────────────────────────────────────

/// A simulated sensor emitting a sawtooth signal in `[0, 1)`.
#[derive(Default)]
pub struct SimSensorDriver {
    controls: Arc<SimControls>,
    phase: Mutex<f64>,
}

impl SimSensorDriver {
    pub fn new() -> Box<Self> {
        Box::new(Self::default())
    }

    pub fn controls(&self) -> Arc<SimControls> {
        Arc::clone(&self.controls)
    }
}

#[async_trait]
impl SensorDriver for SimSensorDriver {
    async fn initialize_device(&self) -> Result<(), SomaError> {
        self.controls.check("initialization")
    }

    async fn shutdown_device(&self) -> Result<(), SomaError> {
        Ok(())
    }

    async fn read_raw(&self) -> Result<SensorValue, SomaError> {
        self.controls.operate("read").await?;
        let mut phase = self.phase.lock();
        *phase = (*phase + 0.05) % 1.0;
        Ok(SensorValue::Scalar(*phase))
    }

    async fn calibrate_device(&self) -> Result<CalibrationData, SomaError> {
        self.controls.check("calibration")?;
        Ok(CalibrationData::default())
    }

    async fn probe(&self) -> Result<(), SomaError> {
        self.controls.probe().await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated motor
// ────────────────────────────────────────────────────────────────────────────

/// A simulated motor that records the most recently executed target.
#[derive(Default)]
pub struct SimMotorDriver {
    controls: Arc<SimControls>,
    last_target: Mutex<Option<CommandTarget>>,
}

impl SimMotorDriver {
    pub fn new() -> Box<Self> {
        Box::new(Self::default())
    }

    pub fn controls(&self) -> Arc<SimControls> {
        Arc::clone(&self.controls)
    }

    pub fn last_target(&self) -> Option<CommandTarget> {
        self.last_target.lock().clone()
    }
}

#[async_trait]
impl MotorDriver for SimMotorDriver {
    async fn initialize_device(&self) -> Result<(), SomaError> {
        self.controls.check("initialization")
    }

    async fn shutdown_device(&self) -> Result<(), SomaError> {
        Ok(())
    }

    async fn execute_device_command(&self, command: &Command) -> Result<bool, SomaError> {
        self.controls.operate("command").await?;
        *self.last_target.lock() = Some(command.target.clone());
        Ok(true)
    }

    async fn emergency_stop_device(&self) -> Result<(), SomaError> {
        Ok(())
    }

    async fn probe(&self) -> Result<(), SomaError> {
        self.controls.probe().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sim_sensor_signal_advances() {
        let driver = SimSensorDriver::new();
        let a = driver.read_raw().await.unwrap();
        let b = driver.read_raw().await.unwrap();
        assert_ne!(a, b);
        assert_eq!(driver.controls().calls(), 2);
    }

    #[tokio::test]
    async fn failing_switch_injects_device_errors() {
        let driver = SimSensorDriver::new();
        driver.controls().set_failing(true);
        assert!(matches!(
            driver.read_raw().await,
            Err(SomaError::DeviceError { .. })
        ));
        assert!(driver.initialize_device().await.is_err());
    }

    #[tokio::test]
    async fn sim_motor_records_target() {
        let driver = SimMotorDriver::new();
        let target = CommandTarget {
            position: Some(0.5),
            ..CommandTarget::default()
        };
        let done = driver
            .execute_device_command(&Command::new("t", "servo", target.clone()))
            .await
            .unwrap();
        assert!(done);
        assert_eq!(driver.last_target(), Some(target));
    }

    #[tokio::test]
    async fn unreachable_switch_fails_probe_only() {
        let driver = SimMotorDriver::new();
        driver.controls().set_unreachable(true);
        assert!(driver.probe().await.is_err());
        assert!(driver.initialize_device().await.is_ok());
    }
}
