//! Device-strategy traits implemented by concrete hardware drivers.
//!
//! A driver only talks to its device.  Error counting, quality scoring,
//! constraint checks, calibration bookkeeping and event publication live in
//! the orchestration types ([`Sensor`][crate::sensor::Sensor] and
//! [`Motor`][crate::motor::Motor]), which take the driver as an injected
//! `Box<dyn …>` strategy.  Many device kinds therefore share one
//! orchestration implementation.
//!
//! Hooks take `&self`: the orchestration layer may call
//! [`MotorDriver::emergency_stop_device`] while
//! [`MotorDriver::execute_device_command`] is still in flight, so drivers
//! keep any mutable device state behind their own interior mutability.

use async_trait::async_trait;
use soma_types::{CalibrationData, Command, ComponentOptions, Constraints, SensorValue, SomaError};

/// Hooks a sensor device must provide.
#[async_trait]
pub trait SensorDriver: Send + Sync {
    /// Bring the device up.
    ///
    /// # Errors
    ///
    /// Returns [`SomaError::DeviceError`] when the device cannot be opened.
    async fn initialize_device(&self) -> Result<(), SomaError>;

    /// Release the device.
    async fn shutdown_device(&self) -> Result<(), SomaError>;

    /// Read one raw, uncalibrated value.
    async fn read_raw(&self) -> Result<SensorValue, SomaError>;

    /// Turn a raw value into a calibrated one.
    fn process_value(&self, raw: SensorValue, calibration: &CalibrationData) -> SensorValue {
        calibration.apply(raw)
    }

    /// Run the device's calibration routine and return the new offset/scale.
    /// `last_calibrated` and `valid` are stamped by the caller.
    async fn calibrate_device(&self) -> Result<CalibrationData, SomaError>;

    /// Push configuration to the device.
    async fn apply_config(&self, _options: &ComponentOptions) -> Result<(), SomaError> {
        Ok(())
    }

    /// Cheap liveness check used by health queries.
    async fn probe(&self) -> Result<(), SomaError> {
        Ok(())
    }
}

/// Hooks a motor device must provide.
#[async_trait]
pub trait MotorDriver: Send + Sync {
    async fn initialize_device(&self) -> Result<(), SomaError>;

    async fn shutdown_device(&self) -> Result<(), SomaError>;

    /// Execute an already validated command.
    ///
    /// Returns `Ok(false)` when the device reports that the command did not
    /// complete, and `Err` when the device call itself failed.
    async fn execute_device_command(&self, command: &Command) -> Result<bool, SomaError>;

    /// Halt all motion immediately.
    async fn emergency_stop_device(&self) -> Result<(), SomaError>;

    async fn apply_config(&self, _options: &ComponentOptions) -> Result<(), SomaError> {
        Ok(())
    }

    /// Push a new constraint set to the device's own safety layer.
    async fn apply_constraints(&self, _constraints: &Constraints) -> Result<(), SomaError> {
        Ok(())
    }

    async fn probe(&self) -> Result<(), SomaError> {
        Ok(())
    }
}
