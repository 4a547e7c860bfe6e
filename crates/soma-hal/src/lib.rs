//! `soma-hal` – Hardware Abstraction Layer
//!
//! Wraps sensor and motor devices behind one orchestration type per family.
//! Device-specific code lives in drivers; lifecycle, quality scoring,
//! calibration bookkeeping, constraint checks and event publication are
//! shared.
//!
//! # Modules
//!
//! - [`component`] – the [`Component`] capability trait and lifecycle.
//! - [`driver`] – [`SensorDriver`] / [`MotorDriver`] device hooks.
//! - [`sensor`] – [`Sensor`]: reads, calibration and the continuous sensing
//!   task with exponential back-off.
//! - [`motor`] – [`Motor`]: constraint validation, guarded execution,
//!   pending queue and emergency stop.
//! - [`sim`] – simulated drivers for headless runs and tests.

pub mod component;
pub mod driver;
pub mod motor;
pub mod sensor;
pub mod sim;

pub use component::Component;
pub use driver::{MotorDriver, SensorDriver};
pub use motor::{Motor, validate_target};
pub use sensor::{Sensor, backoff_delay};
