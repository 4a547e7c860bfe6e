//! `soma-kernel` – Self-Monitoring
//!
//! Watches the components the runtime owns, detects integration anomalies
//! and attempts automatic recovery.  It never owns a component.
//!
//! # Modules
//!
//! - [`monitor`] – [`MetaMonitor`][monitor::MetaMonitor]: the periodic
//!   diagnostics loop, error history, recovery and reconnection.
//! - [`detectors`] – pure latency, data-loss and integration-error detectors
//!   over a [`DiagnosticsSnapshot`][soma_types::DiagnosticsSnapshot].
//! - [`history`] – [`BoundedLog`][history::BoundedLog], the drop-oldest
//!   buffer behind every history the monitor keeps.

pub mod detectors;
pub mod history;
pub mod monitor;

pub use history::BoundedLog;
pub use monitor::MetaMonitor;
