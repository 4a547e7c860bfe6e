//! `soma-runtime` – The Orchestrator
//!
//! Owns every registered sensor and motor, buffers what they produce and
//! drives the perception → action processing loop.
//!
//! # Modules
//!
//! - [`manager`] – [`Manager`][manager::Manager]: the component registry,
//!   the bounded perception buffer and action queue, command routing with
//!   timeouts and retries, and the periodic processing loop.  Health is
//!   delegated to an attached [`MetaMonitor`][soma_kernel::MetaMonitor] and
//!   computed from registry state otherwise.
//! - [`integration`] – [`Integration`][integration::Integration]: the
//!   collaborator that turns a batch of readings into significance and
//!   context, and context plus a [`Goal`][integration::Goal] into commands.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to export the processing
//!   and monitoring spans to any OTLP-compatible collector.

pub mod integration;
pub mod manager;
pub mod telemetry;

pub use integration::{Goal, IntegratedPerception, Integration};
pub use manager::Manager;
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
