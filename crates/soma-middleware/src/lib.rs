//! `soma-middleware` – The Nervous System
//!
//! Routes notifications between components, the manager and the
//! meta-monitor without caring about their meaning.
//!
//! # Modules
//!
//! - [`bus`] – per-instance, typed publish/subscribe event bus built on Tokio
//!   broadcast channels, with kind-filtered subscribers.

pub mod bus;

pub use bus::{DEFAULT_CAPACITY, EventBus, KindSubscriber};
