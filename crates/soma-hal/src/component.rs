//! The capability set every sensor and motor exposes.
//!
//! Lifecycle:
//!
//! ```text
//! Uninitialized ──initialize──▶ Idle ◀──▶ Active ──shutdown──▶ Disabled
//!                                 ▲                              │
//!                                 └────────── initialize ────────┘
//! ```
//!
//! * `initialize` fails without changing state when the device setup hook
//!   fails.
//! * `shutdown` stops any active operation, runs the teardown hook and then
//!   always ends in `Disabled`; a teardown error is still returned.
//! * `configure` is accepted in any state but only reaches the device once the
//!   component is enabled.
//! * `health` never fails; hook failures degrade the report instead.

use async_trait::async_trait;
use soma_middleware::EventBus;
use soma_types::{ComponentHealth, ComponentKind, ComponentOptions, LifecycleState, SomaError};

#[async_trait]
pub trait Component: Send + Sync {
    /// Stable identifier, unique within a registry.
    fn id(&self) -> &str;

    fn kind(&self) -> ComponentKind;

    /// Device type used for command routing, e.g. `"servo"`.
    fn component_type(&self) -> &str;

    fn state(&self) -> LifecycleState;

    fn is_enabled(&self) -> bool {
        self.state().is_enabled()
    }

    async fn initialize(&self) -> Result<(), SomaError>;

    async fn shutdown(&self) -> Result<(), SomaError>;

    async fn configure(&self, options: ComponentOptions) -> Result<(), SomaError>;

    async fn health(&self) -> ComponentHealth;

    /// The component's own notification bus.
    fn events(&self) -> &EventBus;
}
