//! The perception-integration collaborator the [`Manager`][crate::Manager]
//! consults on every processing tick.
//!
//! The manager hands each drained batch of readings to
//! [`Integration::integrate_perception`].  When the resulting significance
//! exceeds the configured threshold and a [`Goal`] is set, it asks
//! [`Integration::generate_action`] for commands and queues them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use soma_types::{Command, Reading, SomaError};

/// What the system is currently trying to achieve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
}

impl Goal {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            parameters: Value::Null,
        }
    }
}

/// Result of integrating one batch of readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegratedPerception {
    /// How much the batch matters, in `[0, 1]`.
    pub significance: f64,
    /// Free-form context handed back to [`Integration::generate_action`].
    pub context: Value,
}

#[async_trait]
pub trait Integration: Send + Sync {
    async fn integrate_perception(&self, readings: &[Reading]) -> Result<IntegratedPerception, SomaError>;

    async fn generate_action(&self, context: &Value, goal: &Goal) -> Result<Vec<Command>, SomaError>;
}
