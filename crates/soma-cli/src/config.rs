//! Configuration file – reads/writes `~/.soma/config.toml`.
//!
//! ```toml
//! health_interval_secs = 5
//!
//! [system]
//! update_rate_ms = 100
//! buffer_size = 1000
//!
//! [system.error_handling]
//! timeout_handling = "retry"
//! retry_attempts = 2
//!
//! [[sensors]]
//! id = "imu_0"
//! type = "imu"
//! frequency = 10.0
//!
//! [[motors]]
//! id = "servo_0"
//! type = "servo"
//! safety_limits = { max_velocity = 90.0, joint_limits = [-90.0, 90.0] }
//! ```
//!
//! A missing `[monitor]` table derives the monitor's thresholds from
//! `[system.error_handling]`.

use serde::{Deserialize, Serialize};
use soma_types::{ComponentDescriptor, Constraints, MonitorConfig, SystemConfig};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted configuration of one `soma` process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Seconds between two health lines on the console.
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,

    #[serde(default)]
    pub system: SystemConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<MonitorConfig>,

    #[serde(default)]
    pub sensors: Vec<ComponentDescriptor>,

    #[serde(default)]
    pub motors: Vec<ComponentDescriptor>,
}

fn default_health_interval() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            health_interval_secs: default_health_interval(),
            system: SystemConfig::default(),
            monitor: None,
            sensors: vec![ComponentDescriptor::new("imu_0", "imu")],
            motors: vec![
                ComponentDescriptor::new("servo_0", "servo").with_safety_limits(Constraints {
                    max_velocity: Some(90.0),
                    max_force: None,
                    joint_limits: Some((-90.0, 90.0)),
                }),
            ],
        }
    }
}

impl Config {
    /// The monitor configuration in effect.
    pub fn monitor_config(&self) -> MonitorConfig {
        self.monitor
            .clone()
            .unwrap_or_else(|| MonitorConfig::from_system(&self.system))
    }

    /// Reject configurations the manager or monitor could not run with.
    pub fn validate(&self) -> Result<(), String> {
        self.system.validate().map_err(|e| e.to_string())?;
        if self.health_interval_secs == 0 {
            return Err("health_interval_secs must be > 0".to_string());
        }
        if self.monitor_config().period_ms == 0 {
            return Err("monitor.period_ms must be > 0".to_string());
        }
        let mut ids: Vec<&str> = self
            .sensors
            .iter()
            .chain(&self.motors)
            .map(|d| d.id.as_str())
            .collect();
        ids.sort_unstable();
        if let Some(pair) = ids.windows(2).find(|w| w[0] == w[1]) {
            return Err(format!("duplicate component id '{}'", pair[0]));
        }
        Ok(())
    }
}

/// Return the path to `~/.soma/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".soma").join("config.toml")
}

/// Load the config from a specific path.  Returns `None` if the file does not
/// exist.  Environment overrides are applied to whatever was read.
pub fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config = toml::from_str(&raw)
        .map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `SOMA_*` environment variable overrides to `cfg`.
///
/// Unparseable values are ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `SOMA_UPDATE_RATE_MS` | `system.update_rate_ms` |
/// | `SOMA_BUFFER_SIZE` | `system.buffer_size` |
/// | `SOMA_TIMEOUT_MS` | `system.timeout_ms` |
/// | `SOMA_LATENCY_THRESHOLD_MS` | `system.error_handling.latency_threshold_ms` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(v) = env_parse("SOMA_UPDATE_RATE_MS") {
        cfg.system.update_rate_ms = v;
    }
    if let Some(v) = env_parse("SOMA_BUFFER_SIZE") {
        cfg.system.buffer_size = v;
    }
    if let Some(v) = env_parse("SOMA_TIMEOUT_MS") {
        cfg.system.timeout_ms = v;
    }
    if let Some(v) = env_parse("SOMA_LATENCY_THRESHOLD_MS") {
        cfg.system.error_handling.latency_threshold_ms = v;
        if let Some(monitor) = cfg.monitor.as_mut() {
            monitor.latency_threshold_ms = v;
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// Save the config, creating the parent directory if necessary.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}
