//! `soma-cli` – SomaOS Command Line Interface
//!
//! Runs the orchestrator against simulated devices.  It:
//!
//! 1. Loads `~/.soma/config.toml` (or `--config <path>`), writing the default
//!    configuration there on first run.
//! 2. Registers one simulated sensor or motor per enabled descriptor, with
//!    optional fault injection (`--fail <id>`, `--unreachable <id>`).
//! 3. Starts the manager and its meta-monitor and prints a health line every
//!    `health_interval_secs`.
//! 4. Intercepts **Ctrl-C** to stop processing gracefully and exit.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::{ColoredString, Colorize};
use soma_hal::sim::{SimControls, SimMotorDriver, SimSensorDriver};
use soma_hal::{Motor, Sensor};
use soma_kernel::MetaMonitor;
use soma_runtime::{Manager, init_tracing};
use soma_types::{HealthSource, SystemHealth};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "soma", author, version, about)]
struct Cli {
    /// Configuration file (defaults to ~/.soma/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Make the simulated device with this id fail every operation
    #[arg(long = "fail", value_name = "ID")]
    failing: Vec<String>,

    /// Make health probes of the simulated device with this id fail
    #[arg(long = "unreachable", value_name = "ID")]
    unreachable: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    let _telemetry = init_tracing("soma");

    print_banner();

    let cfg = match load_config(cli.config.clone()) {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            std::process::exit(2);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            println!("{}: {}", "Failed to start the async runtime".red(), e);
            std::process::exit(1);
        }
    };

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = CancellationToken::new();
    let shutdown_handle = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – initiating graceful shutdown …".yellow().bold());
        shutdown_handle.cancel();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    if let Err(e) = runtime.block_on(run(cfg, cli, shutdown)) {
        println!("{}: {}", "Error".red(), e);
        std::process::exit(1);
    }
}

/// Resolve, load (or create) and validate the configuration.
fn load_config(explicit: Option<PathBuf>) -> Result<config::Config, String> {
    let path = explicit.clone().unwrap_or_else(config::config_path);
    let cfg = match config::load_from(&path)? {
        Some(cfg) => {
            println!("  Config loaded from {}", path.display().to_string().bold());
            cfg
        }
        None if explicit.is_some() => {
            return Err(format!("no config file at {}", path.display()));
        }
        None => {
            let mut cfg = config::Config::default();
            match config::save_to(&cfg, &path) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    path.display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".yellow(), e),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };
    cfg.validate()?;
    Ok(cfg)
}

async fn run(cfg: config::Config, cli: Cli, shutdown: CancellationToken) -> Result<(), String> {
    let manager = Manager::new(cfg.system.clone()).map_err(|e| e.to_string())?;
    let monitor_cfg = cfg.monitor_config();
    let calibration_ttl = i64::try_from(monitor_cfg.calibration_ttl_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or_else(|| chrono::Duration::weeks(52 * 100));
    manager.attach_monitor(MetaMonitor::new(monitor_cfg));

    let inject = |id: &str, controls: Arc<SimControls>| {
        if cli.failing.iter().any(|f| f == id) {
            controls.set_failing(true);
        }
        if cli.unreachable.iter().any(|u| u == id) {
            controls.set_unreachable(true);
        }
    };

    for descriptor in &cfg.sensors {
        if !descriptor.enabled {
            info!(sensor = %descriptor.id, "sensor disabled in config, skipping");
            continue;
        }
        let driver = SimSensorDriver::new();
        inject(&descriptor.id, driver.controls());
        let sensor = Sensor::new(descriptor, driver).with_calibration_ttl(calibration_ttl);
        if let Err(e) = manager.register_sensor(Arc::new(sensor)).await {
            println!("  {} sensor {}: {}", "✗".red().bold(), descriptor.id.bold(), e);
        }
    }
    for descriptor in &cfg.motors {
        if !descriptor.enabled {
            info!(motor = %descriptor.id, "motor disabled in config, skipping");
            continue;
        }
        let driver = SimMotorDriver::new();
        inject(&descriptor.id, driver.controls());
        if let Err(e) = manager.register_motor(Arc::new(Motor::new(descriptor, driver))).await {
            println!("  {} motor {}: {}", "✗".red().bold(), descriptor.id.bold(), e);
        }
    }

    println!(
        "  {} sensor(s), {} motor(s) registered",
        manager.sensor_ids().len(),
        manager.motor_ids().len()
    );
    println!("  Press {} to stop.\n", "Ctrl-C".bold());

    manager.start();

    let mut ticker = tokio::time::interval(Duration::from_secs(cfg.health_interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                println!("{}", health_line(&manager.system_health(), manager.perception_len(), manager.action_queue_len()));
            }
        }
    }

    manager.stop().await;
    println!("{}", "  ✓ Processing stopped.".green());
    println!("{}", "  ✓ Exiting SomaOS.".green());
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn health_line(health: &SystemHealth, buffered: usize, queued: usize) -> String {
    let source = match health.source {
        HealthSource::Monitor => "monitor",
        HealthSource::Fallback => "registry",
    };
    format!(
        "  health {}  sensors {:>3.0}%  motors {:>3.0}%  loss {:>4.1}%  buffer {}  queue {}  {}",
        colored_score(health.overall_health),
        health.sensor_online_ratio * 100.0,
        health.motor_online_ratio * 100.0,
        health.data_loss_rate * 100.0,
        buffered,
        queued,
        format!("({source})").dimmed()
    )
}

fn colored_score(score: f64) -> ColoredString {
    let text = format!("{score:.2}");
    if score >= 0.8 {
        text.green().bold()
    } else if score >= 0.5 {
        text.yellow().bold()
    } else {
        text.red().bold()
    }
}

fn print_banner() {
    println!();
    println!("{}", r#"   _____ ____  __  ______    ____  _____"#.bold().cyan());
    println!("{}", r#"  / ___// __ \/  |/  /   |  / __ \/ ___/"#.bold().cyan());
    println!("{}", r#"  \__ \/ / / / /|_/ / /| | / / / /\__ \ "#.bold().cyan());
    println!("{}", r#" ___/ / /_/ / /  / / ___ |/ /_/ /___/ / "#.bold().cyan());
    println!("{}", r#"/____/\____/_/  /_/_/  |_|\____//____/  "#.bold().cyan());
    println!();
    println!("  {} {}",
        "SomaOS".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Sensorimotor Embodiment Orchestrator");
    println!();
}
