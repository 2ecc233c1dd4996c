//! Common utilities for all binaries
//!
//! Shared CLI parsing, configuration loading and the session runner.

use anyhow::{Context, Result};
use clap::Parser;
use feedslot_core::config::Config;
use feedslot_core::gateway::BrokerGateway;
use feedslot_core::monitoring::{MetricsRegistry, MonitoringServer, ServerState};
use feedslot_core::resilience::KillSwitch;
use feedslot_core::scanner::ScannerCoordinator;
use feedslot_core::state::StateSnapshot;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Common CLI arguments for all binaries
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CommonArgs {
    /// JSON configuration file; built-in defaults when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level, overrides the config file
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Do not start the monitoring HTTP server
    #[arg(long)]
    pub no_server: bool,

    /// Place entry orders for admitted SCANNER_TOP signals
    #[arg(long)]
    pub auto_trade: bool,

    /// Write the final state snapshot to this file on exit
    #[arg(long)]
    pub dump_snapshot: Option<PathBuf>,
}

/// Load the config file (or defaults), apply env and CLI overrides, validate
pub fn load_config(args: &CommonArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    // File, then FEEDSLOT_* environment, then CLI flags
    config
        .apply_env_overrides()
        .context("Invalid environment override")?;

    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json = true;
    }
    if args.no_server {
        config.monitoring.enable_server = false;
    }
    if args.auto_trade {
        config.scanners.auto_trade = true;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Initialize tracing/logging from the effective config
pub fn init_logging(config: &Config) -> Result<()> {
    feedslot_core::utils::init_logger(&config.logging.level, config.logging.json)
        .context("Failed to initialize logging")
}

/// Run one session against `gateway` until Ctrl+C or a fatal fault
pub async fn run_session<G: BrokerGateway>(
    config: Config,
    gateway: G,
    dump_snapshot: Option<&Path>,
) -> Result<()> {
    let kill_switch = KillSwitch::new();

    let kill_switch_ctrlc = kill_switch.clone();
    ctrlc::set_handler(move || {
        warn!("Received Ctrl+C, initiating graceful shutdown...");
        kill_switch_ctrlc.shutdown("User requested shutdown (Ctrl+C)");
    })?;

    let metrics = MetricsRegistry::new().context("Failed to create metrics registry")?;
    let coordinator = ScannerCoordinator::new(
        config.clone(),
        Arc::new(gateway),
        metrics.clone(),
        kill_switch.clone(),
    );

    info!(
        capacity = config.slots.capacity,
        reserved = config.slots.reserved_for_positions,
        position_interval_ms = config.scanners.position_interval_ms,
        market_interval_ms = config.scanners.market_interval_ms,
        auto_trade = config.scanners.auto_trade,
        "Session configuration"
    );

    if config.monitoring.enable_server {
        let server = MonitoringServer::new(
            &config.monitoring.listen_addr,
            ServerState {
                metrics,
                bus: coordinator.bus().clone(),
                risk: coordinator.context().risk.clone(),
                kill_switch: kill_switch.clone(),
            },
        )?;
        tokio::spawn(async move {
            if let Err(e) = server.serve().await {
                error!("Monitoring server failed: {:#}", e);
            }
        });
    }

    let result = coordinator.run().await;

    let snapshot = coordinator.bus().snapshot();
    print_summary(&snapshot);
    if let Some(path) = dump_snapshot {
        write_snapshot(&snapshot, path)?;
        info!("Final snapshot written to {}", path.display());
    }

    result.context("Session aborted")
}

/// Serialize a snapshot as pretty JSON
pub fn write_snapshot(snapshot: &StateSnapshot, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot).context("Failed to serialize snapshot")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

/// Print final statistics
pub fn print_summary(snapshot: &StateSnapshot) {
    info!("=== Final Session State ===");
    info!("Positions: {}", snapshot.positions.len());
    info!("Signals in last scan: {}", snapshot.signals.len());
    info!("Orders seen: {}", snapshot.orders.len());
    info!("Open orders: {}", snapshot.risk.open_order_count);
    info!("Daily PnL: {}", snapshot.risk.daily_pnl);
    if let Some(reason) = &snapshot.risk.trip_reason {
        warn!("Circuit breaker was tripped: {}", reason);
    }
    info!("Alerts raised: {}", snapshot.alerts.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(extra: &[&str]) -> CommonArgs {
        let mut argv = vec!["feedslot"];
        argv.extend_from_slice(extra);
        CommonArgs::parse_from(argv)
    }

    #[test]
    fn test_defaults_without_config_file() {
        let config = load_config(&args(&[])).unwrap();
        assert_eq!(config.slots.capacity, 50);
        assert!(!config.scanners.auto_trade);
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"slots": {{"capacity": 20, "reserved_for_positions": 4}}, "logging": {{"level": "warn"}}}}"#).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = load_config(&args(&["--config", &path, "--log-level", "debug", "--auto-trade", "--no-server"])).unwrap();
        assert_eq!(config.slots.capacity, 20);
        assert_eq!(config.logging.level, "debug");
        assert!(config.scanners.auto_trade);
        assert!(!config.monitoring.enable_server);
    }

    #[test]
    fn test_invalid_override_rejected() {
        assert!(load_config(&args(&["--log-level", "loud"])).is_err());
    }

    #[test]
    fn test_write_snapshot_is_json() {
        let bus = feedslot_core::state::StateBus::new(&Config::default());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");

        write_snapshot(&bus.snapshot(), &path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["slots"]["capacity"], 50);
    }
}
