//! Startup configuration
//!
//! A single immutable `Config` record is loaded once, validated, and shared by
//! reference. Invalid values are configuration faults: the process does not
//! start.

pub mod types;

pub use types::*;

use crate::core::ConfigError;
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "FEEDSLOT_";

impl Config {
    /// Load configuration from a JSON file and validate it
    ///
    /// Missing sections and fields fall back to their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;

        let cfg: Config =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;

        cfg.validate()?;

        info!(
            path = %path.display(),
            capacity = cfg.slots.capacity,
            reserved = cfg.slots.reserved_for_positions,
            "Configuration loaded"
        );

        Ok(cfg)
    }

    /// Apply `FEEDSLOT_*` overrides from the process environment
    ///
    /// Call before `validate()`; CLI flags are applied after this.
    pub fn apply_env_overrides(&mut self) -> Result<usize, ConfigError> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides read through `lookup`; returns how many were set
    ///
    /// | Variable                                  | Field                           |
    /// |-------------------------------------------|---------------------------------|
    /// | `FEEDSLOT_SLOTS_CAPACITY`                 | `slots.capacity`                |
    /// | `FEEDSLOT_SLOTS_RESERVED_FOR_POSITIONS`   | `slots.reserved_for_positions`  |
    /// | `FEEDSLOT_SCANNERS_AUTO_TRADE`            | `scanners.auto_trade`           |
    /// | `FEEDSLOT_RISK_MAX_DAILY_LOSS`            | `risk.max_daily_loss`           |
    /// | `FEEDSLOT_RISK_MAX_OPEN_ORDERS`           | `risk.max_open_orders`          |
    /// | `FEEDSLOT_GATEWAY_CALL_TIMEOUT_MS`        | `gateway.call_timeout_ms`       |
    /// | `FEEDSLOT_MONITORING_LISTEN_ADDR`         | `monitoring.listen_addr`        |
    /// | `FEEDSLOT_LOG_LEVEL`                      | `logging.level`                 |
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<usize, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = 0;
        let mut take = |var: &'static str| -> Option<(&'static str, String)> {
            debug_assert!(var.starts_with(ENV_PREFIX));
            let value = lookup(var)?;
            applied += 1;
            info!(var, "Config override from environment");
            Some((var, value))
        };

        if let Some(v) = take("FEEDSLOT_SLOTS_CAPACITY") {
            self.slots.capacity = parse_env(v)?;
        }
        if let Some(v) = take("FEEDSLOT_SLOTS_RESERVED_FOR_POSITIONS") {
            self.slots.reserved_for_positions = parse_env(v)?;
        }
        if let Some(v) = take("FEEDSLOT_SCANNERS_AUTO_TRADE") {
            self.scanners.auto_trade = parse_env(v)?;
        }
        if let Some(v) = take("FEEDSLOT_RISK_MAX_DAILY_LOSS") {
            self.risk.max_daily_loss = parse_env::<Decimal>(v)?;
        }
        if let Some(v) = take("FEEDSLOT_RISK_MAX_OPEN_ORDERS") {
            self.risk.max_open_orders = parse_env(v)?;
        }
        if let Some(v) = take("FEEDSLOT_GATEWAY_CALL_TIMEOUT_MS") {
            self.gateway.call_timeout_ms = parse_env(v)?;
        }
        if let Some((_, v)) = take("FEEDSLOT_MONITORING_LISTEN_ADDR") {
            self.monitoring.listen_addr = v;
        }
        if let Some((_, v)) = take("FEEDSLOT_LOG_LEVEL") {
            self.logging.level = v.to_lowercase();
        }

        Ok(applied)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Slot pool
        if self.slots.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }

        if self.slots.reserved_for_positions >= self.slots.capacity {
            return Err(ConfigError::ReservedExceedsCapacity {
                reserved: self.slots.reserved_for_positions,
                capacity: self.slots.capacity,
            });
        }

        // Scanner cadence
        if self.scanners.position_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval {
                name: "position_interval_ms",
            });
        }

        if self.scanners.market_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval {
                name: "market_interval_ms",
            });
        }

        if self.gateway.call_timeout_ms == 0 {
            return Err(ConfigError::ZeroInterval {
                name: "call_timeout_ms",
            });
        }

        if self.monitoring.heartbeat_secs == 0 {
            return Err(ConfigError::ZeroInterval {
                name: "heartbeat_secs",
            });
        }

        if self.scanners.top_score < self.scanners.min_score {
            return Err(ConfigError::ScoreThresholds {
                min: self.scanners.min_score,
                top: self.scanners.top_score,
            });
        }

        if self.breakout.ema_fast >= self.breakout.ema_slow {
            return Err(ConfigError::EmaPeriods {
                fast: self.breakout.ema_fast,
                slow: self.breakout.ema_slow,
            });
        }

        // Risk limits
        if self.risk.max_daily_loss <= Decimal::ZERO {
            return Err(ConfigError::NonPositiveLossLimit);
        }

        if self.risk.max_open_orders == 0 {
            return Err(ConfigError::ZeroOpenOrderLimit);
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }

        Ok(())
    }

    /// Slots available to scanner-driven admissions
    pub fn scanner_capacity(&self) -> usize {
        self.slots.capacity - self.slots.reserved_for_positions
    }
}

fn parse_env<T: FromStr>((var, value): (&'static str, String)) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::EnvOverride { var, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: Vec<(String, String)> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
    }

    #[test]
    fn test_env_overrides_applied() {
        let mut config = Config::default();
        let applied = config
            .apply_overrides_from(env(&[
                ("FEEDSLOT_SLOTS_CAPACITY", "20"),
                ("FEEDSLOT_SLOTS_RESERVED_FOR_POSITIONS", "4"),
                ("FEEDSLOT_RISK_MAX_DAILY_LOSS", "250.50"),
                ("FEEDSLOT_SCANNERS_AUTO_TRADE", "true"),
                ("FEEDSLOT_LOG_LEVEL", "DEBUG"),
                ("UNRELATED", "1"),
            ]))
            .unwrap();

        assert_eq!(applied, 5);
        assert_eq!(config.slots.capacity, 20);
        assert_eq!(config.slots.reserved_for_positions, 4);
        assert_eq!(config.risk.max_daily_loss, dec!(250.50));
        assert!(config.scanners.auto_trade);
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_override_bad_value() {
        let mut config = Config::default();
        let err = config
            .apply_overrides_from(env(&[("FEEDSLOT_RISK_MAX_OPEN_ORDERS", "many")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::EnvOverride {
                var: "FEEDSLOT_RISK_MAX_OPEN_ORDERS",
                value: "many".to_string()
            }
        );
    }

    #[test]
    fn test_env_overrides_still_validated() {
        let mut config = Config::default();
        config
            .apply_overrides_from(env(&[("FEEDSLOT_SLOTS_RESERVED_FOR_POSITIONS", "50")]))
            .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ReservedExceedsCapacity { .. })
        ));
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scanner_capacity(), 45);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        // Reserved buffer must leave room for scanners
        config.slots.reserved_for_positions = config.slots.capacity;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ReservedExceedsCapacity {
                reserved: 50,
                capacity: 50
            })
        );
        config.slots.reserved_for_positions = 5;

        // Zero capacity
        config.slots.capacity = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroCapacity));
        config.slots.capacity = 50;

        // Score thresholds inverted
        config.scanners.top_score = 0.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ScoreThresholds { .. })
        ));
        config.scanners.top_score = 2.5;

        // EMA periods inverted
        config.breakout.ema_fast = 21;
        assert!(matches!(config.validate(), Err(ConfigError::EmaPeriods { .. })));
        config.breakout.ema_fast = 8;

        // Loss limit must be positive
        config.risk.max_daily_loss = dec!(0);
        assert_eq!(config.validate(), Err(ConfigError::NonPositiveLossLimit));
        config.risk.max_daily_loss = dec!(1000);

        // Zero scanner interval
        config.scanners.market_interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroInterval { .. })));
        config.scanners.market_interval_ms = 60_000;

        // Unknown log level
        config.logging.level = "verbose".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidLogLevel(_))));
        config.logging.level = "info".to_string();

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "slots": {{ "capacity": 20, "reserved_for_positions": 4 }},
                "risk": {{ "max_daily_loss": "250.50", "max_open_orders": 3 }}
            }}"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.slots.capacity, 20);
        assert_eq!(config.slots.reserved_for_positions, 4);
        assert_eq!(config.slots.idle_eviction_secs, 600);
        assert_eq!(config.risk.max_daily_loss, dec!(250.50));
        assert_eq!(config.risk.max_open_orders, 3);
        assert_eq!(config.scanners.position_interval_ms, 2_000);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "slots": {{ "capacity": 5, "reserved_for_positions": 5 }} }}"#
        )
        .unwrap();

        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::ReservedExceedsCapacity { .. })
        ));
    }

    #[test]
    fn test_shipped_paper_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../config/paper.json");
        let config = Config::load(path).unwrap();
        assert_eq!(config.gateway.simulated.positions.len(), 2);
        assert!(!config.gateway.simulated.universe.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            Config::load("/nonexistent/feedslot.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
