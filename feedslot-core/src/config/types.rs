use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
///
/// Injected once at startup and shared read-only (`Arc<Config>`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub slots: SlotConfig,
    #[serde(default)]
    pub scanners: ScannerConfig,
    #[serde(default)]
    pub breakout: BreakoutConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Slot pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotConfig {
    /// Concurrent feeds the venue allows
    pub capacity: usize,

    /// Slots only POSITION-tier requests may take
    pub reserved_for_positions: usize,

    /// Release scanner subscriptions with no tick for this long
    pub idle_eviction_secs: u64,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            reserved_for_positions: 5,
            idle_eviction_secs: 600,
        }
    }
}

impl SlotConfig {
    pub fn idle_eviction(&self) -> Duration {
        Duration::from_secs(self.idle_eviction_secs)
    }
}

/// Scanner loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Position scanner period
    pub position_interval_ms: u64,

    /// Market scanner period
    pub market_interval_ms: u64,

    /// Signals below this score do not request a slot
    pub min_score: f64,

    /// Signals at or above this score get SCANNER_TOP
    pub top_score: f64,

    /// Tick age after which live prices are not trusted
    pub stale_threshold_secs: u64,

    /// Upper bound on candidates per scanner query
    pub max_candidates: usize,

    /// Historical bars fetched per candidate
    pub bar_count: usize,

    /// Ticks retained per symbol for EMA computation
    pub tick_history: usize,

    /// Place orders for admitted SCANNER_TOP signals
    pub auto_trade: bool,

    /// Quantity used by auto-trade orders
    pub order_quantity: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            position_interval_ms: 2_000,
            market_interval_ms: 60_000,
            min_score: 1.0,
            top_score: 2.5,
            stale_threshold_secs: 60,
            max_candidates: 50,
            bar_count: 60,
            tick_history: 600,
            auto_trade: false,
            order_quantity: 1,
        }
    }
}

impl ScannerConfig {
    pub fn position_interval(&self) -> Duration {
        Duration::from_millis(self.position_interval_ms)
    }

    pub fn market_interval(&self) -> Duration {
        Duration::from_millis(self.market_interval_ms)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }
}

/// Breakout evaluation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakoutConfig {
    /// ATR multiplier for the breakout threshold
    pub k_atr: f64,

    /// Volume multiplier for surge detection
    pub v_mult: f64,

    /// Completed bars used for the prior high/low
    pub lookback: usize,

    pub ema_fast: usize,
    pub ema_slow: usize,
    pub atr_period: usize,
    pub volume_period: usize,
}

impl Default for BreakoutConfig {
    fn default() -> Self {
        Self {
            k_atr: 1.5,
            v_mult: 1.5,
            lookback: 20,
            ema_fast: 8,
            ema_slow: 21,
            atr_period: 14,
            volume_period: 20,
        }
    }
}

/// Risk management configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Daily loss that trips the breaker (positive value)
    pub max_daily_loss: Decimal,

    /// Open orders that trip the breaker
    pub max_open_orders: usize,

    /// Non-terminal orders older than this are reported by the heartbeat
    pub order_stale_secs: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_daily_loss: dec!(1000),
            max_open_orders: 10,
            order_stale_secs: 30,
        }
    }
}

/// Broker gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Bounded wait for every external call
    pub call_timeout_ms: u64,

    /// Paper venue used by the simulated gateway
    pub simulated: SimulatedVenueConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 5_000,
            simulated: SimulatedVenueConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Position the simulated venue starts with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedPosition {
    pub symbol: String,
    pub quantity: i64,
    pub avg_cost: Decimal,
}

/// Paper venue parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedVenueConfig {
    /// Hard cap on concurrent feeds enforced by the venue itself
    pub feed_limit: usize,

    /// Symbols the venue's scanner can return
    pub universe: Vec<String>,

    pub positions: Vec<SeedPosition>,

    /// Tick cadence per open feed
    pub tick_interval_ms: u64,

    /// Delay before each order-status event
    pub fill_latency_ms: u64,

    /// Probability that an order is rejected (0.0 to 1.0)
    pub reject_rate: f64,

    /// Per-tick relative volatility of the random walk
    pub volatility: f64,
}

impl Default for SimulatedVenueConfig {
    fn default() -> Self {
        Self {
            feed_limit: 50,
            universe: [
                "AAPL", "MSFT", "NVDA", "AMZN", "META", "GOOGL", "TSLA", "AMD", "NFLX", "AVGO",
                "CRM", "ORCL", "ADBE", "INTC", "QCOM", "MU", "SHOP", "UBER", "PLTR", "COIN",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            positions: vec![SeedPosition {
                symbol: "SPY".to_string(),
                quantity: 10,
                avg_cost: dec!(500),
            }],
            tick_interval_ms: 250,
            fill_latency_ms: 50,
            reject_rate: 0.0,
            volatility: 0.002,
        }
    }
}

/// Monitoring server and heartbeat
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enable_server: bool,
    pub listen_addr: String,
    pub heartbeat_secs: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_server: true,
            listen_addr: "127.0.0.1:9090".to_string(),
            heartbeat_secs: 60,
        }
    }
}

impl MonitoringConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
