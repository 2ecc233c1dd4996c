//! Feedslot Core - market-data subscription manager for a single brokerage session
//!
//! A broker allows only a fixed number of concurrent real-time feeds. Feedslot
//! shares that budget between two consumers:
//!
//! - a **position scanner** that must keep every held position streaming
//! - a **market scanner** that discovers breakout candidates and wants feeds
//!   for the strongest of them
//!
//! ## Architecture
//! - **Subscription scheduler**: fixed-capacity pool with tiered admission,
//!   reserved position slots and lowest-tier / oldest-first eviction
//! - **State Bus**: one shared store with consistent snapshots
//! - **Order tracker**: per-order state machine driven by venue events
//! - **Risk Guard**: daily-loss and open-order circuit breaker, latched per
//!   session
//! - **Data Guard**: refuses stale live prices, falls back to history
//!
//! ## Core Modules
//! - `core`: value types, order state machine, errors
//! - `config`: JSON configuration with validation
//! - `gateway`: broker abstraction plus simulated and dry-run venues
//! - `scheduler`: slot pool and `SubscriptionScheduler`
//! - `scanner`: position/market scanners and the coordinator running them
//! - `execution`: order tracking and risk-gated submission
//! - `risk`, `resilience`, `monitoring`, `state`, `indicators`

pub mod config;
pub mod core;
pub mod execution;
pub mod gateway;
pub mod indicators;
pub mod monitoring;
pub mod resilience;
pub mod risk;
pub mod scanner;
pub mod scheduler;
pub mod state;
pub mod utils;

// Scripted gateway and builders, shared by unit and integration tests
pub mod testing;

pub use crate::core::{
    BrokerOrderId, ConfigError, CoreError, Direction, FeedHandle, GatewayError, Order,
    OrderState, PriorityTier, Side, SubmitError, Symbol,
};

pub use config::Config;
pub use gateway::{BrokerGateway, DryRunGateway, SimulatedGateway};
pub use risk::{BreakerStatus, RiskGuard, TripReason};
pub use scanner::ScannerCoordinator;
pub use scheduler::{SlotDecision, SubscriptionScheduler};
pub use state::{StateBus, StateSnapshot};

// Re-export error types
pub use anyhow::{Error, Result};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::core::{Direction, PriorityTier, Side, Symbol};
    pub use crate::gateway::{BrokerGateway, DryRunGateway, SimulatedGateway};
    pub use crate::monitoring::{MetricsRegistry, MonitoringServer, ServerState};
    pub use crate::resilience::{install_panic_handler, KillSwitch};
    pub use crate::scanner::ScannerCoordinator;
    pub use crate::scheduler::{SlotDecision, SubscriptionScheduler};
    pub use crate::state::{StateBus, StateSnapshot};
    pub use crate::utils::init_logger;

    pub use crate::{Error, Result};
}
