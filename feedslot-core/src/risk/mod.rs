//! Risk Guard
//!
//! Session-level circuit breaker evaluated before any new exposure:
//!
//! - Daily loss: `daily_pnl <= -max_daily_loss`
//! - Open orders: `open_order_count >= max_open_orders`
//!
//! ## State Machine
//!
//! ```text
//!        OK ──── limit hit ────► TRIPPED
//!        ▲                          │
//!        └──── session reset ───────┘
//! ```
//!
//! Evaluation is pure over a snapshot. Latching happens in `enforce`, which
//! records the first trip on the State Bus; later PnL recovery does not clear
//! it.

use crate::config::RiskConfig;
use crate::state::{Alert, AlertKind, RiskState, StateBus, StateSnapshot};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info};

/// Breaker thresholds
#[derive(Debug, Clone, PartialEq)]
pub struct RiskLimits {
    /// Positive loss amount; the breaker trips at `-max_daily_loss`
    pub max_daily_loss: Decimal,
    pub max_open_orders: usize,
}

impl From<&RiskConfig> for RiskLimits {
    fn from(cfg: &RiskConfig) -> Self {
        Self {
            max_daily_loss: cfg.max_daily_loss,
            max_open_orders: cfg.max_open_orders,
        }
    }
}

/// Why the breaker tripped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TripReason {
    DailyLoss { daily_pnl: Decimal, limit: Decimal },
    OpenOrders { count: usize, max: usize },
}

impl fmt::Display for TripReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TripReason::DailyLoss { daily_pnl, limit } => {
                write!(f, "daily loss {} breached limit -{}", daily_pnl, limit)
            }
            TripReason::OpenOrders { count, max } => {
                write!(f, "{} open orders reached limit {}", count, max)
            }
        }
    }
}

/// Breaker evaluation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerStatus {
    Ok,
    Tripped(TripReason),
}

impl BreakerStatus {
    #[inline]
    pub fn is_tripped(&self) -> bool {
        matches!(self, BreakerStatus::Tripped(_))
    }
}

/// Circuit breaker over session risk counters
#[derive(Debug, Clone)]
pub struct RiskGuard {
    limits: RiskLimits,
}

impl RiskGuard {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Evaluate the breaker against a snapshot
    pub fn check_breaker(&self, snapshot: &StateSnapshot) -> BreakerStatus {
        self.evaluate(&snapshot.risk)
    }

    /// Evaluate risk counters without touching shared state
    ///
    /// A latched trip wins over the current counters.
    pub fn evaluate(&self, risk: &RiskState) -> BreakerStatus {
        if risk.breaker_tripped {
            let reason = risk.trip_reason.clone().unwrap_or(TripReason::DailyLoss {
                daily_pnl: risk.daily_pnl,
                limit: self.limits.max_daily_loss,
            });
            return BreakerStatus::Tripped(reason);
        }

        if risk.daily_pnl <= -self.limits.max_daily_loss {
            return BreakerStatus::Tripped(TripReason::DailyLoss {
                daily_pnl: risk.daily_pnl,
                limit: self.limits.max_daily_loss,
            });
        }

        if risk.open_order_count >= self.limits.max_open_orders {
            return BreakerStatus::Tripped(TripReason::OpenOrders {
                count: risk.open_order_count,
                max: self.limits.max_open_orders,
            });
        }

        BreakerStatus::Ok
    }

    /// Evaluate the live bus and latch a new trip
    ///
    /// Callers about to take exposure go through this, never `evaluate`.
    pub fn enforce(&self, bus: &StateBus) -> BreakerStatus {
        let status = self.evaluate(&bus.risk());

        if let BreakerStatus::Tripped(reason) = &status {
            if bus.trip_breaker(reason.clone()) {
                error!(reason = %reason, "Circuit breaker TRIPPED, new exposure refused until session reset");
                bus.push_alert(Alert::new(None, AlertKind::BreakerTripped, reason.to_string()));
            }
        }

        status
    }

    /// Store the venue-reported daily PnL and re-evaluate
    pub fn record_daily_pnl(&self, bus: &StateBus, pnl: Decimal) -> BreakerStatus {
        bus.set_daily_pnl(pnl);
        self.enforce(bus)
    }

    /// Clear the latch at a session boundary
    pub fn reset_session(&self, bus: &StateBus) {
        let previous = bus.reset_session();
        if let Some(reason) = previous.trip_reason {
            info!(cleared = %reason, "Circuit breaker cleared by session reset");
        }
    }
}
