//! Owned, immutable views published by the State Bus
//!
//! Everything here is plain data: cloning out of the bus is the only way to
//! obtain one, so a snapshot can never observe a later write.

use crate::core::{Direction, Order, PriorityTier, Symbol};
use crate::resilience::PriceSource;
use crate::risk::TripReason;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;

/// Share of capacity at which usage is reported as near the limit (percent)
pub const NEAR_LIMIT_PCT: usize = 95;

/// Open position with derived analytics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionView {
    pub symbol: Symbol,
    /// Signed quantity (negative for short)
    pub quantity: i64,
    pub avg_cost: Decimal,
    pub last_price: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
    pub ema_fast: Option<f64>,
    pub ema_slow: Option<f64>,
    pub price_source: Option<PriceSource>,
    pub updated_at: SystemTime,
}

impl PositionView {
    /// Bare position as reported by the venue, before analytics
    pub fn new(symbol: Symbol, quantity: i64, avg_cost: Decimal) -> Self {
        Self {
            symbol,
            quantity,
            avg_cost,
            last_price: None,
            unrealized_pnl: None,
            ema_fast: None,
            ema_slow: None,
            price_source: None,
            updated_at: SystemTime::now(),
        }
    }
}

/// Active subscription as seen by readers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionView {
    pub symbol: Symbol,
    pub tier: PriorityTier,
    pub acquired_at: SystemTime,
    /// Filled from the quote table when a snapshot is taken
    pub last_tick_at: Option<SystemTime>,
    pub feed_id: u64,
}

/// Market scanner output for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSignal {
    pub symbol: Symbol,
    pub score: f64,
    pub direction: Direction,
    pub params_label: String,
    pub last_price: f64,
    pub tier: PriorityTier,
    pub detected_at: SystemTime,
}

/// Session risk counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub daily_pnl: Decimal,
    pub open_order_count: usize,
    pub breaker_tripped: bool,
    pub trip_reason: Option<TripReason>,
}

/// Latest streamed price for a symbol
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub last_price: f64,
    pub last_tick_at: SystemTime,
    pub tick_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertKind {
    /// Position price crossed its EMA band
    PositionBreakout,
    /// Position request could not get a slot
    PositionUnsubscribed,
    BreakerTripped,
    /// A coordinator task ended while the session was still running
    TaskStopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub symbol: Option<Symbol>,
    pub kind: AlertKind,
    pub message: String,
    pub raised_at: SystemTime,
}

impl Alert {
    pub fn new(symbol: Option<Symbol>, kind: AlertKind, message: impl Into<String>) -> Self {
        Self {
            symbol,
            kind,
            message: message.into(),
            raised_at: SystemTime::now(),
        }
    }
}

/// Liveness summary written by the heartbeat task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub seq: u64,
    pub at: SystemTime,
    pub uptime_secs: u64,
    pub last_tick_age_ms: Option<u64>,
    pub last_position_sync_age_ms: Option<u64>,
    pub subscriptions: usize,
    pub quotes: usize,
    /// How late the heartbeat tick fired relative to its schedule
    pub loop_lag_ms: u64,
    pub stale_orders: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageStatus {
    Ok,
    NearLimit,
    Full,
}

/// Slot pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotUsage {
    pub capacity: usize,
    pub reserved: usize,
    pub active: usize,
    pub positions: usize,
    pub scanner_top: usize,
    pub scanner_normal: usize,
    /// Non-position admissions possible without eviction
    pub scanner_available: usize,
    pub status: UsageStatus,
}

impl SlotUsage {
    pub fn compute<I>(capacity: usize, reserved: usize, tiers: I) -> Self
    where
        I: IntoIterator<Item = PriorityTier>,
    {
        let (mut positions, mut scanner_top, mut scanner_normal) = (0, 0, 0);
        for tier in tiers {
            match tier {
                PriorityTier::Position => positions += 1,
                PriorityTier::ScannerTop => scanner_top += 1,
                PriorityTier::ScannerNormal => scanner_normal += 1,
            }
        }

        let active = positions + scanner_top + scanner_normal;
        let scanner_available = capacity.saturating_sub(reserved).saturating_sub(active);

        let status = if active >= capacity {
            UsageStatus::Full
        } else if scanner_available == 0 || active * 100 >= capacity * NEAR_LIMIT_PCT {
            UsageStatus::NearLimit
        } else {
            UsageStatus::Ok
        };

        Self {
            capacity,
            reserved,
            active,
            positions,
            scanner_top,
            scanner_normal,
            scanner_available,
            status,
        }
    }
}

/// Point-in-time copy of everything on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub taken_at: SystemTime,
    pub positions: Vec<PositionView>,
    pub subscriptions: Vec<SubscriptionView>,
    pub signals: Vec<ScanSignal>,
    pub orders: Vec<Order>,
    pub risk: RiskState,
    pub quotes: BTreeMap<Symbol, Quote>,
    pub alerts: Vec<Alert>,
    pub heartbeat: Option<Heartbeat>,
    pub slots: SlotUsage,
}

impl StateSnapshot {
    pub fn position(&self, symbol: &Symbol) -> Option<&PositionView> {
        self.positions.iter().find(|p| &p.symbol == symbol)
    }

    pub fn subscription(&self, symbol: &Symbol) -> Option<&SubscriptionView> {
        self.subscriptions.iter().find(|s| &s.symbol == symbol)
    }

    pub fn open_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter().filter(|o| o.state.is_open())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_usage_counts_tiers() {
        let usage = SlotUsage::compute(
            10,
            2,
            [
                PriorityTier::Position,
                PriorityTier::ScannerTop,
                PriorityTier::ScannerNormal,
                PriorityTier::ScannerNormal,
            ],
        );
        assert_eq!(usage.active, 4);
        assert_eq!(usage.positions, 1);
        assert_eq!(usage.scanner_top, 1);
        assert_eq!(usage.scanner_normal, 2);
        assert_eq!(usage.scanner_available, 4);
        assert_eq!(usage.status, UsageStatus::Ok);
    }

    #[test]
    fn test_slot_usage_near_limit_when_scanner_share_used() {
        let usage = SlotUsage::compute(10, 2, vec![PriorityTier::ScannerNormal; 8]);
        assert_eq!(usage.scanner_available, 0);
        assert_eq!(usage.status, UsageStatus::NearLimit);
    }

    #[test]
    fn test_slot_usage_full() {
        let mut tiers = vec![PriorityTier::ScannerNormal; 8];
        tiers.extend([PriorityTier::Position, PriorityTier::Position]);
        let usage = SlotUsage::compute(10, 2, tiers);
        assert_eq!(usage.status, UsageStatus::Full);
        assert_eq!(usage.scanner_available, 0);
    }

    #[test]
    fn test_usage_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&UsageStatus::NearLimit).unwrap(),
            "\"near_limit\""
        );
    }
}
