//! Domain identifiers shared by every component
//!
//! - `Symbol`: normalized ticker (upper-case, trimmed)
//! - `PriorityTier`: total order used for slot arbitration
//! - `BrokerOrderId`: venue-assigned order identifier
//! - `FeedHandle`: move-only token for one live market-data feed

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized instrument symbol
///
/// Symbols are upper-cased and trimmed on construction so the same instrument
/// reported by different collaborators maps to one slot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

/// Priority class of a subscription request
///
/// Declaration order is the eviction order: `ScannerNormal` is evicted first,
/// `Position` is never evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriorityTier {
    /// Scanner candidate below the top-score threshold
    ScannerNormal,
    /// Scanner candidate at or above the top-score threshold
    ScannerTop,
    /// Symbol with an open position (pinned)
    Position,
}

impl PriorityTier {
    /// Map a scanner score onto a tier
    #[inline]
    pub fn from_score(score: f64, top_score: f64) -> Self {
        if score >= top_score {
            PriorityTier::ScannerTop
        } else {
            PriorityTier::ScannerNormal
        }
    }

    #[inline]
    pub fn is_pinned(self) -> bool {
        self == PriorityTier::Position
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PriorityTier::ScannerNormal => "scanner_normal",
            PriorityTier::ScannerTop => "scanner_top",
            PriorityTier::Position => "position",
        }
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriorityTier::ScannerNormal => write!(f, "SCANNER_NORMAL"),
            PriorityTier::ScannerTop => write!(f, "SCANNER_TOP"),
            PriorityTier::Position => write!(f, "POSITION"),
        }
    }
}

/// Order side (Buy or Sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Breakout direction reported by the market scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Side of the order that follows this breakout
    pub fn entry_side(self) -> Side {
        match self {
            Direction::Up => Side::Buy,
            Direction::Down => Side::Sell,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "UP"),
            Direction::Down => write!(f, "DOWN"),
        }
    }
}

/// Venue-assigned order identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrokerOrderId(String);

impl BrokerOrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BrokerOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BrokerOrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Token for one open market-data feed
///
/// Deliberately neither `Clone` nor `Copy`: the gateway hands one out per
/// `open_feed` and takes it back by value in `close_feed`, so a feed cannot be
/// released twice.
#[derive(Debug, PartialEq, Eq)]
pub struct FeedHandle {
    id: u64,
    symbol: Symbol,
}

impl FeedHandle {
    /// Only gateways mint handles
    pub fn new(id: u64, symbol: Symbol) -> Self {
        Self { id, symbol }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_normalization() {
        assert_eq!(Symbol::new("  aapl "), Symbol::new("AAPL"));
        assert_eq!(Symbol::from("msft").as_str(), "MSFT");
    }

    #[test]
    fn test_priority_total_order() {
        assert!(PriorityTier::Position > PriorityTier::ScannerTop);
        assert!(PriorityTier::ScannerTop > PriorityTier::ScannerNormal);
        assert_eq!(
            PriorityTier::ScannerNormal.max(PriorityTier::Position),
            PriorityTier::Position
        );
    }

    #[test]
    fn test_tier_from_score() {
        assert_eq!(PriorityTier::from_score(3.0, 2.5), PriorityTier::ScannerTop);
        assert_eq!(PriorityTier::from_score(2.5, 2.5), PriorityTier::ScannerTop);
        assert_eq!(PriorityTier::from_score(1.2, 2.5), PriorityTier::ScannerNormal);
    }

    #[test]
    fn test_tier_serializes_screaming_case() {
        let json = serde_json::to_string(&PriorityTier::ScannerTop).unwrap();
        assert_eq!(json, "\"SCANNER_TOP\"");
    }

    #[test]
    fn test_direction_entry_side() {
        assert_eq!(Direction::Up.entry_side(), Side::Buy);
        assert_eq!(Direction::Down.entry_side(), Side::Sell);
    }
}
