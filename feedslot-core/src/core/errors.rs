//! Domain-specific error types
//!
//! Each enum maps to one row of the error taxonomy: configuration faults halt
//! startup, gateway failures are retried on the next iteration, submission
//! refusals are hard stops until the session is reset.

use crate::risk::TripReason;
use std::time::Duration;
use thiserror::Error;

/// Invalid configuration, fatal at startup
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("slot capacity must be positive")]
    ZeroCapacity,

    #[error("reserved_for_positions ({reserved}) must be below capacity ({capacity})")]
    ReservedExceedsCapacity { reserved: usize, capacity: usize },

    #[error("{positions} open positions exceed slot capacity {capacity}")]
    PositionsExceedCapacity { positions: usize, capacity: usize },

    #[error("{name} interval must be positive")]
    ZeroInterval { name: &'static str },

    #[error("top_score ({top}) must not be below min_score ({min})")]
    ScoreThresholds { min: f64, top: f64 },

    #[error("ema_fast ({fast}) must be shorter than ema_slow ({slow})")]
    EmaPeriods { fast: usize, slow: usize },

    #[error("max_daily_loss must be positive")]
    NonPositiveLossLimit,

    #[error("max_open_orders must be positive")]
    ZeroOpenOrderLimit,

    #[error("invalid log level '{0}', must be one of trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("invalid value '{value}' in environment variable {var}")]
    EnvOverride { var: &'static str, value: String },

    #[error("failed to read config file: {0}")]
    Io(String),

    #[error("failed to parse config file: {0}")]
    Parse(String),
}

/// Failure of a call into the broker gateway
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("{call} timed out after {after:?}")]
    Timeout { call: &'static str, after: Duration },

    #[error("venue feed limit reached ({limit} concurrent feeds)")]
    FeedLimit { limit: usize },

    #[error("unknown symbol {0}")]
    UnknownSymbol(String),

    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("gateway disconnected")]
    Disconnected,
}

impl GatewayError {
    /// Whether the failure came from the bounded wait rather than the venue
    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Timeout { .. })
    }
}

/// Refusal to submit a new order
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubmitError {
    #[error("circuit breaker tripped: {0}")]
    BreakerTripped(TripReason),

    #[error("order quantity must be positive")]
    ZeroQuantity,

    #[error("order placement failed: {0}")]
    Gateway(#[from] GatewayError),
}

/// Fatal error while starting the coordinator
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("gateway event streams were already taken")]
    EventsUnavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::ReservedExceedsCapacity {
            reserved: 50,
            capacity: 50,
        };
        let msg = err.to_string();
        assert!(msg.contains("reserved_for_positions (50)"));
        assert!(msg.contains("capacity (50)"));
    }

    #[test]
    fn test_gateway_timeout_detection() {
        let err = GatewayError::Timeout {
            call: "open_feed",
            after: Duration::from_secs(5),
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("open_feed"));
        assert!(!GatewayError::Disconnected.is_timeout());
    }

    #[test]
    fn test_submit_error_from_gateway() {
        let err: SubmitError = GatewayError::Disconnected.into();
        match err {
            SubmitError::Gateway(GatewayError::Disconnected) => {}
            other => panic!("Expected Gateway variant, got {:?}", other),
        }
    }

    #[test]
    fn test_core_error_wraps_config() {
        let err: CoreError = ConfigError::ZeroCapacity.into();
        assert_eq!(err.to_string(), "slot capacity must be positive");
    }
}
