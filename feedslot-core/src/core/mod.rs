//! Core domain types
//!
//! This module provides the building blocks every component shares:
//! - `Symbol`, `PriorityTier`, `Side`, `Direction`: value types
//! - `FeedHandle`: move-only token for a live feed
//! - `Order` and the order state machine
//! - Error enums for each failure class

pub mod errors;
pub mod order_fsm;
pub mod types;

// Re-export commonly used types
pub use errors::{ConfigError, CoreError, GatewayError, SubmitError};
pub use order_fsm::{
    BrokerStatus, IgnoredEvent, Order, OrderState, OrderStatusEvent, Transition,
};
pub use types::{BrokerOrderId, Direction, FeedHandle, PriorityTier, Side, Symbol};
