//! Order execution
//!
//! - `OrderTracker`: lifecycle state per broker order id
//! - `OrderRouter`: risk-gated submission through the gateway

pub mod router;
pub mod tracker;

pub use router::OrderRouter;
pub use tracker::{OrderTracker, TrackOutcome};
