//! Order State Machine
//!
//! Runtime state machine for the lifecycle of one broker order. Transitions are
//! driven exclusively by broker status events; anything the table below does
//! not allow is reported as an ignored event, never an error.
//!
//! # State Diagram
//!
//! ```text
//!                    ┌─────────────┐
//!                    │   Created   │
//!                    └──────┬──────┘
//!                           │
//!              ┌────────────┼─────────────┐
//!              │            │             │
//!              ▼            ▼             ▼
//!        ┌───────────┐ ┌──────────┐ ┌───────────┐
//!        │ Submitted │ │ Rejected │ │ Cancelled │
//!        └─────┬─────┘ └──────────┘ └───────────┘
//!              │ ▲       (terminal)   (terminal)
//!              ▼ │
//!      ┌─────────────────┐
//!      │ PartiallyFilled │
//!      └────────┬────────┘
//!               │   (Submitted and PartiallyFilled both reach)
//!     ┌─────────┼──────────┬──────────┐
//!     ▼         ▼          ▼          ▼
//! ┌────────┐ ┌───────────┐ ┌──────────┐ ┌─────────┐
//! │ Filled │ │ Cancelled │ │ Rejected │ │ Expired │
//! └────────┘ └───────────┘ └──────────┘ └─────────┘
//! ```
//!
//! Terminal states absorb every later event, which makes duplicate terminal
//! reports from the venue harmless.

use super::{BrokerOrderId, Side, Symbol};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Lifecycle state of a tracked order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderState {
    /// Placed with the venue, no acknowledgement yet
    Created,
    /// Acknowledged and working
    Submitted,
    /// Working with some quantity filled
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderState {
    /// Check if no further transitions are possible
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::Rejected | OrderState::Expired
        )
    }

    /// Check if the order still counts against the open-order limit
    #[inline]
    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderState::Created => "created",
            OrderState::Submitted => "submitted",
            OrderState::PartiallyFilled => "partially_filled",
            OrderState::Filled => "filled",
            OrderState::Cancelled => "cancelled",
            OrderState::Rejected => "rejected",
            OrderState::Expired => "expired",
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order status as reported by the venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BrokerStatus {
    Submitted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl BrokerStatus {
    /// State this status asks the order to move into
    pub fn target(self) -> OrderState {
        match self {
            BrokerStatus::Submitted => OrderState::Submitted,
            BrokerStatus::PartiallyFilled => OrderState::PartiallyFilled,
            BrokerStatus::Filled => OrderState::Filled,
            BrokerStatus::Cancelled => OrderState::Cancelled,
            BrokerStatus::Rejected => OrderState::Rejected,
            BrokerStatus::Expired => OrderState::Expired,
        }
    }
}

/// Order-status event from the venue's event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusEvent {
    pub broker_id: BrokerOrderId,
    pub status: BrokerStatus,
    /// Cumulative filled quantity reported by the venue
    pub filled_quantity: u64,
    pub at: SystemTime,
    /// Rejection or cancellation text, if any
    pub reason: Option<String>,
}

impl OrderStatusEvent {
    pub fn new(broker_id: BrokerOrderId, status: BrokerStatus, filled_quantity: u64) -> Self {
        Self {
            broker_id,
            status,
            filled_quantity,
            at: SystemTime::now(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Tracked order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub broker_id: BrokerOrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: u64,
    /// Cumulative filled quantity, never decreases
    pub filled_quantity: u64,
    pub state: OrderState,
    pub submitted_at: SystemTime,
    pub updated_at: SystemTime,
    /// Timestamp when order reached terminal state (if applicable)
    pub terminal_at: Option<SystemTime>,
    pub reason: Option<String>,
}

/// Why an event did not change the order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoredEvent {
    /// Order already terminal
    AfterTerminal { state: OrderState },
    /// Transition not in the table (e.g. Created -> Filled)
    InvalidTransition { from: OrderState, to: OrderState },
    /// Same non-terminal state reported again with no new fills
    NoChange { state: OrderState },
}

/// Outcome of applying one event to an order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Non-terminal move (or more fills in the same state)
    Advanced { from: OrderState, to: OrderState },
    /// Order reached a terminal state with this event
    Completed { from: OrderState, to: OrderState },
    Ignored(IgnoredEvent),
}

/// Whether the table allows `from -> to`
pub fn is_valid_transition(from: OrderState, to: OrderState) -> bool {
    use OrderState::*;
    match (from, to) {
        (Created, Submitted) | (Created, Rejected) | (Created, Cancelled) => true,
        (Submitted, PartiallyFilled)
        | (Submitted, Filled)
        | (Submitted, Cancelled)
        | (Submitted, Rejected)
        | (Submitted, Expired) => true,
        (PartiallyFilled, PartiallyFilled)
        | (PartiallyFilled, Submitted)
        | (PartiallyFilled, Filled)
        | (PartiallyFilled, Cancelled)
        | (PartiallyFilled, Rejected)
        | (PartiallyFilled, Expired) => true,
        _ => false,
    }
}

impl Order {
    /// New order in `Created` state
    pub fn created(broker_id: BrokerOrderId, symbol: Symbol, side: Side, quantity: u64) -> Self {
        let now = SystemTime::now();
        Self {
            broker_id,
            symbol,
            side,
            quantity,
            filled_quantity: 0,
            state: OrderState::Created,
            submitted_at: now,
            updated_at: now,
            terminal_at: None,
            reason: None,
        }
    }

    /// Get remaining unfilled quantity
    #[inline]
    pub fn remaining_quantity(&self) -> u64 {
        self.quantity.saturating_sub(self.filled_quantity)
    }

    /// Apply a venue status event
    ///
    /// Fill quantities are cumulative and clamped to the order quantity; a
    /// report lower than what is already recorded never decreases the fill.
    pub fn apply(&mut self, event: &OrderStatusEvent) -> Transition {
        let from = self.state;
        let to = event.status.target();

        if from.is_terminal() {
            return Transition::Ignored(IgnoredEvent::AfterTerminal { state: from });
        }

        let filled = event.filled_quantity.min(self.quantity);
        let more_filled = filled > self.filled_quantity;

        if from == to && !(to == OrderState::PartiallyFilled && more_filled) {
            return Transition::Ignored(IgnoredEvent::NoChange { state: from });
        }

        if from != to && !is_valid_transition(from, to) {
            return Transition::Ignored(IgnoredEvent::InvalidTransition { from, to });
        }

        if more_filled {
            self.filled_quantity = filled;
        }
        if to == OrderState::Filled {
            self.filled_quantity = self.quantity;
        }
        if event.reason.is_some() {
            self.reason = event.reason.clone();
        }

        self.state = to;
        self.updated_at = event.at;

        if to.is_terminal() {
            self.terminal_at = Some(event.at);
            Transition::Completed { from, to }
        } else {
            Transition::Advanced { from, to }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_order() -> Order {
        Order::created(
            BrokerOrderId::new("T-1"),
            Symbol::new("AAPL"),
            Side::Buy,
            100,
        )
    }

    fn event(status: BrokerStatus, filled: u64) -> OrderStatusEvent {
        OrderStatusEvent::new(BrokerOrderId::new("T-1"), status, filled)
    }

    #[test]
    fn test_created_to_submitted() {
        let mut order = create_test_order();
        let t = order.apply(&event(BrokerStatus::Submitted, 0));
        assert_eq!(
            t,
            Transition::Advanced {
                from: OrderState::Created,
                to: OrderState::Submitted
            }
        );
        assert_eq!(order.state, OrderState::Submitted);
        assert!(order.terminal_at.is_none());
    }

    #[test]
    fn test_full_lifecycle_with_partial_fill() {
        let mut order = create_test_order();
        order.apply(&event(BrokerStatus::Submitted, 0));

        let t = order.apply(&event(BrokerStatus::PartiallyFilled, 40));
        assert!(matches!(t, Transition::Advanced { .. }));
        assert_eq!(order.filled_quantity, 40);
        assert_eq!(order.remaining_quantity(), 60);

        let t = order.apply(&event(BrokerStatus::Filled, 100));
        assert_eq!(
            t,
            Transition::Completed {
                from: OrderState::PartiallyFilled,
                to: OrderState::Filled
            }
        );
        assert_eq!(order.filled_quantity, 100);
        assert!(order.terminal_at.is_some());
    }

    #[test]
    fn test_partial_fills_accumulate() {
        let mut order = create_test_order();
        order.apply(&event(BrokerStatus::Submitted, 0));
        order.apply(&event(BrokerStatus::PartiallyFilled, 30));

        let t = order.apply(&event(BrokerStatus::PartiallyFilled, 70));
        assert!(matches!(t, Transition::Advanced { .. }));
        assert_eq!(order.filled_quantity, 70);
        assert_eq!(order.state, OrderState::PartiallyFilled);
    }

    #[test]
    fn test_repeated_partial_without_new_fill_is_no_change() {
        let mut order = create_test_order();
        order.apply(&event(BrokerStatus::Submitted, 0));
        order.apply(&event(BrokerStatus::PartiallyFilled, 30));

        let t = order.apply(&event(BrokerStatus::PartiallyFilled, 30));
        assert_eq!(
            t,
            Transition::Ignored(IgnoredEvent::NoChange {
                state: OrderState::PartiallyFilled
            })
        );
    }

    #[test]
    fn test_partially_filled_back_to_submitted() {
        let mut order = create_test_order();
        order.apply(&event(BrokerStatus::Submitted, 0));
        order.apply(&event(BrokerStatus::PartiallyFilled, 30));

        let t = order.apply(&event(BrokerStatus::Submitted, 30));
        assert!(matches!(t, Transition::Advanced { .. }));
        assert_eq!(order.state, OrderState::Submitted);
        assert_eq!(order.filled_quantity, 30);
    }

    #[test]
    fn test_filled_quantity_never_decreases() {
        let mut order = create_test_order();
        order.apply(&event(BrokerStatus::Submitted, 0));
        order.apply(&event(BrokerStatus::PartiallyFilled, 60));
        order.apply(&event(BrokerStatus::Submitted, 10));
        assert_eq!(order.filled_quantity, 60);
    }

    #[test]
    fn test_fill_overflow_clamped_to_quantity() {
        let mut order = create_test_order();
        order.apply(&event(BrokerStatus::Submitted, 0));
        order.apply(&event(BrokerStatus::PartiallyFilled, 500));
        assert_eq!(order.filled_quantity, 100);
    }

    #[test]
    fn test_event_after_terminal_is_ignored() {
        let mut order = create_test_order();
        order.apply(&event(BrokerStatus::Submitted, 0));
        order.apply(&event(BrokerStatus::Filled, 100));
        let before = order.clone();

        let t = order.apply(&event(BrokerStatus::Filled, 100));
        assert_eq!(
            t,
            Transition::Ignored(IgnoredEvent::AfterTerminal {
                state: OrderState::Filled
            })
        );

        let t = order.apply(&event(BrokerStatus::Cancelled, 100));
        assert!(matches!(t, Transition::Ignored(_)));
        assert_eq!(order, before);
    }

    #[test]
    fn test_created_cannot_fill_directly() {
        let mut order = create_test_order();
        let t = order.apply(&event(BrokerStatus::Filled, 100));
        assert_eq!(
            t,
            Transition::Ignored(IgnoredEvent::InvalidTransition {
                from: OrderState::Created,
                to: OrderState::Filled
            })
        );
        assert_eq!(order.state, OrderState::Created);
        assert_eq!(order.filled_quantity, 0);
    }

    #[test]
    fn test_rejection_keeps_reason() {
        let mut order = create_test_order();
        let t = order.apply(&event(BrokerStatus::Rejected, 0).with_reason("margin"));
        assert!(matches!(t, Transition::Completed { .. }));
        assert_eq!(order.reason.as_deref(), Some("margin"));
    }

    #[test]
    fn test_terminal_detection() {
        assert!(OrderState::Filled.is_terminal());
        assert!(OrderState::Cancelled.is_terminal());
        assert!(OrderState::Rejected.is_terminal());
        assert!(OrderState::Expired.is_terminal());
        assert!(OrderState::Created.is_open());
        assert!(OrderState::Submitted.is_open());
        assert!(OrderState::PartiallyFilled.is_open());
    }

    #[test]
    fn test_expire_from_submitted() {
        let mut order = create_test_order();
        order.apply(&event(BrokerStatus::Submitted, 0));
        let t = order.apply(&event(BrokerStatus::Expired, 0));
        assert_eq!(
            t,
            Transition::Completed {
                from: OrderState::Submitted,
                to: OrderState::Expired
            }
        );
    }
}
