//! Order Lifecycle Tracker
//!
//! One state machine per broker order id, driven only by venue status events.
//! The tracker is the sole writer of orders on the State Bus and, together
//! with the Risk Guard, of the open-order count:
//!
//! - `track` counts a new order as open
//! - the event that makes an order terminal un-counts it and publishes the
//!   final order, exactly once; duplicate terminal events change nothing
//!
//! Venues may report a status before `place_order` has returned the id to us.
//! Such events are held in a small buffer and replayed when the order is
//! tracked; if it never is, they age out of the buffer and are dropped.
//!
//! Terminal orders are kept for duplicate detection up to the bus retention,
//! oldest completion evicted first.

use crate::core::{BrokerOrderId, IgnoredEvent, Order, OrderStatusEvent, Transition};
use crate::monitoring::MetricsRegistry;
use crate::state::{StateBus, ORDER_RETENTION};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Events for not-yet-tracked ids held at most
pub const EARLY_EVENT_CAPACITY: usize = 256;

/// Result of feeding one event to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    Applied(Transition),
    /// No order with this id (yet); event held for replay
    Unknown,
}

pub struct OrderTracker {
    orders: DashMap<BrokerOrderId, Order>,
    early: Mutex<VecDeque<OrderStatusEvent>>,
    /// Terminal ids in completion order
    completed: Mutex<VecDeque<BrokerOrderId>>,
    retention: usize,
    bus: StateBus,
    metrics: MetricsRegistry,
}

impl OrderTracker {
    pub fn new(bus: StateBus, metrics: MetricsRegistry) -> Self {
        Self::with_retention(bus, metrics, ORDER_RETENTION)
    }

    /// Tracker keeping at most `retention` terminal orders
    pub fn with_retention(bus: StateBus, metrics: MetricsRegistry, retention: usize) -> Self {
        Self {
            orders: DashMap::new(),
            early: Mutex::new(VecDeque::new()),
            completed: Mutex::new(VecDeque::new()),
            retention: retention.max(1),
            bus,
            metrics,
        }
    }

    /// Start tracking a freshly placed order
    ///
    /// The order must be in `Created` state. Re-tracking a known id is ignored.
    pub fn track(&self, order: Order) {
        let id = order.broker_id.clone();

        if self.orders.contains_key(&id) {
            warn!(order_id = %id, "Order already tracked, ignoring");
            return;
        }

        self.bus.upsert_order(order.clone());
        let open = self.bus.increment_open_orders();
        self.metrics.orders().open_orders.set(open as i64);
        self.metrics.orders().submitted_total.inc();
        self.orders.insert(id.clone(), order);

        info!(order_id = %id, open_orders = open, "Tracking order");

        let replay: Vec<OrderStatusEvent> = {
            let mut early = self.early.lock();
            let (matched, rest): (Vec<_>, Vec<_>) =
                early.drain(..).partition(|e| e.broker_id == id);
            early.extend(rest);
            matched
        };

        for event in replay {
            debug!(order_id = %id, status = ?event.status, "Replaying early order event");
            self.apply(&event);
        }
    }

    /// Apply a venue status event
    pub fn apply(&self, event: &OrderStatusEvent) -> TrackOutcome {
        let (transition, order) = match self.orders.get_mut(&event.broker_id) {
            Some(mut entry) => {
                let transition = entry.apply(event);
                (transition, entry.clone())
            }
            None => return self.hold_unknown(event),
        };

        match transition {
            Transition::Advanced { from, to } => {
                debug!(
                    order_id = %order.broker_id,
                    from = from.as_str(),
                    to = to.as_str(),
                    filled = order.filled_quantity,
                    "Order advanced"
                );
                self.metrics
                    .orders()
                    .events_total
                    .with_label_values(&[to.as_str()])
                    .inc();
                self.bus.upsert_order(order);
            }
            Transition::Completed { from, to } => {
                let open = self.bus.decrement_open_orders();
                self.metrics.orders().open_orders.set(open as i64);
                self.metrics
                    .orders()
                    .events_total
                    .with_label_values(&[to.as_str()])
                    .inc();
                info!(
                    order_id = %order.broker_id,
                    symbol = %order.symbol,
                    from = from.as_str(),
                    to = to.as_str(),
                    filled = order.filled_quantity,
                    reason = order.reason.as_deref().unwrap_or(""),
                    open_orders = open,
                    "Order completed"
                );
                let id = order.broker_id.clone();
                self.bus.upsert_order(order);
                self.retire(id);
            }
            Transition::Ignored(kind) => {
                let label = match kind {
                    IgnoredEvent::AfterTerminal { state } => {
                        debug!(order_id = %event.broker_id, state = state.as_str(), "Duplicate event after terminal state");
                        "after_terminal"
                    }
                    IgnoredEvent::InvalidTransition { from, to } => {
                        warn!(
                            order_id = %event.broker_id,
                            from = from.as_str(),
                            to = to.as_str(),
                            "Invalid order transition ignored"
                        );
                        "invalid_transition"
                    }
                    IgnoredEvent::NoChange { state } => {
                        debug!(order_id = %event.broker_id, state = state.as_str(), "Repeated order status");
                        "no_change"
                    }
                };
                self.metrics
                    .orders()
                    .ignored_events_total
                    .with_label_values(&[label])
                    .inc();
            }
        }

        TrackOutcome::Applied(transition)
    }

    /// Remember a terminal order, forgetting the oldest past retention
    fn retire(&self, id: BrokerOrderId) {
        let evicted: Vec<BrokerOrderId> = {
            let mut completed = self.completed.lock();
            completed.push_back(id);
            let excess = completed.len().saturating_sub(self.retention);
            completed.drain(..excess).collect()
        };

        for id in evicted {
            self.orders.remove_if(&id, |_, o| o.state.is_terminal());
        }
    }

    fn hold_unknown(&self, event: &OrderStatusEvent) -> TrackOutcome {
        let mut early = self.early.lock();

        // `track` may have inserted the order since the lookup
        if self.orders.contains_key(&event.broker_id) {
            drop(early);
            return self.apply(event);
        }

        warn!(order_id = %event.broker_id, status = ?event.status, "Order event for unknown id");
        self.metrics
            .orders()
            .ignored_events_total
            .with_label_values(&["unknown_id"])
            .inc();

        if early.len() == EARLY_EVENT_CAPACITY {
            if let Some(dropped) = early.pop_front() {
                debug!(order_id = %dropped.broker_id, "Dropping unmatched order event");
            }
        }
        early.push_back(event.clone());
        TrackOutcome::Unknown
    }

    pub fn get(&self, id: &BrokerOrderId) -> Option<Order> {
        self.orders.get(id).map(|o| o.clone())
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn open_orders(&self) -> Vec<Order> {
        self.orders
            .iter()
            .filter(|o| o.state.is_open())
            .map(|o| o.clone())
            .collect()
    }

    /// Non-terminal orders last updated more than `max_age` before `now`
    pub fn stale_orders(&self, max_age: Duration, now: SystemTime) -> Vec<Order> {
        self.orders
            .iter()
            .filter(|o| o.state.is_open())
            .filter(|o| {
                now.duration_since(o.updated_at)
                    .map(|age| age > max_age)
                    .unwrap_or(false)
            })
            .map(|o| o.clone())
            .collect()
    }
}
