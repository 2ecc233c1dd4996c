//! State Bus
//!
//! The one shared store every component reads and writes. Each collection sits
//! behind its own `parking_lot::RwLock`; writers hold a single lock for a short
//! section and never call out while holding it.
//!
//! `snapshot()` takes every read lock in the fixed order below and clones, so
//! a snapshot is internally consistent and never changes afterwards:
//!
//! ```text
//! positions -> subscriptions -> signals -> orders -> risk -> ticks -> alerts -> heartbeat
//! ```
//!
//! No other method holds more than one lock at a time, which rules out lock
//! order inversions.

pub mod snapshot;

pub use snapshot::{
    Alert, AlertKind, Heartbeat, PositionView, Quote, RiskState, ScanSignal, SlotUsage,
    StateSnapshot, SubscriptionView, UsageStatus,
};

use crate::config::Config;
use crate::core::{BrokerOrderId, Order, Symbol};
use crate::risk::TripReason;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, error, info};

/// Alerts kept in the ring
pub const ALERT_CAPACITY: usize = 100;

/// Terminal orders kept for display before the oldest are pruned
pub const ORDER_RETENTION: usize = 500;

#[derive(Debug, Default)]
struct PositionTable {
    rows: BTreeMap<Symbol, PositionView>,
    synced_at: Option<SystemTime>,
}

#[derive(Debug)]
struct TickSeries {
    last_price: f64,
    last_tick_at: SystemTime,
    tick_count: u64,
    prices: VecDeque<f64>,
}

impl TickSeries {
    fn quote(&self) -> Quote {
        Quote {
            last_price: self.last_price,
            last_tick_at: self.last_tick_at,
            tick_count: self.tick_count,
        }
    }
}

struct BusInner {
    capacity: usize,
    reserved: usize,
    tick_history: usize,
    started_at: SystemTime,

    positions: RwLock<PositionTable>,
    subscriptions: RwLock<BTreeMap<Symbol, SubscriptionView>>,
    /// Latest scan, in the order the scanner produced it
    signals: RwLock<Vec<ScanSignal>>,
    orders: RwLock<BTreeMap<BrokerOrderId, Order>>,
    risk: RwLock<RiskState>,
    ticks: RwLock<BTreeMap<Symbol, TickSeries>>,
    alerts: RwLock<VecDeque<Alert>>,
    heartbeat: RwLock<Option<Heartbeat>>,
}

/// Shared, concurrency-safe state store
///
/// Cheap to clone; all clones see the same state.
#[derive(Clone)]
pub struct StateBus {
    inner: Arc<BusInner>,
}

impl StateBus {
    pub fn new(config: &Config) -> Self {
        Self {
            inner: Arc::new(BusInner {
                capacity: config.slots.capacity,
                reserved: config.slots.reserved_for_positions,
                tick_history: config.scanners.tick_history.max(1),
                started_at: SystemTime::now(),
                positions: RwLock::new(PositionTable::default()),
                subscriptions: RwLock::new(BTreeMap::new()),
                signals: RwLock::new(Vec::new()),
                orders: RwLock::new(BTreeMap::new()),
                risk: RwLock::new(RiskState::default()),
                ticks: RwLock::new(BTreeMap::new()),
                alerts: RwLock::new(VecDeque::with_capacity(ALERT_CAPACITY)),
                heartbeat: RwLock::new(None),
            }),
        }
    }

    pub fn started_at(&self) -> SystemTime {
        self.inner.started_at
    }

    // ---- ticks ----

    /// Record one streamed price
    pub fn record_tick(&self, symbol: &Symbol, price: f64, at: SystemTime) {
        if !price.is_finite() || price <= 0.0 {
            debug!(symbol = %symbol, price, "Dropping invalid tick");
            return;
        }

        let cap = self.inner.tick_history;
        let mut ticks = self.inner.ticks.write();
        let series = ticks.entry(symbol.clone()).or_insert_with(|| TickSeries {
            last_price: price,
            last_tick_at: at,
            tick_count: 0,
            prices: VecDeque::with_capacity(cap.min(1024)),
        });

        series.last_price = price;
        series.last_tick_at = at;
        series.tick_count += 1;
        if series.prices.len() == cap {
            series.prices.pop_front();
        }
        series.prices.push_back(price);
    }

    /// Forget streamed prices once the feed is gone
    pub fn clear_ticks(&self, symbol: &Symbol) {
        self.inner.ticks.write().remove(symbol);
    }

    pub fn quote(&self, symbol: &Symbol) -> Option<Quote> {
        self.inner.ticks.read().get(symbol).map(TickSeries::quote)
    }

    pub fn last_tick_at(&self, symbol: &Symbol) -> Option<SystemTime> {
        self.inner.ticks.read().get(symbol).map(|s| s.last_tick_at)
    }

    /// Symbols with at least one recorded tick
    pub fn quote_count(&self) -> usize {
        self.inner.ticks.read().len()
    }

    /// Most recent tick across all symbols
    pub fn latest_tick_at(&self) -> Option<SystemTime> {
        self.inner
            .ticks
            .read()
            .values()
            .map(|s| s.last_tick_at)
            .max()
    }

    /// Copy of the retained prices, oldest first
    pub fn price_series(&self, symbol: &Symbol) -> Vec<f64> {
        self.inner
            .ticks
            .read()
            .get(symbol)
            .map(|s| s.prices.iter().copied().collect())
            .unwrap_or_default()
    }

    // ---- positions ----

    /// Replace the position table with the latest sync
    pub fn set_positions(&self, rows: Vec<PositionView>, synced_at: SystemTime) {
        let mut table = self.inner.positions.write();
        table.rows = rows.into_iter().map(|p| (p.symbol.clone(), p)).collect();
        table.synced_at = Some(synced_at);
    }

    pub fn position_symbols(&self) -> Vec<Symbol> {
        self.inner.positions.read().rows.keys().cloned().collect()
    }

    pub fn position(&self, symbol: &Symbol) -> Option<PositionView> {
        self.inner.positions.read().rows.get(symbol).cloned()
    }

    pub fn last_position_sync(&self) -> Option<SystemTime> {
        self.inner.positions.read().synced_at
    }

    // ---- subscriptions ----

    pub fn upsert_subscription(&self, view: SubscriptionView) {
        self.inner
            .subscriptions
            .write()
            .insert(view.symbol.clone(), view);
    }

    pub fn remove_subscription(&self, symbol: &Symbol) -> Option<SubscriptionView> {
        self.inner.subscriptions.write().remove(symbol)
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.read().len()
    }

    pub fn is_subscribed(&self, symbol: &Symbol) -> bool {
        self.inner.subscriptions.read().contains_key(symbol)
    }

    /// Active subscriptions with `last_tick_at` filled from the quote table
    pub fn subscriptions(&self) -> Vec<SubscriptionView> {
        let mut views: Vec<SubscriptionView> =
            self.inner.subscriptions.read().values().cloned().collect();
        let ticks = self.inner.ticks.read();
        for view in &mut views {
            view.last_tick_at = ticks.get(&view.symbol).map(|s| s.last_tick_at);
        }
        views
    }

    pub fn slot_usage(&self) -> SlotUsage {
        let subs = self.inner.subscriptions.read();
        SlotUsage::compute(
            self.inner.capacity,
            self.inner.reserved,
            subs.values().map(|s| s.tier),
        )
    }

    // ---- signals ----

    /// Replace the published scan; a newer scan supersedes every older signal
    pub fn publish_signals(&self, signals: Vec<ScanSignal>) {
        *self.inner.signals.write() = signals;
    }

    pub fn signals(&self) -> Vec<ScanSignal> {
        self.inner.signals.read().clone()
    }

    // ---- orders ----

    pub fn upsert_order(&self, order: Order) {
        let mut orders = self.inner.orders.write();
        orders.insert(order.broker_id.clone(), order);
        prune_terminal_orders(&mut orders, ORDER_RETENTION);
    }

    pub fn order(&self, id: &BrokerOrderId) -> Option<Order> {
        self.inner.orders.read().get(id).cloned()
    }

    /// Whether a non-terminal order exists for the symbol
    pub fn has_open_order(&self, symbol: &Symbol) -> bool {
        self.inner
            .orders
            .read()
            .values()
            .any(|o| &o.symbol == symbol && o.state.is_open())
    }

    // ---- risk ----

    pub fn risk(&self) -> RiskState {
        self.inner.risk.read().clone()
    }

    pub fn increment_open_orders(&self) -> usize {
        let mut risk = self.inner.risk.write();
        risk.open_order_count += 1;
        risk.open_order_count
    }

    pub fn decrement_open_orders(&self) -> usize {
        let mut risk = self.inner.risk.write();
        if risk.open_order_count == 0 {
            error!("Open order count would go negative, clamping at zero");
        }
        risk.open_order_count = risk.open_order_count.saturating_sub(1);
        risk.open_order_count
    }

    pub fn set_daily_pnl(&self, pnl: Decimal) {
        self.inner.risk.write().daily_pnl = pnl;
    }

    /// Latch the breaker; returns true only for the call that tripped it
    pub fn trip_breaker(&self, reason: TripReason) -> bool {
        let mut risk = self.inner.risk.write();
        if risk.breaker_tripped {
            return false;
        }
        risk.breaker_tripped = true;
        risk.trip_reason = Some(reason);
        true
    }

    /// Clear the breaker and daily PnL at a session boundary
    ///
    /// Open orders are still live at the venue, so their count survives.
    pub fn reset_session(&self) -> RiskState {
        let mut risk = self.inner.risk.write();
        let previous = risk.clone();
        risk.daily_pnl = Decimal::ZERO;
        risk.breaker_tripped = false;
        risk.trip_reason = None;
        info!(
            previous_pnl = %previous.daily_pnl,
            was_tripped = previous.breaker_tripped,
            "Session reset"
        );
        previous
    }

    // ---- alerts / heartbeat ----

    pub fn push_alert(&self, alert: Alert) {
        let mut alerts = self.inner.alerts.write();
        if alerts.len() == ALERT_CAPACITY {
            alerts.pop_front();
        }
        alerts.push_back(alert);
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.inner.alerts.read().iter().cloned().collect()
    }

    pub fn set_heartbeat(&self, heartbeat: Heartbeat) {
        *self.inner.heartbeat.write() = Some(heartbeat);
    }

    pub fn heartbeat(&self) -> Option<Heartbeat> {
        self.inner.heartbeat.read().clone()
    }

    /// Consistent point-in-time copy of the whole bus
    pub fn snapshot(&self) -> StateSnapshot {
        let inner = &self.inner;
        let positions = inner.positions.read();
        let subscriptions = inner.subscriptions.read();
        let signals = inner.signals.read();
        let orders = inner.orders.read();
        let risk = inner.risk.read();
        let ticks = inner.ticks.read();
        let alerts = inner.alerts.read();
        let heartbeat = inner.heartbeat.read();

        let subscription_views: Vec<SubscriptionView> = subscriptions
            .values()
            .map(|s| SubscriptionView {
                last_tick_at: ticks.get(&s.symbol).map(|t| t.last_tick_at),
                ..s.clone()
            })
            .collect();

        let slots = SlotUsage::compute(
            inner.capacity,
            inner.reserved,
            subscriptions.values().map(|s| s.tier),
        );

        StateSnapshot {
            taken_at: SystemTime::now(),
            positions: positions.rows.values().cloned().collect(),
            subscriptions: subscription_views,
            signals: signals.clone(),
            orders: orders.values().cloned().collect(),
            risk: risk.clone(),
            quotes: ticks
                .iter()
                .map(|(sym, series)| (sym.clone(), series.quote()))
                .collect(),
            alerts: alerts.iter().cloned().collect(),
            heartbeat: heartbeat.clone(),
            slots,
        }
    }
}

/// Drop the oldest terminal orders beyond `retain`
fn prune_terminal_orders(orders: &mut BTreeMap<BrokerOrderId, Order>, retain: usize) {
    let terminal = orders.values().filter(|o| o.state.is_terminal()).count();
    if terminal <= retain {
        return;
    }

    let mut by_age: Vec<(SystemTime, BrokerOrderId)> = orders
        .values()
        .filter(|o| o.state.is_terminal())
        .map(|o| (o.terminal_at.unwrap_or(o.updated_at), o.broker_id.clone()))
        .collect();
    by_age.sort();

    for (_, id) in by_age.into_iter().take(terminal - retain) {
        orders.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BrokerStatus, OrderStatusEvent, PriorityTier, Side};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn bus() -> StateBus {
        StateBus::new(&Config::default())
    }

    fn sub(symbol: &str, tier: PriorityTier) -> SubscriptionView {
        SubscriptionView {
            symbol: Symbol::new(symbol),
            tier,
            acquired_at: SystemTime::now(),
            last_tick_at: None,
            feed_id: 1,
        }
    }

    #[test]
    fn test_snapshot_not_affected_by_later_writes() {
        let bus = bus();
        let aapl = Symbol::new("AAPL");
        bus.record_tick(&aapl, 190.0, SystemTime::now());
        bus.upsert_subscription(sub("AAPL", PriorityTier::ScannerTop));

        let snap = bus.snapshot();

        bus.record_tick(&aapl, 191.0, SystemTime::now());
        bus.remove_subscription(&aapl);
        bus.set_daily_pnl(dec!(-50));

        assert_eq!(snap.quotes[&aapl].last_price, 190.0);
        assert_eq!(snap.subscriptions.len(), 1);
        assert_eq!(snap.risk.daily_pnl, Decimal::ZERO);
        assert_eq!(snap.slots.active, 1);
    }

    #[test]
    fn test_subscription_last_tick_joined_from_quotes() {
        let bus = bus();
        let msft = Symbol::new("MSFT");
        bus.upsert_subscription(sub("MSFT", PriorityTier::ScannerNormal));
        assert_eq!(bus.subscriptions()[0].last_tick_at, None);

        let at = SystemTime::now();
        bus.record_tick(&msft, 410.0, at);
        assert_eq!(bus.subscriptions()[0].last_tick_at, Some(at));
        assert_eq!(bus.snapshot().subscriptions[0].last_tick_at, Some(at));
    }

    #[test]
    fn test_price_series_is_capped() {
        let mut config = Config::default();
        config.scanners.tick_history = 3;
        let bus = StateBus::new(&config);
        let sym = Symbol::new("NVDA");

        for p in [1.0, 2.0, 3.0, 4.0] {
            bus.record_tick(&sym, p, SystemTime::now());
        }

        assert_eq!(bus.price_series(&sym), vec![2.0, 3.0, 4.0]);
        assert_eq!(bus.quote(&sym).unwrap().tick_count, 4);
    }

    #[test]
    fn test_invalid_ticks_dropped() {
        let bus = bus();
        let sym = Symbol::new("AMD");
        bus.record_tick(&sym, f64::NAN, SystemTime::now());
        bus.record_tick(&sym, -1.0, SystemTime::now());
        assert!(bus.quote(&sym).is_none());
    }

    #[test]
    fn test_clear_ticks_forgets_history() {
        let bus = bus();
        let sym = Symbol::new("AMD");
        bus.record_tick(&sym, 150.0, SystemTime::now());
        bus.clear_ticks(&sym);
        assert!(bus.price_series(&sym).is_empty());
        assert!(bus.last_tick_at(&sym).is_none());
    }

    #[test]
    fn test_breaker_latch_is_idempotent() {
        let bus = bus();
        let reason = TripReason::OpenOrders { count: 10, max: 10 };

        assert!(bus.trip_breaker(reason.clone()));
        assert!(!bus.trip_breaker(TripReason::DailyLoss {
            daily_pnl: dec!(-2000),
            limit: dec!(1000),
        }));

        let risk = bus.risk();
        assert!(risk.breaker_tripped);
        assert_eq!(risk.trip_reason, Some(reason));
    }

    #[test]
    fn test_reset_session_keeps_open_orders() {
        let bus = bus();
        bus.increment_open_orders();
        bus.set_daily_pnl(dec!(-1500));
        bus.trip_breaker(TripReason::DailyLoss {
            daily_pnl: dec!(-1500),
            limit: dec!(1000),
        });

        let previous = bus.reset_session();
        assert!(previous.breaker_tripped);

        let risk = bus.risk();
        assert!(!risk.breaker_tripped);
        assert_eq!(risk.trip_reason, None);
        assert_eq!(risk.daily_pnl, Decimal::ZERO);
        assert_eq!(risk.open_order_count, 1);
    }

    #[test]
    fn test_open_order_count_never_negative() {
        let bus = bus();
        assert_eq!(bus.decrement_open_orders(), 0);
        assert_eq!(bus.increment_open_orders(), 1);
        assert_eq!(bus.decrement_open_orders(), 0);
    }

    #[test]
    fn test_alert_ring_capped() {
        let bus = bus();
        for i in 0..(ALERT_CAPACITY + 5) {
            bus.push_alert(Alert::new(None, AlertKind::BreakerTripped, format!("alert {}", i)));
        }
        let alerts = bus.alerts();
        assert_eq!(alerts.len(), ALERT_CAPACITY);
        assert_eq!(alerts[0].message, "alert 5");
    }

    #[test]
    fn test_terminal_orders_pruned_oldest_first() {
        let mut orders = BTreeMap::new();
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);

        for i in 0..5u64 {
            let id = BrokerOrderId::new(format!("O-{}", i));
            let mut order = Order::created(id.clone(), Symbol::new("SPY"), Side::Buy, 1);
            order.apply(&OrderStatusEvent::new(id.clone(), BrokerStatus::Submitted, 0));
            let mut done = OrderStatusEvent::new(id.clone(), BrokerStatus::Cancelled, 0);
            done.at = base + Duration::from_secs(i);
            order.apply(&done);
            orders.insert(id, order);
        }
        let live = BrokerOrderId::new("LIVE");
        orders.insert(
            live.clone(),
            Order::created(live.clone(), Symbol::new("SPY"), Side::Buy, 1),
        );

        prune_terminal_orders(&mut orders, 2);

        assert_eq!(orders.len(), 3);
        assert!(orders.contains_key(&live));
        assert!(orders.contains_key(&BrokerOrderId::new("O-3")));
        assert!(orders.contains_key(&BrokerOrderId::new("O-4")));
    }

    #[test]
    fn test_has_open_order() {
        let bus = bus();
        let sym = Symbol::new("TSLA");
        let id = BrokerOrderId::new("T-1");
        bus.upsert_order(Order::created(id, sym.clone(), Side::Sell, 5));
        assert!(bus.has_open_order(&sym));
        assert!(!bus.has_open_order(&Symbol::new("AAPL")));
    }

    #[test]
    fn test_set_positions_replaces_table() {
        let bus = bus();
        let now = SystemTime::now();
        bus.set_positions(
            vec![
                PositionView::new(Symbol::new("SPY"), 10, dec!(500)),
                PositionView::new(Symbol::new("QQQ"), -5, dec!(400)),
            ],
            now,
        );
        bus.set_positions(vec![PositionView::new(Symbol::new("SPY"), 10, dec!(500))], now);

        assert_eq!(bus.position_symbols(), vec![Symbol::new("SPY")]);
        assert_eq!(bus.last_position_sync(), Some(now));
    }
}
