//! Scripted in-memory gateway for tests
//!
//! Every response is set up front by the test; every call is recorded so the
//! test can assert on it afterwards. Ticks and order events are pushed by the
//! test through the same channels a real gateway would use.

use crate::core::{BrokerOrderId, FeedHandle, GatewayError, OrderStatusEvent, Symbol};
use crate::gateway::{
    BrokerGateway, BrokerPosition, Bar, GatewayEvents, OrderRequest, ScanCriteria, TickEvent,
    EVENT_CHANNEL_CAPACITY,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;

#[derive(Default)]
struct Script {
    open_feeds: BTreeMap<u64, Symbol>,
    open_calls: usize,
    closed: Vec<Symbol>,
    fail_open: HashSet<Symbol>,
    open_delay: Option<Duration>,
    failing_calls: HashSet<&'static str>,

    positions: Vec<BrokerPosition>,
    candidates: Vec<Symbol>,
    bars: HashMap<Symbol, Vec<Bar>>,
    daily_pnl: Decimal,
    placed: Vec<OrderRequest>,
}

/// Programmable `BrokerGateway`
pub struct MockGateway {
    script: Mutex<Script>,
    tick_tx: Mutex<Option<mpsc::Sender<TickEvent>>>,
    order_tx: Mutex<Option<mpsc::Sender<OrderStatusEvent>>>,
    events: Mutex<Option<GatewayEvents>>,
    next_feed: AtomicU64,
    next_order: AtomicU64,
}

impl MockGateway {
    pub fn new() -> Self {
        let (tick_tx, ticks) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (order_tx, orders) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            script: Mutex::new(Script::default()),
            tick_tx: Mutex::new(Some(tick_tx)),
            order_tx: Mutex::new(Some(order_tx)),
            events: Mutex::new(Some(GatewayEvents { ticks, orders })),
            next_feed: AtomicU64::new(1),
            next_order: AtomicU64::new(1),
        }
    }

    // ---- scripting ----

    pub fn set_positions(&self, positions: Vec<BrokerPosition>) {
        self.script.lock().positions = positions;
    }

    pub fn set_candidates(&self, candidates: Vec<Symbol>) {
        self.script.lock().candidates = candidates;
    }

    pub fn set_bars(&self, symbol: &Symbol, bars: Vec<Bar>) {
        self.script.lock().bars.insert(symbol.clone(), bars);
    }

    pub fn set_daily_pnl(&self, pnl: Decimal) {
        self.script.lock().daily_pnl = pnl;
    }

    /// Make `open_feed` fail for this symbol
    pub fn fail_open_for(&self, symbol: &Symbol) {
        self.script.lock().fail_open.insert(symbol.clone());
    }

    /// Make every call with this name fail with `Unavailable`
    pub fn fail_call(&self, call: &'static str) {
        self.script.lock().failing_calls.insert(call);
    }

    pub fn clear_failures(&self) {
        let mut script = self.script.lock();
        script.fail_open.clear();
        script.failing_calls.clear();
        script.open_delay = None;
    }

    /// Delay every `open_feed` (to exercise timeouts)
    pub fn set_open_delay(&self, delay: Duration) {
        self.script.lock().open_delay = Some(delay);
    }

    pub async fn push_tick(&self, symbol: &Symbol, price: f64) {
        let tick = TickEvent {
            symbol: symbol.clone(),
            price,
            at: SystemTime::now(),
        };
        let tx = self.tick_tx.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(tick).await;
        }
    }

    pub async fn push_order_event(&self, event: OrderStatusEvent) {
        let tx = self.order_tx.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    /// Drop the tick sender so the stream ends, as on a lost market-data link
    pub fn close_tick_stream(&self) {
        self.tick_tx.lock().take();
    }

    // ---- inspection ----

    /// Symbols with an open feed, in symbol order
    pub fn open_symbols(&self) -> Vec<Symbol> {
        let mut open: Vec<Symbol> = self.script.lock().open_feeds.values().cloned().collect();
        open.sort();
        open
    }

    pub fn open_calls(&self) -> usize {
        self.script.lock().open_calls
    }

    /// Symbols whose feed was closed, in call order
    pub fn closed(&self) -> Vec<Symbol> {
        self.script.lock().closed.clone()
    }

    pub fn placed_orders(&self) -> Vec<OrderRequest> {
        self.script.lock().placed.clone()
    }

    fn check(&self, call: &'static str) -> Result<(), GatewayError> {
        if self.script.lock().failing_calls.contains(call) {
            return Err(GatewayError::Unavailable(format!("scripted failure: {}", call)));
        }
        Ok(())
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerGateway for MockGateway {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn open_feed(&self, symbol: &Symbol) -> Result<FeedHandle, GatewayError> {
        let delay = self.script.lock().open_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check("open_feed")?;

        let mut script = self.script.lock();
        script.open_calls += 1;
        if script.fail_open.contains(symbol) {
            return Err(GatewayError::UnknownSymbol(symbol.to_string()));
        }

        let id = self.next_feed.fetch_add(1, Ordering::Relaxed);
        script.open_feeds.insert(id, symbol.clone());
        Ok(FeedHandle::new(id, symbol.clone()))
    }

    async fn close_feed(&self, handle: FeedHandle) -> Result<(), GatewayError> {
        let mut script = self.script.lock();
        script.open_feeds.remove(&handle.id());
        script.closed.push(handle.symbol().clone());
        Ok(())
    }

    async fn sync_positions(&self) -> Result<Vec<BrokerPosition>, GatewayError> {
        self.check("sync_positions")?;
        Ok(self.script.lock().positions.clone())
    }

    async fn scanner_query(&self, criteria: &ScanCriteria) -> Result<Vec<Symbol>, GatewayError> {
        self.check("scanner_query")?;
        Ok(self
            .script
            .lock()
            .candidates
            .iter()
            .take(criteria.max_results)
            .cloned()
            .collect())
    }

    async fn historical_bars(&self, symbol: &Symbol, count: usize) -> Result<Vec<Bar>, GatewayError> {
        self.check("historical_bars")?;
        let script = self.script.lock();
        let bars = script
            .bars
            .get(symbol)
            .ok_or_else(|| GatewayError::UnknownSymbol(symbol.to_string()))?;
        let skip = bars.len().saturating_sub(count);
        Ok(bars[skip..].to_vec())
    }

    async fn daily_pnl(&self) -> Result<Decimal, GatewayError> {
        self.check("daily_pnl")?;
        Ok(self.script.lock().daily_pnl)
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<BrokerOrderId, GatewayError> {
        self.check("place_order")?;
        self.script.lock().placed.push(request.clone());
        let n = self.next_order.fetch_add(1, Ordering::Relaxed);
        Ok(BrokerOrderId::new(format!("MOCK-{}", n)))
    }

    fn take_events(&self) -> Option<GatewayEvents> {
        self.events.lock().take()
    }
}
