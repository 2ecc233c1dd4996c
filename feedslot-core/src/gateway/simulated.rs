//! Paper venue
//!
//! Self-contained venue for paper trading and tests:
//! - Random-walk prices per symbol, one tick task per open feed
//! - Hard cap on concurrent feeds (`FeedLimit` beyond it)
//! - Orders filled after a configurable latency: Submitted, PartiallyFilled, Filled
//! - Positions and realized PnL updated from fills

use super::{
    BrokerGateway, BrokerPosition, Bar, GatewayEvents, OrderRequest, ScanCriteria, TickEvent,
    EVENT_CHANNEL_CAPACITY,
};
use crate::config::SimulatedVenueConfig;
use crate::core::{
    BrokerOrderId, BrokerStatus, FeedHandle, GatewayError, OrderStatusEvent, Side, Symbol,
};
use parking_lot::Mutex;
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Probability that generated history ends in a breakout bar
const BREAKOUT_BAR_PROBABILITY: f64 = 0.2;

#[derive(Debug, Clone, Copy)]
struct SimPosition {
    quantity: i64,
    avg_cost: Decimal,
}

#[derive(Debug, Default)]
struct Book {
    positions: BTreeMap<Symbol, SimPosition>,
    realized: Decimal,
}

struct Venue {
    feed_limit: usize,
    universe: Vec<Symbol>,
    tick_interval: Duration,
    fill_latency: Duration,
    reject_rate: f64,
    volatility: f64,

    prices: Mutex<HashMap<Symbol, f64>>,
    book: Mutex<Book>,
    feeds: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_feed: AtomicU64,
    next_order: AtomicU64,

    tick_tx: mpsc::Sender<TickEvent>,
    order_tx: mpsc::Sender<OrderStatusEvent>,
}

impl Venue {
    fn price(&self, symbol: &Symbol) -> f64 {
        *self
            .prices
            .lock()
            .entry(symbol.clone())
            .or_insert_with(|| base_price(symbol))
    }

    /// Advance the random walk one step
    fn step(&self, symbol: &Symbol) -> f64 {
        let shock = rand::thread_rng().gen_range(-1.0..1.0) * self.volatility;
        let mut prices = self.prices.lock();
        let price = prices
            .entry(symbol.clone())
            .or_insert_with(|| base_price(symbol));
        *price = (*price * (1.0 + shock)).max(0.01);
        *price
    }

    fn apply_fill(&self, symbol: &Symbol, side: Side, quantity: u64, price: f64) {
        let price = Decimal::from_f64_retain(price)
            .unwrap_or_default()
            .round_dp(4);
        let signed = match side {
            Side::Buy => quantity as i64,
            Side::Sell => -(quantity as i64),
        };

        let mut book = self.book.lock();
        let pos = book.positions.entry(symbol.clone()).or_insert(SimPosition {
            quantity: 0,
            avg_cost: price,
        });
        let mut pos_after = *pos;
        let mut realized = Decimal::ZERO;

        if pos.quantity == 0 || pos.quantity.signum() == signed.signum() {
            let new_qty = pos.quantity + signed;
            pos_after.avg_cost = (pos.avg_cost * Decimal::from(pos.quantity.abs())
                + price * Decimal::from(signed.abs()))
                / Decimal::from(new_qty.abs());
            pos_after.quantity = new_qty;
        } else {
            let closing = signed.abs().min(pos.quantity.abs());
            realized = (price - pos.avg_cost)
                * Decimal::from(closing)
                * Decimal::from(pos.quantity.signum());
            let new_qty = pos.quantity + signed;
            if new_qty != 0 && new_qty.signum() != pos.quantity.signum() {
                pos_after.avg_cost = price;
            }
            pos_after.quantity = new_qty;
        }

        *pos = pos_after;
        book.realized += realized;
    }

    async fn emit(&self, event: OrderStatusEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.order_tx.send(event).await;
    }
}

/// Deterministic starting price in [20, 500)
fn base_price(symbol: &Symbol) -> f64 {
    let h = symbol
        .as_str()
        .bytes()
        .fold(7u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
    20.0 + (h % 48_000) as f64 / 100.0
}

/// Simulated broker venue
pub struct SimulatedGateway {
    venue: Arc<Venue>,
    events: Mutex<Option<GatewayEvents>>,
}

impl SimulatedGateway {
    pub fn new(config: &SimulatedVenueConfig) -> Self {
        let (tick_tx, ticks) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (order_tx, orders) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let mut prices = HashMap::new();
        let mut book = Book::default();
        for seed in &config.positions {
            let symbol = Symbol::new(&seed.symbol);
            prices.insert(
                symbol.clone(),
                seed.avg_cost.to_f64().unwrap_or_else(|| base_price(&symbol)),
            );
            book.positions.insert(
                symbol,
                SimPosition {
                    quantity: seed.quantity,
                    avg_cost: seed.avg_cost,
                },
            );
        }

        info!(
            feed_limit = config.feed_limit,
            universe = config.universe.len(),
            seeded_positions = config.positions.len(),
            "Simulated venue ready"
        );

        Self {
            venue: Arc::new(Venue {
                feed_limit: config.feed_limit,
                universe: config.universe.iter().map(|s| Symbol::new(s)).collect(),
                tick_interval: Duration::from_millis(config.tick_interval_ms.max(1)),
                fill_latency: Duration::from_millis(config.fill_latency_ms.max(1)),
                reject_rate: config.reject_rate.clamp(0.0, 1.0),
                volatility: config.volatility.abs(),
                prices: Mutex::new(prices),
                book: Mutex::new(book),
                feeds: Mutex::new(HashMap::new()),
                next_feed: AtomicU64::new(1),
                next_order: AtomicU64::new(1),
                tick_tx,
                order_tx,
            }),
            events: Mutex::new(Some(GatewayEvents { ticks, orders })),
        }
    }

    /// Feeds currently streaming
    pub fn open_feed_count(&self) -> usize {
        self.venue.feeds.lock().len()
    }

    /// Current simulated price, for tests and demos
    pub fn price_of(&self, symbol: &Symbol) -> f64 {
        self.venue.price(symbol)
    }
}

impl Drop for SimulatedGateway {
    fn drop(&mut self) {
        for (_, task) in self.venue.feeds.lock().drain() {
            task.abort();
        }
    }
}

impl BrokerGateway for SimulatedGateway {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn open_feed(&self, symbol: &Symbol) -> Result<FeedHandle, GatewayError> {
        let mut feeds = self.venue.feeds.lock();
        if feeds.len() >= self.venue.feed_limit {
            return Err(GatewayError::FeedLimit {
                limit: self.venue.feed_limit,
            });
        }

        let id = self.venue.next_feed.fetch_add(1, Ordering::Relaxed);
        let venue = Arc::clone(&self.venue);
        let sym = symbol.clone();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(venue.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let price = venue.step(&sym);
                let tick = TickEvent {
                    symbol: sym.clone(),
                    price,
                    at: SystemTime::now(),
                };
                if venue.tick_tx.send(tick).await.is_err() {
                    break;
                }
            }
        });

        feeds.insert(id, task);
        debug!(symbol = %symbol, feed_id = id, open = feeds.len(), "Feed opened");
        Ok(FeedHandle::new(id, symbol.clone()))
    }

    async fn close_feed(&self, handle: FeedHandle) -> Result<(), GatewayError> {
        if let Some(task) = self.venue.feeds.lock().remove(&handle.id()) {
            task.abort();
            debug!(symbol = %handle.symbol(), feed_id = handle.id(), "Feed closed");
        }
        Ok(())
    }

    async fn sync_positions(&self) -> Result<Vec<BrokerPosition>, GatewayError> {
        Ok(self
            .venue
            .book
            .lock()
            .positions
            .iter()
            .map(|(symbol, pos)| BrokerPosition {
                symbol: symbol.clone(),
                quantity: pos.quantity,
                avg_cost: pos.avg_cost,
            })
            .collect())
    }

    async fn scanner_query(&self, criteria: &ScanCriteria) -> Result<Vec<Symbol>, GatewayError> {
        Ok(self
            .venue
            .universe
            .iter()
            .take(criteria.max_results)
            .cloned()
            .collect())
    }

    async fn historical_bars(&self, symbol: &Symbol, count: usize) -> Result<Vec<Bar>, GatewayError> {
        let last_close = self.venue.price(symbol);
        Ok(synthetic_bars(last_close, count, self.venue.volatility.max(0.001)))
    }

    async fn daily_pnl(&self) -> Result<Decimal, GatewayError> {
        let marks: Vec<(Symbol, SimPosition)> = {
            let book = self.venue.book.lock();
            book.positions.iter().map(|(s, p)| (s.clone(), *p)).collect()
        };

        let mut unrealized = Decimal::ZERO;
        for (symbol, pos) in marks {
            let mark = Decimal::from_f64_retain(self.venue.price(&symbol)).unwrap_or(pos.avg_cost);
            unrealized += (mark - pos.avg_cost) * Decimal::from(pos.quantity);
        }

        let realized = self.venue.book.lock().realized;
        Ok((realized + unrealized).round_dp(2))
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<BrokerOrderId, GatewayError> {
        let n = self.venue.next_order.fetch_add(1, Ordering::Relaxed);
        let id = BrokerOrderId::new(format!("SIM-{}", n));
        let rejected = {
            let mut rng = rand::thread_rng();
            rng.gen_bool(self.venue.reject_rate)
        };

        let venue = Arc::clone(&self.venue);
        let order_id = id.clone();
        let request = request.clone();

        tokio::spawn(async move {
            let latency = venue.fill_latency;

            tokio::time::sleep(latency).await;
            venue
                .emit(OrderStatusEvent::new(order_id.clone(), BrokerStatus::Submitted, 0))
                .await;

            if rejected {
                tokio::time::sleep(latency).await;
                venue
                    .emit(
                        OrderStatusEvent::new(order_id, BrokerStatus::Rejected, 0)
                            .with_reason("simulated venue reject"),
                    )
                    .await;
                return;
            }

            let half = request.quantity / 2;
            if half > 0 {
                tokio::time::sleep(latency).await;
                venue
                    .emit(OrderStatusEvent::new(
                        order_id.clone(),
                        BrokerStatus::PartiallyFilled,
                        half,
                    ))
                    .await;
            }

            tokio::time::sleep(latency).await;
            let fill_price = venue.price(&request.symbol);
            venue.apply_fill(&request.symbol, request.side, request.quantity, fill_price);
            venue
                .emit(OrderStatusEvent::new(
                    order_id,
                    BrokerStatus::Filled,
                    request.quantity,
                ))
                .await;
        });

        Ok(id)
    }

    fn take_events(&self) -> Option<GatewayEvents> {
        self.events.lock().take()
    }
}

/// Random-walk bars ending at `last_close`, oldest first
///
/// Some series end in a wide, high-volume bar so breakout scanning has
/// something to find.
fn synthetic_bars(last_close: f64, count: usize, volatility: f64) -> Vec<Bar> {
    let mut rng = rand::thread_rng();
    let mut bars = Vec::with_capacity(count);
    let breakout = rng.gen_bool(BREAKOUT_BAR_PROBABILITY);
    let direction = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };

    let mut close = last_close;
    for i in 0..count {
        let is_last = i == 0;
        let move_pct = if is_last && breakout {
            direction * volatility * rng.gen_range(8.0..12.0)
        } else {
            rng.gen_range(-1.0..1.0) * volatility * 3.0
        };
        let open = (close / (1.0 + move_pct)).max(0.01);
        let wick = close.max(open) * volatility * rng.gen_range(0.0..1.0);
        let volume = if is_last && breakout {
            rng.gen_range(250_000.0..400_000.0)
        } else {
            rng.gen_range(80_000.0..120_000.0)
        };

        bars.push(Bar {
            open,
            high: close.max(open) + wick,
            low: (close.min(open) - wick).max(0.01),
            close,
            volume,
        });
        close = open;
    }

    bars.reverse();
    bars
}
