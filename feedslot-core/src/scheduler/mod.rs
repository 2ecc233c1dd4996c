//! Subscription Scheduler
//!
//! Owns the fixed-capacity pool of live market-data feeds and arbitrates
//! between competing requests by priority tier.
//!
//! ## Admission
//!
//! ```text
//! request_slot(symbol, tier)
//!   ├─ already active        → raise tier, Admitted (no feed call)
//!   ├─ free slot for tier    → open feed, Admitted
//!   ├─ lower tier evictable  → close victim, open feed, Evicted(victim)
//!   └─ otherwise             → Rejected(CapacityFull)
//! ```
//!
//! Decisions are serialized behind one async mutex held across the feed
//! side effect, so the pool and the venue never disagree about what is open.
//! Every gateway call is bounded by the configured call timeout.

pub mod pool;

pub use pool::{Plan, SlotEntry, SlotPool};

use crate::config::Config;
use crate::core::{ConfigError, FeedHandle, PriorityTier, Symbol};
use crate::gateway::{call_with_timeout, BrokerGateway};
use crate::monitoring::MetricsRegistry;
use crate::state::{Alert, AlertKind, SlotUsage, StateBus, SubscriptionView};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Why a request got no slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Pool full and nothing of lower tier to evict
    CapacityFull,
    /// The venue refused or timed out opening the feed
    FeedUnavailable,
    /// Shutdown has begun
    ShuttingDown,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::CapacityFull => "capacity_full",
            RejectReason::FeedUnavailable => "feed_unavailable",
            RejectReason::ShuttingDown => "shutting_down",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer to `request_slot`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotDecision {
    Admitted,
    /// Admitted after evicting the named symbol
    Evicted(Symbol),
    Rejected(RejectReason),
}

impl SlotDecision {
    /// Whether the requested symbol now holds a slot
    pub fn is_admitted(&self) -> bool {
        matches!(self, SlotDecision::Admitted | SlotDecision::Evicted(_))
    }

    fn outcome(&self) -> &'static str {
        match self {
            SlotDecision::Admitted => "admitted",
            SlotDecision::Evicted(_) => "evicted",
            SlotDecision::Rejected(reason) => reason.as_str(),
        }
    }
}

/// Fatal when open positions alone would not fit in the pool
pub fn ensure_position_capacity(positions: usize, capacity: usize) -> Result<(), ConfigError> {
    if positions > capacity {
        return Err(ConfigError::PositionsExceedCapacity {
            positions,
            capacity,
        });
    }
    Ok(())
}

/// Fixed-capacity subscription arbiter
pub struct SubscriptionScheduler<G> {
    gateway: Arc<G>,
    bus: StateBus,
    metrics: MetricsRegistry,
    pool: Mutex<SlotPool<FeedHandle>>,
    shutting_down: AtomicBool,
    call_timeout: Duration,
}

impl<G: BrokerGateway> SubscriptionScheduler<G> {
    pub fn new(gateway: Arc<G>, bus: StateBus, metrics: MetricsRegistry, config: &Config) -> Self {
        Self {
            gateway,
            bus,
            metrics,
            pool: Mutex::new(SlotPool::new(
                config.slots.capacity,
                config.slots.reserved_for_positions,
            )),
            shutting_down: AtomicBool::new(false),
            call_timeout: config.gateway.call_timeout(),
        }
    }

    /// Ask for a live feed for `symbol` at `tier`
    ///
    /// Never retries; a rejected caller tries again on its next iteration.
    pub async fn request_slot(&self, symbol: &Symbol, tier: PriorityTier) -> SlotDecision {
        if self.is_shutting_down() {
            return self.record(SlotDecision::Rejected(RejectReason::ShuttingDown));
        }

        let mut pool = self.pool.lock().await;

        // Shutdown may have started while we waited for the lock
        if self.is_shutting_down() {
            return self.record(SlotDecision::Rejected(RejectReason::ShuttingDown));
        }

        let decision = match pool.plan(symbol, tier) {
            Plan::AlreadyActive { current } => {
                if tier > current {
                    pool.raise_tier(symbol, tier);
                    if let Some(entry) = pool.get(symbol) {
                        self.publish(entry);
                    }
                    info!(symbol = %symbol, from = %current, to = %tier, "Subscription promoted");
                }
                SlotDecision::Admitted
            }
            Plan::Open => match self.open_feed(symbol).await {
                Some(handle) => {
                    self.commit(&mut pool, symbol, tier, handle);
                    info!(symbol = %symbol, tier = %tier, active = pool.active(), "Subscription admitted");
                    SlotDecision::Admitted
                }
                None => SlotDecision::Rejected(RejectReason::FeedUnavailable),
            },
            Plan::Evict { victim } => {
                if let Some(entry) = pool.remove(&victim) {
                    let victim_tier = entry.tier;
                    self.close_entry(entry).await;
                    self.metrics.slots().evictions_total.inc();
                    info!(
                        symbol = %symbol,
                        tier = %tier,
                        victim = %victim,
                        victim_tier = %victim_tier,
                        "Evicted lower-priority subscription"
                    );
                }

                // Victim stays evicted even if the new feed fails to open
                match self.open_feed(symbol).await {
                    Some(handle) => {
                        self.commit(&mut pool, symbol, tier, handle);
                        SlotDecision::Evicted(victim)
                    }
                    None => SlotDecision::Rejected(RejectReason::FeedUnavailable),
                }
            }
            Plan::Reject => {
                if tier.is_pinned() {
                    error!(
                        symbol = %symbol,
                        capacity = pool.capacity(),
                        positions = pool.positions(),
                        "No slot for position: capacity exhausted by positions"
                    );
                    self.bus.push_alert(Alert::new(
                        Some(symbol.clone()),
                        AlertKind::PositionUnsubscribed,
                        format!("no feed slot for position {}", symbol),
                    ));
                } else {
                    debug!(symbol = %symbol, tier = %tier, "Slot request rejected: capacity full");
                }
                SlotDecision::Rejected(RejectReason::CapacityFull)
            }
        };

        self.update_gauges(&pool);
        self.record(decision)
    }

    /// Give up the slot for `symbol`; returns whether one was held
    pub async fn release(&self, symbol: &Symbol) -> bool {
        let mut pool = self.pool.lock().await;
        let released = match pool.remove(symbol) {
            Some(entry) => {
                self.close_entry(entry).await;
                info!(symbol = %symbol, "Subscription released");
                true
            }
            None => false,
        };
        self.update_gauges(&pool);
        released
    }

    /// Release scanner subscriptions with no tick for longer than `max_idle`
    pub async fn evict_idle(&self, max_idle: Duration) -> Vec<Symbol> {
        let mut pool = self.pool.lock().await;
        let idle = pool.idle(SystemTime::now(), max_idle, |s| self.bus.last_tick_at(s));

        for symbol in &idle {
            if let Some(entry) = pool.remove(symbol) {
                self.close_entry(entry).await;
                self.metrics.slots().idle_releases_total.inc();
                info!(symbol = %symbol, max_idle_secs = max_idle.as_secs(), "Idle subscription released");
            }
        }

        if !idle.is_empty() {
            self.update_gauges(&pool);
        }
        idle
    }

    /// Refuse all further requests
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Refuse new requests, then close every feed
    pub async fn release_all(&self) -> usize {
        self.begin_shutdown();
        let mut pool = self.pool.lock().await;
        let entries = pool.drain();
        let count = entries.len();

        for entry in entries {
            self.close_entry(entry).await;
        }

        self.update_gauges(&pool);
        info!(released = count, "All subscriptions released");
        count
    }

    pub async fn usage(&self) -> SlotUsage {
        self.pool.lock().await.usage()
    }

    pub async fn is_active(&self, symbol: &Symbol) -> bool {
        self.pool.lock().await.contains(symbol)
    }

    pub async fn tier_of(&self, symbol: &Symbol) -> Option<PriorityTier> {
        self.pool.lock().await.get(symbol).map(|e| e.tier)
    }

    async fn open_feed(&self, symbol: &Symbol) -> Option<FeedHandle> {
        match call_with_timeout("open_feed", self.call_timeout, self.gateway.open_feed(symbol)).await
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Failed to open feed");
                self.metrics
                    .system()
                    .gateway_failures_total
                    .with_label_values(&["open_feed"])
                    .inc();
                None
            }
        }
    }

    /// Unpublish and close; the handle is consumed either way
    async fn close_entry(&self, entry: SlotEntry<FeedHandle>) {
        self.bus.remove_subscription(&entry.symbol);
        self.bus.clear_ticks(&entry.symbol);

        let symbol = entry.symbol;
        if let Err(e) =
            call_with_timeout("close_feed", self.call_timeout, self.gateway.close_feed(entry.handle))
                .await
        {
            warn!(symbol = %symbol, error = %e, "Failed to close feed, slot freed locally");
            self.metrics
                .system()
                .gateway_failures_total
                .with_label_values(&["close_feed"])
                .inc();
        }
    }

    fn commit(
        &self,
        pool: &mut SlotPool<FeedHandle>,
        symbol: &Symbol,
        tier: PriorityTier,
        handle: FeedHandle,
    ) {
        pool.insert(symbol.clone(), tier, SystemTime::now(), handle);
        if let Some(entry) = pool.get(symbol) {
            self.publish(entry);
        }
    }

    fn publish(&self, entry: &SlotEntry<FeedHandle>) {
        self.bus.upsert_subscription(SubscriptionView {
            symbol: entry.symbol.clone(),
            tier: entry.tier,
            acquired_at: entry.acquired_at,
            last_tick_at: None,
            feed_id: entry.handle.id(),
        });
    }

    fn update_gauges(&self, pool: &SlotPool<FeedHandle>) {
        let usage = pool.usage();
        let slots = self.metrics.slots();
        slots.active.set(usage.active as i64);
        for (tier, count) in [
            (PriorityTier::Position, usage.positions),
            (PriorityTier::ScannerTop, usage.scanner_top),
            (PriorityTier::ScannerNormal, usage.scanner_normal),
        ] {
            slots
                .active_by_tier
                .with_label_values(&[tier.as_str()])
                .set(count as i64);
        }
    }

    fn record(&self, decision: SlotDecision) -> SlotDecision {
        self.metrics
            .slots()
            .decisions_total
            .with_label_values(&[decision.outcome()])
            .inc();
        decision
    }
}
