//! Market scanner
//!
//! Each iteration releases idle scanner feeds, asks the venue for candidates
//! and evaluates every candidate for a breakout. The resulting signals replace
//! the previous scan on the State Bus. Signals scoring at least `min_score`
//! then request slots in the order the venue ranked them, SCANNER_TOP when the
//! score reaches `top_score`, SCANNER_NORMAL otherwise.
//!
//! The breaker is checked once per iteration: while tripped no slot is
//! requested and no order is placed.

use super::{Pacer, ScannerContext};
use crate::core::{GatewayError, PriorityTier, SubmitError, Symbol};
use crate::gateway::{BrokerGateway, OrderRequest, ScanCriteria};
use crate::indicators::{evaluate_breakout, params_label};
use crate::resilience::DataGuard;
use crate::risk::BreakerStatus;
use crate::scheduler::SlotDecision;
use crate::state::ScanSignal;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

const SCANNER: &str = "market";

/// What one iteration did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarketScanReport {
    pub idle_released: usize,
    pub candidates: usize,
    pub signals: usize,
    pub admitted: usize,
    pub evicted: usize,
    pub rejected: usize,
    pub orders_placed: usize,
    pub breaker_tripped: bool,
}

pub struct MarketScanner<G> {
    ctx: Arc<ScannerContext<G>>,
    guard: DataGuard,
    params_label: String,
}

impl<G: BrokerGateway> MarketScanner<G> {
    pub fn new(ctx: Arc<ScannerContext<G>>) -> Self {
        let guard = DataGuard::new(ctx.config.scanners.stale_threshold());
        let params_label = params_label(&ctx.config.breakout);
        Self {
            ctx,
            guard,
            params_label,
        }
    }

    /// Loop until the kill switch fires
    pub async fn run(self) {
        let mut pace = Pacer::new(
            self.ctx.config.scanners.market_interval(),
            self.ctx.kill_switch.clone(),
        );
        while pace.next().await {
            self.iterate().await;
        }
        info!("Market scanner stopped");
    }

    /// One iteration with metrics; failures are logged and retried next period
    pub async fn iterate(&self) {
        let started = std::time::Instant::now();
        let result = self.run_once().await;

        let metrics = self.ctx.metrics.scanners();
        metrics
            .iteration_seconds
            .with_label_values(&[SCANNER])
            .observe(started.elapsed().as_secs_f64());

        match result {
            Ok(report) => {
                metrics.iterations_total.with_label_values(&[SCANNER]).inc();
                info!(
                    candidates = report.candidates,
                    signals = report.signals,
                    admitted = report.admitted,
                    evicted = report.evicted,
                    rejected = report.rejected,
                    idle_released = report.idle_released,
                    orders = report.orders_placed,
                    "Market scan complete"
                );
            }
            Err(e) => {
                metrics.errors_total.with_label_values(&[SCANNER]).inc();
                warn!(error = %e, "Market scan failed");
            }
        }
    }

    pub async fn run_once(&self) -> Result<MarketScanReport, GatewayError> {
        let ctx = &self.ctx;
        let mut report = MarketScanReport::default();

        report.idle_released = ctx
            .scheduler
            .evict_idle(ctx.config.slots.idle_eviction())
            .await
            .len();

        let criteria = ScanCriteria {
            max_results: ctx.config.scanners.max_candidates,
        };
        let candidates = ctx
            .call("scanner_query", ctx.gateway.scanner_query(&criteria))
            .await?;
        report.candidates = candidates.len();

        let signals = self.evaluate(candidates).await;
        report.signals = signals.len();
        ctx.metrics.scanners().signals.set(signals.len() as i64);
        ctx.bus.publish_signals(signals.clone());

        if let BreakerStatus::Tripped(reason) = ctx.risk.enforce(&ctx.bus) {
            warn!(reason = %reason, "Breaker tripped, skipping slot requests");
            ctx.metrics.risk().breaker_tripped.set(1);
            report.breaker_tripped = true;
            return Ok(report);
        }

        let mut trading = ctx.config.scanners.auto_trade;
        for signal in signals
            .iter()
            .filter(|s| s.score >= ctx.config.scanners.min_score)
        {
            if ctx.kill_switch.should_stop() {
                debug!("Stop requested, abandoning remaining signals");
                break;
            }

            let decision = ctx.scheduler.request_slot(&signal.symbol, signal.tier).await;
            match &decision {
                SlotDecision::Admitted => report.admitted += 1,
                // The scheduler logs the eviction itself
                SlotDecision::Evicted(_) => report.evicted += 1,
                SlotDecision::Rejected(reason) => {
                    report.rejected += 1;
                    debug!(symbol = %signal.symbol, score = signal.score, reason = %reason, "Signal got no slot");
                }
            }

            if trading
                && decision.is_admitted()
                && signal.tier == PriorityTier::ScannerTop
                && !ctx.kill_switch.should_stop()
            {
                match self.enter(signal).await {
                    Ok(true) => report.orders_placed += 1,
                    Ok(false) => {}
                    Err(SubmitError::BreakerTripped(_)) => trading = false,
                    Err(_) => {}
                }
            }
        }

        Ok(report)
    }

    /// Breakout signals for the candidates, in candidate order
    ///
    /// Held positions are left to the position scanner. A candidate whose
    /// bars cannot be fetched is skipped.
    async fn evaluate(&self, candidates: Vec<Symbol>) -> Vec<ScanSignal> {
        let ctx = &self.ctx;
        let held: HashSet<Symbol> = ctx.bus.position_symbols().into_iter().collect();
        let mut seen = HashSet::new();
        let mut signals = Vec::new();

        for symbol in candidates {
            if held.contains(&symbol) || !seen.insert(symbol.clone()) {
                continue;
            }

            let bars = match ctx
                .call(
                    "historical_bars",
                    ctx.gateway
                        .historical_bars(&symbol, ctx.config.scanners.bar_count),
                )
                .await
            {
                Ok(bars) => bars,
                Err(e) => {
                    ctx.metrics
                        .scanners()
                        .errors_total
                        .with_label_values(&[SCANNER])
                        .inc();
                    debug!(symbol = %symbol, error = %e, "Skipping candidate");
                    continue;
                }
            };

            let now = SystemTime::now();
            let live = ctx
                .bus
                .quote(&symbol)
                .map(|q| (q.last_price, q.last_tick_at));
            let Some((price, _)) = self
                .guard
                .resolve(live, bars.last().map(|b| b.close), now)
            else {
                continue;
            };

            if let Some(breakout) = evaluate_breakout(&bars, price, &ctx.config.breakout) {
                debug!(
                    symbol = %symbol,
                    direction = %breakout.direction,
                    score = breakout.score,
                    "Breakout detected"
                );
                signals.push(ScanSignal {
                    symbol,
                    score: breakout.score,
                    direction: breakout.direction,
                    params_label: self.params_label.clone(),
                    last_price: price,
                    tier: PriorityTier::from_score(breakout.score, ctx.config.scanners.top_score),
                    detected_at: now,
                });
            }
        }

        signals
    }

    /// Place an entry order unless the symbol is already held or working
    async fn enter(&self, signal: &ScanSignal) -> Result<bool, SubmitError> {
        let ctx = &self.ctx;
        if ctx.bus.position(&signal.symbol).is_some() || ctx.bus.has_open_order(&signal.symbol) {
            return Ok(false);
        }

        let request = OrderRequest {
            symbol: signal.symbol.clone(),
            side: signal.direction.entry_side(),
            quantity: ctx.config.scanners.order_quantity,
        };
        match ctx.router.submit(request).await {
            Ok(id) => {
                info!(symbol = %signal.symbol, order_id = %id, score = signal.score, "Entry order placed");
                Ok(true)
            }
            Err(e) => {
                warn!(symbol = %signal.symbol, error = %e, "Entry order not placed");
                Err(e)
            }
        }
    }
}
