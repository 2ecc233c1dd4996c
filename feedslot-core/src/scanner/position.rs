//! Position scanner
//!
//! Every iteration:
//!
//! 1. sync positions from the venue (zero-quantity rows are dropped)
//! 2. release the slot of every position that disappeared
//! 3. request a POSITION slot for every held symbol
//! 4. value each position from the freshest trustworthy price
//! 5. raise an alert when price leaves the EMA/ATR band
//! 6. publish the table and refresh daily PnL through the Risk Guard
//!
//! A failed sync aborts the iteration; the next one retries.

use super::{decimal_to_f64, Pacer, ScannerContext};
use crate::core::{Direction, GatewayError, PriorityTier, Symbol};
use crate::gateway::{Bar, BrokerGateway, BrokerPosition};
use crate::indicators::{atr, band_breakout, ema};
use crate::resilience::DataGuard;
use crate::state::{Alert, AlertKind, PositionView};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const SCANNER: &str = "position";

/// What one iteration did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PositionScanReport {
    pub positions: usize,
    pub released: usize,
    pub rejected: usize,
    pub alerts: usize,
}

struct CachedBars {
    fetched: Instant,
    bars: Vec<Bar>,
}

pub struct PositionScanner<G> {
    ctx: Arc<ScannerContext<G>>,
    guard: DataGuard,
    bars: HashMap<Symbol, CachedBars>,
    /// Symbols currently outside their band, and on which side
    bands: HashMap<Symbol, Direction>,
}

impl<G: BrokerGateway> PositionScanner<G> {
    pub fn new(ctx: Arc<ScannerContext<G>>) -> Self {
        let guard = DataGuard::new(ctx.config.scanners.stale_threshold());
        Self {
            ctx,
            guard,
            bars: HashMap::new(),
            bands: HashMap::new(),
        }
    }

    /// Loop until the kill switch fires
    pub async fn run(mut self) {
        let mut pace = Pacer::new(
            self.ctx.config.scanners.position_interval(),
            self.ctx.kill_switch.clone(),
        );
        while pace.next().await {
            self.iterate().await;
        }
        info!("Position scanner stopped");
    }

    /// One iteration with metrics; failures are logged and retried next period
    pub async fn iterate(&mut self) {
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
                debug!(
                    positions = report.positions,
                    released = report.released,
                    rejected = report.rejected,
                    alerts = report.alerts,
                    "Position scan complete"
                );
            }
            Err(e) => {
                metrics.errors_total.with_label_values(&[SCANNER]).inc();
                warn!(error = %e, "Position scan failed");
            }
        }
    }

    pub async fn run_once(&mut self) -> Result<PositionScanReport, GatewayError> {
        let ctx = self.ctx.clone();
        let rows = ctx
            .call("sync_positions", ctx.gateway.sync_positions())
            .await?;
        let now = SystemTime::now();
        let mut report = PositionScanReport::default();

        let held: Vec<BrokerPosition> = rows.into_iter().filter(|p| p.quantity != 0).collect();
        let held_symbols: HashSet<&Symbol> = held.iter().map(|p| &p.symbol).collect();

        for symbol in ctx.bus.position_symbols() {
            if held_symbols.contains(&symbol) {
                continue;
            }
            if ctx.scheduler.release(&symbol).await {
                report.released += 1;
            }
            self.bars.remove(&symbol);
            self.bands.remove(&symbol);
            info!(symbol = %symbol, "Position closed");
        }

        let mut views = Vec::with_capacity(held.len());
        for position in &held {
            let decision = ctx
                .scheduler
                .request_slot(&position.symbol, PriorityTier::Position)
                .await;
            if !decision.is_admitted() {
                report.rejected += 1;
            }

            let (view, band) = self.value(position, now).await;
            if self.update_band(&view, band) {
                report.alerts += 1;
            }
            views.push(view);
        }

        report.positions = views.len();
        ctx.bus.set_positions(views, now);

        if let Ok(pnl) = ctx.call("daily_pnl", ctx.gateway.daily_pnl()).await {
            let status = ctx.risk.record_daily_pnl(&ctx.bus, pnl);
            ctx.metrics.risk().daily_pnl.set(decimal_to_f64(pnl));
            ctx.metrics
                .risk()
                .breaker_tripped
                .set(status.is_tripped() as i64);
        }

        Ok(report)
    }

    /// Price, PnL and EMAs for one position, plus its band state
    async fn value(
        &mut self,
        position: &BrokerPosition,
        now: SystemTime,
    ) -> (PositionView, Option<Direction>) {
        let symbol = &position.symbol;
        let params = self.ctx.config.breakout.clone();

        let quote = self.ctx.bus.quote(symbol);
        let live = quote.map(|q| (q.last_price, q.last_tick_at));
        let fresh = quote.is_some_and(|q| !self.guard.is_stale(Some(q.last_tick_at), now));

        let bars = self.bars_for(symbol).await;
        let last_close = bars.last().map(|b| b.close);

        let mut view = PositionView::new(symbol.clone(), position.quantity, position.avg_cost);
        view.updated_at = now;

        let resolved = self.guard.resolve(live, last_close, now);
        if let Some((price, source)) = resolved {
            if let Some(price) = Decimal::from_f64(price) {
                let price = price.round_dp(4);
                view.last_price = Some(price);
                view.unrealized_pnl =
                    Some(((price - position.avg_cost) * Decimal::from(position.quantity)).round_dp(2));
            }
            view.price_source = Some(source);
        } else {
            debug!(symbol = %symbol, "No usable price for position");
        }

        let series = if fresh {
            self.ctx.bus.price_series(symbol)
        } else {
            Vec::new()
        };
        let closes = if series.len() >= params.ema_slow {
            series
        } else {
            bars.iter().map(|b| b.close).collect()
        };
        view.ema_fast = ema(&closes, params.ema_fast);
        view.ema_slow = ema(&closes, params.ema_slow);

        let band = match (resolved, view.ema_fast, view.ema_slow, atr(&bars, params.atr_period)) {
            (Some((price, _)), Some(fast), Some(slow), Some(atr)) => {
                band_breakout(price, fast, slow, atr, params.k_atr)
            }
            _ => None,
        };

        (view, band)
    }

    /// Bars for `symbol`, refetched at most once per market interval
    ///
    /// A failed fetch falls back to the previous bars, if any.
    async fn bars_for(&mut self, symbol: &Symbol) -> Vec<Bar> {
        let refresh = self.ctx.config.scanners.market_interval();
        if let Some(cached) = self.bars.get(symbol) {
            if cached.fetched.elapsed() < refresh {
                return cached.bars.clone();
            }
        }

        let count = self.ctx.config.scanners.bar_count;
        match self
            .ctx
            .call("historical_bars", self.ctx.gateway.historical_bars(symbol, count))
            .await
        {
            Ok(bars) => {
                self.bars.insert(
                    symbol.clone(),
                    CachedBars {
                        fetched: Instant::now(),
                        bars: bars.clone(),
                    },
                );
                bars
            }
            Err(_) => {
                self.ctx
                    .metrics
                    .scanners()
                    .errors_total
                    .with_label_values(&[SCANNER])
                    .inc();
                self.bars
                    .get(symbol)
                    .map(|c| c.bars.clone())
                    .unwrap_or_default()
            }
        }
    }

    /// Raise an alert when a position newly leaves its band; true if raised
    fn update_band(&mut self, view: &PositionView, band: Option<Direction>) -> bool {
        let symbol = &view.symbol;
        let Some(direction) = band else {
            self.bands.remove(symbol);
            return false;
        };
        if self.bands.get(symbol) == Some(&direction) {
            return false;
        }
        self.bands.insert(symbol.clone(), direction);

        let price = view.last_price.unwrap_or_default();
        let slow = view.ema_slow.unwrap_or_default();
        let message = format!(
            "{} broke out {} at {} (EMA{} {:.2}, k={} ATR)",
            symbol,
            direction,
            price,
            self.ctx.config.breakout.ema_slow,
            slow,
            self.ctx.config.breakout.k_atr
        );
        warn!(symbol = %symbol, direction = %direction, price = %price, "Position breakout");
        self.ctx.bus.push_alert(Alert::new(
            Some(symbol.clone()),
            AlertKind::PositionBreakout,
            message,
        ));
        true
    }
}
