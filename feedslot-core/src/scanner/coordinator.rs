//! Scanner Coordinator
//!
//! Owns the long-running tasks of the core:
//!
//! ```text
//! ┌──────────────┐  ticks   ┌──────────┐
//! │   gateway    │─────────►│ tick     │──► StateBus quotes
//! │              │  orders  ├──────────┤
//! │              │─────────►│ order    │──► OrderTracker
//! └──────────────┘          └──────────┘
//!        ▲   ▲
//!        │   └──── PositionScanner (every position_interval)
//!        └──────── MarketScanner   (every market_interval)
//!                  heartbeat       (every heartbeat_secs)
//! ```
//!
//! Every task stops on the shared kill switch. Once they have all stopped,
//! every remaining feed is closed through the scheduler.

use super::{decimal_to_f64, MarketScanner, PositionScanner, ScannerContext};
use crate::config::Config;
use crate::core::{CoreError, OrderStatusEvent};
use crate::execution::OrderRouter;
use crate::gateway::{BrokerGateway, TickEvent};
use crate::monitoring::MetricsRegistry;
use crate::resilience::KillSwitch;
use crate::scheduler::{ensure_position_capacity, SubscriptionScheduler};
use crate::state::{Alert, AlertKind, Heartbeat, StateBus};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub struct ScannerCoordinator<G> {
    ctx: Arc<ScannerContext<G>>,
}

impl<G: BrokerGateway> ScannerCoordinator<G> {
    pub fn new(
        config: Config,
        gateway: Arc<G>,
        metrics: MetricsRegistry,
        kill_switch: KillSwitch,
    ) -> Self {
        Self {
            ctx: Arc::new(ScannerContext::new(
                Arc::new(config),
                gateway,
                metrics,
                kill_switch,
            )),
        }
    }

    pub fn context(&self) -> &Arc<ScannerContext<G>> {
        &self.ctx
    }

    pub fn bus(&self) -> &StateBus {
        &self.ctx.bus
    }

    pub fn scheduler(&self) -> &Arc<SubscriptionScheduler<G>> {
        &self.ctx.scheduler
    }

    pub fn router(&self) -> &Arc<OrderRouter<G>> {
        &self.ctx.router
    }

    /// Start of a new trading session: clear the breaker latch
    pub fn reset_session(&self) {
        self.ctx.risk.reset_session(&self.ctx.bus);
        self.ctx.metrics.risk().breaker_tripped.set(0);
    }

    /// Run every task until the kill switch fires, then release all feeds
    ///
    /// Fails before spawning anything when the event streams were already
    /// taken or the held positions cannot fit in the pool.
    pub async fn run(&self) -> Result<(), CoreError> {
        let ctx = &self.ctx;
        let events = ctx
            .gateway
            .take_events()
            .ok_or(CoreError::EventsUnavailable)?;

        self.preflight().await?;

        let mut tasks = JoinSet::new();
        tasks.spawn(named("tick_consumer", consume_ticks(ctx.clone(), events.ticks)));
        tasks.spawn(named("order_consumer", consume_orders(ctx.clone(), events.orders)));
        tasks.spawn(named("heartbeat", heartbeat(ctx.clone())));
        tasks.spawn(named("position_scanner", PositionScanner::new(ctx.clone()).run()));
        tasks.spawn(named("market_scanner", MarketScanner::new(ctx.clone()).run()));

        info!(
            gateway = ctx.gateway.name(),
            capacity = ctx.config.slots.capacity,
            reserved = ctx.config.slots.reserved_for_positions,
            "Scanner coordinator started"
        );

        loop {
            tokio::select! {
                _ = ctx.kill_switch.stopped() => break,
                Some(joined) = tasks.join_next() => match joined {
                    Ok(task) if !ctx.kill_switch.should_stop() => {
                        error!(task, "Coordinator task ended while the session was running");
                        ctx.bus.push_alert(Alert::new(
                            None,
                            AlertKind::TaskStopped,
                            format!("{} stopped unexpectedly", task),
                        ));
                        ctx.kill_switch.emergency_stop(&format!("{} stopped", task));
                    }
                    Ok(_) => {}
                    Err(e) if e.is_panic() => {
                        error!(error = %e, "Scanner task panicked");
                        ctx.kill_switch.emergency_stop("scanner task panicked");
                    }
                    Err(e) => warn!(error = %e, "Scanner task cancelled"),
                },
            }
        }

        // In-flight iterations may still ask for slots; refuse them from here on
        ctx.scheduler.begin_shutdown();

        info!(
            reason = ctx.kill_switch.shutdown_reason().as_deref().unwrap_or("unknown"),
            "Stopping scanner tasks"
        );
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Scanner task ended abnormally");
            }
        }

        let released = ctx.scheduler.release_all().await;
        info!(released, "Scanner coordinator stopped");
        Ok(())
    }

    /// Positions alone must fit in the pool; a failed sync is not fatal
    async fn preflight(&self) -> Result<(), CoreError> {
        let ctx = &self.ctx;
        match ctx
            .call("sync_positions", ctx.gateway.sync_positions())
            .await
        {
            Ok(rows) => {
                let held = rows.iter().filter(|p| p.quantity != 0).count();
                ensure_position_capacity(held, ctx.config.slots.capacity)?;
                info!(positions = held, "Startup position check passed");
            }
            Err(e) => {
                warn!(error = %e, "Startup position sync failed, position scanner will retry");
            }
        }
        Ok(())
    }
}

/// Tag a task with its name so the join loop can report which one ended
async fn named<F: Future<Output = ()>>(name: &'static str, task: F) -> &'static str {
    task.await;
    name
}

/// Record ticks for subscribed symbols; late ticks of released feeds are dropped
async fn consume_ticks<G: BrokerGateway>(
    ctx: Arc<ScannerContext<G>>,
    mut ticks: mpsc::Receiver<TickEvent>,
) {
    loop {
        let tick = tokio::select! {
            biased;
            _ = ctx.kill_switch.stopped() => break,
            tick = ticks.recv() => match tick {
                Some(tick) => tick,
                None => {
                    warn!("Tick stream closed");
                    break;
                }
            },
        };

        if !ctx.bus.is_subscribed(&tick.symbol) {
            debug!(symbol = %tick.symbol, "Tick for unsubscribed symbol dropped");
            continue;
        }
        ctx.bus.record_tick(&tick.symbol, tick.price, tick.at);
        ctx.metrics.system().ticks_total.inc();
    }
    debug!("Tick consumer stopped");
}

async fn consume_orders<G: BrokerGateway>(
    ctx: Arc<ScannerContext<G>>,
    mut orders: mpsc::Receiver<OrderStatusEvent>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = ctx.kill_switch.stopped() => break,
            event = orders.recv() => match event {
                Some(event) => event,
                None => {
                    warn!("Order event stream closed");
                    break;
                }
            },
        };
        ctx.tracker.apply(&event);
    }
    debug!("Order consumer stopped");
}

/// Publish a liveness summary and report orders the venue went quiet on
async fn heartbeat<G: BrokerGateway>(ctx: Arc<ScannerContext<G>>) {
    let period = ctx
        .config
        .monitoring
        .heartbeat_interval()
        .max(Duration::from_millis(1));
    let order_stale = Duration::from_secs(ctx.config.risk.order_stale_secs);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut seq = 0u64;

    loop {
        let scheduled = tokio::select! {
            biased;
            _ = ctx.kill_switch.stopped() => break,
            at = ticker.tick() => at,
        };
        let lag = Instant::now().saturating_duration_since(scheduled);
        let now = SystemTime::now();
        seq += 1;

        let stale = ctx.tracker.stale_orders(order_stale, now);
        for order in &stale {
            warn!(
                order_id = %order.broker_id,
                symbol = %order.symbol,
                state = order.state.as_str(),
                "No status update for open order"
            );
        }

        let uptime = now
            .duration_since(ctx.bus.started_at())
            .unwrap_or_default();
        let beat = Heartbeat {
            seq,
            at: now,
            uptime_secs: uptime.as_secs(),
            last_tick_age_ms: ctx.bus.latest_tick_at().map(|t| age_ms(now, t)),
            last_position_sync_age_ms: ctx.bus.last_position_sync().map(|t| age_ms(now, t)),
            subscriptions: ctx.bus.subscription_count(),
            quotes: ctx.bus.quote_count(),
            loop_lag_ms: lag.as_millis() as u64,
            stale_orders: stale.len(),
        };

        let risk = ctx.bus.risk();
        ctx.metrics.system().uptime_seconds.set(uptime.as_secs() as i64);
        ctx.metrics.risk().daily_pnl.set(decimal_to_f64(risk.daily_pnl));
        ctx.metrics
            .risk()
            .breaker_tripped
            .set(risk.breaker_tripped as i64);

        debug!(
            seq,
            subscriptions = beat.subscriptions,
            quotes = beat.quotes,
            loop_lag_ms = beat.loop_lag_ms,
            stale_orders = beat.stale_orders,
            "Heartbeat"
        );
        ctx.bus.set_heartbeat(beat);
    }
    debug!("Heartbeat stopped");
}

fn age_ms(now: SystemTime, then: SystemTime) -> u64 {
    now.duration_since(then)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
