//! Scanner loops
//!
//! Two periodic scanners share the subscription pool:
//!
//! - `PositionScanner`: keeps every held position subscribed at POSITION
//!   tier, values it and raises band-breakout alerts
//! - `MarketScanner`: ranks venue candidates by breakout strength and asks
//!   for SCANNER_TOP / SCANNER_NORMAL slots in candidate order
//!
//! `ScannerCoordinator` runs both loops next to the tick consumer, the
//! order-event consumer and the heartbeat, and stops them all through the
//! kill switch.

pub mod coordinator;
pub mod market;
pub mod position;

pub use coordinator::ScannerCoordinator;
pub use market::{MarketScanReport, MarketScanner};
pub use position::{PositionScanReport, PositionScanner};

use crate::config::Config;
use crate::core::GatewayError;
use crate::execution::{OrderRouter, OrderTracker};
use crate::gateway::{call_with_timeout, BrokerGateway};
use crate::monitoring::MetricsRegistry;
use crate::resilience::KillSwitch;
use crate::risk::RiskGuard;
use crate::scheduler::SubscriptionScheduler;
use crate::state::StateBus;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::warn;

/// Everything a loop needs, shared by all of them
pub struct ScannerContext<G> {
    pub config: Arc<Config>,
    pub gateway: Arc<G>,
    pub bus: StateBus,
    pub scheduler: Arc<SubscriptionScheduler<G>>,
    pub tracker: Arc<OrderTracker>,
    pub router: Arc<OrderRouter<G>>,
    pub risk: RiskGuard,
    pub metrics: MetricsRegistry,
    pub kill_switch: KillSwitch,
}

impl<G: BrokerGateway> ScannerContext<G> {
    /// Wire the shared components around one gateway
    pub fn new(
        config: Arc<Config>,
        gateway: Arc<G>,
        metrics: MetricsRegistry,
        kill_switch: KillSwitch,
    ) -> Self {
        let bus = StateBus::new(&config);
        let risk = RiskGuard::new((&config.risk).into());
        let scheduler = Arc::new(SubscriptionScheduler::new(
            gateway.clone(),
            bus.clone(),
            metrics.clone(),
            &config,
        ));
        let tracker = Arc::new(OrderTracker::new(bus.clone(), metrics.clone()));
        let router = Arc::new(OrderRouter::new(
            gateway.clone(),
            tracker.clone(),
            risk.clone(),
            bus.clone(),
            metrics.clone(),
            config.gateway.call_timeout(),
        ));

        metrics
            .risk()
            .daily_loss_limit
            .set(decimal_to_f64(config.risk.max_daily_loss));

        Self {
            config,
            gateway,
            bus,
            scheduler,
            tracker,
            router,
            risk,
            metrics,
            kill_switch,
        }
    }

    /// Gateway call bounded by the configured timeout, counted on failure
    pub(crate) async fn call<T, F>(&self, call: &'static str, fut: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        let result = call_with_timeout(call, self.config.gateway.call_timeout(), fut).await;
        if let Err(e) = &result {
            warn!(call, error = %e, "Gateway call failed");
            self.metrics
                .system()
                .gateway_failures_total
                .with_label_values(&[call])
                .inc();
        }
        result
    }
}

/// Fixed-period pacing for a loop that stops on the kill switch
///
/// ```text
/// let mut pace = Pacer::new(period, kill_switch);
/// while pace.next().await { iterate().await }
/// ```
///
/// A stop request is honoured between iterations, so the current one always
/// finishes. Late iterations are delayed rather than bunched up.
pub(crate) struct Pacer {
    ticker: Interval,
    kill_switch: KillSwitch,
}

impl Pacer {
    pub(crate) fn new(period: Duration, kill_switch: KillSwitch) -> Self {
        let mut ticker = interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            ticker,
            kill_switch,
        }
    }

    /// Wait for the next period; `false` once a stop was requested
    pub(crate) async fn next(&mut self) -> bool {
        if self.kill_switch.should_stop() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.kill_switch.stopped() => false,
            _ = self.ticker.tick() => !self.kill_switch.should_stop(),
        }
    }
}

pub(crate) fn decimal_to_f64(value: rust_decimal::Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    value.to_f64().unwrap_or(0.0)
}
