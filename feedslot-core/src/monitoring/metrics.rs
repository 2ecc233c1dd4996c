//! Prometheus metrics
//!
//! Metric families:
//! - Slots (occupancy, admission decisions, evictions)
//! - Scanners (iterations, per-symbol errors, loop duration)
//! - Orders (open count, lifecycle events, refusals)
//! - Risk (daily PnL, breaker state)
//! - System (gateway failures, ticks, uptime)

use prometheus::{
    Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry,
};
use std::sync::Arc;
use tracing::info;

const NAMESPACE: &str = "feedslot";

/// Central registry for all Prometheus metrics
///
/// Cheap to clone; every component that records metrics holds a clone.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Registry>,
    slots: Arc<SlotMetrics>,
    scanners: Arc<ScannerMetrics>,
    orders: Arc<OrderMetrics>,
    risk: Arc<RiskMetrics>,
    system: Arc<SystemMetrics>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());

        let slots = Arc::new(SlotMetrics::new(&registry)?);
        let scanners = Arc::new(ScannerMetrics::new(&registry)?);
        let orders = Arc::new(OrderMetrics::new(&registry)?);
        let risk = Arc::new(RiskMetrics::new(&registry)?);
        let system = Arc::new(SystemMetrics::new(&registry)?);

        info!("Prometheus metrics registry initialized");

        Ok(Self {
            registry,
            slots,
            scanners,
            orders,
            risk,
            system,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn slots(&self) -> &SlotMetrics {
        &self.slots
    }

    pub fn scanners(&self) -> &ScannerMetrics {
        &self.scanners
    }

    pub fn orders(&self) -> &OrderMetrics {
        &self.orders
    }

    pub fn risk(&self) -> &RiskMetrics {
        &self.risk
    }

    pub fn system(&self) -> &SystemMetrics {
        &self.system
    }
}

/// Subscription slot metrics
pub struct SlotMetrics {
    /// Active subscriptions
    pub active: IntGauge,
    /// Active subscriptions per tier
    pub active_by_tier: IntGaugeVec,
    /// Admission decisions by outcome
    pub decisions_total: IntCounterVec,
    /// Subscriptions evicted to make room for higher tiers
    pub evictions_total: IntCounter,
    /// Scanner subscriptions released for lack of ticks
    pub idle_releases_total: IntCounter,
}

impl SlotMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let active = IntGauge::with_opts(
            Opts::new("slots_active", "Active market-data subscriptions").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(active.clone()))?;

        let active_by_tier = IntGaugeVec::new(
            Opts::new("slots_active_by_tier", "Active subscriptions per priority tier")
                .namespace(NAMESPACE),
            &["tier"],
        )?;
        registry.register(Box::new(active_by_tier.clone()))?;

        let decisions_total = IntCounterVec::new(
            Opts::new("slot_decisions_total", "Slot requests by outcome").namespace(NAMESPACE),
            &["outcome"],
        )?;
        registry.register(Box::new(decisions_total.clone()))?;

        let evictions_total = IntCounter::with_opts(
            Opts::new("slot_evictions_total", "Subscriptions evicted for a higher tier")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(evictions_total.clone()))?;

        let idle_releases_total = IntCounter::with_opts(
            Opts::new(
                "slot_idle_releases_total",
                "Scanner subscriptions released after going quiet",
            )
            .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(idle_releases_total.clone()))?;

        Ok(Self {
            active,
            active_by_tier,
            decisions_total,
            evictions_total,
            idle_releases_total,
        })
    }
}

/// Scanner loop metrics
pub struct ScannerMetrics {
    pub iterations_total: IntCounterVec,
    /// Per-symbol or per-iteration failures
    pub errors_total: IntCounterVec,
    /// Wall time of one iteration in seconds
    pub iteration_seconds: HistogramVec,
    /// Signals in the latest market scan
    pub signals: IntGauge,
}

impl ScannerMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let iterations_total = IntCounterVec::new(
            Opts::new("scanner_iterations_total", "Completed scanner iterations")
                .namespace(NAMESPACE),
            &["scanner"],
        )?;
        registry.register(Box::new(iterations_total.clone()))?;

        let errors_total = IntCounterVec::new(
            Opts::new("scanner_errors_total", "Scanner failures").namespace(NAMESPACE),
            &["scanner"],
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        let iteration_seconds = HistogramVec::new(
            HistogramOpts::new("scanner_iteration_seconds", "Scanner iteration duration")
                .namespace(NAMESPACE)
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["scanner"],
        )?;
        registry.register(Box::new(iteration_seconds.clone()))?;

        let signals = IntGauge::with_opts(
            Opts::new("scanner_signals", "Signals in the latest market scan").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(signals.clone()))?;

        Ok(Self {
            iterations_total,
            errors_total,
            iteration_seconds,
            signals,
        })
    }
}

/// Order lifecycle metrics
pub struct OrderMetrics {
    pub open_orders: IntGauge,
    /// Applied status events by resulting state
    pub events_total: IntCounterVec,
    /// Events that did not change any order
    pub ignored_events_total: IntCounterVec,
    pub submitted_total: IntCounter,
    /// Submissions refused before reaching the venue
    pub refused_total: IntCounterVec,
}

impl OrderMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let open_orders = IntGauge::with_opts(
            Opts::new("orders_open", "Orders not yet terminal").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(open_orders.clone()))?;

        let events_total = IntCounterVec::new(
            Opts::new("order_events_total", "Order status events applied").namespace(NAMESPACE),
            &["state"],
        )?;
        registry.register(Box::new(events_total.clone()))?;

        let ignored_events_total = IntCounterVec::new(
            Opts::new("order_events_ignored_total", "Order status events ignored")
                .namespace(NAMESPACE),
            &["kind"],
        )?;
        registry.register(Box::new(ignored_events_total.clone()))?;

        let submitted_total = IntCounter::with_opts(
            Opts::new("orders_submitted_total", "Orders accepted by the venue").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(submitted_total.clone()))?;

        let refused_total = IntCounterVec::new(
            Opts::new("orders_refused_total", "Orders refused before submission")
                .namespace(NAMESPACE),
            &["reason"],
        )?;
        registry.register(Box::new(refused_total.clone()))?;

        Ok(Self {
            open_orders,
            events_total,
            ignored_events_total,
            submitted_total,
            refused_total,
        })
    }
}

/// Risk metrics
pub struct RiskMetrics {
    pub daily_pnl: Gauge,
    /// 1 when the circuit breaker is tripped
    pub breaker_tripped: IntGauge,
    pub daily_loss_limit: Gauge,
}

impl RiskMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let daily_pnl = Gauge::with_opts(
            Opts::new("risk_daily_pnl", "Venue-reported daily PnL").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(daily_pnl.clone()))?;

        let breaker_tripped = IntGauge::with_opts(
            Opts::new("risk_breaker_tripped", "Circuit breaker state (1 = tripped)")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(breaker_tripped.clone()))?;

        let daily_loss_limit = Gauge::with_opts(
            Opts::new("risk_daily_loss_limit", "Configured daily loss limit").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(daily_loss_limit.clone()))?;

        Ok(Self {
            daily_pnl,
            breaker_tripped,
            daily_loss_limit,
        })
    }
}

/// System health metrics
pub struct SystemMetrics {
    /// Failed or timed-out gateway calls by call name
    pub gateway_failures_total: IntCounterVec,
    pub ticks_total: IntCounter,
    pub uptime_seconds: IntGauge,
}

impl SystemMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let gateway_failures_total = IntCounterVec::new(
            Opts::new("gateway_failures_total", "Failed gateway calls").namespace(NAMESPACE),
            &["call"],
        )?;
        registry.register(Box::new(gateway_failures_total.clone()))?;

        let ticks_total = IntCounter::with_opts(
            Opts::new("ticks_total", "Market ticks received").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(ticks_total.clone()))?;

        let uptime_seconds = IntGauge::with_opts(
            Opts::new("uptime_seconds", "Process uptime in seconds").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            gateway_failures_total,
            ticks_total,
            uptime_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registry_creation() {
        let registry = MetricsRegistry::new().unwrap();
        registry.slots().active.set(3);
        assert!(!registry.registry().gather().is_empty());
    }

    #[test]
    fn test_registries_are_independent() {
        let a = MetricsRegistry::new().unwrap();
        let b = MetricsRegistry::new().unwrap();
        a.slots().evictions_total.inc();
        assert_eq!(a.slots().evictions_total.get(), 1);
        assert_eq!(b.slots().evictions_total.get(), 0);
    }

    #[test]
    fn test_labelled_families() {
        let registry = MetricsRegistry::new().unwrap();
        registry
            .slots()
            .decisions_total
            .with_label_values(&["admitted"])
            .inc();
        registry
            .scanners()
            .iterations_total
            .with_label_values(&["market"])
            .inc_by(2);
        registry
            .system()
            .gateway_failures_total
            .with_label_values(&["open_feed"])
            .inc();

        let names: Vec<String> = registry
            .registry()
            .gather()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect();
        assert!(names.contains(&"feedslot_slot_decisions_total".to_string()));
        assert!(names.contains(&"feedslot_scanner_iterations_total".to_string()));
        assert!(names.contains(&"feedslot_gateway_failures_total".to_string()));
    }
}
