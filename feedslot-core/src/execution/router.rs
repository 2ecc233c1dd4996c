//! Order submission path
//!
//! Every new order passes the Risk Guard first. Submissions are serialized so
//! two callers cannot both slip under the open-order limit.

use super::OrderTracker;
use crate::core::{BrokerOrderId, Order, SubmitError};
use crate::gateway::{call_with_timeout, BrokerGateway, OrderRequest};
use crate::monitoring::MetricsRegistry;
use crate::risk::{BreakerStatus, RiskGuard};
use crate::state::StateBus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub struct OrderRouter<G> {
    gateway: Arc<G>,
    tracker: Arc<OrderTracker>,
    risk: RiskGuard,
    bus: StateBus,
    metrics: MetricsRegistry,
    call_timeout: Duration,
    submit_lock: Mutex<()>,
}

impl<G: BrokerGateway> OrderRouter<G> {
    pub fn new(
        gateway: Arc<G>,
        tracker: Arc<OrderTracker>,
        risk: RiskGuard,
        bus: StateBus,
        metrics: MetricsRegistry,
        call_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            tracker,
            risk,
            bus,
            metrics,
            call_timeout,
            submit_lock: Mutex::new(()),
        }
    }

    /// Check the breaker, place the order, start tracking it
    pub async fn submit(&self, request: OrderRequest) -> Result<BrokerOrderId, SubmitError> {
        if request.quantity == 0 {
            self.refused("zero_quantity");
            return Err(SubmitError::ZeroQuantity);
        }

        let _guard = self.submit_lock.lock().await;

        if let BreakerStatus::Tripped(reason) = self.risk.enforce(&self.bus) {
            warn!(symbol = %request.symbol, reason = %reason, "Order refused: circuit breaker tripped");
            self.refused("breaker_tripped");
            return Err(SubmitError::BreakerTripped(reason));
        }

        let id = call_with_timeout(
            "place_order",
            self.call_timeout,
            self.gateway.place_order(&request),
        )
        .await
        .map_err(|e| {
            warn!(symbol = %request.symbol, error = %e, "Order placement failed");
            self.metrics
                .system()
                .gateway_failures_total
                .with_label_values(&["place_order"])
                .inc();
            SubmitError::from(e)
        })?;

        info!(
            order_id = %id,
            symbol = %request.symbol,
            side = %request.side,
            quantity = request.quantity,
            "Order placed"
        );

        self.tracker.track(Order::created(
            id.clone(),
            request.symbol,
            request.side,
            request.quantity,
        ));

        Ok(id)
    }

    pub fn tracker(&self) -> &Arc<OrderTracker> {
        &self.tracker
    }

    fn refused(&self, reason: &str) {
        self.metrics
            .orders()
            .refused_total
            .with_label_values(&[reason])
            .inc();
    }
}
