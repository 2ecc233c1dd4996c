//! Dry-run wrapper: live market data, no order routing
//!
//! Feeds, positions, scanner and bars come from the wrapped gateway. Orders
//! get a local id and are answered with a `Rejected` status on the wrapper's
//! own order stream, so the lifecycle tracker still sees every order close.

use super::{
    BrokerGateway, BrokerPosition, Bar, GatewayEvents, OrderRequest, ScanCriteria,
    EVENT_CHANNEL_CAPACITY,
};
use crate::core::{BrokerOrderId, BrokerStatus, FeedHandle, GatewayError, OrderStatusEvent, Symbol};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::info;

pub const DRY_RUN_REJECT_REASON: &str = "dry-run: order not routed";

pub struct DryRunGateway<G> {
    inner: G,
    order_tx: mpsc::Sender<OrderStatusEvent>,
    order_rx: Mutex<Option<mpsc::Receiver<OrderStatusEvent>>>,
    next_order: AtomicU64,
}

impl<G: BrokerGateway> DryRunGateway<G> {
    pub fn new(inner: G) -> Self {
        let (order_tx, order_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner,
            order_tx,
            order_rx: Mutex::new(Some(order_rx)),
            next_order: AtomicU64::new(1),
        }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }
}

impl<G: BrokerGateway> BrokerGateway for DryRunGateway<G> {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    async fn open_feed(&self, symbol: &Symbol) -> Result<FeedHandle, GatewayError> {
        self.inner.open_feed(symbol).await
    }

    async fn close_feed(&self, handle: FeedHandle) -> Result<(), GatewayError> {
        self.inner.close_feed(handle).await
    }

    async fn sync_positions(&self) -> Result<Vec<BrokerPosition>, GatewayError> {
        self.inner.sync_positions().await
    }

    async fn scanner_query(&self, criteria: &ScanCriteria) -> Result<Vec<Symbol>, GatewayError> {
        self.inner.scanner_query(criteria).await
    }

    async fn historical_bars(&self, symbol: &Symbol, count: usize) -> Result<Vec<Bar>, GatewayError> {
        self.inner.historical_bars(symbol, count).await
    }

    async fn daily_pnl(&self) -> Result<Decimal, GatewayError> {
        self.inner.daily_pnl().await
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<BrokerOrderId, GatewayError> {
        let n = self.next_order.fetch_add(1, Ordering::Relaxed);
        let id = BrokerOrderId::new(format!("DRY-{}", n));

        info!(
            order_id = %id,
            symbol = %request.symbol,
            side = %request.side,
            quantity = request.quantity,
            "DRY RUN: order not routed"
        );

        let event = OrderStatusEvent::new(id.clone(), BrokerStatus::Rejected, 0)
            .with_reason(DRY_RUN_REJECT_REASON);
        self.order_tx
            .send(event)
            .await
            .map_err(|_| GatewayError::Disconnected)?;

        Ok(id)
    }

    /// Ticks from the wrapped gateway, orders from the local stream
    fn take_events(&self) -> Option<GatewayEvents> {
        let orders = self.order_rx.lock().take()?;
        let inner = self.inner.take_events()?;
        Some(GatewayEvents {
            ticks: inner.ticks,
            orders,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulatedVenueConfig;
    use crate::core::Side;
    use crate::gateway::SimulatedGateway;

    #[tokio::test]
    async fn test_orders_are_never_routed() {
        let gw = DryRunGateway::new(SimulatedGateway::new(&SimulatedVenueConfig::default()));
        let mut events = gw.take_events().unwrap();

        let id = gw
            .place_order(&OrderRequest {
                symbol: Symbol::new("AAPL"),
                side: Side::Buy,
                quantity: 10,
            })
            .await
            .unwrap();
        assert_eq!(id.as_str(), "DRY-1");

        let event = events.orders.recv().await.unwrap();
        assert_eq!(event.broker_id, id);
        assert_eq!(event.status, BrokerStatus::Rejected);
        assert_eq!(event.reason.as_deref(), Some(DRY_RUN_REJECT_REASON));

        // Venue book untouched
        let positions = gw.sync_positions().await.unwrap();
        assert!(positions.iter().all(|p| p.symbol != Symbol::new("AAPL")));
    }

    #[tokio::test]
    async fn test_market_data_delegated() {
        let gw = DryRunGateway::new(SimulatedGateway::new(&SimulatedVenueConfig::default()));
        let handle = gw.open_feed(&Symbol::new("MSFT")).await.unwrap();
        assert_eq!(gw.inner().open_feed_count(), 1);
        gw.close_feed(handle).await.unwrap();
        assert_eq!(gw.inner().open_feed_count(), 0);
    }
}
