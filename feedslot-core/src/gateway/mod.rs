//! Broker gateway
//!
//! Everything the core needs from the venue goes through one trait:
//! market-data feeds, position sync, the candidate scanner, historical bars,
//! daily PnL and order placement. Tick and order-status streams are handed
//! out once through `take_events`.
//!
//! Implementations:
//! - `SimulatedGateway`: paper venue with random-walk prices and a hard feed cap
//! - `DryRunGateway<G>`: real market data from `G`, orders never routed
//!
//! Every call the core makes is wrapped in `call_with_timeout`.

pub mod dry_run;
pub mod simulated;

pub use dry_run::DryRunGateway;
pub use simulated::SimulatedGateway;

use crate::core::{BrokerOrderId, FeedHandle, GatewayError, OrderStatusEvent, Side, Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;

/// Buffer size for each event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// One streamed price update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickEvent {
    pub symbol: Symbol,
    pub price: f64,
    pub at: SystemTime,
}

/// Position as reported by the venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: Symbol,
    /// Signed quantity, zero rows may be reported for closed positions
    pub quantity: i64,
    pub avg_cost: Decimal,
}

/// OHLCV bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Query sent to the venue's market scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCriteria {
    pub max_results: usize,
}

/// New order request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: u64,
}

/// Event streams owned by whoever takes them
pub struct GatewayEvents {
    pub ticks: mpsc::Receiver<TickEvent>,
    pub orders: mpsc::Receiver<OrderStatusEvent>,
}

/// Connection to a broker venue
///
/// Implementations must be shareable across tasks; the core holds them in an
/// `Arc` and calls from several loops at once.
pub trait BrokerGateway: Send + Sync + 'static {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Start streaming ticks for `symbol`
    fn open_feed(
        &self,
        symbol: &Symbol,
    ) -> impl Future<Output = Result<FeedHandle, GatewayError>> + Send;

    /// Stop a feed; the handle is consumed whether or not the venue acknowledges
    fn close_feed(&self, handle: FeedHandle)
        -> impl Future<Output = Result<(), GatewayError>> + Send;

    fn sync_positions(&self)
        -> impl Future<Output = Result<Vec<BrokerPosition>, GatewayError>> + Send;

    /// Candidate symbols, in the venue's ranking order
    fn scanner_query(
        &self,
        criteria: &ScanCriteria,
    ) -> impl Future<Output = Result<Vec<Symbol>, GatewayError>> + Send;

    /// Most recent `count` completed bars, oldest first
    fn historical_bars(
        &self,
        symbol: &Symbol,
        count: usize,
    ) -> impl Future<Output = Result<Vec<Bar>, GatewayError>> + Send;

    fn daily_pnl(&self) -> impl Future<Output = Result<Decimal, GatewayError>> + Send;

    fn place_order(
        &self,
        request: &OrderRequest,
    ) -> impl Future<Output = Result<BrokerOrderId, GatewayError>> + Send;

    /// Hand out the event streams; `None` after the first call
    fn take_events(&self) -> Option<GatewayEvents>;
}

/// Bound an external call, mapping an elapsed wait onto `GatewayError::Timeout`
pub async fn call_with_timeout<T, F>(
    call: &'static str,
    after: Duration,
    fut: F,
) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout { call, after }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_call_with_timeout_passes_result() {
        let ok = call_with_timeout("ping", Duration::from_millis(100), async {
            Ok::<_, GatewayError>(7)
        })
        .await;
        assert_eq!(ok, Ok(7));

        let err = call_with_timeout("ping", Duration::from_millis(100), async {
            Err::<u32, _>(GatewayError::Disconnected)
        })
        .await;
        assert_eq!(err, Err(GatewayError::Disconnected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_with_timeout_elapses() {
        let result = call_with_timeout("sync_positions", Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, GatewayError>(())
        })
        .await;

        assert_eq!(
            result,
            Err(GatewayError::Timeout {
                call: "sync_positions",
                after: Duration::from_secs(5),
            })
        );
    }
}
