use feedslot_core::config::Config;
use feedslot_core::core::{BrokerOrderId, BrokerStatus, Order, OrderStatusEvent, Side, Symbol};
use feedslot_core::execution::{OrderRouter, OrderTracker};
use feedslot_core::gateway::OrderRequest;
use feedslot_core::monitoring::MetricsRegistry;
use feedslot_core::risk::{BreakerStatus, RiskGuard, TripReason};
use feedslot_core::state::{PositionView, StateBus};
use feedslot_core::testing::MockGateway;
use proptest::prelude::*;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

#[test]
fn test_snapshots_consistent_under_concurrent_writers() {
    let bus = StateBus::new(&Config::default());
    let aapl = Symbol::new("AAPL");

    let writer = {
        let bus = bus.clone();
        let aapl = aapl.clone();
        thread::spawn(move || {
            for i in 1..=2_000u32 {
                bus.record_tick(&aapl, i as f64, SystemTime::now());
                bus.set_positions(
                    vec![PositionView::new(aapl.clone(), i as i64, dec!(1))],
                    SystemTime::now(),
                );
            }
        })
    };

    let mut last_count = 0;
    for _ in 0..500 {
        let snapshot = bus.snapshot();
        if let Some(quote) = snapshot.quotes.get(&aapl) {
            // Monotonic writer: a later snapshot never goes backwards
            assert!(quote.tick_count >= last_count);
            assert_eq!(quote.last_price, quote.tick_count as f64);
            last_count = quote.tick_count;
        }
        let copy = snapshot.clone();
        assert_eq!(copy.positions, snapshot.positions);
    }

    writer.join().unwrap();
    let final_snapshot = bus.snapshot();
    assert_eq!(final_snapshot.quotes[&aapl].tick_count, 2_000);
    assert_eq!(final_snapshot.positions[0].quantity, 2_000);
}

#[tokio::test]
async fn test_breaker_latch_survives_recovery_until_reset() {
    let bus = StateBus::new(&Config::default());
    let metrics = MetricsRegistry::new().unwrap();
    let gateway = Arc::new(MockGateway::new());
    let tracker = Arc::new(OrderTracker::new(bus.clone(), metrics.clone()));
    let risk = RiskGuard::new((&Config::default().risk).into());
    let router = OrderRouter::new(
        gateway.clone(),
        tracker,
        risk.clone(),
        bus.clone(),
        metrics,
        Duration::from_millis(200),
    );
    let request = || OrderRequest {
        symbol: Symbol::new("AAPL"),
        side: Side::Buy,
        quantity: 1,
    };

    // One cent inside the limit
    assert!(!risk.record_daily_pnl(&bus, dec!(-999.99)).is_tripped());
    router.submit(request()).await.unwrap();

    assert!(risk.record_daily_pnl(&bus, dec!(-1000.01)).is_tripped());
    assert!(router.submit(request()).await.is_err());

    // PnL recovers, latch holds
    risk.record_daily_pnl(&bus, dec!(250));
    assert!(matches!(
        risk.check_breaker(&bus.snapshot()),
        BreakerStatus::Tripped(TripReason::DailyLoss { .. })
    ));
    assert_eq!(gateway.placed_orders().len(), 1);

    risk.reset_session(&bus);
    router.submit(request()).await.unwrap();
    assert_eq!(gateway.placed_orders().len(), 2);
}

fn status() -> impl Strategy<Value = BrokerStatus> {
    prop_oneof![
        Just(BrokerStatus::Submitted),
        Just(BrokerStatus::PartiallyFilled),
        Just(BrokerStatus::Filled),
        Just(BrokerStatus::Cancelled),
        Just(BrokerStatus::Rejected),
        Just(BrokerStatus::Expired),
    ]
}

proptest! {
    #[test]
    fn prop_open_count_matches_open_orders(
        events in prop::collection::vec((0usize..6, status()), 0..80),
    ) {
        let bus = StateBus::new(&Config::default());
        let tracker = OrderTracker::new(bus.clone(), MetricsRegistry::new().unwrap());

        for i in 0..4 {
            tracker.track(Order::created(
                BrokerOrderId::new(format!("O-{}", i)),
                Symbol::new("AAPL"),
                Side::Buy,
                100,
            ));
        }

        for (i, status) in events {
            // Ids 4 and 5 are never tracked
            let event = OrderStatusEvent::new(BrokerOrderId::new(format!("O-{}", i)), status, 50);
            tracker.apply(&event);

            let open = tracker.open_orders().len();
            prop_assert_eq!(bus.risk().open_order_count, open);
            prop_assert!(open <= 4);
        }
    }
}
