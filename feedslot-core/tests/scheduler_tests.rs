use feedslot_core::config::Config;
use feedslot_core::core::{PriorityTier, Symbol};
use feedslot_core::monitoring::MetricsRegistry;
use feedslot_core::scheduler::{RejectReason, SlotDecision, SubscriptionScheduler};
use feedslot_core::state::{StateBus, UsageStatus};
use feedslot_core::testing::MockGateway;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

fn scheduler(capacity: usize, reserved: usize) -> (SubscriptionScheduler<MockGateway>, Arc<MockGateway>, StateBus) {
    let mut config = Config::default();
    config.slots.capacity = capacity;
    config.slots.reserved_for_positions = reserved;
    let bus = StateBus::new(&config);
    let gateway = Arc::new(MockGateway::new());
    let scheduler = SubscriptionScheduler::new(
        gateway.clone(),
        bus.clone(),
        MetricsRegistry::new().unwrap(),
        &config,
    );
    (scheduler, gateway, bus)
}

fn sym(prefix: &str, i: usize) -> Symbol {
    Symbol::new(&format!("{}{}", prefix, i))
}

#[tokio::test]
async fn test_fifty_slots_five_reserved() {
    let (scheduler, gw, bus) = scheduler(50, 5);

    // Scanner share fills at 45
    for i in 0..45 {
        let decision = scheduler
            .request_slot(&sym("N", i), PriorityTier::ScannerNormal)
            .await;
        assert_eq!(decision, SlotDecision::Admitted);
    }
    assert_eq!(
        scheduler
            .request_slot(&sym("N", 45), PriorityTier::ScannerNormal)
            .await,
        SlotDecision::Rejected(RejectReason::CapacityFull)
    );
    assert_eq!(bus.slot_usage().status, UsageStatus::NearLimit);

    // A top signal displaces the oldest normal one
    assert_eq!(
        scheduler
            .request_slot(&sym("T", 0), PriorityTier::ScannerTop)
            .await,
        SlotDecision::Evicted(sym("N", 0))
    );
    assert_eq!(gw.closed(), vec![sym("N", 0)]);

    // Positions take the five reserved slots without evicting anyone
    for i in 0..5 {
        assert_eq!(
            scheduler
                .request_slot(&sym("P", i), PriorityTier::Position)
                .await,
            SlotDecision::Admitted
        );
    }
    assert_eq!(scheduler.usage().await.active, 50);
    assert_eq!(bus.slot_usage().status, UsageStatus::Full);

    // A sixth position evicts the oldest remaining normal subscription
    assert_eq!(
        scheduler
            .request_slot(&sym("P", 5), PriorityTier::Position)
            .await,
        SlotDecision::Evicted(sym("N", 1))
    );
    assert_eq!(gw.open_symbols().len(), 50);
    assert_eq!(bus.subscription_count(), 50);
}

#[tokio::test]
async fn test_top_cannot_evict_top() {
    let (scheduler, _gw, _bus) = scheduler(3, 1);
    for i in 0..2 {
        scheduler
            .request_slot(&sym("T", i), PriorityTier::ScannerTop)
            .await;
    }
    assert_eq!(
        scheduler
            .request_slot(&sym("T", 2), PriorityTier::ScannerTop)
            .await,
        SlotDecision::Rejected(RejectReason::CapacityFull)
    );
    // The reserved slot is untouched by scanner requests
    assert_eq!(scheduler.usage().await.active, 2);
}

#[tokio::test]
async fn test_positions_exhausting_capacity_raise_alert() {
    let (scheduler, _gw, bus) = scheduler(2, 1);
    scheduler.request_slot(&sym("P", 0), PriorityTier::Position).await;
    scheduler.request_slot(&sym("P", 1), PriorityTier::Position).await;

    let decision = scheduler.request_slot(&sym("P", 2), PriorityTier::Position).await;
    assert_eq!(decision, SlotDecision::Rejected(RejectReason::CapacityFull));

    let alerts = bus.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].symbol, Some(sym("P", 2)));
}

#[tokio::test]
async fn test_failed_open_after_eviction_leaves_victim_out() {
    let (scheduler, gw, _bus) = scheduler(2, 1);
    scheduler
        .request_slot(&sym("N", 0), PriorityTier::ScannerNormal)
        .await;
    gw.fail_open_for(&sym("T", 0));

    assert_eq!(
        scheduler
            .request_slot(&sym("T", 0), PriorityTier::ScannerTop)
            .await,
        SlotDecision::Rejected(RejectReason::FeedUnavailable)
    );
    assert!(!scheduler.is_active(&sym("N", 0)).await);
    assert_eq!(scheduler.usage().await.active, 0);
}

#[tokio::test]
async fn test_release_all_refuses_further_requests() {
    let (scheduler, gw, bus) = scheduler(5, 1);
    for i in 0..3 {
        scheduler
            .request_slot(&sym("N", i), PriorityTier::ScannerNormal)
            .await;
    }

    assert_eq!(scheduler.release_all().await, 3);
    assert!(gw.open_symbols().is_empty());
    assert_eq!(bus.subscription_count(), 0);
    assert_eq!(
        scheduler
            .request_slot(&sym("P", 0), PriorityTier::Position)
            .await,
        SlotDecision::Rejected(RejectReason::ShuttingDown)
    );
}

#[derive(Debug, Clone)]
enum Op {
    Request(usize, PriorityTier),
    Release(usize),
}

fn tier() -> impl Strategy<Value = PriorityTier> {
    prop_oneof![
        Just(PriorityTier::ScannerNormal),
        Just(PriorityTier::ScannerTop),
        Just(PriorityTier::Position),
    ]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0usize..20, tier()).prop_map(|(i, t)| Op::Request(i, t)),
        1 => (0usize..20).prop_map(Op::Release),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_pool_never_overflows_and_keeps_positions(
        capacity in 2usize..8,
        ops in prop::collection::vec(op(), 1..60),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let reserved = capacity / 2;
            let (scheduler, gw, bus) = scheduler(capacity, reserved);
            let mut positions: HashSet<Symbol> = HashSet::new();

            for op in ops {
                match op {
                    Op::Request(i, tier) => {
                        let symbol = sym("S", i);
                        let decision = scheduler.request_slot(&symbol, tier).await;
                        if tier == PriorityTier::Position && decision.is_admitted() {
                            positions.insert(symbol);
                        }
                    }
                    Op::Release(i) => {
                        let symbol = sym("S", i);
                        scheduler.release(&symbol).await;
                        positions.remove(&symbol);
                    }
                }

                let usage = scheduler.usage().await;
                prop_assert!(usage.active <= capacity);
                prop_assert!(usage.active - usage.positions <= capacity - reserved);
                prop_assert_eq!(gw.open_symbols().len(), usage.active);
                prop_assert_eq!(bus.subscription_count(), usage.active);

                for symbol in &positions {
                    prop_assert_eq!(
                        scheduler.tier_of(symbol).await,
                        Some(PriorityTier::Position)
                    );
                }
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
