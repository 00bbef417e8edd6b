//! End-to-end tests for the hedge engine against the paper gateway.
//!
//! Run with: cargo test --test integration

use std::sync::Arc;
use std::time::Duration;

use polymarket_hedge::config::Config;
use polymarket_hedge::error::{GatewayError, PolicyRefusal};
use polymarket_hedge::hedge::{
    EntryOutcome, FlattenOutcome, FlattenReason, HedgeOutcome, HedgeStrategy, ReconcileOutcome,
    TickOutcome,
};
use polymarket_hedge::market::{Cents, Market, Outcome, PriceEvent, TopOfBook};
use polymarket_hedge::trading::{
    ExecutionGateway, OrderKind, OrderStatus, PaperGateway, Position, Side, TimeInForce,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use time::OffsetDateTime;

const SLUG: &str = "btc-updown-15m-1";

fn market() -> Market {
    let start = OffsetDateTime::now_utc().unix_timestamp() - 60;
    Market::fifteen_minute(SLUG, "up-token", "down-token", start)
}

/// UP 38/40, DOWN 58/61.
fn book() -> TopOfBook {
    TopOfBook {
        up_bid: Cents(38),
        up_ask: Cents(40),
        down_bid: Cents(58),
        down_ask: Cents(61),
        ..Default::default()
    }
}

fn config() -> Config {
    Config {
        order_size: dec!(10),
        hedge_offset_cents: 2,
        ..Config::default()
    }
}

fn setup(config: Config) -> (Arc<PaperGateway>, HedgeStrategy) {
    let gateway = Arc::new(PaperGateway::with_book(market(), book()));
    let strategy = HedgeStrategy::new(&config, gateway.clone());
    strategy.on_cycle(None, market());
    (gateway, strategy)
}

async fn tick(strategy: &HedgeStrategy, offset_secs: i64, price: i32) -> TickOutcome {
    strategy
        .on_price_changed(PriceEvent {
            market: market(),
            token: Outcome::Up,
            price: Cents(price),
            timestamp: OffsetDateTime::now_utc() + time::Duration::seconds(offset_secs),
        })
        .await
}

/// Feed a 4¢ rise on UP over two seconds.
async fn trigger(strategy: &HedgeStrategy) -> TickOutcome {
    assert_eq!(tick(strategy, 0, 36).await, TickOutcome::NoSignal);
    tick(strategy, 2, 40).await
}

#[tokio::test]
async fn entry_at_ask_rests_bounded_hedge() {
    let (gateway, strategy) = setup(config());

    let outcome = trigger(&strategy).await;

    let TickOutcome::Entry(EntryOutcome::Filled { filled, hedge, .. }) = outcome else {
        panic!("expected a filled entry, got {outcome:?}");
    };
    assert_eq!(filled, dec!(10));
    assert!(matches!(
        hedge,
        HedgeOutcome::Submitted { price: Cents(58), taker: false, .. }
    ));

    let entries = gateway.placed_of_kind(OrderKind::Entry);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].token, Outcome::Up);
    assert_eq!(entries[0].price, Cents(40));
    assert_eq!(entries[0].tif, TimeInForce::FAK);

    let hedges = gateway.placed_of_kind(OrderKind::Hedge);
    assert_eq!(hedges.len(), 1);
    assert_eq!(hedges[0].token, Outcome::Down);
    assert_eq!(hedges[0].side, Side::Buy);
    assert_eq!(hedges[0].price, Cents(58));
    assert_eq!(hedges[0].size, dec!(10));
    assert_eq!(hedges[0].tif, TimeInForce::GTC);
    assert!(hedges[0].price < Cents(61));

    assert!(strategy.is_monitoring(SLUG));
    strategy.shutdown().await;
}

#[tokio::test]
async fn small_entry_fill_is_flattened_without_hedge() {
    let (gateway, strategy) = setup(config());
    gateway.set_ask_depth(Outcome::Up, Some(dec!(3)));

    let outcome = trigger(&strategy).await;

    let TickOutcome::Entry(EntryOutcome::Filled { filled, hedge, .. }) = outcome else {
        panic!("expected a filled entry, got {outcome:?}");
    };
    assert_eq!(filled, dec!(3));
    let HedgeOutcome::Liquidation { reason, outcome } = hedge else {
        panic!("expected liquidation, got {hedge:?}");
    };
    assert_eq!(reason, FlattenReason::EntryFillTooSmall);
    assert!(outcome.executed());

    assert!(gateway.placed_of_kind(OrderKind::Hedge).is_empty());
    let sells = gateway.placed_of_kind(OrderKind::Flatten);
    assert_eq!(sells.len(), 1);
    assert_eq!(sells[0].price, Cents(38));
    assert_eq!(sells[0].size, dec!(3));
    assert_eq!(strategy.trades_this_cycle(), 0);
}

#[tokio::test(start_paused = true)]
async fn unhedged_entry_is_flattened_after_timeout() {
    let (gateway, strategy) = setup(config());
    trigger(&strategy).await;
    assert!(strategy.is_monitoring(SLUG));

    tokio::time::sleep(Duration::from_secs(130)).await;

    assert!(!strategy.is_monitoring(SLUG));
    let sells = gateway.placed_of_kind(OrderKind::Flatten);
    assert_eq!(sells.len(), 1);
    assert_eq!(sells[0].token, Outcome::Up);
    assert!(gateway
        .position(SLUG, Outcome::Up)
        .is_some_and(|p| !p.is_live()));
    assert!(gateway
        .orders()
        .iter()
        .filter(|o| o.kind == OrderKind::Hedge)
        .all(|o| !o.status.is_working()));
    strategy.shutdown().await;
}

#[tokio::test]
async fn cooldown_blocks_second_trigger() {
    let (gateway, strategy) = setup(config());
    gateway.set_ask_depth(Outcome::Up, Some(Decimal::ZERO));

    let first = trigger(&strategy).await;
    assert!(matches!(first, TickOutcome::Entry(EntryOutcome::Unfilled { .. })));

    assert_eq!(tick(&strategy, 3, 44).await, TickOutcome::CoolingDown);
    assert_eq!(gateway.placed_of_kind(OrderKind::Entry).len(), 1);
}

#[tokio::test]
async fn trade_cap_counts_hedged_entries() {
    let config = Config {
        max_trades_per_cycle: 1,
        ..config()
    };
    let (gateway, strategy) = setup(config);
    trigger(&strategy).await;

    // DOWN ask drops onto the resting hedge
    let fills = gateway.set_book(TopOfBook {
        down_ask: Cents(57),
        down_bid: Cents(55),
        ..book()
    });
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].status, OrderStatus::Filled);

    assert_eq!(tick(&strategy, 4, 44).await, TickOutcome::TradeCapReached);
    strategy.shutdown().await;
}

#[tokio::test]
async fn restart_recovers_orphaned_entry_once() {
    let gateway = Arc::new(PaperGateway::with_book(market(), book()));
    gateway.add_position(Position {
        market_slug: SLUG.to_string(),
        token: Outcome::Up,
        token_id: "up-token".to_string(),
        size: dec!(10),
        avg_price: dec!(0.40),
        entry_price: Some(Cents(40)),
        entry_time: Some(OffsetDateTime::now_utc() - time::Duration::seconds(30)),
        open: true,
    });

    let strategy = HedgeStrategy::new(&config(), gateway.clone());
    strategy.on_cycle(None, market());

    assert_eq!(
        tick(&strategy, 0, 36).await,
        TickOutcome::Exposure(ReconcileOutcome::Unbalanced { monitored: true })
    );
    let hedges = gateway.placed_of_kind(OrderKind::Hedge);
    assert_eq!(hedges.len(), 1);
    assert_eq!(hedges[0].token, Outcome::Down);
    assert_eq!(hedges[0].price, Cents(58));
    assert_eq!(hedges[0].size, dec!(10));

    for secs in 1..4 {
        tick(&strategy, secs, 40).await;
    }
    assert_eq!(gateway.placed_of_kind(OrderKind::Hedge).len(), 1);
    assert!(gateway.placed_of_kind(OrderKind::Entry).is_empty());
    strategy.shutdown().await;
}

#[tokio::test]
async fn paused_gateway_refuses_entry() {
    let (gateway, strategy) = setup(config());
    gateway.gate().set_paused(true);

    let outcome = trigger(&strategy).await;

    assert_eq!(
        outcome,
        TickOutcome::Entry(EntryOutcome::Refused(PolicyRefusal::TradingPaused))
    );
    assert!(gateway.placed().is_empty());
    assert!(gateway
        .open_positions_for_market(SLUG)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn refused_hedge_flattens_entry() {
    let (gateway, strategy) = setup(config());
    gateway.fail_next(
        OrderKind::Hedge,
        GatewayError::PolicyRefused(PolicyRefusal::TradingPaused),
    );

    let outcome = trigger(&strategy).await;

    let TickOutcome::Entry(EntryOutcome::Filled { hedge, .. }) = outcome else {
        panic!("expected a filled entry, got {outcome:?}");
    };
    assert!(matches!(
        hedge,
        HedgeOutcome::Liquidation {
            reason: FlattenReason::HedgeRefused,
            outcome: FlattenOutcome::Executed(_)
        }
    ));
    assert!(gateway.placed_of_kind(OrderKind::Hedge).is_empty());
    assert_eq!(gateway.placed_of_kind(OrderKind::Flatten).len(), 1);
    assert!(!strategy.is_monitoring(SLUG));
}

#[tokio::test(start_paused = true)]
async fn failed_hedge_is_retried_by_monitor() {
    let (gateway, strategy) = setup(config());
    gateway.fail_next(
        OrderKind::Hedge,
        GatewayError::Transient("connection reset".to_string()),
    );

    let outcome = trigger(&strategy).await;
    assert!(matches!(
        outcome,
        TickOutcome::Entry(EntryOutcome::Filled {
            hedge: HedgeOutcome::Retrying(_),
            ..
        })
    ));

    tokio::time::sleep(Duration::from_secs(2)).await;

    let hedges = gateway.placed_of_kind(OrderKind::Hedge);
    assert_eq!(hedges.len(), 1);
    assert_eq!(hedges[0].price, Cents(58));
    strategy.shutdown().await;
}

#[tokio::test]
async fn deferred_entry_fill_submits_hedge_on_update() {
    let (gateway, strategy) = setup(config());
    gateway.defer_taker_fills(true);

    let outcome = trigger(&strategy).await;
    let TickOutcome::Entry(EntryOutcome::Pending { order_id }) = outcome else {
        panic!("expected a pending entry, got {outcome:?}");
    };
    assert_eq!(strategy.pending_entries(), 1);
    assert!(gateway.placed_of_kind(OrderKind::Hedge).is_empty());

    let updates = gateway.settle_deferred();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].order_id, order_id);

    let resolved = strategy.on_order_update(&updates[0]).await;
    assert!(matches!(
        resolved,
        Some(EntryOutcome::Filled {
            hedge: HedgeOutcome::Submitted { price: Cents(58), .. },
            ..
        })
    ));
    assert_eq!(strategy.pending_entries(), 0);
    assert_eq!(strategy.on_order_update(&updates[0]).await, None);
    strategy.shutdown().await;
}

#[tokio::test]
async fn events_from_previous_cycle_are_ignored() {
    let (gateway, strategy) = setup(config());
    let next = Market::fifteen_minute(
        "btc-updown-15m-2",
        "up-2",
        "down-2",
        market().end_timestamp,
    );
    strategy.on_cycle(Some(&market()), next);

    // Gateway still trades the old market and the strategy moved on
    assert_eq!(tick(&strategy, 0, 36).await, TickOutcome::Stale);
    assert_eq!(tick(&strategy, 2, 40).await, TickOutcome::Stale);
    assert!(gateway.placed().is_empty());
}

#[tokio::test]
async fn late_entry_update_after_fill_hedges_once() {
    let (gateway, strategy) = setup(config());
    gateway.defer_taker_fills(true);

    let outcome = trigger(&strategy).await;
    assert!(matches!(outcome, TickOutcome::Entry(EntryOutcome::Pending { .. })));

    // Fill lands in positions before its order update is delivered
    let updates = gateway.settle_deferred();
    assert_eq!(
        tick(&strategy, 3, 44).await,
        TickOutcome::Exposure(ReconcileOutcome::Unbalanced { monitored: false })
    );
    assert!(gateway.placed_of_kind(OrderKind::Hedge).is_empty());

    let resolved = strategy.on_order_update(&updates[0]).await;
    assert!(matches!(
        resolved,
        Some(EntryOutcome::Filled {
            hedge: HedgeOutcome::Submitted { .. },
            ..
        })
    ));

    let hedges = gateway.placed_of_kind(OrderKind::Hedge);
    let hedged: Decimal = hedges.iter().map(|h| h.size).sum();
    assert_eq!(hedges.len(), 1);
    assert_eq!(hedged, dec!(10));
    assert_eq!(strategy.trades_this_cycle(), 1);
    strategy.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn lost_entry_update_expires_into_recovery() {
    let (gateway, strategy) = setup(config());
    gateway.defer_taker_fills(true);

    trigger(&strategy).await;
    let updates = gateway.settle_deferred();
    assert_eq!(strategy.pending_entries(), 1);

    tokio::time::sleep(Duration::from_secs(6)).await;

    assert_eq!(
        tick(&strategy, 3, 44).await,
        TickOutcome::Exposure(ReconcileOutcome::Unbalanced { monitored: true })
    );
    assert_eq!(strategy.pending_entries(), 0);
    assert_eq!(gateway.placed_of_kind(OrderKind::Hedge).len(), 1);

    // A late update for the expired entry places nothing
    assert_eq!(strategy.on_order_update(&updates[0]).await, None);
    assert_eq!(gateway.placed_of_kind(OrderKind::Hedge).len(), 1);
    strategy.shutdown().await;
}
