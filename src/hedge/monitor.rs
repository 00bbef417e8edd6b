//! Hedge monitor: one task per market driving an entry to a hedged state.
//!
//! Each tick, in order:
//! 1. Stop if the market shows no open position.
//! 2. Stop if both sides hold about the same size.
//! 3. Stop if the hedge order has filled the target.
//! 4. Flatten on a stop-loss hit.
//! 5. Flatten once the entry has waited too long.
//! 6. Cancel and reprice the hedge when the reorder interval elapses.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use strum::{Display, IntoStaticStr};
use time::OffsetDateTime;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::flatten::{FlattenOutcome, FlattenReason, Flattener};
use super::pricing::{hedge_price, plan_remaining, HedgePlan};
use crate::config::HedgeThresholds;
use crate::error::GatewayError;
use crate::market::{Cents, Market, Outcome};
use crate::metrics;
use crate::trading::{
    with_deadline, ExecutionGateway, MarketExposure, Order, OrderKind, OrderRequest, TimeInForce,
};

/// Fraction of the target that counts as fully hedged.
const HEDGED_FRACTION: Decimal = Decimal::from_parts(999, 0, 0, false, 3);

/// Slugs of markets with a running monitor.
#[derive(Debug, Default)]
pub struct MonitorRegistry {
    running: HashMap<String, OffsetDateTime>,
}

impl MonitorRegistry {
    /// Register a monitor for `slug`. Fails if one is already running.
    pub fn try_register(&mut self, slug: &str) -> bool {
        if self.running.contains_key(slug) {
            return false;
        }
        self.running.insert(slug.to_string(), OffsetDateTime::now_utc());
        true
    }

    /// Remove `slug`.
    pub fn release(&mut self, slug: &str) {
        self.running.remove(slug);
    }

    /// Check if a monitor runs for `slug`.
    pub fn is_active(&self, slug: &str) -> bool {
        self.running.contains_key(slug)
    }

    /// Slugs with a running monitor.
    pub fn active(&self) -> Vec<String> {
        let mut slugs: Vec<String> = self.running.keys().cloned().collect();
        slugs.sort();
        slugs
    }
}

/// Everything a monitor needs, captured by value at spawn.
#[derive(Debug, Clone)]
pub struct MonitorContext {
    /// Market being hedged.
    pub market: Market,
    /// Token that was entered.
    pub entry_token: Outcome,
    /// Entry price, bounding the hedge price.
    pub entry_price: Cents,
    /// Shares the hedge must reach.
    pub target: Decimal,
    /// Hedge shares already held outside the current order.
    pub hedged_before: Decimal,
    /// Working hedge order, if one was placed.
    pub hedge_order_id: Option<String>,
    /// When the entry filled.
    pub entry_at: OffsetDateTime,
    /// Pricing and timing thresholds.
    pub thresholds: HedgeThresholds,
}

impl MonitorContext {
    /// Token the hedge buys.
    pub fn hedge_token(&self) -> Outcome {
        self.entry_token.opposite()
    }
}

/// Why a monitor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum MonitorExit {
    /// Positions disappeared from the market.
    ExternallyClosed,
    /// Both sides hold the same size.
    Balanced,
    /// Hedge orders filled the target.
    Hedged,
    /// Flattened on a stop-loss hit.
    StopLoss,
    /// Flattened after waiting too long.
    TimedOut,
    /// Process is shutting down; orders left in place.
    Shutdown,
}

/// Long-running hedge driver for one market.
pub struct HedgeMonitor {
    ctx: MonitorContext,
    gateway: Arc<dyn ExecutionGateway>,
    flattener: Flattener,
    shutdown: CancellationToken,
    hedged_before: Decimal,
    hedge_order_id: Option<String>,
    deadline: Instant,
    next_reorder: Instant,
    liquidation_suppressed: bool,
}

impl HedgeMonitor {
    /// Build a monitor. Timers are anchored to the entry time.
    pub fn new(
        ctx: MonitorContext,
        gateway: Arc<dyn ExecutionGateway>,
        flattener: Flattener,
        shutdown: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        let waited = (OffsetDateTime::now_utc() - ctx.entry_at)
            .try_into()
            .unwrap_or(std::time::Duration::ZERO);
        let deadline = now + ctx.thresholds.unhedged_max.saturating_sub(waited);
        let next_reorder = if ctx.hedge_order_id.is_some() {
            now + ctx.thresholds.reorder_interval
        } else {
            now
        };

        Self {
            hedged_before: ctx.hedged_before,
            hedge_order_id: ctx.hedge_order_id.clone(),
            ctx,
            gateway,
            flattener,
            shutdown,
            deadline,
            next_reorder,
            liquidation_suppressed: false,
        }
    }

    /// Run until the exposure resolves or shutdown is requested.
    #[instrument(
        skip_all,
        fields(market = %self.ctx.market.slug, entry_token = %self.ctx.entry_token, target = %self.ctx.target)
    )]
    pub async fn run(mut self) -> MonitorExit {
        info!(
            entry_price = %self.ctx.entry_price,
            hedge_order_id = ?self.hedge_order_id,
            "Hedge monitor started"
        );

        let mut ticker = tokio::time::interval(self.ctx.thresholds.monitor_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Hedge monitor stopping for shutdown");
                    return MonitorExit::Shutdown;
                }
                _ = ticker.tick() => {}
            }

            if let Some(exit) = self.step().await {
                info!(exit = %exit, "Hedge monitor finished");
                return exit;
            }
        }
    }

    async fn step(&mut self) -> Option<MonitorExit> {
        let t = self.ctx.thresholds;
        let slug = self.ctx.market.slug.clone();

        // 1-2. Exposure from the gateway
        let positions = match with_deadline(
            "open_positions_for_market",
            t.query_timeout,
            self.gateway.open_positions_for_market(&slug),
        )
        .await
        {
            Ok(positions) => positions,
            Err(e) => {
                warn!(error = %e, "Position query failed, retrying next tick");
                return None;
            }
        };
        let exposure = MarketExposure::from_positions(positions);

        if exposure.is_flat() {
            if let Some(order_id) = self.hedge_order_id.take() {
                self.cancel(&order_id).await;
            }
            info!("No open position left");
            return Some(MonitorExit::ExternallyClosed);
        }

        if exposure.is_balanced() {
            if let Err(e) = with_deadline(
                "cancel_orders_for_market",
                t.order_timeout,
                self.gateway.cancel_orders_for_market(&slug),
            )
            .await
            {
                warn!(error = %e, "Residual cancel failed");
            }
            info!(size = %exposure.target(), "Exposure balanced");
            return Some(MonitorExit::Balanced);
        }

        // 3. Hedge progress from the order itself
        let current = self.current_order().await;
        let current_fill = current.as_ref().map_or(Decimal::ZERO, Order::effective_filled);
        let hedge_filled = self.hedged_before + current_fill;
        if hedge_filled >= self.ctx.target * HEDGED_FRACTION {
            info!(hedge_filled = %hedge_filled, "Hedge filled");
            return Some(MonitorExit::Hedged);
        }

        // An order that died without filling is replaced straight away
        if let Some(order) = current.filter(|o| o.status.is_terminal()) {
            debug!(order_id = %order.order_id, status = %order.status, "Hedge order no longer working");
            self.hedged_before += order.effective_filled();
            self.hedge_order_id = None;
            self.next_reorder = Instant::now();
        }

        // 4. Stop-loss
        if let Some(stop_loss) = t.stop_loss_cents {
            let avg_entry = exposure
                .position(self.ctx.entry_token)
                .map(|p| p.avg_price * Decimal::ONE_HUNDRED)
                .filter(|avg| avg.is_sign_positive() && !avg.is_zero())
                .unwrap_or_else(|| Decimal::from(self.ctx.entry_price.0));
            if let Some(adverse) = self.adverse_move(avg_entry).await {
                if adverse >= Decimal::from(stop_loss) {
                    warn!(
                        adverse_cents = %adverse,
                        avg_entry_cents = %avg_entry,
                        stop_loss_cents = stop_loss,
                        "Stop-loss hit"
                    );
                    if self.liquidate(FlattenReason::StopLoss).await {
                        return Some(MonitorExit::StopLoss);
                    }
                }
            }
        }

        // 5. Unhedged timeout
        let now = Instant::now();
        if now >= self.deadline {
            warn!(hedge_filled = %hedge_filled, "Entry unhedged too long");
            if self.liquidate(FlattenReason::Timeout).await {
                return Some(MonitorExit::TimedOut);
            }
        }

        // 6. Reprice
        if now >= self.next_reorder {
            return self.reorder().await;
        }
        None
    }

    async fn current_order(&self) -> Option<Order> {
        let order_id = self.hedge_order_id.as_deref()?;
        match with_deadline(
            "get_order",
            self.ctx.thresholds.query_timeout,
            self.gateway.get_order(order_id),
        )
        .await
        {
            Ok(order) => order,
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "Hedge order lookup failed");
                None
            }
        }
    }

    /// Average entry price minus the entry token's current bid, in cents.
    async fn adverse_move(&self, avg_entry_cents: Decimal) -> Option<Decimal> {
        let token_id = self.ctx.market.token_id(self.ctx.entry_token);
        match with_deadline(
            "best_price",
            self.ctx.thresholds.query_timeout,
            self.gateway.best_price(token_id),
        )
        .await
        {
            Ok((bid, _)) if bid.is_quoted() => Some(avg_entry_cents - Decimal::from(bid.0)),
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "Bid unavailable for stop-loss check");
                None
            }
        }
    }

    /// Flatten unless policy forbids it. Returns true when the monitor is done.
    async fn liquidate(&mut self, reason: FlattenReason) -> bool {
        match self.flattener.flatten(&self.ctx.market, reason).await {
            FlattenOutcome::Suppressed => {
                if !self.liquidation_suppressed {
                    warn!(reason = %reason, "Holding to settlement, hedge keeps repricing");
                    self.liquidation_suppressed = true;
                }
                false
            }
            FlattenOutcome::Failed(e) => {
                warn!(reason = %reason, error = %e, "Flatten failed, will retry");
                false
            }
            FlattenOutcome::Executed(_) | FlattenOutcome::AlreadyRunning => true,
        }
    }

    async fn cancel(&self, order_id: &str) -> bool {
        match with_deadline(
            "cancel_order",
            self.ctx.thresholds.order_timeout,
            self.gateway.cancel_order(order_id),
        )
        .await
        {
            Ok(()) | Err(GatewayError::OrderNotFound(_)) => true,
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "Hedge cancel failed");
                false
            }
        }
    }

    async fn reorder(&mut self) -> Option<MonitorExit> {
        let t = self.ctx.thresholds;
        let hedge_token = self.ctx.hedge_token();

        // Replace the working order, folding in whatever it filled
        if let Some(order_id) = self.hedge_order_id.clone() {
            if !self.cancel(&order_id).await {
                return None;
            }
            let final_fill = self
                .current_order()
                .await
                .map_or(Decimal::ZERO, |o| o.effective_filled());
            self.hedged_before += final_fill;
            self.hedge_order_id = None;
        }

        let remaining = self.ctx.target - self.hedged_before;
        if remaining <= Decimal::ZERO {
            return Some(MonitorExit::Hedged);
        }
        self.next_reorder = Instant::now() + t.reorder_interval;

        let book = match with_deadline(
            "top_of_book",
            t.query_timeout,
            self.gateway.top_of_book(&self.ctx.market),
        )
        .await
        {
            Ok(book) => book,
            Err(e) => {
                warn!(error = %e, "Book unavailable, reprice skipped");
                return None;
            }
        };
        let opposite_ask = book.ask(hedge_token);
        let price = match hedge_price(self.ctx.entry_price, opposite_ask, t.hedge_offset_cents) {
            Ok(price) => price,
            Err(e) => {
                warn!(error = %e, "No valid hedge price, reprice skipped");
                return None;
            }
        };

        let request = match plan_remaining(remaining, price, opposite_ask, &t) {
            HedgePlan::Maker { price, size, .. } => {
                OrderRequest::hedge(&self.ctx.market, hedge_token, price, size)
            }
            HedgePlan::Taker { price, size } => {
                metrics::inc_taker_fallbacks();
                info!(price_cents = price.0, size = %size, "Hedge remainder taken at ask");
                OrderRequest::hedge(&self.ctx.market, hedge_token, price, size)
                    .with_tif(TimeInForce::FAK)
            }
            HedgePlan::Deferred { size } => {
                debug!(remaining = %size, "Hedge remainder too small, deferred");
                return None;
            }
        };

        let (price_cents, size) = (request.price.0, request.size);
        let _timer = metrics::timer_order_submit(OrderKind::Hedge);
        match with_deadline("place_order", t.order_timeout, self.gateway.place_order(request)).await
        {
            Ok(placed) => {
                metrics::inc_hedge_reorders();
                info!(
                    order_id = %placed.order_id,
                    price_cents,
                    size = %size,
                    remaining = %remaining,
                    "Hedge repriced"
                );
                self.hedge_order_id = Some(placed.order_id);
            }
            Err(e) => {
                metrics::inc_orders_failed(OrderKind::Hedge);
                warn!(price_cents, size = %size, error = %e, "Hedge reprice failed");
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LiquidationPolicy;
    use crate::market::TopOfBook;
    use crate::trading::{OrderStatus, PaperGateway, Position};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const SLUG: &str = "btc-updown-15m-0";

    fn market() -> Market {
        Market::fifteen_minute(SLUG, "up-token", "down-token", 0)
    }

    fn book() -> TopOfBook {
        TopOfBook {
            up_bid: Cents(38),
            up_ask: Cents(40),
            down_bid: Cents(58),
            down_ask: Cents(61),
            ..Default::default()
        }
    }

    fn thresholds() -> HedgeThresholds {
        HedgeThresholds {
            hedge_offset_cents: 2,
            ..HedgeThresholds::default()
        }
    }

    async fn entered(gw: &PaperGateway) -> Option<String> {
        gw.place_order(OrderRequest::entry(&market(), Outcome::Up, Cents(40), dec!(10)))
            .await
            .unwrap();
        let hedge = gw
            .place_order(OrderRequest::hedge(&market(), Outcome::Down, Cents(58), dec!(10)))
            .await
            .unwrap();
        Some(hedge.order_id)
    }

    fn monitor(gw: Arc<PaperGateway>, hedge_order_id: Option<String>, t: HedgeThresholds) -> HedgeMonitor {
        let ctx = MonitorContext {
            market: market(),
            entry_token: Outcome::Up,
            entry_price: Cents(40),
            target: dec!(10),
            hedged_before: Decimal::ZERO,
            hedge_order_id,
            entry_at: OffsetDateTime::now_utc(),
            thresholds: t,
        };
        let flattener = Flattener::new(gw.clone(), t);
        HedgeMonitor::new(ctx, gw, flattener, CancellationToken::new())
    }

    #[test]
    fn registry_allows_one_monitor_per_market() {
        let mut registry = MonitorRegistry::default();
        assert!(registry.try_register(SLUG));
        assert!(!registry.try_register(SLUG));
        assert!(registry.is_active(SLUG));
        registry.release(SLUG);
        assert!(registry.try_register(SLUG));
        assert_eq!(registry.active(), vec![SLUG.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn exits_when_hedge_fills() {
        let gw = Arc::new(PaperGateway::with_book(market(), book()));
        let hedge_id = entered(&gw).await;
        let task = tokio::spawn(monitor(gw.clone(), hedge_id, thresholds()).run());

        tokio::time::sleep(Duration::from_secs(3)).await;
        gw.set_book(TopOfBook {
            down_ask: Cents(58),
            ..book()
        });

        // Positions now balance, which the monitor sees first
        assert_eq!(task.await.unwrap(), MonitorExit::Balanced);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_flattens_both_sides() {
        let gw = Arc::new(PaperGateway::with_book(market(), book()));
        let hedge_id = entered(&gw).await;
        let t = HedgeThresholds {
            reorder_interval: Duration::from_secs(600),
            ..thresholds()
        };

        let exit = monitor(gw.clone(), hedge_id.clone(), t).run().await;

        assert_eq!(exit, MonitorExit::TimedOut);
        assert_eq!(gw.market_cancels(), vec![SLUG.to_string()]);
        let flattens = gw.placed_of_kind(OrderKind::Flatten);
        assert_eq!(flattens.len(), 1);
        assert_eq!(flattens[0].token, Outcome::Up);
        assert_eq!(flattens[0].price, Cents(38));
        let hedge = gw.get_order(&hedge_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(hedge.status, OrderStatus::Canceled);
    }

    #[tokio::test(start_paused = true)]
    async fn reorder_carries_partial_fill() {
        let gw = Arc::new(PaperGateway::with_book(market(), book()));
        let hedge_id = entered(&gw).await.unwrap();
        let task = tokio::spawn(monitor(gw.clone(), Some(hedge_id.clone()), thresholds()).run());

        gw.fill_order(&hedge_id, dec!(4)).unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;

        let hedges = gw.placed_of_kind(OrderKind::Hedge);
        assert_eq!(hedges.len(), 2);
        assert_eq!(hedges[1].price, Cents(58));
        assert_eq!(hedges[1].size, dec!(6));
        assert!(gw.canceled().contains(&hedge_id));

        gw.clear_positions(SLUG);
        assert_eq!(task.await.unwrap(), MonitorExit::ExternallyClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_loss_flattens_early() {
        let gw = Arc::new(PaperGateway::with_book(market(), book()));
        let hedge_id = entered(&gw).await;
        let t = HedgeThresholds {
            stop_loss_cents: Some(5),
            ..thresholds()
        };
        let task = tokio::spawn(monitor(gw.clone(), hedge_id, t).run());

        gw.set_book(TopOfBook {
            up_bid: Cents(34),
            ..book()
        });

        assert_eq!(task.await.unwrap(), MonitorExit::StopLoss);
        assert_eq!(gw.placed_of_kind(OrderKind::Flatten)[0].price, Cents(34));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_loss_measures_from_average_fill() {
        let gw = Arc::new(PaperGateway::with_book(market(), book()));
        // Limit was 40 but the entry filled at 36 on average
        gw.add_position(Position {
            market_slug: SLUG.to_string(),
            token: Outcome::Up,
            token_id: "up-token".to_string(),
            size: dec!(10),
            avg_price: dec!(0.36),
            entry_price: Some(Cents(40)),
            entry_time: Some(OffsetDateTime::now_utc()),
            open: true,
        });
        let t = HedgeThresholds {
            stop_loss_cents: Some(5),
            ..thresholds()
        };
        let task = tokio::spawn(monitor(gw.clone(), None, t).run());

        gw.set_book(TopOfBook {
            up_bid: Cents(34),
            ..book()
        });
        tokio::time::sleep(Duration::from_secs(5)).await;

        // 2¢ below the average fill, 6¢ below the limit
        assert!(gw.placed_of_kind(OrderKind::Flatten).is_empty());
        assert!(!task.is_finished());
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn hold_policy_keeps_repricing_past_timeout() {
        let gw = Arc::new(PaperGateway::with_book(market(), book()));
        let hedge_id = entered(&gw).await;
        let t = HedgeThresholds {
            liquidation: LiquidationPolicy::HoldToSettlement,
            unhedged_max: Duration::from_secs(10),
            ..thresholds()
        };
        let shutdown = CancellationToken::new();
        let ctx = MonitorContext {
            market: market(),
            entry_token: Outcome::Up,
            entry_price: Cents(40),
            target: dec!(10),
            hedged_before: Decimal::ZERO,
            hedge_order_id: hedge_id,
            entry_at: OffsetDateTime::now_utc(),
            thresholds: t,
        };
        let mon = HedgeMonitor::new(ctx, gw.clone(), Flattener::new(gw.clone(), t), shutdown.clone());
        let task = tokio::spawn(mon.run());

        tokio::time::sleep(Duration::from_secs(65)).await;
        assert!(gw.placed_of_kind(OrderKind::Flatten).is_empty());
        assert!(gw.placed_of_kind(OrderKind::Hedge).len() >= 3);

        shutdown.cancel();
        assert_eq!(task.await.unwrap(), MonitorExit::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_remainder_uses_taker_fallback() {
        let gw = Arc::new(PaperGateway::with_book(market(), book()));
        gw.place_order(OrderRequest::entry(&market(), Outcome::Up, Cents(40), dec!(10)))
            .await
            .unwrap();
        // 8 of 10 already hedged, 2 left: too small to rest
        gw.place_order(OrderRequest::hedge(&market(), Outcome::Down, Cents(61), dec!(8)))
            .await
            .unwrap();
        let ctx = MonitorContext {
            market: market(),
            entry_token: Outcome::Up,
            entry_price: Cents(40),
            target: dec!(10),
            hedged_before: dec!(8),
            hedge_order_id: None,
            entry_at: OffsetDateTime::now_utc(),
            thresholds: thresholds(),
        };
        let flattener = Flattener::new(gw.clone(), thresholds());
        let exit = HedgeMonitor::new(ctx, gw.clone(), flattener, CancellationToken::new())
            .run()
            .await;

        assert_eq!(exit, MonitorExit::Balanced);
        let hedges = gw.placed_of_kind(OrderKind::Hedge);
        let taker = hedges.last().unwrap();
        assert_eq!(taker.tif, TimeInForce::FAK);
        assert_eq!(taker.price, Cents(61));
        assert_eq!(taker.size, dec!(2));
    }
}
