//! Exposure reconciliation against exchange state.
//!
//! Runs before every entry decision. Reads positions and orders back from
//! the gateway, cancels stray orders, and makes sure any unhedged entry has
//! a hedge working and a monitor watching it. Repeated runs against the
//! same state place nothing new.

use futures::future::join_all;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use super::monitor::MonitorContext;
use super::pricing::{hedge_price, plan_remaining, HedgePlan};
use super::strategy::HedgeStrategy;
use crate::market::{Cents, Market};
use crate::metrics;
use crate::trading::{
    nearly_equal_shares, with_deadline, MarketExposure, Order, OrderKind, OrderRequest,
    TimeInForce,
};

/// Exposure state found by a reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No open position.
    NoExposure,
    /// Both sides held; `hedge_working` when an order or monitor is still live.
    Balanced { hedge_working: bool },
    /// One side heavier than the other.
    Unbalanced { monitored: bool },
    /// Positions could not be read.
    Unknown,
}

impl ReconcileOutcome {
    /// Check if a new entry may follow this state.
    pub fn allows_entry(&self, require_fully_hedged: bool) -> bool {
        match self {
            ReconcileOutcome::NoExposure => true,
            ReconcileOutcome::Balanced { hedge_working } => {
                !(require_fully_hedged && *hedge_working)
            }
            ReconcileOutcome::Unbalanced { .. } | ReconcileOutcome::Unknown => false,
        }
    }
}

impl HedgeStrategy {
    /// Reconcile one market's exposure.
    #[instrument(skip_all, fields(market = %market.slug))]
    pub async fn reconcile(&self, market: &Market) -> ReconcileOutcome {
        let positions = match with_deadline(
            "open_positions_for_market",
            self.thresholds.query_timeout,
            self.gateway.open_positions_for_market(&market.slug),
        )
        .await
        {
            Ok(positions) => positions,
            Err(e) => {
                warn!(error = %e, "Cannot read positions, deferring decision");
                return ReconcileOutcome::Unknown;
            }
        };

        let exposure = MarketExposure::from_positions(positions);
        if exposure.is_flat() {
            return ReconcileOutcome::NoExposure;
        }

        let monitored = self.is_monitoring(&market.slug);
        if exposure.is_fully_hedged() {
            let hedge_working = monitored || self.cancel_stray_orders(market).await;
            return ReconcileOutcome::Balanced { hedge_working };
        }

        if monitored {
            debug!(unhedged = %exposure.unhedged(), "Unhedged exposure already monitored");
            return ReconcileOutcome::Unbalanced { monitored: true };
        }

        // The entry's own update submits its hedge
        if self.has_pending_entry(&market.slug) {
            debug!(unhedged = %exposure.unhedged(), "Entry fill report pending, recovery deferred");
            return ReconcileOutcome::Unbalanced { monitored: false };
        }

        self.recover(market, &exposure).await;
        ReconcileOutcome::Unbalanced {
            monitored: self.is_monitoring(&market.slug),
        }
    }

    /// Cancel orders left working in a hedged market.
    ///
    /// Returns `true` while something may still be working.
    async fn cancel_stray_orders(&self, market: &Market) -> bool {
        let strays = match self.working_orders(market).await {
            Some(orders) => orders,
            None => return true,
        };

        let cancels = strays.iter().map(|order| async move {
            info!(order_id = %order.order_id, token = %order.token, "Canceling stray order in hedged market");
            let result = with_deadline(
                "cancel_order",
                self.thresholds.order_timeout,
                self.gateway.cancel_order(&order.order_id),
            )
            .await;
            if let Err(e) = &result {
                warn!(order_id = %order.order_id, error = %e, "Stray order cancel failed");
            }
            result.is_err()
        });
        join_all(cancels).await.into_iter().any(|failed| failed)
    }

    async fn working_orders(&self, market: &Market) -> Option<Vec<Order>> {
        match with_deadline(
            "active_orders",
            self.thresholds.query_timeout,
            self.gateway.active_orders(),
        )
        .await
        {
            Ok(orders) => Some(
                orders
                    .into_iter()
                    .filter(|o| o.market_slug == market.slug && o.status.is_working())
                    .collect(),
            ),
            Err(e) => {
                warn!(error = %e, "Cannot read active orders");
                None
            }
        }
    }

    /// Restore a hedge and a monitor for an unmonitored, unhedged entry.
    async fn recover(&self, market: &Market, exposure: &MarketExposure) {
        let t = self.thresholds;
        let entry_token = exposure.heavy_side();
        let hedge_token = entry_token.opposite();
        let Some(entry) = exposure.position(entry_token) else {
            return;
        };
        let Some(entry_price) = entry.entry_price_cents() else {
            warn!(
                token = %entry_token,
                avg_price = %entry.avg_price,
                "Entry price unknown, exposure left untouched"
            );
            return;
        };

        let (target, hedged, unhedged) = (exposure.target(), exposure.hedged(), exposure.unhedged());
        let entry_at = entry.entry_time.unwrap_or_else(|| {
            warn!("Entry time unknown, timing from now");
            OffsetDateTime::now_utc()
        });
        info!(
            entry_token = %entry_token,
            entry_price_cents = entry_price.0,
            target = %target,
            hedged = %hedged,
            unhedged = %unhedged,
            "Recovering unhedged exposure"
        );

        let Some(orders) = self.working_orders(market).await else {
            return;
        };
        let resting: Vec<Order> = orders
            .into_iter()
            .filter(|o| o.is_resting_buy(&market.slug, hedge_token))
            .collect();

        let opposite_ask = match with_deadline(
            "top_of_book",
            t.query_timeout,
            self.gateway.top_of_book(market),
        )
        .await
        {
            Ok(book) => book.ask(hedge_token),
            Err(e) => {
                warn!(error = %e, "Book unavailable during recovery");
                Cents::ZERO
            }
        };
        let bound = hedge_price(entry_price, opposite_ask, t.hedge_offset_cents).ok();

        let mut ctx = MonitorContext {
            market: market.clone(),
            entry_token,
            entry_price,
            target,
            hedged_before: hedged,
            hedge_order_id: None,
            entry_at,
            thresholds: t,
        };

        // One adequately sized and priced hedge already rests: keep it
        if let [order] = resting.as_slice() {
            let priced_ok = bound.map_or(true, |b| order.price <= b);
            if priced_ok && nearly_equal_shares(order.remaining(), unhedged) {
                info!(order_id = %order.order_id, price_cents = order.price.0, "Keeping resting hedge");
                ctx.hedged_before = (hedged - order.effective_filled()).max(Decimal::ZERO);
                ctx.hedge_order_id = Some(order.order_id.clone());
                self.start_monitor(ctx);
                return;
            }
        }

        for order in &resting {
            if let Err(e) = with_deadline(
                "cancel_order",
                t.order_timeout,
                self.gateway.cancel_order(&order.order_id),
            )
            .await
            {
                warn!(order_id = %order.order_id, error = %e, "Stale hedge cancel failed, retrying next tick");
                return;
            }
            info!(order_id = %order.order_id, price_cents = order.price.0, "Canceled stale hedge");
        }

        let plan = match bound {
            Some(price) => plan_remaining(unhedged, price, opposite_ask, &t),
            None => {
                warn!(opposite_ask_cents = opposite_ask.0, "No valid hedge price, monitor will reprice");
                HedgePlan::Deferred { size: unhedged }
            }
        };

        let request = match plan {
            HedgePlan::Maker { price, size, .. } => {
                Some(OrderRequest::hedge(market, hedge_token, price, size))
            }
            HedgePlan::Taker { price, size } => {
                metrics::inc_taker_fallbacks();
                Some(OrderRequest::hedge(market, hedge_token, price, size).with_tif(TimeInForce::FAK))
            }
            HedgePlan::Deferred { .. } => None,
        };

        if let Some(request) = request {
            let (price, size) = (request.price, request.size);
            match with_deadline(
                "place_order",
                t.order_timeout,
                self.gateway.place_order(request),
            )
            .await
            {
                Ok(placed) => {
                    metrics::inc_hedges_submitted();
                    info!(order_id = %placed.order_id, price_cents = price.0, size = %size, "Recovery hedge placed");
                    ctx.hedge_order_id = Some(placed.order_id);
                }
                Err(e) => {
                    metrics::inc_orders_failed(OrderKind::Hedge);
                    warn!(error = %e, "Recovery hedge failed, monitor will retry");
                }
            }
        }

        self.start_monitor(ctx);
    }
}
