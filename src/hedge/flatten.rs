//! Fail-safe flatten: the only liquidation path.

use std::sync::Arc;

use rust_decimal::Decimal;
use strum::Display;
use tracing::{info, instrument, warn};

use crate::config::{HedgeThresholds, LiquidationPolicy};
use crate::error::GatewayError;
use crate::market::{Cents, Market, Outcome, TopOfBook};
use crate::metrics;
use crate::trading::{
    with_deadline, ExecutionGateway, InFlightDeduper, MarketExposure, OrderKind, OrderRequest,
};

/// Why a flatten was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FlattenReason {
    /// Entry filled below the minimum passive size.
    #[strum(serialize = "entry fill too small")]
    EntryFillTooSmall,
    /// Hedge would exceed the entry fill beyond the allowed ratio.
    #[strum(serialize = "hedge would oversize")]
    WouldOversize,
    /// Fail-safe gate refused the hedge leg.
    #[strum(serialize = "hedge refused")]
    HedgeRefused,
    /// No valid hedge price exists for the entry.
    #[strum(serialize = "hedge unpriceable")]
    HedgeUnpriceable,
    /// Entry stayed unhedged too long.
    #[strum(serialize = "unhedged timeout")]
    Timeout,
    /// Entry token moved too far against the position.
    #[strum(serialize = "stop loss")]
    StopLoss,
}

/// Result of selling one position.
#[derive(Debug, Clone, PartialEq)]
pub enum LegResult {
    /// Sell accepted; shares sold immediately.
    Sold { order_id: String, filled: Decimal },
    /// No usable bid for the token.
    NoBid,
    /// Sell failed.
    Failed(GatewayError),
}

/// One sell leg of a flatten.
#[derive(Debug, Clone, PartialEq)]
pub struct FlattenLeg {
    /// Token sold.
    pub token: Outcome,
    /// Shares held when the flatten started.
    pub size: Decimal,
    /// Bid the sell was priced at.
    pub price: Cents,
    /// Outcome of the sell.
    pub result: LegResult,
}

/// Result of a flatten request.
#[derive(Debug, Clone, PartialEq)]
pub enum FlattenOutcome {
    /// Sells were attempted for every open position.
    Executed(Vec<FlattenLeg>),
    /// Liquidation is disabled by policy.
    Suppressed,
    /// Another flatten for the market is running.
    AlreadyRunning,
    /// Positions could not be read, or the sequence ran out of time.
    Failed(GatewayError),
}

impl FlattenOutcome {
    /// Check if sells were attempted.
    pub fn executed(&self) -> bool {
        matches!(self, FlattenOutcome::Executed(_))
    }
}

/// Cancels every order in a market and sells every open position at the bid.
#[derive(Clone)]
pub struct Flattener {
    gateway: Arc<dyn ExecutionGateway>,
    dedup: InFlightDeduper,
    thresholds: HedgeThresholds,
}

impl Flattener {
    /// Create a flattener.
    pub fn new(gateway: Arc<dyn ExecutionGateway>, thresholds: HedgeThresholds) -> Self {
        Self {
            gateway,
            dedup: InFlightDeduper::new(thresholds.flatten_timeout),
            thresholds,
        }
    }

    /// Flatten a market, honouring the liquidation policy.
    #[instrument(skip(self, market), fields(market = %market.slug, reason = %reason))]
    pub async fn flatten(&self, market: &Market, reason: FlattenReason) -> FlattenOutcome {
        if self.thresholds.liquidation == LiquidationPolicy::HoldToSettlement {
            warn!("Flatten suppressed by hold_to_settlement policy");
            return FlattenOutcome::Suppressed;
        }

        let _guard = match self.dedup.try_acquire(format!("flatten|{}", market.slug)) {
            Ok(guard) => guard,
            Err(_) => {
                info!("Flatten already running");
                return FlattenOutcome::AlreadyRunning;
            }
        };

        metrics::inc_flattens(&reason.to_string());
        warn!("Flattening market");

        match tokio::time::timeout(self.thresholds.flatten_timeout, self.execute(market)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let err = GatewayError::Timeout {
                    op: "flatten",
                    after_ms: self.thresholds.flatten_timeout.as_millis() as u64,
                };
                warn!(error = %err, "Flatten did not complete");
                FlattenOutcome::Failed(err)
            }
        }
    }

    async fn execute(&self, market: &Market) -> FlattenOutcome {
        let t = &self.thresholds;

        // Cancel first so a resting hedge can't fill mid-liquidation
        if let Err(e) = with_deadline(
            "cancel_orders_for_market",
            t.order_timeout,
            self.gateway.cancel_orders_for_market(&market.slug),
        )
        .await
        {
            warn!(error = %e, "Cancel-all failed, continuing with sells");
        }

        let positions = match with_deadline(
            "open_positions_for_market",
            t.query_timeout,
            self.gateway.open_positions_for_market(&market.slug),
        )
        .await
        {
            Ok(positions) => positions,
            Err(e) => {
                warn!(error = %e, "Cannot read positions, flatten aborted");
                return FlattenOutcome::Failed(e);
            }
        };

        let exposure = MarketExposure::from_positions(positions);
        if exposure.is_flat() {
            info!("Nothing to flatten");
            return FlattenOutcome::Executed(Vec::new());
        }

        let book = match with_deadline("top_of_book", t.query_timeout, self.gateway.top_of_book(market))
            .await
        {
            Ok(book) => Some(book),
            Err(e) => {
                warn!(error = %e, "Book unavailable, falling back to per-token prices");
                None
            }
        };

        let mut legs = Vec::with_capacity(2);
        for position in exposure.positions() {
            let price = self.bid_for(market, position.token, book.as_ref()).await;
            legs.push(self.sell(market, position.token, position.size, price).await);
        }
        FlattenOutcome::Executed(legs)
    }

    async fn bid_for(&self, market: &Market, token: Outcome, book: Option<&TopOfBook>) -> Cents {
        if let Some(book) = book {
            return book.bid(token);
        }
        match with_deadline(
            "best_price",
            self.thresholds.query_timeout,
            self.gateway.best_price(market.token_id(token)),
        )
        .await
        {
            Ok((bid, _)) => bid,
            Err(e) => {
                warn!(token = %token, error = %e, "No price for flatten leg");
                Cents::ZERO
            }
        }
    }

    async fn sell(&self, market: &Market, token: Outcome, size: Decimal, price: Cents) -> FlattenLeg {
        if !price.is_tradable() {
            warn!(token = %token, size = %size, "No bid, flatten leg skipped");
            return FlattenLeg {
                token,
                size,
                price,
                result: LegResult::NoBid,
            };
        }

        let request = OrderRequest::flatten(market, token, price, size);
        let _timer = metrics::timer_order_submit(OrderKind::Flatten);
        let result = match with_deadline(
            "place_order",
            self.thresholds.order_timeout,
            self.gateway.place_order(request),
        )
        .await
        {
            Ok(placed) => {
                info!(
                    token = %token,
                    order_id = %placed.order_id,
                    price_cents = price.0,
                    size = %size,
                    filled = %placed.filled_size,
                    "Flatten leg submitted"
                );
                LegResult::Sold {
                    order_id: placed.order_id,
                    filled: placed.filled_size,
                }
            }
            Err(e) => {
                metrics::inc_orders_failed(OrderKind::Flatten);
                warn!(token = %token, price_cents = price.0, size = %size, error = %e, "Flatten leg failed");
                LegResult::Failed(e)
            }
        };

        FlattenLeg {
            token,
            size,
            price,
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::TopOfBook;
    use crate::trading::{OrderStatus, PaperGateway};
    use rust_decimal_macros::dec;

    fn market() -> Market {
        Market::fifteen_minute("btc-updown-15m-0", "up-token", "down-token", 0)
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

    async fn gateway_with_entry() -> Arc<PaperGateway> {
        let gw = Arc::new(PaperGateway::with_book(market(), book()));
        gw.place_order(OrderRequest::entry(&market(), Outcome::Up, Cents(40), dec!(10)))
            .await
            .unwrap();
        gw.place_order(OrderRequest::hedge(&market(), Outcome::Down, Cents(57), dec!(10)))
            .await
            .unwrap();
        gw
    }

    #[tokio::test]
    async fn flatten_cancels_and_sells_at_bid() {
        let gw = gateway_with_entry().await;
        let flattener = Flattener::new(gw.clone(), HedgeThresholds::default());

        let outcome = flattener.flatten(&market(), FlattenReason::Timeout).await;

        let legs = match outcome {
            FlattenOutcome::Executed(legs) => legs,
            other => panic!("expected executed flatten, got {other:?}"),
        };
        assert_eq!(legs.len(), 1);
        assert_eq!(legs[0].token, Outcome::Up);
        assert_eq!(legs[0].price, Cents(38));
        assert!(matches!(legs[0].result, LegResult::Sold { filled, .. } if filled == dec!(10)));

        let hedge = gw
            .orders()
            .into_iter()
            .find(|o| o.kind == OrderKind::Hedge)
            .unwrap();
        assert_eq!(hedge.status, OrderStatus::Canceled);
        assert!(gw.position("btc-updown-15m-0", Outcome::Up).is_some_and(|p| !p.is_live()));
    }

    #[tokio::test]
    async fn missing_bid_skips_leg_only() {
        let gw = gateway_with_entry().await;
        gw.place_order(OrderRequest::entry(&market(), Outcome::Down, Cents(61), dec!(5)))
            .await
            .unwrap();
        gw.set_book(TopOfBook {
            up_bid: Cents::ZERO,
            ..book()
        });
        let flattener = Flattener::new(gw.clone(), HedgeThresholds::default());

        let legs = match flattener.flatten(&market(), FlattenReason::StopLoss).await {
            FlattenOutcome::Executed(legs) => legs,
            other => panic!("expected executed flatten, got {other:?}"),
        };
        assert_eq!(legs.len(), 2);
        assert_eq!(legs[0].result, LegResult::NoBid);
        assert!(matches!(legs[1].result, LegResult::Sold { .. }));
    }

    #[tokio::test]
    async fn hold_policy_never_sells() {
        let gw = gateway_with_entry().await;
        let thresholds = HedgeThresholds {
            liquidation: LiquidationPolicy::HoldToSettlement,
            ..HedgeThresholds::default()
        };
        let flattener = Flattener::new(gw.clone(), thresholds);

        assert_eq!(
            flattener.flatten(&market(), FlattenReason::Timeout).await,
            FlattenOutcome::Suppressed
        );
        assert!(gw.placed_of_kind(OrderKind::Flatten).is_empty());
        assert!(gw.market_cancels().is_empty());
    }

    #[tokio::test]
    async fn concurrent_flatten_is_rejected() {
        let gw = gateway_with_entry().await;
        gw.set_latency(Some(std::time::Duration::from_millis(50)));
        let flattener = Flattener::new(gw.clone(), HedgeThresholds::default());

        let (m1, m2) = (market(), market());
        let (a, b) = tokio::join!(
            flattener.flatten(&m1, FlattenReason::Timeout),
            flattener.flatten(&m2, FlattenReason::Timeout),
        );
        assert!(a.executed());
        assert_eq!(b, FlattenOutcome::AlreadyRunning);
        assert_eq!(gw.placed_of_kind(OrderKind::Flatten).len(), 1);
    }
}
