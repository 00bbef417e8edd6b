//! Execution gateway contract.
//!
//! The gateway owns orders and positions. The engine places and cancels
//! through it, reads authoritative fill state back, and wraps every call in
//! a deadline so a stalled upstream degrades one tick instead of the process.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;

use super::order::{Order, OrderRequest, PlacedOrder};
use super::position::Position;
use crate::error::GatewayError;
use crate::market::{assess, Cents, Market, MarketQuality, QualityOptions, TopOfBook};

/// Order placement, cancellation and state queries.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    /// Place an order. Refusals by the fail-safe gate come back as
    /// [`GatewayError::PolicyRefused`].
    async fn place_order(&self, request: OrderRequest) -> Result<PlacedOrder, GatewayError>;

    /// Cancel one order.
    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError>;

    /// Cancel every working order in a market. Best effort.
    async fn cancel_orders_for_market(&self, market_slug: &str) -> Result<(), GatewayError>;

    /// Look up one order. `Ok(None)` when the gateway has never seen it.
    async fn get_order(&self, order_id: &str) -> Result<Option<Order>, GatewayError>;

    /// All working orders.
    async fn active_orders(&self) -> Result<Vec<Order>, GatewayError>;

    /// Open positions in a market.
    async fn open_positions_for_market(
        &self,
        market_slug: &str,
    ) -> Result<Vec<Position>, GatewayError>;

    /// Best bid/ask for both tokens.
    async fn top_of_book(&self, market: &Market) -> Result<TopOfBook, GatewayError>;

    /// Best bid and ask for one token.
    async fn best_price(&self, token_id: &str) -> Result<(Cents, Cents), GatewayError>;

    /// Market the gateway currently trades.
    fn current_market(&self) -> Option<String>;

    /// Quality score for a market's book.
    async fn market_quality(
        &self,
        market: &Market,
        opts: &QualityOptions,
    ) -> Result<MarketQuality, GatewayError> {
        let book = self.top_of_book(market).await?;
        Ok(assess(&market.slug, &book, OffsetDateTime::now_utc(), opts))
    }
}

/// Run a gateway call under a deadline.
pub async fn with_deadline<T, F>(
    op: &'static str,
    deadline: Duration,
    call: F,
) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout {
            op,
            after_ms: deadline.as_millis() as u64,
        }),
    }
}
