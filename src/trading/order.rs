//! Order types and creation.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use time::OffsetDateTime;

use crate::market::{Cents, Market, Outcome};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order.
    #[strum(serialize = "BUY", serialize = "buy")]
    Buy,
    /// Sell order.
    #[strum(serialize = "SELL", serialize = "sell")]
    Sell,
}

/// Order time-in-force.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// Fill-or-kill: must fill entirely or cancel.
    #[strum(serialize = "FOK", serialize = "fok")]
    FOK,
    /// Fill-and-kill: fill what's available, cancel rest.
    #[default]
    #[strum(serialize = "FAK", serialize = "fak")]
    FAK,
    /// Good-till-cancelled: stays on book until filled or cancelled.
    #[strum(serialize = "GTC", serialize = "gtc")]
    GTC,
}

impl TimeInForce {
    /// Check if the order executes immediately against the book.
    pub fn is_aggressive(&self) -> bool {
        matches!(self, TimeInForce::FOK | TimeInForce::FAK)
    }
}

/// Role an order plays in a hedged pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderKind {
    /// Aggressive leg that opens directional exposure.
    Entry,
    /// Leg that offsets the entry.
    Hedge,
    /// Liquidating sell.
    Flatten,
}

/// Order parameters for submission.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    /// Market slug the order belongs to.
    pub market_slug: String,
    /// Token being traded.
    pub token: Outcome,
    /// Token ID to trade.
    pub token_id: String,
    /// Order side (buy/sell).
    pub side: Side,
    /// Limit price.
    pub price: Cents,
    /// Order size in shares.
    pub size: Decimal,
    /// Time-in-force.
    pub tif: TimeInForce,
    /// Role in the pair.
    pub kind: OrderKind,
}

impl OrderRequest {
    /// Create an aggressive entry buy.
    pub fn entry(market: &Market, token: Outcome, price: Cents, size: Decimal) -> Self {
        Self::new(market, token, Side::Buy, price, size, TimeInForce::FAK, OrderKind::Entry)
    }

    /// Create a passive hedge buy.
    pub fn hedge(market: &Market, token: Outcome, price: Cents, size: Decimal) -> Self {
        Self::new(market, token, Side::Buy, price, size, TimeInForce::GTC, OrderKind::Hedge)
    }

    /// Create an aggressive liquidating sell.
    pub fn flatten(market: &Market, token: Outcome, price: Cents, size: Decimal) -> Self {
        Self::new(market, token, Side::Sell, price, size, TimeInForce::FAK, OrderKind::Flatten)
    }

    fn new(
        market: &Market,
        token: Outcome,
        side: Side,
        price: Cents,
        size: Decimal,
        tif: TimeInForce,
        kind: OrderKind,
    ) -> Self {
        Self {
            market_slug: market.slug.clone(),
            token,
            token_id: market.token_id(token).to_string(),
            side,
            price,
            size,
            tif,
            kind,
        }
    }

    /// Set time-in-force.
    pub fn with_tif(mut self, tif: TimeInForce) -> Self {
        self.tif = tif;
        self
    }

    /// Dollar notional at the limit price.
    pub fn notional(&self) -> Decimal {
        self.size * self.price.to_decimal()
    }

    /// Key identifying logically identical submissions.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.market_slug,
            self.token_id,
            self.side,
            self.price.0,
            self.size,
            self.tif,
            self.kind
        )
    }

    /// Validate order parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.token_id.is_empty() {
            return Err("token_id is required".to_string());
        }
        if !self.price.is_tradable() {
            return Err(format!("price {} outside (0, 100)", self.price));
        }
        if self.size <= Decimal::ZERO {
            return Err("size must be positive".to_string());
        }
        Ok(())
    }
}

/// Order status as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    /// Accepted, not yet on the book.
    Pending,
    /// Resting on the book.
    Open,
    /// Some shares filled, rest still working.
    PartiallyFilled,
    /// Fully filled.
    Filled,
    /// Cancel requested.
    Canceling,
    /// Cancelled, possibly after partial fills.
    Canceled,
    /// Rejected or errored.
    Failed,
}

impl OrderStatus {
    /// Check if status is terminal (won't change).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Failed
        )
    }

    /// Check if order was filled.
    pub fn is_filled(&self) -> bool {
        matches!(self, OrderStatus::Filled)
    }

    /// Check if the order can still trade.
    pub fn is_working(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Open | OrderStatus::PartiallyFilled
        )
    }
}

/// Acknowledgement of an accepted order.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    /// Gateway-assigned order ID.
    pub order_id: String,
    /// Shares filled at placement time.
    pub filled_size: Decimal,
    /// When the fill happened, if any.
    pub filled_at: Option<OffsetDateTime>,
    /// Status right after placement.
    pub status: OrderStatus,
}

impl PlacedOrder {
    /// Check if anything filled immediately.
    pub fn has_fill(&self) -> bool {
        self.filled_size > Decimal::ZERO
    }
}

/// Authoritative order state owned by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    /// Order ID.
    pub order_id: String,
    /// Market slug.
    pub market_slug: String,
    /// Token traded.
    pub token: Outcome,
    /// Token ID traded.
    pub token_id: String,
    /// Side.
    pub side: Side,
    /// Limit price.
    pub price: Cents,
    /// Original size.
    pub size: Decimal,
    /// Shares filled so far.
    pub filled_size: Decimal,
    /// Current status.
    pub status: OrderStatus,
    /// Time-in-force.
    pub tif: TimeInForce,
    /// Role in the pair.
    pub kind: OrderKind,
    /// Creation time.
    pub created_at: OffsetDateTime,
    /// Time of the latest fill.
    pub filled_at: Option<OffsetDateTime>,
}

impl Order {
    /// Shares still working.
    pub fn remaining(&self) -> Decimal {
        (self.size - self.filled_size).max(Decimal::ZERO)
    }

    /// Filled shares, treating a filled order with no reported fill as full.
    pub fn effective_filled(&self) -> Decimal {
        if self.status.is_filled() && self.filled_size.is_zero() {
            self.size
        } else {
            self.filled_size
        }
    }

    /// Check if this is a working passive buy for `token` in `market_slug`.
    pub fn is_resting_buy(&self, market_slug: &str, token: Outcome) -> bool {
        self.market_slug == market_slug
            && self.token == token
            && self.side == Side::Buy
            && self.tif == TimeInForce::GTC
            && self.status.is_working()
    }
}
