//! Market-related types for UP/DOWN cycle markets.

use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use time::OffsetDateTime;

use crate::error::MarketError;

/// One of the two complementary tokens of a binary market.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// UP (YES) token.
    #[strum(serialize = "up", serialize = "yes", serialize = "UP", serialize = "YES")]
    #[default]
    Up,
    /// DOWN (NO) token.
    #[strum(serialize = "down", serialize = "no", serialize = "DOWN", serialize = "NO")]
    Down,
}

impl Outcome {
    /// Both outcomes, UP first.
    pub const BOTH: [Outcome; 2] = [Outcome::Up, Outcome::Down];

    /// Get the opposite outcome.
    pub fn opposite(&self) -> Self {
        match self {
            Outcome::Up => Outcome::Down,
            Outcome::Down => Outcome::Up,
        }
    }
}

/// Fixed-point price in whole cents.
///
/// Binary tokens settle at 0 or 100 cents, so every tradable price is
/// strictly inside (0, 100). Zero also stands for "no quote".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Cents(pub i32);

impl Cents {
    /// No quote.
    pub const ZERO: Cents = Cents(0);
    /// Settlement value of the winning token.
    pub const PAR: Cents = Cents(100);

    /// Check if the price is strictly inside (0, 100).
    pub fn is_tradable(self) -> bool {
        self.0 > 0 && self.0 < 100
    }

    /// Check if a quote is present.
    pub fn is_quoted(self) -> bool {
        self.0 > 0
    }

    /// The complementary price on the other token.
    pub fn mirror(self) -> Cents {
        Cents(100 - self.0)
    }

    /// Convert to a dollar decimal for the gateway boundary.
    pub fn to_decimal(self) -> Decimal {
        Decimal::new(i64::from(self.0), 2)
    }

    /// Convert a dollar decimal to cents, rounding half away from zero.
    pub fn from_decimal(price: Decimal) -> Option<Cents> {
        (price * Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i32()
            .map(Cents)
    }
}

impl fmt::Display for Cents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}c", self.0)
    }
}

/// One cycle of an UP/DOWN market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Market {
    /// Market slug (e.g., "btc-updown-15m-1765301400").
    pub slug: String,
    /// UP (YES) token ID.
    pub up_token_id: String,
    /// DOWN (NO) token ID.
    pub down_token_id: String,
    /// Unix timestamp when the cycle opened.
    pub start_timestamp: i64,
    /// Unix timestamp when the cycle closes.
    pub end_timestamp: i64,
}

impl Market {
    /// Duration of a 15-minute cycle in seconds.
    pub const WINDOW_SECONDS: i64 = 900;

    /// Create a 15-minute cycle starting at `start_timestamp`.
    pub fn fifteen_minute(
        slug: impl Into<String>,
        up_token_id: impl Into<String>,
        down_token_id: impl Into<String>,
        start_timestamp: i64,
    ) -> Self {
        Self {
            slug: slug.into(),
            up_token_id: up_token_id.into(),
            down_token_id: down_token_id.into(),
            start_timestamp,
            end_timestamp: start_timestamp + Self::WINDOW_SECONDS,
        }
    }

    /// Get the token ID for a given outcome.
    pub fn token_id(&self, outcome: Outcome) -> &str {
        match outcome {
            Outcome::Up => &self.up_token_id,
            Outcome::Down => &self.down_token_id,
        }
    }

    /// Map a token ID back to its outcome.
    pub fn outcome_of(&self, token_id: &str) -> Option<Outcome> {
        if token_id == self.up_token_id {
            Some(Outcome::Up)
        } else if token_id == self.down_token_id {
            Some(Outcome::Down)
        } else {
            None
        }
    }

    /// Check that every identifier needed to trade is present.
    pub fn ensure_tradable(&self) -> Result<(), MarketError> {
        let missing = if self.slug.is_empty() {
            Some("slug")
        } else if self.up_token_id.is_empty() {
            Some("up_token_id")
        } else if self.down_token_id.is_empty() {
            Some("down_token_id")
        } else {
            None
        };
        match missing {
            Some(field) => Err(MarketError::MissingIdentifier {
                slug: self.slug.clone(),
                field,
            }),
            None => Ok(()),
        }
    }

    /// Seconds until close as seen at `now` (negative once closed).
    pub fn seconds_remaining_at(&self, now: OffsetDateTime) -> i64 {
        self.end_timestamp - now.unix_timestamp()
    }
}

/// Best bid/ask for both tokens of a market.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TopOfBook {
    /// UP best bid.
    pub up_bid: Cents,
    /// UP best ask.
    pub up_ask: Cents,
    /// DOWN best bid.
    pub down_bid: Cents,
    /// DOWN best ask.
    pub down_ask: Cents,
    /// Where the quotes came from.
    pub source: String,
    /// When the quotes were last updated, if known.
    pub updated_at: Option<OffsetDateTime>,
}

impl TopOfBook {
    /// Best ask for an outcome.
    pub fn ask(&self, outcome: Outcome) -> Cents {
        match outcome {
            Outcome::Up => self.up_ask,
            Outcome::Down => self.down_ask,
        }
    }

    /// Best bid for an outcome.
    pub fn bid(&self, outcome: Outcome) -> Cents {
        match outcome {
            Outcome::Up => self.up_bid,
            Outcome::Down => self.down_bid,
        }
    }

    /// All four quotes present.
    pub fn is_complete(&self) -> bool {
        self.up_bid.is_quoted()
            && self.up_ask.is_quoted()
            && self.down_bid.is_quoted()
            && self.down_ask.is_quoted()
    }

    /// Distance between buying `outcome` and selling its mirror, in cents.
    ///
    /// `None` when either quote is missing.
    pub fn mirror_gap(&self, outcome: Outcome) -> Option<u32> {
        let ask = self.ask(outcome);
        let opposite_bid = self.bid(outcome.opposite());
        if !ask.is_quoted() || !opposite_bid.is_quoted() {
            return None;
        }
        Some((ask.0 - opposite_bid.mirror().0).unsigned_abs())
    }
}

/// A price change for one token, as delivered by the market-data feed.
#[derive(Debug, Clone)]
pub struct PriceEvent {
    /// Market the price belongs to.
    pub market: Market,
    /// Token whose price changed.
    pub token: Outcome,
    /// New price.
    pub price: Cents,
    /// Observation time.
    pub timestamp: OffsetDateTime,
}
