//! Position tracking.
//!
//! Positions are owned by the gateway. The engine only reads them and never
//! keeps its own copy across restarts.

use rust_decimal::Decimal;
use time::OffsetDateTime;

use crate::market::{Cents, Outcome};

/// Net holding in one token of one market.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    /// Market slug.
    pub market_slug: String,
    /// Token held.
    pub token: Outcome,
    /// Token ID.
    pub token_id: String,
    /// Number of shares owned.
    pub size: Decimal,
    /// Average entry price in dollars.
    pub avg_price: Decimal,
    /// Entry price recorded at fill time, if the gateway kept it.
    pub entry_price: Option<Cents>,
    /// Time of the first fill.
    pub entry_time: Option<OffsetDateTime>,
    /// Whether the position is still open.
    pub open: bool,
}

impl Position {
    /// Calculate the cost basis.
    pub fn cost_basis(&self) -> Decimal {
        self.size * self.avg_price
    }

    /// Check if the position is open with shares held.
    pub fn is_live(&self) -> bool {
        self.open && self.size > Decimal::ZERO
    }

    /// Entry price in cents: recorded price first, then the average price.
    ///
    /// `None` when neither yields a tradable price.
    pub fn entry_price_cents(&self) -> Option<Cents> {
        self.entry_price
            .or_else(|| Cents::from_decimal(self.avg_price))
            .filter(|c| c.is_tradable())
    }
}

/// Compare share counts with a small relative tolerance.
pub fn nearly_equal_shares(a: Decimal, b: Decimal) -> bool {
    let floor = Decimal::new(1, 4);
    let eps = (a.max(b) * Decimal::new(1, 3)).max(floor);
    (a - b).abs() <= eps
}

/// Live UP/DOWN holdings for one market.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketExposure {
    /// UP position, if open.
    pub up: Option<Position>,
    /// DOWN position, if open.
    pub down: Option<Position>,
}

impl MarketExposure {
    /// Build from the gateway's open positions for one market.
    pub fn from_positions(positions: Vec<Position>) -> Self {
        let mut exposure = Self::default();
        for position in positions.into_iter().filter(Position::is_live) {
            let slot = match position.token {
                Outcome::Up => &mut exposure.up,
                Outcome::Down => &mut exposure.down,
            };
            match slot {
                Some(existing) => existing.size += position.size,
                None => *slot = Some(position),
            }
        }
        exposure
    }

    /// Position for an outcome.
    pub fn position(&self, outcome: Outcome) -> Option<&Position> {
        match outcome {
            Outcome::Up => self.up.as_ref(),
            Outcome::Down => self.down.as_ref(),
        }
    }

    /// Shares held for an outcome.
    pub fn size(&self, outcome: Outcome) -> Decimal {
        self.position(outcome).map_or(Decimal::ZERO, |p| p.size)
    }

    /// No shares on either side.
    pub fn is_flat(&self) -> bool {
        self.up.is_none() && self.down.is_none()
    }

    /// Both sides hold approximately the same size.
    pub fn is_balanced(&self) -> bool {
        !self.is_flat() && nearly_equal_shares(self.size(Outcome::Up), self.size(Outcome::Down))
    }

    /// Side holding more shares (the unhedged entry).
    pub fn heavy_side(&self) -> Outcome {
        if self.size(Outcome::Up) >= self.size(Outcome::Down) {
            Outcome::Up
        } else {
            Outcome::Down
        }
    }

    /// Unhedged remainder is dust: at most `max(0.1, 1% of target)` shares.
    pub fn is_fully_hedged(&self) -> bool {
        if self.is_flat() {
            return false;
        }
        let tolerance = (self.target() / Decimal::ONE_HUNDRED).max(Decimal::new(1, 1));
        self.is_balanced() || self.unhedged() <= tolerance
    }

    /// Size of the larger side.
    pub fn target(&self) -> Decimal {
        self.size(Outcome::Up).max(self.size(Outcome::Down))
    }

    /// Size of the smaller side, already offset.
    pub fn hedged(&self) -> Decimal {
        self.size(Outcome::Up).min(self.size(Outcome::Down))
    }

    /// Shares still needing a hedge.
    pub fn unhedged(&self) -> Decimal {
        self.target() - self.hedged()
    }

    /// Open positions, UP first.
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.up.iter().chain(self.down.iter())
    }
}
