//! Market-quality scoring for a top-of-book snapshot.
//!
//! The score starts at 100 and loses points for each problem found. The
//! strategy refuses new entries while the score is below its configured
//! floor.

use std::time::Duration;

use time::OffsetDateTime;

use super::types::{Outcome, TopOfBook};

/// Mirror gaps above this many cents count as a dirty book.
const MIRROR_GAP_LIMIT_CENTS: u32 = 20;

/// Thresholds used when scoring a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityOptions {
    /// Quotes older than this are stale.
    pub max_book_age: Duration,
    /// Spreads wider than this many cents are penalized.
    pub max_spread_cents: u32,
}

impl Default for QualityOptions {
    fn default() -> Self {
        Self {
            max_book_age: Duration::from_millis(3000),
            max_spread_cents: 10,
        }
    }
}

/// Result of scoring a market's book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketQuality {
    /// Market that was scored.
    pub market_slug: String,
    /// Score in 0..=100, higher is better.
    pub score: u8,
    /// All four quotes present.
    pub complete: bool,
    /// Quotes within the freshness bound (unknown age counts as fresh).
    pub fresh: bool,
    /// UP ask minus UP bid, when both are quoted.
    pub up_spread: Option<u32>,
    /// DOWN ask minus DOWN bid, when both are quoted.
    pub down_spread: Option<u32>,
    /// Mirror gap when buying UP.
    pub mirror_gap_up: Option<u32>,
    /// Mirror gap when buying DOWN.
    pub mirror_gap_down: Option<u32>,
    /// Short problem tags, in detection order.
    pub problems: Vec<&'static str>,
}

impl MarketQuality {
    /// Check the score against a floor.
    pub fn passes(&self, min_score: u8) -> bool {
        self.score >= min_score
    }
}

/// Score a top-of-book snapshot.
pub fn assess(
    market_slug: &str,
    book: &TopOfBook,
    now: OffsetDateTime,
    opts: &QualityOptions,
) -> MarketQuality {
    let mut score: i32 = 100;
    let mut problems: Vec<&'static str> = Vec::new();

    let complete = book.is_complete();
    if !complete {
        problems.push("incomplete_top");
        score -= 50;
    }

    let fresh = match book.updated_at {
        Some(updated_at) => {
            let age_ms = (now - updated_at).whole_milliseconds();
            age_ms <= opts.max_book_age.as_millis() as i128
        }
        None => true,
    };
    if !fresh {
        problems.push("stale_book");
        score -= 25;
    }

    let mut spread_of = |outcome: Outcome, crossed_tag: &'static str, wide_tag: &'static str| {
        let (bid, ask) = (book.bid(outcome), book.ask(outcome));
        if !bid.is_quoted() || !ask.is_quoted() {
            return None;
        }
        let spread = ask.0 - bid.0;
        if spread < 0 {
            problems.push(crossed_tag);
            score -= 40;
        }
        let spread = spread.unsigned_abs();
        if spread > opts.max_spread_cents {
            problems.push(wide_tag);
            score -= 20;
        }
        Some(spread)
    };
    let up_spread = spread_of(Outcome::Up, "crossed_up", "wide_spread_up");
    let down_spread = spread_of(Outcome::Down, "crossed_down", "wide_spread_down");

    let mirror_gap_up = book.mirror_gap(Outcome::Up);
    if mirror_gap_up.is_some_and(|gap| gap > MIRROR_GAP_LIMIT_CENTS) {
        problems.push("mirror_gap_up");
        score -= 10;
    }
    let mirror_gap_down = book.mirror_gap(Outcome::Down);
    if mirror_gap_down.is_some_and(|gap| gap > MIRROR_GAP_LIMIT_CENTS) {
        problems.push("mirror_gap_down");
        score -= 10;
    }

    MarketQuality {
        market_slug: market_slug.to_string(),
        score: score.clamp(0, 100) as u8,
        complete,
        fresh,
        up_spread,
        down_spread,
        mirror_gap_up,
        mirror_gap_down,
        problems,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Cents;
    use pretty_assertions::assert_eq;

    fn book(up_bid: i32, up_ask: i32, down_bid: i32, down_ask: i32) -> TopOfBook {
        TopOfBook {
            up_bid: Cents(up_bid),
            up_ask: Cents(up_ask),
            down_bid: Cents(down_bid),
            down_ask: Cents(down_ask),
            source: "test".to_string(),
            updated_at: None,
        }
    }

    #[test]
    fn healthy_book_scores_full() {
        let q = assess(
            "m",
            &book(48, 50, 50, 52),
            OffsetDateTime::now_utc(),
            &QualityOptions::default(),
        );
        assert_eq!(q.score, 100);
        assert!(q.problems.is_empty());
        assert_eq!(q.up_spread, Some(2));
    }

    #[test]
    fn incomplete_and_wide_book_is_penalized() {
        let q = assess(
            "m",
            &book(0, 50, 30, 70),
            OffsetDateTime::now_utc(),
            &QualityOptions::default(),
        );
        // -50 incomplete, -20 wide DOWN spread
        assert_eq!(q.score, 30);
        assert_eq!(q.problems, vec!["incomplete_top", "wide_spread_down"]);
        assert!(!q.passes(70));
    }

    #[test]
    fn stale_book_loses_freshness() {
        let now = OffsetDateTime::now_utc();
        let mut b = book(48, 50, 50, 52);
        b.updated_at = Some(now - time::Duration::seconds(10));
        let q = assess("m", &b, now, &QualityOptions::default());
        assert!(!q.fresh);
        assert_eq!(q.score, 75);
    }

    #[test]
    fn crossed_book_is_flagged() {
        let q = assess(
            "m",
            &book(55, 50, 45, 50),
            OffsetDateTime::now_utc(),
            &QualityOptions::default(),
        );
        assert!(q.problems.contains(&"crossed_up"));
        assert_eq!(q.up_spread, Some(5));
    }
}
