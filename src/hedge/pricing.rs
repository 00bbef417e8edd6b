//! Order sizing and pricing for entry/hedge pairs.
//!
//! Prices stay in whole cents. Sizes are decimals adjusted so that
//! `size * price` never carries more than two decimals.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::config::HedgeThresholds;
use crate::error::PricingError;
use crate::market::{Cents, Outcome, TopOfBook};

/// Entry and hedge prices for one candidate token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairQuote {
    /// Token to enter.
    pub token: Outcome,
    /// Aggressive entry price (the token's ask).
    pub entry_price: Cents,
    /// Passive hedge price on the opposite token.
    pub hedge_price: Cents,
    /// Opposite token's ask when the quote was taken.
    pub opposite_ask: Cents,
}

/// How the hedge leg should be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HedgePlan {
    /// Resting order at the bounded hedge price.
    Maker {
        price: Cents,
        size: Decimal,
        /// Size exceeds the entry fill to clear minimum notional.
        oversized: bool,
    },
    /// Aggressive order at the opposite ask.
    Taker { price: Cents, size: Decimal },
    /// No valid order exists now; retry on the next reorder tick.
    Deferred { size: Decimal },
}

impl HedgePlan {
    /// Size the plan would place.
    pub fn size(&self) -> Decimal {
        match self {
            HedgePlan::Maker { size, .. }
            | HedgePlan::Taker { size, .. }
            | HedgePlan::Deferred { size } => *size,
        }
    }
}

/// Bounded hedge price for an entry at `entry_price`.
///
/// `100 - entry - offset`, pulled to one cent below the opposite ask when it
/// would otherwise reach it, so the hedge always rests.
pub fn hedge_price(
    entry_price: Cents,
    opposite_ask: Cents,
    offset_cents: u32,
) -> Result<Cents, PricingError> {
    if !entry_price.is_tradable() {
        return Err(PricingError::AskOutOfRange {
            which: "entry",
            ask: entry_price,
        });
    }
    if !opposite_ask.is_tradable() {
        return Err(PricingError::AskOutOfRange {
            which: "opposite",
            ask: opposite_ask,
        });
    }

    let raw = Cents::PAR.0 - entry_price.0 - offset_cents as i32;
    let ceiling = opposite_ask.0 - 1;
    let price = Cents(if raw >= ceiling { ceiling } else { raw });

    if !price.is_tradable() {
        return Err(PricingError::HedgePriceOutOfRange { price });
    }
    Ok(price)
}

/// Price an entry on `token` against the current book.
pub fn quote_pair(
    book: &TopOfBook,
    token: Outcome,
    thresholds: &HedgeThresholds,
) -> Result<PairQuote, PricingError> {
    let entry_price = book.ask(token);
    let opposite_ask = book.ask(token.opposite());
    let hedge_price = hedge_price(entry_price, opposite_ask, thresholds.hedge_offset_cents)?;

    if let Some(gap) = book.mirror_gap(token) {
        if gap > thresholds.max_mirror_gap_cents {
            return Err(PricingError::MirrorGap {
                gap,
                tolerance: thresholds.max_mirror_gap_cents,
            });
        }
    }

    Ok(PairQuote {
        token,
        entry_price,
        hedge_price,
        opposite_ask,
    })
}

/// Round `size` down so that `size * price` has at most two decimals and
/// `size` at most four.
pub fn adjust_size_for_price(size: Decimal, price: Cents) -> Decimal {
    if !price.is_quoted() || size <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let price = price.to_decimal();
    let notional = (size * price).round_dp_with_strategy(2, RoundingStrategy::ToZero);
    (notional / price)
        .round_dp_with_strategy(4, RoundingStrategy::ToZero)
        .normalize()
}

/// Whole shares needed for `size * price >= min_notional`.
fn shares_for_notional(min_notional: Decimal, price: Cents) -> Decimal {
    (min_notional / price.to_decimal()).ceil()
}

/// Entry size for a quote: the target, raised to clear both minimums.
pub fn entry_size(
    target: Decimal,
    quote: &PairQuote,
    thresholds: &HedgeThresholds,
) -> Result<Decimal, PricingError> {
    let floor = shares_for_notional(thresholds.min_order_notional, quote.entry_price);
    let wanted = target.max(thresholds.min_share_size).max(floor);
    let size = adjust_size_for_price(wanted, quote.hedge_price);

    if size < thresholds.min_share_size
        || size * quote.entry_price.to_decimal() < thresholds.min_order_notional
    {
        return Err(PricingError::SizeTooSmall {
            size,
            price: quote.entry_price,
        });
    }
    Ok(size)
}

/// Plan the first hedge for an entry that filled `filled` shares.
///
/// Refuses fills too small to rest a passive order, and hedges that would
/// need more than the over-hedge policy allows to clear minimum notional.
pub fn plan_initial_hedge(
    filled: Decimal,
    hedge_price: Cents,
    opposite_ask: Cents,
    thresholds: &HedgeThresholds,
) -> Result<HedgePlan, PricingError> {
    if filled < thresholds.min_share_size {
        return Err(PricingError::EntryFillTooSmall {
            filled,
            min_shares: thresholds.min_share_size,
        });
    }

    let size = adjust_size_for_price(filled, hedge_price);
    if size * hedge_price.to_decimal() < thresholds.min_order_notional {
        let required = shares_for_notional(thresholds.min_order_notional, hedge_price);
        let allowed = thresholds.over_hedge.max_hedge_size(filled);
        if required > allowed {
            return Err(PricingError::WouldOversize { required, allowed });
        }
        return Ok(HedgePlan::Maker {
            price: hedge_price,
            size: required,
            oversized: required > filled,
        });
    }

    Ok(plan_remaining(size, hedge_price, opposite_ask, thresholds))
}

/// Plan an order for `remaining` unhedged shares.
///
/// Rests at `hedge_price` when the remainder clears both minimums, takes the
/// opposite ask when only the aggressive order clears minimum notional, and
/// otherwise defers.
pub fn plan_remaining(
    remaining: Decimal,
    hedge_price: Cents,
    opposite_ask: Cents,
    thresholds: &HedgeThresholds,
) -> HedgePlan {
    let size = adjust_size_for_price(remaining, hedge_price);
    if size >= thresholds.min_share_size
        && size * hedge_price.to_decimal() >= thresholds.min_order_notional
    {
        return HedgePlan::Maker {
            price: hedge_price,
            size,
            oversized: false,
        };
    }

    if opposite_ask.is_tradable() {
        let taker_size = adjust_size_for_price(remaining, opposite_ask);
        if taker_size > Decimal::ZERO
            && taker_size * opposite_ask.to_decimal() >= thresholds.min_order_notional
        {
            return HedgePlan::Taker {
                price: opposite_ask,
                size: taker_size,
            };
        }
    }

    HedgePlan::Deferred { size: remaining }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverHedgePolicy;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn thresholds() -> HedgeThresholds {
        HedgeThresholds {
            hedge_offset_cents: 2,
            ..HedgeThresholds::default()
        }
    }

    fn book(up_ask: i32, down_ask: i32) -> TopOfBook {
        TopOfBook {
            up_bid: Cents(up_ask - 2),
            up_ask: Cents(up_ask),
            down_bid: Cents(down_ask - 2),
            down_ask: Cents(down_ask),
            ..Default::default()
        }
    }

    #[test]
    fn hedge_price_unclamped() {
        assert_eq!(hedge_price(Cents(40), Cents(61), 2), Ok(Cents(58)));
    }

    #[test]
    fn hedge_price_clamp_boundary() {
        // 58 reaches 59 - 1, so the clamp fires and lands on the same value
        assert_eq!(hedge_price(Cents(40), Cents(59), 2), Ok(Cents(58)));
        assert_eq!(hedge_price(Cents(40), Cents(55), 2), Ok(Cents(54)));
    }

    #[test]
    fn hedge_price_always_below_opposite_ask() {
        for entry in 1..100 {
            for opp in 1..100 {
                if let Ok(price) = hedge_price(Cents(entry), Cents(opp), 3) {
                    assert!(price < Cents(opp));
                    assert!(price.is_tradable());
                }
            }
        }
    }

    #[test]
    fn hedge_price_rejects_bad_asks() {
        assert!(matches!(
            hedge_price(Cents(0), Cents(61), 2),
            Err(PricingError::AskOutOfRange { which: "entry", .. })
        ));
        assert!(matches!(
            hedge_price(Cents(40), Cents(100), 2),
            Err(PricingError::AskOutOfRange { which: "opposite", .. })
        ));
        // 100 - 99 - 2 is negative
        assert!(matches!(
            hedge_price(Cents(99), Cents(50), 2),
            Err(PricingError::HedgePriceOutOfRange { .. })
        ));
    }

    #[test]
    fn quote_pair_checks_mirror_gap() {
        let quote = quote_pair(&book(40, 61), Outcome::Up, &thresholds()).unwrap();
        assert_eq!(quote.entry_price, Cents(40));
        assert_eq!(quote.hedge_price, Cents(58));
        assert_eq!(quote.opposite_ask, Cents(61));

        let skewed = TopOfBook {
            down_bid: Cents(45),
            ..book(40, 61)
        };
        // 40 vs 100 - 45 = 55
        assert_eq!(
            quote_pair(&skewed, Outcome::Up, &thresholds()),
            Err(PricingError::MirrorGap {
                gap: 15,
                tolerance: 5
            })
        );
    }

    #[test]
    fn precision_adjustment_rounds_toward_zero() {
        assert_eq!(adjust_size_for_price(dec!(10), Cents(58)), dec!(10));
        // 3.3333 * 0.57 = 1.899981 -> 1.89 -> 3.3157...
        assert_eq!(adjust_size_for_price(dec!(3.3333), Cents(57)), dec!(3.3157));
        assert_eq!(adjust_size_for_price(dec!(5), Cents::ZERO), Decimal::ZERO);
    }

    #[test]
    fn entry_size_rises_to_minimums() {
        let quote = quote_pair(&book(40, 61), Outcome::Up, &thresholds()).unwrap();
        let t = thresholds();
        assert_eq!(entry_size(dec!(10), &quote, &t), Ok(dec!(10)));
        assert_eq!(entry_size(dec!(1), &quote, &t), Ok(dec!(5)));

        let cheap = quote_pair(&book(10, 91), Outcome::Up, &t).unwrap();
        // 1.10 / 0.10 = 11 shares
        assert_eq!(entry_size(dec!(5), &cheap, &t), Ok(dec!(11)));
    }

    #[test]
    fn initial_hedge_matches_fill() {
        let plan = plan_initial_hedge(dec!(10), Cents(58), Cents(61), &thresholds()).unwrap();
        assert_eq!(
            plan,
            HedgePlan::Maker {
                price: Cents(58),
                size: dec!(10),
                oversized: false
            }
        );
    }

    #[test]
    fn initial_hedge_rejects_small_fill() {
        assert_eq!(
            plan_initial_hedge(dec!(3), Cents(58), Cents(61), &thresholds()),
            Err(PricingError::EntryFillTooSmall {
                filled: dec!(3),
                min_shares: dec!(5)
            })
        );
    }

    #[test]
    fn initial_hedge_oversizing_follows_policy() {
        // 5 * 0.20 = 1.00 < 1.10, needs 6 shares
        let forbid = thresholds();
        assert_eq!(
            plan_initial_hedge(dec!(5), Cents(20), Cents(25), &forbid),
            Err(PricingError::WouldOversize {
                required: dec!(6),
                allowed: dec!(5)
            })
        );

        let allow = HedgeThresholds {
            over_hedge: OverHedgePolicy::AllowUpTo(dec!(0.25)),
            ..thresholds()
        };
        assert_eq!(
            plan_initial_hedge(dec!(5), Cents(20), Cents(25), &allow),
            Ok(HedgePlan::Maker {
                price: Cents(20),
                size: dec!(6),
                oversized: true
            })
        );

        let tight = HedgeThresholds {
            over_hedge: OverHedgePolicy::AllowUpTo(dec!(0.1)),
            ..thresholds()
        };
        assert!(plan_initial_hedge(dec!(5), Cents(20), Cents(25), &tight).is_err());
    }

    #[test]
    fn remaining_falls_back_to_taker_then_defers() {
        let t = thresholds();
        // 2 shares can't rest, but 2 * 0.61 = 1.22 clears notional
        assert_eq!(
            plan_remaining(dec!(2), Cents(58), Cents(61), &t),
            HedgePlan::Taker {
                price: Cents(61),
                size: dec!(2)
            }
        );
        // 1 * 0.61 is below $1.10
        assert_eq!(
            plan_remaining(dec!(1), Cents(58), Cents(61), &t),
            HedgePlan::Deferred { size: dec!(1) }
        );
        assert_eq!(
            plan_remaining(dec!(7), Cents(58), Cents(61), &t).size(),
            dec!(7)
        );
    }
}
