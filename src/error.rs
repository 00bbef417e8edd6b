//! Unified error types for the hedge engine.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::market::Cents;

/// Unified error type for the hedge engine.
#[derive(Error, Debug)]
pub enum BotError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Market-related error.
    #[error("market error: {0}")]
    Market(#[from] MarketError),

    /// Sizing or pricing rejected the intended action.
    #[error("pricing error: {0}")]
    Pricing(#[from] PricingError),

    /// Execution gateway error.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Market cycle errors.
#[derive(Error, Debug)]
pub enum MarketError {
    /// The event refers to a market other than the gateway's current one.
    #[error("stale market {slug}: current is {current:?}")]
    StaleCycle {
        /// Market slug carried by the event.
        slug: String,
        /// Market the gateway currently trades.
        current: Option<String>,
    },

    /// The market lacks an identifier required to trade it.
    #[error("market {slug} is missing {field}")]
    MissingIdentifier {
        /// The market slug.
        slug: String,
        /// Which identifier is missing.
        field: &'static str,
    },

    /// Failed to parse market data.
    #[error("failed to parse market data: {0}")]
    ParseError(String),
}

/// Why the fail-safe gate refused an order.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyRefusal {
    /// Trading is paused by the operator or the risk layer.
    #[error("trading paused")]
    TradingPaused,

    /// The order targets a market other than the current one.
    #[error("market mismatch: current={current:?}, requested={requested}")]
    MarketMismatch {
        /// Market the gate currently allows.
        current: Option<String>,
        /// Market the order was for.
        requested: String,
    },

    /// An identical order is already in flight.
    #[error("duplicate in-flight order: {key}")]
    DuplicateInFlight {
        /// Dedup key of the held order.
        key: String,
    },
}

/// Errors returned by the execution gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The fail-safe gate refused the request. Expected and not retryable.
    #[error("refused: {0}")]
    PolicyRefused(PolicyRefusal),

    /// Recoverable failure (unreachable, exchange rejected, rate limited).
    #[error("transient failure: {0}")]
    Transient(String),

    /// Unrecoverable failure for this request.
    #[error("fatal failure: {0}")]
    Fatal(String),

    /// The call did not complete within its deadline.
    #[error("{op} timed out after {after_ms}ms")]
    Timeout {
        /// Gateway operation name.
        op: &'static str,
        /// Deadline in milliseconds.
        after_ms: u64,
    },

    /// The order id is unknown to the gateway.
    #[error("order {0} not found")]
    OrderNotFound(String),
}

impl GatewayError {
    /// Check if this is a fail-safe refusal.
    pub fn is_policy_refusal(&self) -> bool {
        matches!(self, GatewayError::PolicyRefused(_))
    }

    /// Check if retrying later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Transient(_) | GatewayError::Timeout { .. }
        )
    }
}

impl From<PolicyRefusal> for GatewayError {
    fn from(refusal: PolicyRefusal) -> Self {
        GatewayError::PolicyRefused(refusal)
    }
}

/// Local validation failures from sizing and pricing.
///
/// These never have side effects: the intended action is simply not taken.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PricingError {
    /// A quote is outside the tradable (0, 100) range.
    #[error("{which} ask {ask} out of range")]
    AskOutOfRange {
        /// Which leg's ask.
        which: &'static str,
        /// The offending quote.
        ask: Cents,
    },

    /// The hedge price after clamping is not tradable.
    #[error("hedge price {price} out of range")]
    HedgePriceOutOfRange {
        /// The clamped hedge price.
        price: Cents,
    },

    /// The two books disagree by more than the mirror tolerance.
    #[error("mirror gap {gap} exceeds tolerance {tolerance}")]
    MirrorGap {
        /// Observed gap in cents.
        gap: u32,
        /// Configured tolerance in cents.
        tolerance: u32,
    },

    /// The entry filled less than a passive order can carry.
    #[error("entry fill too small: filled {filled}, minimum {min_shares}")]
    EntryFillTooSmall {
        /// Shares filled on the entry.
        filled: Decimal,
        /// Minimum passive order size.
        min_shares: Decimal,
    },

    /// Satisfying minimum notional would oversize the hedge.
    #[error("hedge would oversize: need {required}, allowed {allowed}")]
    WouldOversize {
        /// Size required to clear minimum notional.
        required: Decimal,
        /// Largest size allowed by policy.
        allowed: Decimal,
    },

    /// Size below the minimum order constraints.
    #[error("size {size} below minimum at price {price}")]
    SizeTooSmall {
        /// Requested size.
        size: Decimal,
        /// Price it would trade at.
        price: Cents,
    },
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, BotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_refusal_is_not_retryable() {
        let err: GatewayError = PolicyRefusal::TradingPaused.into();
        assert!(err.is_policy_refusal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn timeout_is_retryable() {
        let err = GatewayError::Timeout {
            op: "place_order",
            after_ms: 5000,
        };
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "place_order timed out after 5000ms");
    }

    #[test]
    fn market_mismatch_message_names_both_markets() {
        let err = GatewayError::from(PolicyRefusal::MarketMismatch {
            current: Some("btc-updown-15m-900".to_string()),
            requested: "btc-updown-15m-0".to_string(),
        });
        let text = err.to_string();
        assert!(text.contains("btc-updown-15m-900"));
        assert!(text.contains("btc-updown-15m-0"));
    }
}
