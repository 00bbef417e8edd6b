//! Fail-safe gate consulted before every order placement.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::PolicyRefusal;

/// Policy checkpoint that can refuse orders independently of the strategy.
///
/// Refuses while paused, and refuses orders for any market other than the
/// current one so a stale cycle can never trade.
#[derive(Debug, Default)]
pub struct FailSafeGate {
    paused: AtomicBool,
    current_market: RwLock<Option<String>>,
}

impl FailSafeGate {
    /// Create an open gate with no current market.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause or resume trading.
    pub fn set_paused(&self, paused: bool) {
        let was = self.paused.swap(paused, Ordering::SeqCst);
        if was != paused {
            if paused {
                warn!("Trading paused by fail-safe gate");
            } else {
                info!("Trading resumed by fail-safe gate");
            }
        }
    }

    /// Check if trading is paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Switch the market orders are allowed for.
    pub fn set_current_market(&self, slug: Option<String>) {
        *self.current_market.write() = slug;
    }

    /// Market orders are allowed for.
    pub fn current_market(&self) -> Option<String> {
        self.current_market.read().clone()
    }

    /// Decide whether an order for `market_slug` may be placed.
    pub fn check(&self, market_slug: &str) -> Result<(), PolicyRefusal> {
        if self.is_paused() {
            return Err(PolicyRefusal::TradingPaused);
        }
        let current = self.current_market.read();
        if let Some(slug) = current.as_deref() {
            if slug != market_slug {
                return Err(PolicyRefusal::MarketMismatch {
                    current: (*current).clone(),
                    requested: market_slug.to_string(),
                });
            }
        }
        Ok(())
    }
}
