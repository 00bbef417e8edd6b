//! Hedged entry strategy.
//!
//! This module handles:
//! - Pricing and sizing of entry/hedge pairs
//! - The entry to hedge sequence and its gating
//! - Per-market hedge monitors (repricing, timeout, stop-loss)
//! - Reconciliation of exposure against exchange state
//! - Fail-safe flattening

pub mod flatten;
pub mod monitor;
pub mod pricing;
pub mod reconcile;
pub mod strategy;

pub use flatten::{FlattenLeg, FlattenOutcome, FlattenReason, Flattener, LegResult};
pub use monitor::{HedgeMonitor, MonitorContext, MonitorExit, MonitorRegistry};
pub use pricing::{
    adjust_size_for_price, entry_size, hedge_price, plan_initial_hedge, plan_remaining,
    quote_pair, HedgePlan, PairQuote,
};
pub use reconcile::ReconcileOutcome;
pub use strategy::{
    EntryOutcome, HedgeOutcome, HedgeStrategy, PendingEntry, StrategySettings, TickOutcome,
};
