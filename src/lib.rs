//! Hedged entry-execution engine for Polymarket UP/DOWN cycle markets.
//!
//! On a momentum signal the engine buys one outcome aggressively and rests a
//! passive buy on the opposite outcome at a bounded price, so the pair costs
//! less than the $1.00 one side pays at settlement:
//!
//! ```text
//! entry  UP   @ 40¢ (ask)
//! hedge  DOWN @ 58¢ (100 - 40 - 2¢ offset, below the 61¢ ask)
//! ─────────────────────
//! pair        98¢ < 100¢
//! ```
//!
//! A hedge monitor reprices the passive leg until it fills and flattens the
//! entry if it stays unhedged too long.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`market`]: Cycles, tokens, prices and book quality
//! - [`signal`]: Momentum sampling and token selection
//! - [`trading`]: Orders, positions, the gateway contract and its guards
//! - [`hedge`]: Pricing, entry→hedge sequencing, monitors, reconciliation, flatten
//! - [`replay`]: Dry-run replay of recorded books
//! - [`metrics`]: Metric names and recorders

pub mod config;
pub mod error;
pub mod hedge;
pub mod market;
pub mod metrics;
pub mod replay;
pub mod signal;
pub mod trading;

pub use config::Config;
pub use error::{BotError, Result};
