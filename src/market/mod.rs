//! Market module for UP/DOWN cycle markets.
//!
//! This module handles:
//! - Market, token and fixed-point price types
//! - Top-of-book snapshots and price events
//! - Market-quality scoring

pub mod quality;
pub mod types;

pub use quality::{assess, MarketQuality, QualityOptions};
pub use types::{Cents, Market, Outcome, PriceEvent, TopOfBook};
