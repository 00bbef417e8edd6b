//! Momentum signals for entry selection.
//!
//! This module handles:
//! - Rolling per-token price samples
//! - Delta and velocity metrics
//! - Candidate selection with directional bias and tie-break

pub mod buffer;
pub mod engine;

pub use buffer::{PriceSampleBuffer, Sample, SignalMetrics};
pub use engine::{Candidate, SignalEngine, SignalSettings};
