//! Rolling per-token price samples.

use std::collections::VecDeque;
use std::time::Duration;

use time::OffsetDateTime;

use crate::market::{Cents, Outcome};

/// Hard cap on retained samples per token.
const MAX_SAMPLES: usize = 512;

/// Elapsed time below this is too short to derive a velocity from.
const MIN_ELAPSED_SECS: f64 = 0.001;

/// A single observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    /// Observation time.
    pub at: OffsetDateTime,
    /// Observed price.
    pub price: Cents,
}

/// Momentum derived from the samples inside the window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalMetrics {
    /// Newest price minus oldest price.
    pub delta_cents: i32,
    /// Seconds between the oldest and newest sample.
    pub window_seconds: f64,
    /// `delta_cents / window_seconds`.
    pub velocity_cents_per_sec: f64,
    /// Newest price.
    pub last_price: Cents,
}

/// Per-token rolling window of price samples.
///
/// Samples older than the window, measured from the newest sample, are
/// pruned on every insert.
#[derive(Debug, Clone)]
pub struct PriceSampleBuffer {
    window: Duration,
    up: VecDeque<Sample>,
    down: VecDeque<Sample>,
}

impl PriceSampleBuffer {
    /// Create an empty buffer with the given window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            up: VecDeque::new(),
            down: VecDeque::new(),
        }
    }

    fn samples(&self, token: Outcome) -> &VecDeque<Sample> {
        match token {
            Outcome::Up => &self.up,
            Outcome::Down => &self.down,
        }
    }

    fn samples_mut(&mut self, token: Outcome) -> &mut VecDeque<Sample> {
        match token {
            Outcome::Up => &mut self.up,
            Outcome::Down => &mut self.down,
        }
    }

    /// Record a price observation.
    ///
    /// Returns `false` when the sample was dropped because it is older than
    /// the newest one already held, or repeats it exactly.
    pub fn record(&mut self, token: Outcome, at: OffsetDateTime, price: Cents) -> bool {
        let window = self.window;
        let samples = self.samples_mut(token);

        if let Some(last) = samples.back() {
            if at < last.at || (at == last.at && price == last.price) {
                return false;
            }
        }
        samples.push_back(Sample { at, price });

        while let Some(front) = samples.front() {
            let age = at - front.at;
            if age.whole_milliseconds() > window.as_millis() as i128 {
                samples.pop_front();
            } else {
                break;
            }
        }
        while samples.len() > MAX_SAMPLES {
            samples.pop_front();
        }
        true
    }

    /// Momentum for a token, or `None` with fewer than two usable samples.
    pub fn metrics(&self, token: Outcome) -> Option<SignalMetrics> {
        let samples = self.samples(token);
        if samples.len() < 2 {
            return None;
        }
        let first = samples.front()?;
        let last = samples.back()?;

        let elapsed = (last.at - first.at).as_seconds_f64();
        if elapsed < MIN_ELAPSED_SECS {
            return None;
        }
        let delta = last.price.0 - first.price.0;

        Some(SignalMetrics {
            delta_cents: delta,
            window_seconds: elapsed,
            velocity_cents_per_sec: delta as f64 / elapsed,
            last_price: last.price,
        })
    }

    /// Newest price seen for a token.
    pub fn last_price(&self, token: Outcome) -> Option<Cents> {
        self.samples(token).back().map(|s| s.price)
    }

    /// Number of samples held for a token.
    pub fn len(&self, token: Outcome) -> usize {
        self.samples(token).len()
    }

    /// Drop every sample.
    pub fn clear(&mut self) {
        self.up.clear();
        self.down.clear();
    }
}
