//! Entry-candidate selection from buffered momentum.

use tracing::debug;

use super::buffer::{PriceSampleBuffer, SignalMetrics};
use crate::config::{BiasMode, Config, SignalMode};
use crate::market::{Cents, Outcome};

/// Thresholds and preferences for the signal engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalSettings {
    /// Per-token or absolute-move signals.
    pub mode: SignalMode,
    /// Watched token in absolute mode.
    pub watched: Outcome,
    /// Minimum move in cents.
    pub min_move_cents: u32,
    /// Minimum velocity in cents per second.
    pub min_velocity: f64,
    /// Soft or hard bias handling.
    pub bias_mode: BiasMode,
    /// Soft bias velocity multiplier for the non-biased token.
    pub opposite_velocity_multiplier: f64,
    /// Soft bias extra move for the non-biased token.
    pub opposite_min_move_extra_cents: u32,
    /// Prefer the higher-priced token when both qualify.
    pub prefer_higher_price: bool,
    /// Floor for the winner's price when preferring higher prices.
    pub min_preferred_price: Option<Cents>,
}

impl SignalSettings {
    /// Build settings from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: config.signal_mode,
            watched: config.signal_token,
            min_move_cents: config.min_move_cents,
            min_velocity: config.min_velocity(),
            bias_mode: config.bias_mode,
            opposite_velocity_multiplier: config.opposite_bias_velocity_multiplier,
            opposite_min_move_extra_cents: config.opposite_bias_min_move_extra_cents,
            prefer_higher_price: config.prefer_higher_price,
            min_preferred_price: config
                .min_preferred_price_cents
                .map(|c| Cents(c as i32)),
        }
    }
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// A token that qualified this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// Token to buy.
    pub token: Outcome,
    /// Current price of that token.
    pub price: Cents,
    /// Momentum behind the decision.
    pub metrics: SignalMetrics,
}

/// Picks at most one token to enter per tick.
#[derive(Debug, Clone)]
pub struct SignalEngine {
    settings: SignalSettings,
}

impl SignalEngine {
    /// Create an engine with the given settings.
    pub fn new(settings: SignalSettings) -> Self {
        Self { settings }
    }

    /// Current settings.
    pub fn settings(&self) -> &SignalSettings {
        &self.settings
    }

    /// Evaluate the buffer and return the winning token, if any.
    pub fn evaluate(&self, buffer: &PriceSampleBuffer, bias: Option<Outcome>) -> Option<Candidate> {
        let winner = match self.settings.mode {
            SignalMode::PerToken => self.evaluate_per_token(buffer, bias),
            SignalMode::Absolute => self.evaluate_absolute(buffer, bias),
        }?;

        if self.settings.prefer_higher_price {
            if let Some(floor) = self.settings.min_preferred_price {
                if winner.price < floor {
                    debug!(
                        token = %winner.token,
                        price = %winner.price,
                        floor = %floor,
                        "Winner below preferred price floor"
                    );
                    return None;
                }
            }
        }
        Some(winner)
    }

    fn evaluate_per_token(
        &self,
        buffer: &PriceSampleBuffer,
        bias: Option<Outcome>,
    ) -> Option<Candidate> {
        let qualified: Vec<Candidate> = Outcome::BOTH
            .iter()
            .filter_map(|&token| {
                let metrics = buffer.metrics(token)?;
                self.qualifies(token, metrics.delta_cents, metrics.velocity_cents_per_sec, bias)
                    .then_some(Candidate {
                        token,
                        price: metrics.last_price,
                        metrics,
                    })
            })
            .collect();

        match qualified.as_slice() {
            [] => None,
            [only] => Some(*only),
            [a, b, ..] => Some(self.tie_break(*a, *b)),
        }
    }

    fn evaluate_absolute(
        &self,
        buffer: &PriceSampleBuffer,
        bias: Option<Outcome>,
    ) -> Option<Candidate> {
        let watched = self.settings.watched;
        let metrics = buffer.metrics(watched)?;
        if metrics.delta_cents == 0 {
            return None;
        }

        let token = if metrics.delta_cents > 0 {
            watched
        } else {
            watched.opposite()
        };
        let move_cents = metrics.delta_cents.abs();
        let velocity = metrics.velocity_cents_per_sec.abs();
        if !self.qualifies(token, move_cents, velocity, bias) {
            return None;
        }

        let price = if token == watched {
            metrics.last_price
        } else {
            buffer
                .last_price(token)
                .unwrap_or_else(|| metrics.last_price.mirror())
        };
        Some(Candidate {
            token,
            price,
            metrics,
        })
    }

    fn qualifies(&self, token: Outcome, delta: i32, velocity: f64, bias: Option<Outcome>) -> bool {
        let s = &self.settings;
        let mut min_move = s.min_move_cents as i32;
        let mut min_velocity = s.min_velocity;

        if let Some(biased) = bias {
            if biased != token {
                match s.bias_mode {
                    BiasMode::Hard => return false,
                    BiasMode::Soft => {
                        min_move += s.opposite_min_move_extra_cents as i32;
                        min_velocity *= s.opposite_velocity_multiplier;
                    }
                }
            }
        }

        delta > 0 && delta >= min_move && velocity >= min_velocity
    }

    fn tie_break(&self, a: Candidate, b: Candidate) -> Candidate {
        if self.settings.prefer_higher_price && a.price != b.price {
            return if a.price > b.price { a } else { b };
        }
        let (va, vb) = (
            a.metrics.velocity_cents_per_sec,
            b.metrics.velocity_cents_per_sec,
        );
        if va != vb {
            return if va > vb { a } else { b };
        }
        if a.metrics.delta_cents != b.metrics.delta_cents {
            return if a.metrics.delta_cents > b.metrics.delta_cents { a } else { b };
        }
        // Fully tied: UP wins so the choice is stable.
        if a.token == Outcome::Up {
            a
        } else {
            b
        }
    }
}
