//! Application configuration loaded from environment variables.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use strum::Display;

use crate::market::{Outcome, QualityOptions};

/// What to do when an exposure cannot be hedged in time or moves too far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LiquidationPolicy {
    /// Cancel resting orders and sell every open position at the bid.
    #[default]
    Flatten,
    /// Never sell. Keep repricing the hedge and hold to settlement.
    HoldToSettlement,
}

/// How an external directional bias affects the non-biased token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BiasMode {
    /// The non-biased token must clear raised thresholds.
    Soft,
    /// The non-biased token never qualifies.
    #[default]
    Hard,
}

/// How price samples turn into entry candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SignalMode {
    /// Each token qualifies on its own upward move.
    #[default]
    PerToken,
    /// Watch one token; a move of either sign picks the token that rose.
    Absolute,
}

/// Whether the hedge may exceed the entry fill to clear minimum notional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverHedgePolicy {
    /// Hedge size never exceeds the entry fill.
    Forbid,
    /// Hedge size may reach `filled * (1 + ratio)`.
    AllowUpTo(Decimal),
}

impl OverHedgePolicy {
    /// Largest hedge allowed for a given entry fill.
    pub fn max_hedge_size(&self, filled: Decimal) -> Decimal {
        match self {
            OverHedgePolicy::Forbid => filled,
            OverHedgePolicy::AllowUpTo(ratio) => filled * (Decimal::ONE + *ratio),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Sizing ===
    /// Target entry size in shares.
    #[serde(default = "default_order_size")]
    pub order_size: Decimal,

    /// Minimum order notional in USDC.
    #[serde(default = "default_min_order_notional")]
    pub min_order_notional: Decimal,

    /// Minimum share count for a passive order.
    #[serde(default = "default_min_share_size")]
    pub min_share_size: Decimal,

    /// Allowed hedge oversizing ratio (unset forbids oversizing).
    #[serde(default)]
    pub max_over_hedge_ratio: Option<Decimal>,

    // === Hedge ===
    /// Cents subtracted from the mirror price when pricing the hedge.
    #[serde(default = "default_hedge_offset_cents")]
    pub hedge_offset_cents: u32,

    /// Seconds between hedge reprices.
    #[serde(default = "default_hedge_reorder_interval_seconds")]
    pub hedge_reorder_interval_seconds: u64,

    /// Longest an entry may stay unhedged.
    #[serde(default = "default_unhedged_max_seconds")]
    pub unhedged_max_seconds: u64,

    /// Adverse move in cents that triggers liquidation (unset disables).
    #[serde(default)]
    pub unhedged_stop_loss_cents: Option<u32>,

    /// Liquidation policy for timeouts, stop-losses and failed hedges.
    #[serde(default)]
    pub liquidation_policy: LiquidationPolicy,

    /// Block new entries until the previous pair is fully hedged.
    #[serde(default)]
    pub require_fully_hedged_before_new_entry: bool,

    /// Largest tolerated mirror gap in cents.
    #[serde(default = "default_max_mirror_gap_cents")]
    pub max_mirror_gap_cents: u32,

    // === Signal ===
    /// Signal mode.
    #[serde(default)]
    pub signal_mode: SignalMode,

    /// Token watched in absolute signal mode.
    #[serde(default)]
    pub signal_token: Outcome,

    /// Sample window in seconds.
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// Minimum move in cents across the window.
    #[serde(default = "default_min_move_cents")]
    pub min_move_cents: u32,

    /// Minimum velocity in cents per second (unset uses move/window).
    #[serde(default)]
    pub min_velocity_cents_per_sec: Option<f64>,

    /// Directional bias mode.
    #[serde(default)]
    pub bias_mode: BiasMode,

    /// Soft bias: velocity multiplier for the non-biased token.
    #[serde(default = "default_opposite_bias_velocity_multiplier")]
    pub opposite_bias_velocity_multiplier: f64,

    /// Soft bias: extra cents of move for the non-biased token.
    #[serde(default)]
    pub opposite_bias_min_move_extra_cents: u32,

    /// Prefer the higher-priced token when both qualify.
    #[serde(default = "default_true")]
    pub prefer_higher_price: bool,

    /// Drop winners priced below this when preferring higher prices.
    #[serde(default)]
    pub min_preferred_price_cents: Option<u32>,

    // === Trigger gating ===
    /// Minimum milliseconds between triggers.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Milliseconds to observe a cycle before trading it.
    #[serde(default)]
    pub warmup_ms: u64,

    /// Entries per cycle (0 is unlimited).
    #[serde(default)]
    pub max_trades_per_cycle: u32,

    /// No new entries this close to cycle end (0 disables).
    #[serde(default = "default_cycle_end_protection_minutes")]
    pub cycle_end_protection_minutes: u64,

    /// Market-quality floor (unset disables the gate).
    #[serde(default)]
    pub market_quality_min_score: Option<u8>,

    /// Market-quality spread limit in cents.
    #[serde(default = "default_market_quality_max_spread_cents")]
    pub market_quality_max_spread_cents: u32,

    /// Market-quality freshness limit in milliseconds.
    #[serde(default = "default_market_quality_max_book_age_ms")]
    pub market_quality_max_book_age_ms: u64,

    // === Timing ===
    /// Hedge monitor tick interval.
    #[serde(default = "default_monitor_tick_ms")]
    pub monitor_tick_ms: u64,

    /// Deadline for order placement and cancellation.
    #[serde(default = "default_order_timeout_ms")]
    pub order_timeout_ms: u64,

    /// Deadline for book, order and position queries.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Deadline for a whole flatten sequence.
    #[serde(default = "default_flatten_timeout_ms")]
    pub flatten_timeout_ms: u64,

    // === Operation Modes ===
    /// Simulation mode (paper gateway only).
    #[serde(default = "default_true")]
    pub dry_run: bool,

    /// Port for the Prometheus exporter (unset disables).
    #[serde(default)]
    pub metrics_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,

    /// Enable verbose logging.
    #[serde(default)]
    pub verbose: bool,
}

fn default_order_size() -> Decimal {
    Decimal::new(5, 0) // 5 shares
}

fn default_min_order_notional() -> Decimal {
    Decimal::new(11, 1) // $1.10
}

fn default_min_share_size() -> Decimal {
    Decimal::new(5, 0)
}

fn default_hedge_offset_cents() -> u32 {
    3
}

fn default_hedge_reorder_interval_seconds() -> u64 {
    30
}

fn default_unhedged_max_seconds() -> u64 {
    120
}

fn default_max_mirror_gap_cents() -> u32 {
    5
}

fn default_window_seconds() -> u64 {
    10
}

fn default_min_move_cents() -> u32 {
    3
}

fn default_opposite_bias_velocity_multiplier() -> f64 {
    1.5
}

fn default_true() -> bool {
    true
}

fn default_cooldown_ms() -> u64 {
    1500
}

fn default_cycle_end_protection_minutes() -> u64 {
    3
}

fn default_market_quality_max_spread_cents() -> u32 {
    10
}

fn default_market_quality_max_book_age_ms() -> u64 {
    3000
}

fn default_monitor_tick_ms() -> u64 {
    1000
}

fn default_order_timeout_ms() -> u64 {
    5000
}

fn default_query_timeout_ms() -> u64 {
    2000
}

fn default_flatten_timeout_ms() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            order_size: default_order_size(),
            min_order_notional: default_min_order_notional(),
            min_share_size: default_min_share_size(),
            max_over_hedge_ratio: None,
            hedge_offset_cents: default_hedge_offset_cents(),
            hedge_reorder_interval_seconds: default_hedge_reorder_interval_seconds(),
            unhedged_max_seconds: default_unhedged_max_seconds(),
            unhedged_stop_loss_cents: None,
            liquidation_policy: LiquidationPolicy::default(),
            require_fully_hedged_before_new_entry: false,
            max_mirror_gap_cents: default_max_mirror_gap_cents(),
            signal_mode: SignalMode::default(),
            signal_token: Outcome::default(),
            window_seconds: default_window_seconds(),
            min_move_cents: default_min_move_cents(),
            min_velocity_cents_per_sec: None,
            bias_mode: BiasMode::default(),
            opposite_bias_velocity_multiplier: default_opposite_bias_velocity_multiplier(),
            opposite_bias_min_move_extra_cents: 0,
            prefer_higher_price: default_true(),
            min_preferred_price_cents: None,
            cooldown_ms: default_cooldown_ms(),
            warmup_ms: 0,
            max_trades_per_cycle: 0,
            cycle_end_protection_minutes: default_cycle_end_protection_minutes(),
            market_quality_min_score: None,
            market_quality_max_spread_cents: default_market_quality_max_spread_cents(),
            market_quality_max_book_age_ms: default_market_quality_max_book_age_ms(),
            monitor_tick_ms: default_monitor_tick_ms(),
            order_timeout_ms: default_order_timeout_ms(),
            query_timeout_ms: default_query_timeout_ms(),
            flatten_timeout_ms: default_flatten_timeout_ms(),
            dry_run: default_true(),
            metrics_port: None,
            rust_log: default_log_level(),
            verbose: false,
        }
    }
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), String> {
        if self.order_size <= Decimal::ZERO {
            return Err("ORDER_SIZE must be positive".to_string());
        }

        if self.min_share_size <= Decimal::ZERO {
            return Err("MIN_SHARE_SIZE must be positive".to_string());
        }

        if self.min_order_notional < Decimal::ZERO {
            return Err("MIN_ORDER_NOTIONAL must not be negative".to_string());
        }

        if let Some(ratio) = self.max_over_hedge_ratio {
            if ratio < Decimal::ZERO {
                return Err("MAX_OVER_HEDGE_RATIO must not be negative".to_string());
            }
        }

        if self.hedge_offset_cents >= 100 {
            return Err("HEDGE_OFFSET_CENTS must be below 100".to_string());
        }

        if self.unhedged_max_seconds == 0 {
            return Err("UNHEDGED_MAX_SECONDS must be positive".to_string());
        }

        if self.hedge_reorder_interval_seconds == 0 {
            return Err("HEDGE_REORDER_INTERVAL_SECONDS must be positive".to_string());
        }

        if self.window_seconds == 0 {
            return Err("WINDOW_SECONDS must be positive".to_string());
        }

        if self.min_velocity_cents_per_sec.is_some_and(|v| v < 0.0) {
            return Err("MIN_VELOCITY_CENTS_PER_SEC must not be negative".to_string());
        }

        if self.opposite_bias_velocity_multiplier < 1.0 {
            return Err("OPPOSITE_BIAS_VELOCITY_MULTIPLIER must be at least 1.0".to_string());
        }

        if self.market_quality_min_score.is_some_and(|s| s > 100) {
            return Err("MARKET_QUALITY_MIN_SCORE must be within 0..=100".to_string());
        }

        if self.monitor_tick_ms == 0 {
            return Err("MONITOR_TICK_MS must be positive".to_string());
        }

        Ok(())
    }

    /// Velocity floor, defaulting to an even move across the window.
    pub fn min_velocity(&self) -> f64 {
        self.min_velocity_cents_per_sec
            .unwrap_or(self.min_move_cents as f64 / self.window_seconds.max(1) as f64)
    }

    /// Oversizing policy derived from `MAX_OVER_HEDGE_RATIO`.
    pub fn over_hedge_policy(&self) -> OverHedgePolicy {
        match self.max_over_hedge_ratio {
            Some(ratio) if ratio > Decimal::ZERO => OverHedgePolicy::AllowUpTo(ratio),
            _ => OverHedgePolicy::Forbid,
        }
    }

    /// Options for the market-quality gate.
    pub fn quality_options(&self) -> QualityOptions {
        QualityOptions {
            max_book_age: Duration::from_millis(self.market_quality_max_book_age_ms),
            max_spread_cents: self.market_quality_max_spread_cents,
        }
    }

    /// Value-copied thresholds handed to hedge monitors.
    pub fn hedge_thresholds(&self) -> HedgeThresholds {
        HedgeThresholds {
            hedge_offset_cents: self.hedge_offset_cents,
            min_order_notional: self.min_order_notional,
            min_share_size: self.min_share_size,
            over_hedge: self.over_hedge_policy(),
            max_mirror_gap_cents: self.max_mirror_gap_cents,
            reorder_interval: Duration::from_secs(self.hedge_reorder_interval_seconds),
            unhedged_max: Duration::from_secs(self.unhedged_max_seconds),
            stop_loss_cents: self.unhedged_stop_loss_cents.filter(|c| *c > 0),
            liquidation: self.liquidation_policy,
            monitor_tick: Duration::from_millis(self.monitor_tick_ms),
            order_timeout: Duration::from_millis(self.order_timeout_ms),
            query_timeout: Duration::from_millis(self.query_timeout_ms),
            flatten_timeout: Duration::from_millis(self.flatten_timeout_ms),
        }
    }
}

/// Thresholds for pricing, monitoring and flattening a hedge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HedgeThresholds {
    /// Cents subtracted from the mirror price.
    pub hedge_offset_cents: u32,
    /// Minimum order notional in USDC.
    pub min_order_notional: Decimal,
    /// Minimum passive order size.
    pub min_share_size: Decimal,
    /// Oversizing policy.
    pub over_hedge: OverHedgePolicy,
    /// Largest tolerated mirror gap in cents.
    pub max_mirror_gap_cents: u32,
    /// Time between hedge reprices.
    pub reorder_interval: Duration,
    /// Longest an entry may stay unhedged.
    pub unhedged_max: Duration,
    /// Adverse move that triggers liquidation.
    pub stop_loss_cents: Option<u32>,
    /// Liquidation policy.
    pub liquidation: LiquidationPolicy,
    /// Monitor tick interval.
    pub monitor_tick: Duration,
    /// Order placement deadline.
    pub order_timeout: Duration,
    /// Query deadline.
    pub query_timeout: Duration,
    /// Whole-flatten deadline.
    pub flatten_timeout: Duration,
}

impl Default for HedgeThresholds {
    fn default() -> Self {
        Config::default().hedge_thresholds()
    }
}
