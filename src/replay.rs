//! Tick-file replay against the paper gateway.
//!
//! This module handles:
//! - Loading JSON-lines book snapshots
//! - Rebasing recorded timestamps onto the wall clock
//! - Driving cycle switches, price ticks and order updates through a strategy
//! - Summarizing what the strategy did
//!
//! One line per snapshot:
//!
//! ```text
//! {"slug":"btc-updown-15m-1700000000","up_token_id":"1","down_token_id":"2",
//!  "start_timestamp":1700000000,"timestamp_ms":1700000012000,
//!  "up_bid":38,"up_ask":40,"down_bid":58,"down_ask":61}
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::error::{BotError, MarketError, Result};
use crate::hedge::{EntryOutcome, HedgeOutcome, HedgeStrategy, TickOutcome};
use crate::market::{Cents, Market, Outcome, PriceEvent, TopOfBook};
use crate::trading::{Order, PaperGateway};

/// One recorded top-of-book snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReplayTick {
    /// Market slug.
    pub slug: String,
    /// UP token ID.
    pub up_token_id: String,
    /// DOWN token ID.
    pub down_token_id: String,
    /// Cycle start (Unix seconds).
    pub start_timestamp: i64,
    /// Snapshot time (Unix milliseconds).
    pub timestamp_ms: i64,
    /// Best UP bid in cents.
    #[serde(default)]
    pub up_bid: i32,
    /// Best UP ask in cents.
    #[serde(default)]
    pub up_ask: i32,
    /// Best DOWN bid in cents.
    #[serde(default)]
    pub down_bid: i32,
    /// Best DOWN ask in cents.
    #[serde(default)]
    pub down_ask: i32,
}

impl ReplayTick {
    fn book(&self, at: OffsetDateTime) -> TopOfBook {
        TopOfBook {
            up_bid: Cents(self.up_bid),
            up_ask: Cents(self.up_ask),
            down_bid: Cents(self.down_bid),
            down_ask: Cents(self.down_ask),
            source: "replay".to_string(),
            updated_at: Some(at),
        }
    }
}

/// Parse JSON-lines ticks. Blank lines and `#` comments are skipped.
pub fn parse_ticks(input: &str) -> Result<Vec<ReplayTick>> {
    let mut ticks = Vec::new();
    for (idx, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let tick: ReplayTick = serde_json::from_str(line).map_err(|e| {
            BotError::Market(MarketError::ParseError(format!("line {}: {e}", idx + 1)))
        })?;
        ticks.push(tick);
    }
    ticks.sort_by_key(|t| t.timestamp_ms);
    Ok(ticks)
}

/// Read and parse a tick file.
pub async fn load_ticks(path: impl AsRef<Path>) -> Result<Vec<ReplayTick>> {
    let input = tokio::fs::read_to_string(path).await?;
    parse_ticks(&input)
}

/// What a replay session did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Snapshots replayed.
    pub ticks: usize,
    /// Cycle switches.
    pub cycles: usize,
    /// Entries with a fill.
    pub entries_filled: usize,
    /// Hedge orders placed right after an entry.
    pub hedges_submitted: usize,
    /// Entries sent to liquidation.
    pub liquidations: usize,
    /// Tick outcomes by name.
    pub outcomes: BTreeMap<&'static str, usize>,
}

impl ReplaySummary {
    fn record_entry(&mut self, entry: &EntryOutcome) {
        if let EntryOutcome::Filled { hedge, .. } = entry {
            self.entries_filled += 1;
            match hedge {
                HedgeOutcome::Submitted { .. } => self.hedges_submitted += 1,
                HedgeOutcome::Liquidation { .. } => self.liquidations += 1,
                HedgeOutcome::Deferred | HedgeOutcome::Adopted | HedgeOutcome::Retrying(_) => {}
            }
        }
    }

    fn record_tick(&mut self, outcome: &TickOutcome) {
        *self.outcomes.entry(tick_label(outcome)).or_default() += 1;
        if let TickOutcome::Entry(entry) = outcome {
            self.record_entry(entry);
        }
    }
}

impl fmt::Display for ReplaySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ticks:            {}", self.ticks)?;
        writeln!(f, "cycles:           {}", self.cycles)?;
        writeln!(f, "entries filled:   {}", self.entries_filled)?;
        writeln!(f, "hedges submitted: {}", self.hedges_submitted)?;
        writeln!(f, "liquidations:     {}", self.liquidations)?;
        for (label, count) in &self.outcomes {
            writeln!(f, "  {label:<18} {count}")?;
        }
        Ok(())
    }
}

fn tick_label(outcome: &TickOutcome) -> &'static str {
    match outcome {
        TickOutcome::ShuttingDown => "shutting_down",
        TickOutcome::Stale => "stale",
        TickOutcome::Untradable => "untradable",
        TickOutcome::Exposure(_) => "exposure_open",
        TickOutcome::WarmingUp => "warming_up",
        TickOutcome::CycleEnding => "cycle_ending",
        TickOutcome::TradeCapReached => "trade_cap",
        TickOutcome::CoolingDown => "cooling_down",
        TickOutcome::NoSignal => "no_signal",
        TickOutcome::QualityTooLow { .. } => "quality_too_low",
        TickOutcome::Unavailable(_) => "unavailable",
        TickOutcome::Unpriceable(_) => "unpriceable",
        TickOutcome::Entry(_) => "entry",
    }
}

/// Drives book snapshots through a strategy trading a paper gateway.
pub struct Replayer<'a> {
    strategy: &'a HedgeStrategy,
    gateway: &'a PaperGateway,
    /// Playback speed: 1.0 is real time, 0 or less replays without pauses.
    speed: f64,
    shift_ms: Option<i64>,
    last_ms: Option<i64>,
    current: Option<Market>,
    summary: ReplaySummary,
}

impl<'a> Replayer<'a> {
    /// Create a replayer.
    pub fn new(strategy: &'a HedgeStrategy, gateway: &'a PaperGateway, speed: f64) -> Self {
        Self {
            strategy,
            gateway,
            speed,
            shift_ms: None,
            last_ms: None,
            current: None,
            summary: ReplaySummary::default(),
        }
    }

    /// Replay `ticks` in order and summarize.
    pub async fn run(mut self, ticks: Vec<ReplayTick>) -> ReplaySummary {
        info!(ticks = ticks.len(), speed = self.speed, "Replay started");
        for tick in &ticks {
            self.step(tick).await;
        }
        self.finish()
    }

    /// Feed one snapshot.
    ///
    /// Recorded times are shifted so the first snapshot lands on the current
    /// wall clock, which keeps cycle-end timing meaningful.
    pub async fn step(&mut self, tick: &ReplayTick) {
        if let Some(last_ms) = self.last_ms {
            self.pace(tick.timestamp_ms - last_ms).await;
        }
        self.last_ms = Some(tick.timestamp_ms);
        let shift_ms = *self
            .shift_ms
            .get_or_insert_with(|| OffsetDateTime::now_utc().unix_timestamp() * 1000 - tick.timestamp_ms);

        let at = rebased(tick.timestamp_ms + shift_ms);
        let market = Market::fifteen_minute(
            tick.slug.clone(),
            tick.up_token_id.clone(),
            tick.down_token_id.clone(),
            tick.start_timestamp + shift_ms.div_euclid(1000),
        );

        if self.current.as_ref().map(|m| m.slug.as_str()) != Some(market.slug.as_str()) {
            self.gateway.set_market(market.clone());
            self.strategy.on_cycle(self.current.as_ref(), market.clone());
            self.current = Some(market.clone());
            self.summary.cycles += 1;
        }

        let book = tick.book(at);
        let mut updates = self.gateway.set_book(book.clone());
        updates.extend(self.gateway.settle_deferred());
        self.deliver(&updates).await;

        for token in Outcome::BOTH {
            let price = book.ask(token);
            if !price.is_tradable() {
                continue;
            }
            let outcome = self
                .strategy
                .on_price_changed(PriceEvent {
                    market: market.clone(),
                    token,
                    price,
                    timestamp: at,
                })
                .await;
            debug!(token = %token, outcome = tick_label(&outcome), "Replay tick");
            self.summary.record_tick(&outcome);
        }

        let updates = self.gateway.settle_deferred();
        self.deliver(&updates).await;
        self.summary.ticks += 1;
    }

    /// Summary so far.
    pub fn summary(&self) -> &ReplaySummary {
        &self.summary
    }

    /// Finish and return the summary.
    pub fn finish(self) -> ReplaySummary {
        info!(
            ticks = self.summary.ticks,
            entries_filled = self.summary.entries_filled,
            hedges_submitted = self.summary.hedges_submitted,
            "Replay finished"
        );
        self.summary
    }

    async fn deliver(&mut self, updates: &[Order]) {
        for order in updates {
            if let Some(entry) = self.strategy.on_order_update(order).await {
                self.summary.record_entry(&entry);
            }
        }
    }

    async fn pace(&self, gap_ms: i64) {
        if self.speed <= 0.0 || gap_ms <= 0 {
            return;
        }
        let scaled = gap_ms as f64 / self.speed;
        tokio::time::sleep(Duration::from_millis(scaled as u64)).await;
    }
}

fn rebased(ms: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
}
