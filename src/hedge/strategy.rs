//! Hedged entry strategy.
//!
//! This module handles:
//! - Cycle transitions and per-cycle counters
//! - Price ticks: stale-event filtering, reconciliation, trigger gating
//! - The entry to hedge submission sequence
//! - Pending entries resolved by order updates
//! - Monitor spawning and graceful shutdown
//!
//! All mutable strategy state sits behind one lock that is never held
//! across a gateway call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use super::flatten::{FlattenOutcome, FlattenReason, Flattener};
use super::monitor::{HedgeMonitor, MonitorContext, MonitorRegistry};
use super::pricing::{entry_size, plan_initial_hedge, quote_pair, HedgePlan, PairQuote};
use super::reconcile::ReconcileOutcome;
use crate::config::{Config, HedgeThresholds};
use crate::error::{GatewayError, PolicyRefusal, PricingError};
use crate::market::{Cents, Market, Outcome, PriceEvent, QualityOptions};
use crate::metrics;
use crate::signal::{PriceSampleBuffer, SignalEngine, SignalSettings};
use crate::trading::{
    with_deadline, ExecutionGateway, Order, OrderKind, OrderRequest, TimeInForce,
};

/// Entry gating and sizing settings.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategySettings {
    /// Target entry size in shares.
    pub order_size: Decimal,
    /// Minimum time between triggers.
    pub cooldown: Duration,
    /// Time to observe a cycle before trading it.
    pub warmup: Duration,
    /// Hedged entries per cycle (0 is unlimited).
    pub max_trades_per_cycle: u32,
    /// No entries this close to cycle end.
    pub cycle_end_protection: Duration,
    /// Market-quality floor, if the gate is on.
    pub quality_min_score: Option<u8>,
    /// Market-quality scoring options.
    pub quality: QualityOptions,
    /// Block entries while a hedge is still working.
    pub require_fully_hedged: bool,
    /// Signal sample window.
    pub window: Duration,
}

impl StrategySettings {
    /// Build settings from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            order_size: config.order_size,
            cooldown: Duration::from_millis(config.cooldown_ms),
            warmup: Duration::from_millis(config.warmup_ms),
            max_trades_per_cycle: config.max_trades_per_cycle,
            cycle_end_protection: Duration::from_secs(config.cycle_end_protection_minutes * 60),
            quality_min_score: config.market_quality_min_score,
            quality: config.quality_options(),
            require_fully_hedged: config.require_fully_hedged_before_new_entry,
            window: Duration::from_secs(config.window_seconds),
        }
    }
}

/// Entry accepted without a fill, waiting for its order update.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    /// Market of the entry.
    pub market: Market,
    /// Prices the entry was submitted with.
    pub quote: PairQuote,
    /// Requested size.
    pub requested: Decimal,
    /// Submission time.
    pub submitted_at: Instant,
}

/// What happened to the hedge leg of a filled entry.
#[derive(Debug, Clone, PartialEq)]
pub enum HedgeOutcome {
    /// Hedge placed; a monitor tracks it.
    Submitted {
        order_id: String,
        price: Cents,
        size: Decimal,
        /// Placed as an aggressive order at the opposite ask.
        taker: bool,
    },
    /// No valid order yet; the monitor will place it.
    Deferred,
    /// A monitor already owns the market's exposure; nothing placed.
    Adopted,
    /// Placement failed; the monitor will retry.
    Retrying(GatewayError),
    /// The entry could not be hedged and was sent to liquidation.
    Liquidation {
        reason: FlattenReason,
        outcome: FlattenOutcome,
    },
}

/// Result of submitting an entry.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    /// Fail-safe gate refused the entry.
    Refused(PolicyRefusal),
    /// Placement failed.
    Failed(GatewayError),
    /// Nothing filled.
    Unfilled { order_id: String },
    /// Accepted, fill not reported yet.
    Pending { order_id: String },
    /// Filled, with the hedge leg's outcome.
    Filled {
        order_id: String,
        filled: Decimal,
        hedge: HedgeOutcome,
    },
}

/// Result of one price tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Strategy is shutting down.
    ShuttingDown,
    /// Event belongs to another cycle.
    Stale,
    /// Market lacks identifiers needed to trade.
    Untradable,
    /// Existing exposure blocks a new entry.
    Exposure(ReconcileOutcome),
    /// Cycle is still in its warmup period.
    WarmingUp,
    /// Too close to cycle end.
    CycleEnding,
    /// Per-cycle trade cap reached.
    TradeCapReached,
    /// Last trigger was too recent.
    CoolingDown,
    /// No token qualified.
    NoSignal,
    /// Market quality below the floor.
    QualityTooLow { score: u8 },
    /// Book data unavailable.
    Unavailable(GatewayError),
    /// Pricing or sizing rejected the candidate.
    Unpriceable(PricingError),
    /// An entry was submitted.
    Entry(EntryOutcome),
}

pub(super) struct StrategyState {
    current_market: Option<Market>,
    buffer: PriceSampleBuffer,
    trades_this_cycle: u32,
    last_trigger_at: Option<Instant>,
    observed_since: Instant,
    bias: Option<Outcome>,
    pending: HashMap<String, PendingEntry>,
    pub(super) monitors: MonitorRegistry,
}

impl StrategyState {
    fn new(window: Duration) -> Self {
        Self {
            current_market: None,
            buffer: PriceSampleBuffer::new(window),
            trades_this_cycle: 0,
            last_trigger_at: None,
            observed_since: Instant::now(),
            bias: None,
            pending: HashMap::new(),
            monitors: MonitorRegistry::default(),
        }
    }
}

/// Releases a market's monitor registration when the task ends.
struct MonitorSlot {
    state: Arc<Mutex<StrategyState>>,
    slug: String,
}

impl Drop for MonitorSlot {
    fn drop(&mut self) {
        self.state.lock().monitors.release(&self.slug);
    }
}

/// One strategy instance trading one market series.
pub struct HedgeStrategy {
    pub(super) gateway: Arc<dyn ExecutionGateway>,
    pub(super) thresholds: HedgeThresholds,
    pub(super) state: Arc<Mutex<StrategyState>>,
    flattener: Flattener,
    settings: StrategySettings,
    signal: SignalEngine,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl HedgeStrategy {
    /// Create a strategy trading through `gateway`.
    pub fn new(config: &Config, gateway: Arc<dyn ExecutionGateway>) -> Self {
        let settings = StrategySettings::from_config(config);
        let thresholds = config.hedge_thresholds();
        Self {
            flattener: Flattener::new(Arc::clone(&gateway), thresholds),
            gateway,
            thresholds,
            state: Arc::new(Mutex::new(StrategyState::new(settings.window))),
            signal: SignalEngine::new(SignalSettings::from_config(config)),
            settings,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Gating settings.
    pub fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    /// Switch cycles, resetting every per-cycle counter.
    ///
    /// Monitors for the old market keep running.
    pub fn on_cycle(&self, old: Option<&Market>, new: Market) {
        info!(
            old = ?old.map(|m| m.slug.as_str()),
            new = %new.slug,
            "Cycle transition"
        );
        let mut state = self.state.lock();
        state.buffer.clear();
        state.trades_this_cycle = 0;
        state.last_trigger_at = None;
        state.observed_since = Instant::now();
        state.bias = None;
        state.current_market = Some(new);
    }

    /// Set or clear the external directional bias.
    pub fn set_bias(&self, bias: Option<Outcome>) {
        self.state.lock().bias = bias;
    }

    /// Hedged entries this cycle.
    pub fn trades_this_cycle(&self) -> u32 {
        self.state.lock().trades_this_cycle
    }

    /// Entries waiting for a fill report.
    pub fn pending_entries(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Check if an entry in `market_slug` still waits for its fill report.
    pub fn has_pending_entry(&self, market_slug: &str) -> bool {
        self.state
            .lock()
            .pending
            .values()
            .any(|p| p.market.slug == market_slug)
    }

    /// Drop pending entries whose update never arrived.
    ///
    /// Any fill they had is then recovered from positions by reconciliation.
    fn expire_pending(&self) {
        let ttl = self.thresholds.order_timeout;
        self.state.lock().pending.retain(|order_id, entry| {
            let live = entry.submitted_at.elapsed() < ttl;
            if !live {
                warn!(
                    market = %entry.market.slug,
                    order_id = %order_id,
                    requested = %entry.requested,
                    "Pending entry expired without an update, reconciliation takes over"
                );
            }
            live
        });
    }

    /// Markets with a running hedge monitor.
    pub fn active_monitors(&self) -> Vec<String> {
        self.state.lock().monitors.active()
    }

    /// Check if a monitor runs for `market_slug`.
    pub fn is_monitoring(&self, market_slug: &str) -> bool {
        self.state.lock().monitors.is_active(market_slug)
    }

    /// Handle one price change.
    #[instrument(
        skip_all,
        fields(market = %event.market.slug, token = %event.token, price_cents = event.price.0)
    )]
    pub async fn on_price_changed(&self, event: PriceEvent) -> TickOutcome {
        if self.shutdown.is_cancelled() {
            return TickOutcome::ShuttingDown;
        }

        let market = event.market;
        let gateway_market = self.gateway.current_market();
        {
            let mut state = self.state.lock();
            let current = state.current_market.as_ref().map(|m| m.slug.as_str());
            if current != Some(market.slug.as_str())
                || gateway_market.as_deref() != Some(market.slug.as_str())
            {
                debug!(current = ?current, gateway = ?gateway_market, "Discarding stale-cycle event");
                return TickOutcome::Stale;
            }
            state.buffer.record(event.token, event.timestamp, event.price);
        }
        self.expire_pending();

        if let Err(e) = market.ensure_tradable() {
            warn!(error = %e, "Market cannot be traded");
            return TickOutcome::Untradable;
        }

        // Exchange state first: it is the only ledger
        let exposure = self.reconcile(&market).await;
        if !exposure.allows_entry(self.settings.require_fully_hedged) {
            debug!(exposure = ?exposure, "Exposure blocks new entry");
            return TickOutcome::Exposure(exposure);
        }

        let candidate = {
            let mut state = self.state.lock();
            let now = Instant::now();

            if now.duration_since(state.observed_since) < self.settings.warmup {
                return TickOutcome::WarmingUp;
            }

            if !self.settings.cycle_end_protection.is_zero()
                && market.seconds_remaining_at(OffsetDateTime::now_utc())
                    <= self.settings.cycle_end_protection.as_secs() as i64
            {
                return TickOutcome::CycleEnding;
            }

            if self.settings.max_trades_per_cycle > 0
                && state.trades_this_cycle >= self.settings.max_trades_per_cycle
            {
                return TickOutcome::TradeCapReached;
            }

            if let Some(last) = state.last_trigger_at {
                if now.duration_since(last) < self.settings.cooldown {
                    return TickOutcome::CoolingDown;
                }
            }

            match self.signal.evaluate(&state.buffer, state.bias) {
                Some(candidate) => {
                    state.last_trigger_at = Some(now);
                    candidate
                }
                None => return TickOutcome::NoSignal,
            }
        };

        info!(
            winner = %candidate.token,
            price_cents = candidate.price.0,
            delta_cents = candidate.metrics.delta_cents,
            velocity = candidate.metrics.velocity_cents_per_sec,
            "Signal triggered"
        );

        // Check market quality
        if let Some(min_score) = self.settings.quality_min_score {
            match with_deadline(
                "market_quality",
                self.thresholds.query_timeout,
                self.gateway.market_quality(&market, &self.settings.quality),
            )
            .await
            {
                Ok(quality) if quality.passes(min_score) => {}
                Ok(quality) => {
                    info!(
                        score = quality.score,
                        min_score,
                        problems = ?quality.problems,
                        "Market quality too low, entry skipped"
                    );
                    return TickOutcome::QualityTooLow {
                        score: quality.score,
                    };
                }
                Err(e) => {
                    warn!(error = %e, "Market quality unavailable");
                    return TickOutcome::Unavailable(e);
                }
            }
        }

        let book = match with_deadline(
            "top_of_book",
            self.thresholds.query_timeout,
            self.gateway.top_of_book(&market),
        )
        .await
        {
            Ok(book) => book,
            Err(e) => {
                warn!(error = %e, "Book unavailable, entry skipped");
                return TickOutcome::Unavailable(e);
            }
        };

        let quote = match quote_pair(&book, candidate.token, &self.thresholds) {
            Ok(quote) => quote,
            Err(e) => {
                info!(reason = %e, "Entry rejected by pricing");
                return TickOutcome::Unpriceable(e);
            }
        };
        let size = match entry_size(self.settings.order_size, &quote, &self.thresholds) {
            Ok(size) => size,
            Err(e) => {
                info!(reason = %e, "Entry rejected by sizing");
                return TickOutcome::Unpriceable(e);
            }
        };

        TickOutcome::Entry(self.submit_entry(&market, quote, size).await)
    }

    /// Resolve a pending entry from an order update.
    ///
    /// Only terminal updates count: a fill submits the hedge, no fill
    /// abandons the entry. Returns `None` for orders that are not pending.
    pub async fn on_order_update(&self, order: &Order) -> Option<EntryOutcome> {
        if !order.status.is_terminal() {
            return None;
        }

        let filled = order.effective_filled();
        let pending = self.state.lock().pending.remove(&order.order_id)?;

        if filled.is_zero() {
            info!(
                market = %pending.market.slug,
                order_id = %order.order_id,
                status = %order.status,
                "Pending entry abandoned"
            );
            return Some(EntryOutcome::Unfilled {
                order_id: order.order_id.clone(),
            });
        }

        // Reconciliation may already have hedged this fill from positions
        let hedge = if self.is_monitoring(&pending.market.slug) {
            info!(
                market = %pending.market.slug,
                order_id = %order.order_id,
                filled = %filled,
                "Entry fill already monitored, no hedge placed"
            );
            HedgeOutcome::Adopted
        } else {
            let entry_at = order.filled_at.unwrap_or_else(OffsetDateTime::now_utc);
            self.hedge_entry(&pending.market, pending.quote, filled, entry_at)
                .await
        };
        Some(EntryOutcome::Filled {
            order_id: order.order_id.clone(),
            filled,
            hedge,
        })
    }

    /// Stop taking ticks and wait for monitors and flattens to finish.
    pub async fn shutdown(&self) {
        info!(monitors = ?self.active_monitors(), "Strategy shutting down");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("Strategy stopped");
    }

    #[instrument(skip(self, market, quote), fields(market = %market.slug, token = %quote.token))]
    async fn submit_entry(&self, market: &Market, quote: PairQuote, size: Decimal) -> EntryOutcome {
        let request = OrderRequest::entry(market, quote.token, quote.entry_price, size);
        info!(
            entry_price_cents = quote.entry_price.0,
            hedge_price_cents = quote.hedge_price.0,
            opposite_ask_cents = quote.opposite_ask.0,
            size = %size,
            "Submitting entry"
        );

        metrics::inc_entries_submitted();
        let result = {
            let _timer = metrics::timer_order_submit(OrderKind::Entry);
            with_deadline(
                "place_order",
                self.thresholds.order_timeout,
                self.gateway.place_order(request),
            )
            .await
        };

        let placed = match result {
            Ok(placed) => placed,
            Err(GatewayError::PolicyRefused(refusal)) => {
                metrics::inc_policy_refusals(OrderKind::Entry);
                info!(reason = %refusal, "Entry refused");
                return EntryOutcome::Refused(refusal);
            }
            Err(e) => {
                metrics::inc_orders_failed(OrderKind::Entry);
                warn!(error = %e, "Entry placement failed");
                return EntryOutcome::Failed(e);
            }
        };

        if !placed.has_fill() {
            if placed.status.is_terminal() {
                info!(order_id = %placed.order_id, status = %placed.status, "Entry not filled");
                return EntryOutcome::Unfilled {
                    order_id: placed.order_id,
                };
            }
            info!(order_id = %placed.order_id, "Entry accepted, waiting for fill report");
            self.state.lock().pending.insert(
                placed.order_id.clone(),
                PendingEntry {
                    market: market.clone(),
                    quote,
                    requested: size,
                    submitted_at: Instant::now(),
                },
            );
            return EntryOutcome::Pending {
                order_id: placed.order_id,
            };
        }

        let filled = placed.filled_size;
        let entry_at = placed.filled_at.unwrap_or_else(OffsetDateTime::now_utc);
        let hedge = self.hedge_entry(market, quote, filled, entry_at).await;
        EntryOutcome::Filled {
            order_id: placed.order_id,
            filled,
            hedge,
        }
    }

    #[instrument(skip_all, fields(market = %market.slug, filled = %filled))]
    async fn hedge_entry(
        &self,
        market: &Market,
        quote: PairQuote,
        filled: Decimal,
        entry_at: OffsetDateTime,
    ) -> HedgeOutcome {
        metrics::inc_entries_filled();
        let hedge_token = quote.token.opposite();
        let ctx = MonitorContext {
            market: market.clone(),
            entry_token: quote.token,
            entry_price: quote.entry_price,
            target: filled,
            hedged_before: Decimal::ZERO,
            hedge_order_id: None,
            entry_at,
            thresholds: self.thresholds,
        };

        let plan = match plan_initial_hedge(
            filled,
            quote.hedge_price,
            quote.opposite_ask,
            &self.thresholds,
        ) {
            Ok(plan) => plan,
            Err(e) => {
                let reason = match e {
                    PricingError::EntryFillTooSmall { .. } => FlattenReason::EntryFillTooSmall,
                    PricingError::WouldOversize { .. } => FlattenReason::WouldOversize,
                    _ => FlattenReason::HedgeUnpriceable,
                };
                warn!(reason = %reason, error = %e, "Entry cannot be hedged");
                return self.liquidate_entry(ctx, reason).await;
            }
        };

        let request = match plan {
            HedgePlan::Maker {
                price,
                size,
                oversized,
            } => {
                if oversized {
                    warn!(size = %size, "Hedge oversized to clear minimum notional");
                }
                OrderRequest::hedge(market, hedge_token, price, size)
            }
            HedgePlan::Taker { price, size } => {
                metrics::inc_taker_fallbacks();
                info!(price_cents = price.0, size = %size, "Hedge too small to rest, taking ask");
                OrderRequest::hedge(market, hedge_token, price, size).with_tif(TimeInForce::FAK)
            }
            HedgePlan::Deferred { size } => {
                info!(size = %size, "No valid hedge order yet, monitor will place it");
                self.start_monitor(ctx);
                return HedgeOutcome::Deferred;
            }
        };

        let (price, size, taker) = (request.price, request.size, request.tif.is_aggressive());
        let result = {
            let _timer = metrics::timer_order_submit(OrderKind::Hedge);
            with_deadline(
                "place_order",
                self.thresholds.order_timeout,
                self.gateway.place_order(request),
            )
            .await
        };

        match result {
            Ok(placed) => {
                self.state.lock().trades_this_cycle += 1;
                metrics::inc_hedges_submitted();
                info!(
                    order_id = %placed.order_id,
                    price_cents = price.0,
                    size = %size,
                    taker,
                    "Hedge submitted"
                );
                self.start_monitor(MonitorContext {
                    hedge_order_id: Some(placed.order_id.clone()),
                    ..ctx
                });
                HedgeOutcome::Submitted {
                    order_id: placed.order_id,
                    price,
                    size,
                    taker,
                }
            }
            Err(GatewayError::PolicyRefused(refusal)) => {
                metrics::inc_policy_refusals(OrderKind::Hedge);
                warn!(reason = %refusal, "Hedge refused, flattening entry");
                self.liquidate_entry(ctx, FlattenReason::HedgeRefused).await
            }
            Err(e) => {
                metrics::inc_orders_failed(OrderKind::Hedge);
                warn!(error = %e, "Hedge placement failed, monitor will retry");
                self.start_monitor(ctx);
                HedgeOutcome::Retrying(e)
            }
        }
    }

    /// Flatten an unhedgeable entry. Anything left unsold stays monitored.
    async fn liquidate_entry(&self, ctx: MonitorContext, reason: FlattenReason) -> HedgeOutcome {
        let outcome = self.flattener.flatten(&ctx.market, reason).await;
        match &outcome {
            FlattenOutcome::Executed(_) | FlattenOutcome::AlreadyRunning => {}
            FlattenOutcome::Suppressed | FlattenOutcome::Failed(_) => {
                self.start_monitor(ctx);
            }
        }
        HedgeOutcome::Liquidation { reason, outcome }
    }

    /// Spawn a monitor unless one already runs for the market.
    pub(super) fn start_monitor(&self, ctx: MonitorContext) -> bool {
        let slug = ctx.market.slug.clone();
        if !self.state.lock().monitors.try_register(&slug) {
            debug!(market = %slug, "Hedge monitor already running");
            return false;
        }

        let slot = MonitorSlot {
            state: Arc::clone(&self.state),
            slug,
        };
        let monitor = HedgeMonitor::new(
            ctx,
            Arc::clone(&self.gateway),
            self.flattener.clone(),
            self.shutdown.child_token(),
        );
        metrics::inc_monitors_started();
        self.tracker.spawn(async move {
            let _slot = slot;
            let exit = monitor.run().await;
            metrics::inc_monitors_finished(exit.into());
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::TopOfBook;
    use crate::trading::PaperGateway;
    use rust_decimal_macros::dec;

    const SLUG: &str = "btc-updown-15m-1";

    fn market_ending_in(secs: i64) -> Market {
        let end = OffsetDateTime::now_utc().unix_timestamp() + secs;
        Market::fifteen_minute(SLUG, "up-token", "down-token", end - Market::WINDOW_SECONDS)
    }

    fn book() -> TopOfBook {
        TopOfBook {
            up_bid: Cents(43),
            up_ask: Cents(45),
            down_bid: Cents(54),
            down_ask: Cents(57),
            ..Default::default()
        }
    }

    fn setup(config: Config, market: &Market) -> (Arc<PaperGateway>, HedgeStrategy) {
        let gw = Arc::new(PaperGateway::with_book(market.clone(), book()));
        let strategy = HedgeStrategy::new(&config, gw.clone());
        strategy.on_cycle(None, market.clone());
        (gw, strategy)
    }

    fn event(market: &Market, secs: i64, price: i32) -> PriceEvent {
        PriceEvent {
            market: market.clone(),
            token: Outcome::Up,
            price: Cents(price),
            timestamp: OffsetDateTime::now_utc() + time::Duration::seconds(secs),
        }
    }

    #[tokio::test]
    async fn stale_market_event_is_discarded() {
        let market = market_ending_in(600);
        let (gw, strategy) = setup(Config::default(), &market);
        let other = Market::fifteen_minute("btc-updown-15m-0", "u", "d", 0);

        assert_eq!(
            strategy.on_price_changed(event(&other, 0, 40)).await,
            TickOutcome::Stale
        );
        assert!(gw.placed().is_empty());
    }

    #[tokio::test]
    async fn signal_triggers_entry_and_hedge() {
        let market = market_ending_in(600);
        let (gw, strategy) = setup(Config::default(), &market);

        assert_eq!(
            strategy.on_price_changed(event(&market, 0, 40)).await,
            TickOutcome::NoSignal
        );
        let outcome = strategy.on_price_changed(event(&market, 2, 45)).await;

        let TickOutcome::Entry(EntryOutcome::Filled { filled, hedge, .. }) = outcome else {
            panic!("expected filled entry");
        };
        assert_eq!(filled, dec!(5));
        // 100 - 45 - 3
        assert!(matches!(
            hedge,
            HedgeOutcome::Submitted { price: Cents(52), taker: false, .. }
        ));
        assert_eq!(strategy.trades_this_cycle(), 1);
        assert!(strategy.is_monitoring(SLUG));
        strategy.shutdown().await;
        assert!(strategy.active_monitors().is_empty());
    }

    #[tokio::test]
    async fn warmup_blocks_entries() {
        let market = market_ending_in(600);
        let config = Config {
            warmup_ms: 60_000,
            ..Config::default()
        };
        let (_gw, strategy) = setup(config, &market);

        strategy.on_price_changed(event(&market, 0, 40)).await;
        assert_eq!(
            strategy.on_price_changed(event(&market, 2, 45)).await,
            TickOutcome::WarmingUp
        );
    }

    #[tokio::test]
    async fn cycle_end_protection_blocks_entries() {
        let market = market_ending_in(120);
        let (_gw, strategy) = setup(Config::default(), &market);

        strategy.on_price_changed(event(&market, 0, 40)).await;
        assert_eq!(
            strategy.on_price_changed(event(&market, 2, 45)).await,
            TickOutcome::CycleEnding
        );
    }

    #[tokio::test]
    async fn quality_gate_blocks_stale_book() {
        let market = market_ending_in(600);
        let config = Config {
            market_quality_min_score: Some(80),
            ..Config::default()
        };
        let (gw, strategy) = setup(config, &market);
        gw.set_book(TopOfBook {
            down_bid: Cents::ZERO,
            ..book()
        });

        strategy.on_price_changed(event(&market, 0, 40)).await;
        assert!(matches!(
            strategy.on_price_changed(event(&market, 2, 45)).await,
            TickOutcome::QualityTooLow { .. }
        ));
    }

    #[tokio::test]
    async fn on_cycle_resets_counters() {
        let market = market_ending_in(600);
        let (_gw, strategy) = setup(Config::default(), &market);
        strategy.on_price_changed(event(&market, 0, 40)).await;
        strategy.on_price_changed(event(&market, 2, 45)).await;
        assert_eq!(strategy.trades_this_cycle(), 1);

        strategy.on_cycle(Some(&market), market_ending_in(1500));
        assert_eq!(strategy.trades_this_cycle(), 0);
        strategy.shutdown().await;
    }

    #[test]
    fn settings_follow_config() {
        let config = Config {
            cooldown_ms: 1500,
            require_fully_hedged_before_new_entry: true,
            ..Config::default()
        };
        let settings = StrategySettings::from_config(&config);
        assert_eq!(settings.cooldown, Duration::from_millis(1500));
        assert!(settings.require_fully_hedged);
        assert_eq!(settings, StrategySettings::from_config(&config));
        assert_ne!(settings, StrategySettings::from_config(&Config::default()));
    }

    #[tokio::test]
    async fn update_for_monitored_market_places_no_hedge() {
        let market = market_ending_in(600);
        let (gw, strategy) = setup(Config::default(), &market);
        gw.defer_taker_fills(true);

        strategy.on_price_changed(event(&market, 0, 40)).await;
        let outcome = strategy.on_price_changed(event(&market, 2, 45)).await;
        assert!(matches!(outcome, TickOutcome::Entry(EntryOutcome::Pending { .. })));
        let updates = gw.settle_deferred();

        // Exposure already picked up by a monitor
        assert!(strategy.start_monitor(MonitorContext {
            market: market.clone(),
            entry_token: Outcome::Up,
            entry_price: Cents(45),
            target: dec!(5),
            hedged_before: Decimal::ZERO,
            hedge_order_id: Some("resting-hedge".to_string()),
            entry_at: OffsetDateTime::now_utc(),
            thresholds: strategy.thresholds,
        }));

        let resolved = strategy.on_order_update(&updates[0]).await;

        assert!(matches!(
            resolved,
            Some(EntryOutcome::Filled {
                hedge: HedgeOutcome::Adopted,
                ..
            })
        ));
        assert_eq!(strategy.pending_entries(), 0);
        assert_eq!(strategy.trades_this_cycle(), 0);
        assert!(gw.placed_of_kind(OrderKind::Hedge).is_empty());
        strategy.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_rejects_ticks() {
        let market = market_ending_in(600);
        let (_gw, strategy) = setup(Config::default(), &market);
        strategy.shutdown().await;
        assert_eq!(
            strategy.on_price_changed(event(&market, 0, 40)).await,
            TickOutcome::ShuttingDown
        );
    }
}
