//! Prometheus metrics for the hedge engine.
//!
//! This module provides metrics for:
//! - Order submission latency
//! - Entries, hedges, reorders and taker fallbacks
//! - Flattens by reason
//! - Hedge monitor lifecycle
//! - Policy refusals

use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use tracing::debug;

use crate::trading::OrderKind;

// === Metric Name Constants ===

/// Order submission latency metric name.
pub const METRIC_ORDER_SUBMIT_LATENCY: &str = "order_submit_latency_ms";
/// Entries submitted counter metric name.
pub const METRIC_ENTRIES_SUBMITTED: &str = "entries_submitted_total";
/// Entries filled counter metric name.
pub const METRIC_ENTRIES_FILLED: &str = "entries_filled_total";
/// Hedges submitted counter metric name.
pub const METRIC_HEDGES_SUBMITTED: &str = "hedges_submitted_total";
/// Hedge reorders counter metric name.
pub const METRIC_HEDGE_REORDERS: &str = "hedge_reorders_total";
/// Taker fallback counter metric name.
pub const METRIC_TAKER_FALLBACKS: &str = "hedge_taker_fallbacks_total";
/// Flattens counter metric name.
pub const METRIC_FLATTENS: &str = "flattens_total";
/// Orders failed counter metric name.
pub const METRIC_ORDERS_FAILED: &str = "orders_failed_total";
/// Monitors started counter metric name.
pub const METRIC_MONITORS_STARTED: &str = "hedge_monitors_started_total";
/// Monitors finished counter metric name.
pub const METRIC_MONITORS_FINISHED: &str = "hedge_monitors_finished_total";
/// Policy refusals counter metric name.
pub const METRIC_POLICY_REFUSALS: &str = "policy_refusals_total";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    describe_histogram!(
        METRIC_ORDER_SUBMIT_LATENCY,
        "Order submission latency in milliseconds"
    );

    describe_counter!(METRIC_ENTRIES_SUBMITTED, "Total number of entry orders submitted");
    describe_counter!(METRIC_ENTRIES_FILLED, "Total number of entry orders with a fill");
    describe_counter!(METRIC_HEDGES_SUBMITTED, "Total number of hedge orders submitted");
    describe_counter!(METRIC_HEDGE_REORDERS, "Total number of hedge cancel-and-replace cycles");
    describe_counter!(
        METRIC_TAKER_FALLBACKS,
        "Total number of hedges placed as aggressive orders"
    );
    describe_counter!(METRIC_FLATTENS, "Total number of flattens, by reason");
    describe_counter!(METRIC_ORDERS_FAILED, "Total number of orders that failed, by kind");
    describe_counter!(METRIC_MONITORS_STARTED, "Total number of hedge monitors started");
    describe_counter!(
        METRIC_MONITORS_FINISHED,
        "Total number of hedge monitors finished, by outcome"
    );
    describe_counter!(METRIC_POLICY_REFUSALS, "Total number of fail-safe refusals");

    debug!("Metrics initialized");
}

/// Increment entries submitted counter.
pub fn inc_entries_submitted() {
    counter!(METRIC_ENTRIES_SUBMITTED).increment(1);
}

/// Increment entries filled counter.
pub fn inc_entries_filled() {
    counter!(METRIC_ENTRIES_FILLED).increment(1);
}

/// Increment hedges submitted counter.
pub fn inc_hedges_submitted() {
    counter!(METRIC_HEDGES_SUBMITTED).increment(1);
}

/// Increment hedge reorders counter.
pub fn inc_hedge_reorders() {
    counter!(METRIC_HEDGE_REORDERS).increment(1);
}

/// Increment taker fallbacks counter.
pub fn inc_taker_fallbacks() {
    counter!(METRIC_TAKER_FALLBACKS).increment(1);
}

/// Increment flattens counter.
pub fn inc_flattens(reason: &str) {
    counter!(METRIC_FLATTENS, "reason" => reason.to_string()).increment(1);
}

/// Increment orders failed counter.
pub fn inc_orders_failed(kind: OrderKind) {
    counter!(METRIC_ORDERS_FAILED, "kind" => kind.to_string()).increment(1);
}

/// Increment monitors started counter.
pub fn inc_monitors_started() {
    counter!(METRIC_MONITORS_STARTED).increment(1);
}

/// Increment monitors finished counter.
pub fn inc_monitors_finished(outcome: &'static str) {
    counter!(METRIC_MONITORS_FINISHED, "outcome" => outcome).increment(1);
}

/// Increment policy refusals counter.
pub fn inc_policy_refusals(kind: OrderKind) {
    counter!(METRIC_POLICY_REFUSALS, "kind" => kind.to_string()).increment(1);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
    kind: Option<OrderKind>,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
            kind: None,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        let latency_ms = self.elapsed_ms();
        match self.kind {
            Some(kind) => {
                histogram!(self.metric_name, "kind" => kind.to_string()).record(latency_ms)
            }
            None => histogram!(self.metric_name).record(latency_ms),
        }
    }
}

/// Create a latency timer for order submission.
pub fn timer_order_submit(kind: OrderKind) -> LatencyTimer {
    LatencyTimer {
        start: Instant::now(),
        metric_name: METRIC_ORDER_SUBMIT_LATENCY,
        kind: Some(kind),
    }
}
