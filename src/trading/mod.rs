//! Trading module for orders, positions and the execution gateway.
//!
//! This module handles:
//! - Order types and creation
//! - Position tracking and market exposure
//! - The execution gateway contract and its paper implementation
//! - Fail-safe gate and in-flight dedup

pub mod failsafe;
pub mod gateway;
pub mod inflight;
pub mod order;
pub mod paper;
pub mod position;

pub use failsafe::FailSafeGate;
pub use gateway::{with_deadline, ExecutionGateway};
pub use inflight::{InFlightDeduper, InFlightGuard, DEFAULT_INFLIGHT_TTL};
pub use order::{
    Order, OrderKind, OrderRequest, OrderStatus, PlacedOrder, Side, TimeInForce,
};
pub use paper::PaperGateway;
pub use position::{nearly_equal_shares, MarketExposure, Position};
