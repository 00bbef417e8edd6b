//! In-memory paper gateway.
//!
//! Simulates order matching against a scripted top of book so the engine
//! can run in dry-run mode and under test without touching an exchange.
//! Aggressive orders fill at the opposite quote up to the configured depth,
//! passive orders rest until a book update crosses them.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use tracing::{debug, info};

use super::failsafe::FailSafeGate;
use super::gateway::ExecutionGateway;
use super::inflight::InFlightDeduper;
use super::order::{Order, OrderKind, OrderRequest, OrderStatus, PlacedOrder, Side};
use super::position::Position;
use crate::error::GatewayError;
use crate::market::{Cents, Market, Outcome, TopOfBook};

#[derive(Debug, Default)]
struct PaperState {
    market: Option<Market>,
    book: TopOfBook,
    ask_depth: HashMap<Outcome, Decimal>,
    orders: BTreeMap<String, Order>,
    positions: HashMap<(String, Outcome), Position>,
    next_id: u64,
    defer_taker_fills: bool,
    latency: Option<Duration>,
    scripted_failures: HashMap<OrderKind, VecDeque<GatewayError>>,
    placed: Vec<OrderRequest>,
    canceled: Vec<String>,
    market_cancels: Vec<String>,
}

/// Paper execution gateway.
#[derive(Debug)]
pub struct PaperGateway {
    state: Mutex<PaperState>,
    gate: FailSafeGate,
    dedup: InFlightDeduper,
}

impl PaperGateway {
    /// Create an empty gateway with no market.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PaperState::default()),
            gate: FailSafeGate::new(),
            dedup: InFlightDeduper::default(),
        }
    }

    /// Create a gateway trading `market` with the given quotes.
    pub fn with_book(market: Market, book: TopOfBook) -> Self {
        let gateway = Self::new();
        gateway.set_market(market);
        gateway.set_book(book);
        gateway
    }

    /// The fail-safe gate guarding placements.
    pub fn gate(&self) -> &FailSafeGate {
        &self.gate
    }

    /// Switch to a new market cycle.
    pub fn set_market(&self, market: Market) {
        info!(market = %market.slug, "Paper gateway switched market");
        self.gate.set_current_market(Some(market.slug.clone()));
        let mut state = self.state.lock();
        state.market = Some(market);
        state.book = TopOfBook::default();
    }

    /// Replace the top of book and match resting orders against it.
    ///
    /// Returns every order whose state changed.
    pub fn set_book(&self, book: TopOfBook) -> Vec<Order> {
        let now = OffsetDateTime::now_utc();
        let mut state = self.state.lock();
        state.book = TopOfBook {
            source: "paper".to_string(),
            updated_at: Some(now),
            ..book
        };
        match_resting(&mut state, now)
    }

    /// Limit how many shares an aggressive buy can take from an ask.
    pub fn set_ask_depth(&self, outcome: Outcome, depth: Option<Decimal>) {
        let mut state = self.state.lock();
        match depth {
            Some(depth) => state.ask_depth.insert(outcome, depth),
            None => state.ask_depth.remove(&outcome),
        };
    }

    /// Hold aggressive buys as pending instead of filling them at once.
    pub fn defer_taker_fills(&self, defer: bool) {
        self.state.lock().defer_taker_fills = defer;
    }

    /// Delay every gateway call.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    /// Fail the next placement of `kind` with `error`.
    pub fn fail_next(&self, kind: OrderKind, error: GatewayError) {
        self.state
            .lock()
            .scripted_failures
            .entry(kind)
            .or_default()
            .push_back(error);
    }

    /// Fill deferred aggressive buys against the current book.
    ///
    /// Orders that no longer cross are cancelled. Returns the changed orders.
    pub fn settle_deferred(&self) -> Vec<Order> {
        let now = OffsetDateTime::now_utc();
        let mut state = self.state.lock();
        let pending: Vec<String> = state
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Pending && o.tif.is_aggressive())
            .map(|o| o.order_id.clone())
            .collect();

        let mut updates = Vec::with_capacity(pending.len());
        for order_id in pending {
            if let Some(order) = take_aggressive(&mut state, &order_id, now) {
                updates.push(order);
            }
        }
        updates
    }

    /// Fill a resting order directly at its limit price.
    pub fn fill_order(&self, order_id: &str, size: Decimal) -> Option<Order> {
        let now = OffsetDateTime::now_utc();
        let mut state = self.state.lock();
        let order = state.orders.get(order_id)?.clone();
        if !order.status.is_working() {
            return None;
        }
        let qty = size.min(order.remaining());
        apply_fill(&mut state, order_id, qty, order.price, now)
    }

    /// Seed a position, as if it existed before the process started.
    pub fn add_position(&self, position: Position) {
        let mut state = self.state.lock();
        state
            .positions
            .insert((position.market_slug.clone(), position.token), position);
    }

    /// Drop every position in a market, as at settlement.
    pub fn clear_positions(&self, market_slug: &str) {
        self.state
            .lock()
            .positions
            .retain(|(slug, _), _| slug != market_slug);
    }

    /// Every request that reached matching, in order.
    pub fn placed(&self) -> Vec<OrderRequest> {
        self.state.lock().placed.clone()
    }

    /// Requests of one kind that reached matching.
    pub fn placed_of_kind(&self, kind: OrderKind) -> Vec<OrderRequest> {
        self.state
            .lock()
            .placed
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    /// Order IDs passed to `cancel_order`.
    pub fn canceled(&self) -> Vec<String> {
        self.state.lock().canceled.clone()
    }

    /// Market slugs passed to `cancel_orders_for_market`.
    pub fn market_cancels(&self) -> Vec<String> {
        self.state.lock().market_cancels.clone()
    }

    /// Snapshot of every order.
    pub fn orders(&self) -> Vec<Order> {
        self.state.lock().orders.values().cloned().collect()
    }

    /// Snapshot of one position.
    pub fn position(&self, market_slug: &str, outcome: Outcome) -> Option<Position> {
        self.state
            .lock()
            .positions
            .get(&(market_slug.to_string(), outcome))
            .cloned()
    }

    async fn simulate_latency(&self) {
        let latency = self.state.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Default for PaperGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionGateway for PaperGateway {
    async fn place_order(&self, request: OrderRequest) -> Result<PlacedOrder, GatewayError> {
        self.gate.check(&request.market_slug)?;
        let _guard = self.dedup.try_acquire(request.dedup_key())?;

        self.simulate_latency().await;

        let now = OffsetDateTime::now_utc();
        let mut state = self.state.lock();
        if let Some(error) = state
            .scripted_failures
            .get_mut(&request.kind)
            .and_then(VecDeque::pop_front)
        {
            debug!(kind = %request.kind, error = %error, "Scripted placement failure");
            return Err(error);
        }
        request.validate().map_err(GatewayError::Fatal)?;

        state.next_id += 1;
        let order_id = format!("paper-{:06}", state.next_id);
        let order = Order {
            order_id: order_id.clone(),
            market_slug: request.market_slug.clone(),
            token: request.token,
            token_id: request.token_id.clone(),
            side: request.side,
            price: request.price,
            size: request.size,
            filled_size: Decimal::ZERO,
            status: OrderStatus::Open,
            tif: request.tif,
            kind: request.kind,
            created_at: now,
            filled_at: None,
        };
        state.orders.insert(order_id.clone(), order);
        state.placed.push(request.clone());

        let order = if request.tif.is_aggressive() {
            if state.defer_taker_fills && request.side == Side::Buy {
                set_status(&mut state, &order_id, OrderStatus::Pending)
            } else {
                take_aggressive(&mut state, &order_id, now)
            }
        } else {
            match_passive(&mut state, &order_id, now)
        };
        let order = order.ok_or_else(|| GatewayError::Fatal(format!("order {order_id} vanished")))?;

        debug!(
            order_id = %order.order_id,
            kind = %order.kind,
            side = %order.side,
            price = %order.price,
            size = %order.size,
            filled = %order.filled_size,
            status = %order.status,
            "Paper order placed"
        );

        Ok(PlacedOrder {
            order_id: order.order_id,
            filled_size: order.filled_size,
            filled_at: order.filled_at,
            status: order.status,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.canceled.push(order_id.to_string());
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| GatewayError::OrderNotFound(order_id.to_string()))?;
        if order.status.is_working() {
            order.status = OrderStatus::Canceled;
        }
        Ok(())
    }

    async fn cancel_orders_for_market(&self, market_slug: &str) -> Result<(), GatewayError> {
        self.simulate_latency().await;
        let mut state = self.state.lock();
        state.market_cancels.push(market_slug.to_string());
        for order in state.orders.values_mut() {
            if order.market_slug == market_slug && order.status.is_working() {
                order.status = OrderStatus::Canceled;
            }
        }
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> Result<Option<Order>, GatewayError> {
        self.simulate_latency().await;
        Ok(self.state.lock().orders.get(order_id).cloned())
    }

    async fn active_orders(&self) -> Result<Vec<Order>, GatewayError> {
        self.simulate_latency().await;
        Ok(self
            .state
            .lock()
            .orders
            .values()
            .filter(|o| o.status.is_working())
            .cloned()
            .collect())
    }

    async fn open_positions_for_market(
        &self,
        market_slug: &str,
    ) -> Result<Vec<Position>, GatewayError> {
        self.simulate_latency().await;
        Ok(self
            .state
            .lock()
            .positions
            .values()
            .filter(|p| p.market_slug == market_slug && p.is_live())
            .cloned()
            .collect())
    }

    async fn top_of_book(&self, market: &Market) -> Result<TopOfBook, GatewayError> {
        self.simulate_latency().await;
        let state = self.state.lock();
        match &state.market {
            Some(current) if current.slug == market.slug => Ok(state.book.clone()),
            _ => Err(GatewayError::Transient(format!(
                "no book for market {}",
                market.slug
            ))),
        }
    }

    async fn best_price(&self, token_id: &str) -> Result<(Cents, Cents), GatewayError> {
        self.simulate_latency().await;
        let state = self.state.lock();
        let outcome = state
            .market
            .as_ref()
            .and_then(|m| m.outcome_of(token_id))
            .ok_or_else(|| GatewayError::Transient(format!("unknown token {token_id}")))?;
        Ok((state.book.bid(outcome), state.book.ask(outcome)))
    }

    fn current_market(&self) -> Option<String> {
        self.gate.current_market()
    }
}

fn set_status(state: &mut PaperState, order_id: &str, status: OrderStatus) -> Option<Order> {
    let order = state.orders.get_mut(order_id)?;
    order.status = status;
    Some(order.clone())
}

/// Execute an aggressive order against the book, cancelling any remainder.
fn take_aggressive(state: &mut PaperState, order_id: &str, now: OffsetDateTime) -> Option<Order> {
    let order = state.orders.get(order_id)?.clone();
    let (crosses, fill_price, available) = match order.side {
        Side::Buy => {
            let ask = state.book.ask(order.token);
            let depth = state.ask_depth.get(&order.token).copied();
            (
                ask.is_quoted() && order.price >= ask,
                ask,
                depth.unwrap_or(order.size),
            )
        }
        Side::Sell => {
            let bid = state.book.bid(order.token);
            let held = state
                .positions
                .get(&(order.market_slug.clone(), order.token))
                .map_or(Decimal::ZERO, |p| p.size);
            (bid.is_quoted() && order.price <= bid, bid, held)
        }
    };

    if crosses {
        let qty = order.size.min(available);
        if qty > Decimal::ZERO {
            apply_fill(state, order_id, qty, fill_price, now);
        }
    }

    let order = state.orders.get_mut(order_id)?;
    if order.status.is_working() {
        order.status = OrderStatus::Canceled;
    }
    Some(order.clone())
}

/// Rest a passive order, filling immediately only if it crosses.
fn match_passive(state: &mut PaperState, order_id: &str, now: OffsetDateTime) -> Option<Order> {
    let order = state.orders.get(order_id)?.clone();
    if order.side == Side::Buy {
        let ask = state.book.ask(order.token);
        if ask.is_quoted() && order.price >= ask {
            let depth = state.ask_depth.get(&order.token).copied();
            let qty = order.size.min(depth.unwrap_or(order.size));
            apply_fill(state, order_id, qty, ask, now);
        }
    }
    state.orders.get(order_id).cloned()
}

/// Fill resting buys that the current book now crosses, at their own price.
fn match_resting(state: &mut PaperState, now: OffsetDateTime) -> Vec<Order> {
    let crossing: Vec<(String, Cents, Decimal)> = state
        .orders
        .values()
        .filter(|o| o.side == Side::Buy && !o.tif.is_aggressive() && o.status.is_working())
        .filter(|o| {
            let ask = state.book.ask(o.token);
            ask.is_quoted() && o.price >= ask
        })
        .map(|o| (o.order_id.clone(), o.price, o.remaining()))
        .collect();

    crossing
        .into_iter()
        .filter_map(|(order_id, price, qty)| apply_fill(state, &order_id, qty, price, now))
        .collect()
}

/// Record a fill on an order and move the position.
fn apply_fill(
    state: &mut PaperState,
    order_id: &str,
    qty: Decimal,
    price: Cents,
    now: OffsetDateTime,
) -> Option<Order> {
    let order = state.orders.get_mut(order_id)?;
    order.filled_size += qty;
    order.filled_at = Some(now);
    order.status = if order.filled_size >= order.size {
        OrderStatus::Filled
    } else {
        OrderStatus::PartiallyFilled
    };
    let order = order.clone();

    let key = (order.market_slug.clone(), order.token);
    match order.side {
        Side::Buy => {
            let position = state.positions.entry(key).or_insert_with(|| Position {
                market_slug: order.market_slug.clone(),
                token: order.token,
                token_id: order.token_id.clone(),
                size: Decimal::ZERO,
                avg_price: Decimal::ZERO,
                entry_price: Some(price),
                entry_time: Some(now),
                open: true,
            });
            let cost = position.cost_basis() + qty * price.to_decimal();
            position.size += qty;
            position.avg_price = cost / position.size;
            position.open = true;
        }
        Side::Sell => {
            if let Some(position) = state.positions.get_mut(&key) {
                position.size = (position.size - qty).max(Decimal::ZERO);
                if position.size.is_zero() {
                    position.open = false;
                }
            }
        }
    }
    Some(order)
}
