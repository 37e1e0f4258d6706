//! In-memory paper venue.
//!
//! Fills market orders at the current mark, rests conditional orders, keeps a
//! net position per symbol and enforces tick/step/min-notional filters with
//! the same error codes a live venue uses. Client order IDs are deduplicated
//! the way a live venue does. Every call is counted and every submission
//! recorded; errors and lost responses can be scripted per operation.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::debug;

use cohort_core::{
    BookTop, BoxFuture, Candle, ClientOrderId, Clock, FundingSnapshot, OpenOrder, OrderAck, OrderRequest,
    OrderSide, OrderType, PositionSide, Price, Size, Symbol, SymbolFilters,
};

use crate::error::{VenueError, VenueResult};
use crate::venue::{PositionInfo, Venue};

#[derive(Debug, Clone)]
struct PaperMarket {
    filters: SymbolFilters,
    mark: Price,
    candles: Vec<Candle>,
    funding: FundingSnapshot,
    book: Option<BookTop>,
}

#[derive(Debug, Default)]
struct PaperState {
    markets: HashMap<Symbol, PaperMarket>,
    positions: HashMap<Symbol, PositionInfo>,
    open_orders: Vec<OpenOrder>,
    submissions: Vec<OrderRequest>,
    accepted: HashMap<ClientOrderId, OrderAck>,
    calls: HashMap<&'static str, u32>,
    scripted: HashMap<&'static str, VecDeque<VenueError>>,
    lost_responses: HashMap<&'static str, u32>,
    equity: Decimal,
    next_order_id: u64,
}

/// Simulated venue for dry runs and tests.
pub struct PaperVenue {
    state: Mutex<PaperState>,
    latency: Mutex<Duration>,
    clock: Arc<dyn Clock>,
}

impl PaperVenue {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(PaperState {
                equity: Decimal::from(10_000),
                next_order_id: 1,
                ..PaperState::default()
            }),
            latency: Mutex::new(Duration::ZERO),
            clock,
        }
    }

    /// Register a tradable symbol at an initial mark price.
    pub fn add_symbol(&self, filters: SymbolFilters, mark: Price) {
        let now = self.clock.now_ms();
        let market = PaperMarket {
            filters: filters.clone(),
            mark,
            candles: Vec::new(),
            funding: FundingSnapshot {
                rate: Decimal::ZERO,
                timestamp_ms: now,
            },
            book: None,
        };
        self.state.lock().markets.insert(filters.symbol, market);
    }

    pub fn set_mark(&self, symbol: &Symbol, mark: Price) {
        if let Some(m) = self.state.lock().markets.get_mut(symbol) {
            m.mark = mark;
        }
    }

    pub fn set_candles(&self, symbol: &Symbol, candles: Vec<Candle>) {
        if let Some(m) = self.state.lock().markets.get_mut(symbol) {
            m.candles = candles;
        }
    }

    pub fn set_funding(&self, symbol: &Symbol, rate: Decimal) {
        let now = self.clock.now_ms();
        if let Some(m) = self.state.lock().markets.get_mut(symbol) {
            m.funding = FundingSnapshot {
                rate,
                timestamp_ms: now,
            };
        }
    }

    pub fn set_book(&self, symbol: &Symbol, book: BookTop) {
        if let Some(m) = self.state.lock().markets.get_mut(symbol) {
            m.book = Some(book);
        }
    }

    pub fn set_equity(&self, equity: Decimal) {
        self.state.lock().equity = equity;
    }

    /// Simulated round-trip latency applied to every call.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Make the next call to `operation` fail with `error`. Queued in order.
    pub fn fail_next(&self, operation: &'static str, error: VenueError) {
        self.state
            .lock()
            .scripted
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Let the next call to `operation` take effect but lose its response;
    /// the caller sees a timeout.
    pub fn lose_next_response(&self, operation: &'static str) {
        *self.state.lock().lost_responses.entry(operation).or_insert(0) += 1;
    }

    /// Drop resting orders of `order_type` on `symbol`, as if cancelled
    /// out-of-band. Returns how many were removed.
    pub fn drop_open_orders(&self, symbol: &Symbol, order_type: OrderType) -> usize {
        let mut state = self.state.lock();
        let before = state.open_orders.len();
        state
            .open_orders
            .retain(|o| !(&o.symbol == symbol && o.order_type == order_type));
        before - state.open_orders.len()
    }

    /// Number of times `operation` was invoked.
    pub fn call_count(&self, operation: &str) -> u32 {
        self.state.lock().calls.get(operation).copied().unwrap_or(0)
    }

    /// Every order request received, in order.
    pub fn submissions(&self) -> Vec<OrderRequest> {
        self.state.lock().submissions.clone()
    }

    pub fn resting_orders(&self, symbol: &Symbol) -> Vec<OpenOrder> {
        self.state
            .lock()
            .open_orders
            .iter()
            .filter(|o| &o.symbol == symbol)
            .cloned()
            .collect()
    }

    pub fn position(&self, symbol: &Symbol) -> Option<PositionInfo> {
        self.state.lock().positions.get(symbol).cloned()
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// Count the call and pop a scripted error if one is queued.
    fn enter(&self, operation: &'static str) -> VenueResult<()> {
        let mut state = self.state.lock();
        *state.calls.entry(operation).or_insert(0) += 1;
        match state.scripted.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn response_lost(&self, operation: &'static str) -> bool {
        let mut state = self.state.lock();
        match state.lost_responses.get_mut(operation) {
            Some(pending) if *pending > 0 => {
                *pending -= 1;
                true
            }
            _ => false,
        }
    }

    /// Accept `request` once per client order ID.
    fn submit(&self, request: OrderRequest) -> VenueResult<OrderAck> {
        let mut state = self.state.lock();
        state.submissions.push(request.clone());
        if state.accepted.contains_key(&request.client_order_id) {
            return Err(VenueError::api(-4116, "ClientOrderId is duplicated."));
        }
        let ack = Self::execute(&mut state, request)?;
        state.accepted.insert(ack.client_order_id.clone(), ack.clone());
        Ok(ack)
    }

    fn market<'s>(state: &'s PaperState, symbol: &Symbol) -> VenueResult<&'s PaperMarket> {
        state
            .markets
            .get(symbol)
            .ok_or_else(|| VenueError::UnknownSymbol(symbol.to_string()))
    }

    fn execute(state: &mut PaperState, request: OrderRequest) -> VenueResult<OrderAck> {
        let market = Self::market(state, &request.symbol)?.clone();
        let filters = &market.filters;

        if request.qty.floor_to_step(filters.step_size) != request.qty || !request.qty.is_positive() {
            return Err(VenueError::api(-1111, "Precision is over the maximum defined for this asset."));
        }
        if let Some(price) = request.price {
            if price.floor_to_tick(filters.tick_size) != price {
                return Err(VenueError::api(-1111, "Precision is over the maximum defined for this asset."));
            }
        }

        let order_id = state.next_order_id.to_string();
        state.next_order_id += 1;

        if request.order_type.is_protection() || request.order_type == OrderType::Limit {
            let trigger = request.price.unwrap_or(market.mark);
            // A trigger already through the mark would fire on arrival.
            let immediate = match (request.order_type, request.side) {
                (OrderType::StopMarket, OrderSide::Sell) => trigger >= market.mark,
                (OrderType::StopMarket, OrderSide::Buy) => trigger <= market.mark,
                (OrderType::TakeProfitMarket, OrderSide::Sell) => trigger <= market.mark,
                (OrderType::TakeProfitMarket, OrderSide::Buy) => trigger >= market.mark,
                _ => false,
            };
            if immediate {
                return Err(VenueError::api(-2021, "Order would immediately trigger."));
            }
            state.open_orders.push(OpenOrder {
                order_id: order_id.clone(),
                symbol: request.symbol.clone(),
                side: request.side,
                order_type: request.order_type,
                qty: request.qty,
                trigger_price: request.price,
                reduce_only: request.reduce_only,
            });
            debug!(symbol = %request.symbol, order_id = %order_id, order_type = %request.order_type, "Paper order resting");
            return Ok(OrderAck {
                order_id,
                client_order_id: request.client_order_id,
                symbol: request.symbol,
                side: request.side,
                order_type: request.order_type,
                executed_qty: Size::ZERO,
                avg_price: Price::ZERO,
            });
        }

        let fill_price = market.mark;
        if !request.reduce_only && !filters.meets_min_notional(request.qty, fill_price) {
            return Err(VenueError::api(-4164, "Order's notional must be no smaller than the minimum."));
        }

        let existing = state.positions.get(&request.symbol).cloned();
        let mut executed = request.qty;
        match existing {
            None => {
                if request.reduce_only {
                    return Err(VenueError::api(-2022, "ReduceOnly Order is rejected."));
                }
                let side = if request.side == PositionSide::Long.entry_side() {
                    PositionSide::Long
                } else {
                    PositionSide::Short
                };
                state.positions.insert(
                    request.symbol.clone(),
                    PositionInfo {
                        symbol: request.symbol.clone(),
                        side,
                        qty: request.qty,
                        entry_price: fill_price,
                    },
                );
            }
            Some(pos) if pos.side.entry_side() == request.side => {
                if request.reduce_only {
                    return Err(VenueError::api(-2022, "ReduceOnly Order is rejected."));
                }
                let total = pos.qty + request.qty;
                let entry = (pos.entry_price.inner() * pos.qty.inner()
                    + fill_price.inner() * request.qty.inner())
                    / total.inner();
                state.positions.insert(
                    request.symbol.clone(),
                    PositionInfo {
                        qty: total,
                        entry_price: Price::new(entry),
                        ..pos
                    },
                );
            }
            Some(pos) => {
                executed = request.qty.min(pos.qty);
                let pnl = (fill_price.inner() - pos.entry_price.inner())
                    * executed.inner()
                    * Decimal::from(pos.side.sign());
                state.equity += pnl;
                let remaining = pos.qty - executed;
                if remaining.is_zero() {
                    state.positions.remove(&request.symbol);
                    // Flat: resting reduce-only orders can no longer fill.
                    let symbol = request.symbol.clone();
                    state
                        .open_orders
                        .retain(|o| !(o.symbol == symbol && o.reduce_only));
                } else {
                    state.positions.insert(
                        request.symbol.clone(),
                        PositionInfo {
                            qty: remaining,
                            ..pos
                        },
                    );
                }
            }
        }

        Ok(OrderAck {
            order_id,
            client_order_id: request.client_order_id,
            symbol: request.symbol,
            side: request.side,
            order_type: request.order_type,
            executed_qty: executed,
            avg_price: fill_price,
        })
    }
}

impl Venue for PaperVenue {
    fn get_symbol_filters<'a>(&'a self, symbol: &'a Symbol) -> BoxFuture<'a, VenueResult<SymbolFilters>> {
        Box::pin(async move {
            self.simulate_latency().await;
            self.enter("get_symbol_filters")?;
            let state = self.state.lock();
            Ok(Self::market(&state, symbol)?.filters.clone())
        })
    }

    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, VenueResult<OrderAck>> {
        Box::pin(async move {
            self.simulate_latency().await;
            self.enter("place_order")?;
            let result = self.submit(request);
            if self.response_lost("place_order") {
                return Err(VenueError::Timeout(Duration::from_secs(10)));
            }
            result
        })
    }

    fn get_order<'a>(
        &'a self,
        symbol: &'a Symbol,
        client_order_id: &'a ClientOrderId,
    ) -> BoxFuture<'a, VenueResult<Option<OrderAck>>> {
        Box::pin(async move {
            self.simulate_latency().await;
            self.enter("get_order")?;
            let state = self.state.lock();
            Ok(state
                .accepted
                .get(client_order_id)
                .filter(|ack| &ack.symbol == symbol)
                .cloned())
        })
    }

    fn cancel_order<'a>(&'a self, symbol: &'a Symbol, order_id: &'a str) -> BoxFuture<'a, VenueResult<()>> {
        Box::pin(async move {
            self.simulate_latency().await;
            self.enter("cancel_order")?;
            let mut state = self.state.lock();
            let before = state.open_orders.len();
            state
                .open_orders
                .retain(|o| !(&o.symbol == symbol && o.order_id == order_id));
            if state.open_orders.len() == before {
                return Err(VenueError::api(-2011, "Unknown order sent."));
            }
            Ok(())
        })
    }

    fn get_open_orders<'a>(&'a self, symbol: &'a Symbol) -> BoxFuture<'a, VenueResult<Vec<OpenOrder>>> {
        Box::pin(async move {
            self.simulate_latency().await;
            self.enter("get_open_orders")?;
            Ok(self.resting_orders(symbol))
        })
    }

    fn get_position<'a>(&'a self, symbol: &'a Symbol) -> BoxFuture<'a, VenueResult<Option<PositionInfo>>> {
        Box::pin(async move {
            self.simulate_latency().await;
            self.enter("get_position")?;
            Ok(self.position(symbol))
        })
    }

    fn get_mark_price<'a>(&'a self, symbol: &'a Symbol) -> BoxFuture<'a, VenueResult<Price>> {
        Box::pin(async move {
            self.simulate_latency().await;
            self.enter("get_mark_price")?;
            let state = self.state.lock();
            Ok(Self::market(&state, symbol)?.mark)
        })
    }

    fn get_klines<'a>(
        &'a self,
        symbol: &'a Symbol,
        _interval: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, VenueResult<Vec<Candle>>> {
        Box::pin(async move {
            self.simulate_latency().await;
            self.enter("get_klines")?;
            let state = self.state.lock();
            let candles = &Self::market(&state, symbol)?.candles;
            let start = candles.len().saturating_sub(limit);
            Ok(candles[start..].to_vec())
        })
    }

    fn get_funding_rate<'a>(&'a self, symbol: &'a Symbol) -> BoxFuture<'a, VenueResult<FundingSnapshot>> {
        Box::pin(async move {
            self.simulate_latency().await;
            self.enter("get_funding_rate")?;
            let state = self.state.lock();
            Ok(Self::market(&state, symbol)?.funding.clone())
        })
    }

    fn get_order_book<'a>(&'a self, symbol: &'a Symbol, _depth: usize) -> BoxFuture<'a, VenueResult<BookTop>> {
        Box::pin(async move {
            self.simulate_latency().await;
            self.enter("get_order_book")?;
            let state = self.state.lock();
            let market = Self::market(&state, symbol)?;
            Ok(market.book.clone().unwrap_or(BookTop {
                best_bid: market.mark,
                best_ask: market.mark,
                bid_qty: Size::ZERO,
                ask_qty: Size::ZERO,
            }))
        })
    }

    fn get_account_equity(&self) -> BoxFuture<'_, VenueResult<Decimal>> {
        Box::pin(async move {
            self.simulate_latency().await;
            self.enter("get_account_equity")?;
            Ok(self.state.lock().equity)
        })
    }
}
