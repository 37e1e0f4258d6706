//! Order manager.
//!
//! The only component that places, cancels or queries orders. Every venue
//! call goes through the shared retry policy and is timed into the calling
//! agent's API latency window.
//!
//! # Entry
//!
//! 1. Symbol lock held or cooling down → Rejected(SymbolLocked)
//! 2. Book already holds the symbol    → Rejected(PositionExists)
//! 3. Normalized qty below minimum     → Rejected(BelowMinNotional)
//! 4. Venue skip code                  → Rejected(VenueSkip)
//! 5. Fill → OPEN → TP/SL derived, margin-checked and submitted once
//!
//! # Submission
//!
//! Order placement is retried only on errors after which the venue certainly
//! did not accept the order. When the outcome is unknown (lost response,
//! disconnect, duplicate client order ID) the order is looked up by its client
//! order ID first and any accepted order is adopted instead of resent.
//!
//! # Exit
//!
//! Full and partial exits both pass through `TradeStateMachine::try_begin_exit`,
//! so at most one exit order per symbol is ever in flight.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use cohort_core::{
    AgentId, BookTop, BoxFuture, Candle, Clock, FundingSnapshot, OrderAck, OrderRequest, OrderType,
    Position, PositionSide, Price, RejectReason, Rejection, Size, Symbol, SymbolFilters, TradeState,
};
use cohort_position::{
    protection_hash, ExitOutcome, ExitReason, PositionBook, PositionError, PositionResult,
    ProtectionActions, ProtectionStatus, RepairOutcome, SymbolLock, SymbolLockConfig,
    TradeStateConfig, TradeStateMachine,
};
use cohort_risk::DailyLossTracker;
use cohort_telemetry::{JournalRecord, Metrics, TradeAction, TradeJournal};
use cohort_venue::{retry_with, ErrorAction, FilterCache, RetryPolicy, Venue, VenueError, VenueResult};

use crate::error::{ExecutorError, ExecutorResult};
use crate::protection::{derive_protection, enforce_safety_margin, ProtectionPrices};

/// Venue code for a trigger that would fire on arrival.
const IMMEDIATE_TRIGGER_CODE: i32 = -2021;

// ============================================================================
// OrderManagerConfig
// ============================================================================

/// Order manager configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderManagerConfig {
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Symbol filter cache TTL. Default: 300s.
    #[serde(default = "default_filter_ttl_secs")]
    pub filter_ttl_secs: u64,
    /// Minimum distance in ticks between any trigger and the mark. Default: 5.
    #[serde(default = "default_safety_margin_ticks")]
    pub safety_margin_ticks: u32,
    /// Fraction closed by the partial take-profit. Default: 0.25.
    #[serde(default = "default_partial_close_fraction")]
    pub partial_close_fraction: Decimal,
    #[serde(default)]
    pub symbol_lock: SymbolLockConfig,
    #[serde(default)]
    pub trade_state: TradeStateConfig,
}

fn default_filter_ttl_secs() -> u64 {
    300
}

fn default_safety_margin_ticks() -> u32 {
    5
}

fn default_partial_close_fraction() -> Decimal {
    dec!(0.25)
}

impl Default for OrderManagerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            filter_ttl_secs: default_filter_ttl_secs(),
            safety_margin_ticks: default_safety_margin_ticks(),
            partial_close_fraction: default_partial_close_fraction(),
            symbol_lock: SymbolLockConfig::default(),
            trade_state: TradeStateConfig::default(),
        }
    }
}

impl OrderManagerConfig {
    pub fn validate(&self) -> ExecutorResult<()> {
        if self.filter_ttl_secs == 0 {
            return Err(ExecutorError::InvalidConfig(
                "filter_ttl_secs must be > 0".to_string(),
            ));
        }
        if self.partial_close_fraction <= Decimal::ZERO || self.partial_close_fraction >= Decimal::ONE {
            return Err(ExecutorError::InvalidConfig(format!(
                "partial_close_fraction must be in (0, 1), got {}",
                self.partial_close_fraction
            )));
        }
        self.symbol_lock
            .validate()
            .and_then(|()| self.trade_state.validate())
            .map_err(|e| ExecutorError::InvalidConfig(e.to_string()))
    }
}

// ============================================================================
// Requests and outcomes
// ============================================================================

/// A sized, direction-resolved entry request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceRequest {
    pub agent_id: AgentId,
    pub symbol: Symbol,
    pub side: PositionSide,
    /// Raw size; normalized to the symbol's step before submission.
    pub qty: Size,
    pub leverage: u32,
    /// Take-profit distance as a fraction of entry.
    pub tp_pct: Decimal,
    /// Stop-loss distance as a fraction of entry.
    pub sl_pct: Decimal,
}

/// Result of an entry request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceOutcome {
    Opened(Position),
    Rejected(Rejection),
}

fn action_label(action: ErrorAction) -> &'static str {
    match action {
        ErrorAction::Retry { .. } => "retry",
        ErrorAction::Skip => "skip",
        ErrorAction::Fallback => "fallback",
        ErrorAction::Fail => "fail",
    }
}

/// Classification for order placement: an ambiguous failure is never retried
/// blindly.
fn submission_action(e: &VenueError) -> ErrorAction {
    if e.is_ambiguous() {
        ErrorAction::Fail
    } else {
        e.action()
    }
}

fn realized_pnl(side: PositionSide, entry: Price, fill: Price, qty: Size) -> Decimal {
    (fill.inner() - entry.inner()) * qty.inner() * Decimal::from(side.sign())
}

// ============================================================================
// OrderManager
// ============================================================================

pub struct OrderManager {
    config: OrderManagerConfig,
    venue: Arc<dyn Venue>,
    filters: FilterCache,
    lock: SymbolLock,
    states: TradeStateMachine,
    book: Arc<PositionBook>,
    risk: Arc<DailyLossTracker>,
    journal: Arc<TradeJournal>,
    clock: Arc<dyn Clock>,
}

impl OrderManager {
    #[must_use]
    pub fn new(
        config: OrderManagerConfig,
        venue: Arc<dyn Venue>,
        book: Arc<PositionBook>,
        risk: Arc<DailyLossTracker>,
        journal: Arc<TradeJournal>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            filters: FilterCache::new(Duration::from_secs(config.filter_ttl_secs), clock.clone()),
            lock: SymbolLock::new(config.symbol_lock.clone(), clock.clone()),
            states: TradeStateMachine::new(config.trade_state.clone(), clock.clone()),
            config,
            venue,
            book,
            risk,
            journal,
            clock,
        }
    }

    #[must_use]
    pub fn config(&self) -> &OrderManagerConfig {
        &self.config
    }

    #[must_use]
    pub fn book(&self) -> &Arc<PositionBook> {
        &self.book
    }

    #[must_use]
    pub fn trade_states(&self) -> &TradeStateMachine {
        &self.states
    }

    #[must_use]
    pub fn symbol_lock(&self) -> &SymbolLock {
        &self.lock
    }

    /// Run one venue call under the retry policy, timing each attempt into
    /// `agent`'s latency window.
    async fn timed<T, F, Fut>(
        &self,
        agent: Option<&AgentId>,
        operation: &'static str,
        call: F,
    ) -> VenueResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = VenueResult<T>>,
    {
        self.timed_with(agent, operation, VenueError::action, call).await
    }

    async fn timed_with<T, F, Fut, C>(
        &self,
        agent: Option<&AgentId>,
        operation: &'static str,
        classify: C,
        mut call: F,
    ) -> VenueResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = VenueResult<T>>,
        C: Fn(&VenueError) -> ErrorAction,
    {
        let risk = &self.risk;
        let result = retry_with(&self.config.retry, operation, classify, || {
            let started = Instant::now();
            let attempt = call();
            async move {
                let result = attempt.await;
                if let Some(agent) = agent {
                    risk.record_api_latency(agent, started.elapsed());
                }
                result
            }
        })
        .await;

        if let Err(e) = &result {
            let action = e.action();
            Metrics::venue_error(action_label(action));
            if action != ErrorAction::Skip {
                warn!(operation, error = %e, code = ?e.code(), "Venue call failed");
            }
        }
        result
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Precision filters for `symbol`, cached for `filter_ttl_secs`.
    pub async fn symbol_filters(&self, symbol: &Symbol) -> ExecutorResult<SymbolFilters> {
        Ok(self
            .filters
            .get_or_fetch(self.venue.as_ref(), &self.config.retry, symbol)
            .await?)
    }

    /// Round `price` to tick and floor `qty` to step.
    pub async fn normalize(&self, symbol: &Symbol, price: Price, qty: Size) -> ExecutorResult<(Price, Size)> {
        let filters = self.symbol_filters(symbol).await?;
        Ok((filters.normalize_price(price), filters.normalize_qty(qty)))
    }

    pub async fn mark_price(&self, agent: Option<&AgentId>, symbol: &Symbol) -> ExecutorResult<Price> {
        Ok(self
            .timed(agent, "get_mark_price", || self.venue.get_mark_price(symbol))
            .await?)
    }

    pub async fn account_equity(&self, agent: &AgentId) -> ExecutorResult<Decimal> {
        Ok(self
            .timed(Some(agent), "get_account_equity", || self.venue.get_account_equity())
            .await?)
    }

    pub async fn klines(
        &self,
        agent: Option<&AgentId>,
        symbol: &Symbol,
        interval: &str,
        limit: usize,
    ) -> ExecutorResult<Vec<Candle>> {
        Ok(self
            .timed(agent, "get_klines", || self.venue.get_klines(symbol, interval, limit))
            .await?)
    }

    pub async fn funding_rate(&self, agent: Option<&AgentId>, symbol: &Symbol) -> ExecutorResult<FundingSnapshot> {
        Ok(self
            .timed(agent, "get_funding_rate", || self.venue.get_funding_rate(symbol))
            .await?)
    }

    pub async fn order_book(&self, agent: Option<&AgentId>, symbol: &Symbol, depth: usize) -> ExecutorResult<BookTop> {
        Ok(self
            .timed(agent, "get_order_book", || self.venue.get_order_book(symbol, depth))
            .await?)
    }

    /// Which protection legs are resting for `position`.
    pub async fn fetch_protection_status(&self, position: &Position) -> ExecutorResult<ProtectionStatus> {
        let symbol = &position.symbol;
        let orders = self
            .timed(Some(&position.agent_id), "get_open_orders", || {
                self.venue.get_open_orders(symbol)
            })
            .await?;
        let exit_side = position.side.exit_side();
        let resting = |order_type: OrderType| {
            orders
                .iter()
                .any(|o| o.order_type == order_type && o.side == exit_side && o.reduce_only)
        };
        Ok(ProtectionStatus {
            has_take_profit: resting(OrderType::TakeProfitMarket),
            has_stop_loss: resting(OrderType::StopMarket),
        })
    }

    // ------------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------------

    /// Place `request` at most once at the venue.
    ///
    /// After an ambiguous failure the order is looked up by client order ID.
    /// An accepted order is adopted; an order the venue never saw is resent
    /// with the same client order ID while attempts remain.
    async fn submit_order(&self, agent: Option<&AgentId>, request: &OrderRequest) -> VenueResult<OrderAck> {
        let symbol = &request.symbol;
        let client_id = &request.client_order_id;
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let err = match self
                .timed_with(agent, "place_order", submission_action, || {
                    self.venue.place_order(request.clone())
                })
                .await
            {
                Ok(ack) => return Ok(ack),
                Err(e) if e.is_ambiguous() => e,
                Err(e) => return Err(e),
            };

            warn!(%symbol, %client_id, attempt, error = %err, "Order outcome unknown, looking it up");
            match self
                .timed(agent, "get_order", || self.venue.get_order(symbol, client_id))
                .await
            {
                Ok(Some(ack)) => {
                    info!(%symbol, %client_id, order_id = %ack.order_id, "Order was accepted, adopting it");
                    return Ok(ack);
                }
                Ok(None) if attempt < max_attempts => {
                    let delay = self.config.retry.backoff_delay(attempt, None);
                    debug!(%symbol, %client_id, delay_ms = delay.as_millis() as u64, "Order not at venue, resending");
                    tokio::time::sleep(delay).await;
                }
                Ok(None) => return Err(err),
                Err(lookup) => {
                    error!(%symbol, %client_id, error = %lookup, "Order lookup failed, outcome unknown");
                    return Err(err);
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Entry
    // ------------------------------------------------------------------------

    /// Open a position and attach its protection.
    ///
    /// Soft rejections come back as `PlaceOutcome::Rejected`; `Err` is kept
    /// for venue failures, which also put the symbol into lock cooldown.
    pub async fn place(&self, request: &PlaceRequest) -> ExecutorResult<PlaceOutcome> {
        let symbol = &request.symbol;
        if !self.lock.acquire(symbol, &request.agent_id) {
            return Ok(PlaceOutcome::Rejected(Rejection::new(
                RejectReason::SymbolLocked,
                format!("{symbol} is locked or cooling down"),
            )));
        }

        let result = self.place_locked(request).await;
        self.lock.release(symbol, result.is_ok());
        result
    }

    async fn place_locked(&self, request: &PlaceRequest) -> ExecutorResult<PlaceOutcome> {
        let symbol = &request.symbol;
        let agent = &request.agent_id;
        if self.book.has_position(symbol) {
            return Ok(PlaceOutcome::Rejected(Rejection::new(
                RejectReason::PositionExists,
                format!("{symbol} already has an open position"),
            )));
        }
        let filters = self.symbol_filters(symbol).await?;
        let mark = self.mark_price(Some(agent), symbol).await?;

        let qty = filters.normalize_qty(request.qty);
        if !qty.is_positive() || !filters.meets_min_notional(qty, mark) {
            return Ok(PlaceOutcome::Rejected(Rejection::new(
                RejectReason::BelowMinNotional,
                format!(
                    "{symbol} qty {qty} at {mark} below min qty {} / notional {}",
                    filters.min_qty, filters.min_notional
                ),
            )));
        }

        // Built once so every attempt carries the same client order ID.
        let order = OrderRequest::market(symbol.clone(), request.side.entry_side(), qty);
        let ack = match self.submit_order(Some(agent), &order).await {
            Ok(ack) => ack,
            Err(e) if e.action() == ErrorAction::Skip => {
                warn!(%symbol, agent = %agent, error = %e, "Entry skipped by venue");
                return Ok(PlaceOutcome::Rejected(Rejection::new(
                    RejectReason::VenueSkip,
                    e.to_string(),
                )));
            }
            Err(e) => {
                error!(%symbol, agent = %agent, error = %e, "Entry order failed");
                return Err(e.into());
            }
        };
        Metrics::order_submitted("entry");

        let filled = if ack.executed_qty.is_positive() { ack.executed_qty } else { qty };
        let entry = if ack.avg_price.is_positive() { ack.avg_price } else { mark };
        let prices = enforce_safety_margin(
            derive_protection(request.side, entry, request.tp_pct, request.sl_pct, filters.tick_size),
            request.side,
            mark,
            filters.tick_size,
            self.config.safety_margin_ticks,
        );

        self.states.mark_open(symbol);
        let position = Position {
            symbol: symbol.clone(),
            side: request.side,
            qty: filled,
            entry_price: entry,
            leverage: request.leverage,
            take_profit: prices.take_profit,
            stop_loss: prices.stop_loss,
            opened_at_ms: self.clock.now_ms(),
            agent_id: agent.clone(),
            state: TradeState::Open,
            partial_taken: false,
        };
        self.book.insert(position.clone());
        Metrics::open_positions_set(self.book.len() as i64);
        self.journal.record(JournalRecord::Trade {
            agent_id: agent.clone(),
            symbol: symbol.clone(),
            side: request.side,
            action: TradeAction::Open,
            qty: filled,
            price: entry,
        });

        info!(
            %symbol,
            agent = %agent,
            side = %request.side,
            qty = %filled,
            entry = %entry,
            take_profit = ?position.take_profit,
            stop_loss = ?position.stop_loss,
            "Position opened"
        );

        match self.submit_protection(&position, ProtectionStatus::default()).await {
            Ok(outcome) => debug!(%symbol, ?outcome, "Initial protection submitted"),
            Err(e) => warn!(%symbol, error = %e, "Initial protection failed, monitors will repair"),
        }
        Ok(PlaceOutcome::Opened(position))
    }

    // ------------------------------------------------------------------------
    // Protection
    // ------------------------------------------------------------------------

    /// Submit the legs of `position`'s TP/SL pair that `present` lacks.
    ///
    /// An equivalent pair registered inside the dedup window is not resent. A
    /// pair that does not fully reach the venue is unregistered again.
    async fn submit_protection(
        &self,
        position: &Position,
        present: ProtectionStatus,
    ) -> ExecutorResult<RepairOutcome> {
        let symbol = &position.symbol;
        let hash = protection_hash(symbol, position.side, position.take_profit, position.stop_loss);
        if !self.states.register_if_new(symbol, hash) {
            debug!(%symbol, hash, "Equivalent TP/SL pair already submitted");
            return Ok(RepairOutcome::Skipped(Rejection::new(
                RejectReason::DuplicateProtection,
                format!("equivalent TP/SL pair for {symbol} already submitted"),
            )));
        }

        let result = self.submit_legs(position, present).await;
        if !matches!(result, Ok(RepairOutcome::Reattached { .. })) {
            self.states.unregister(symbol, hash);
        }
        result
    }

    async fn submit_legs(&self, position: &Position, present: ProtectionStatus) -> ExecutorResult<RepairOutcome> {
        let symbol = &position.symbol;
        let filters = self.symbol_filters(symbol).await?;
        let mark = self.mark_price(Some(&position.agent_id), symbol).await?;
        let prices = enforce_safety_margin(
            ProtectionPrices {
                take_profit: position.take_profit,
                stop_loss: position.stop_loss,
            },
            position.side,
            mark,
            filters.tick_size,
            self.config.safety_margin_ticks,
        );

        let mut wanted = Vec::with_capacity(2);
        if let Some(tp) = prices.take_profit.filter(|_| !present.has_take_profit) {
            wanted.push((OrderType::TakeProfitMarket, tp));
        }
        if let Some(sl) = prices.stop_loss.filter(|_| !present.has_stop_loss) {
            wanted.push((OrderType::StopMarket, sl));
        }

        let mut legs = 0;
        for (order_type, trigger) in wanted {
            // An exit may have started while earlier calls were in flight.
            if let Some(rejection) = self.protection_blocked(symbol) {
                debug!(%symbol, %order_type, "Exit in progress, protection leg dropped");
                return Ok(RepairOutcome::Skipped(rejection));
            }
            let ack = self.submit_trigger(position, order_type, trigger, &filters).await?;
            if let Some(rejection) = self.protection_blocked(symbol) {
                warn!(%symbol, order_id = %ack.order_id, "Exit started while protection was in flight, cancelling it");
                self.cancel_logged(position, &ack.order_id).await;
                return Ok(RepairOutcome::Skipped(rejection));
            }
            legs += 1;
        }
        Ok(RepairOutcome::Reattached { legs })
    }

    /// Rejection when `symbol` is exiting or no longer open in the book.
    fn protection_blocked(&self, symbol: &Symbol) -> Option<Rejection> {
        let state = self.states.state(symbol);
        if matches!(state, TradeState::Closing | TradeState::Closed) || !self.book.has_position(symbol) {
            return Some(Rejection::new(
                RejectReason::ExitInFlight,
                format!("{symbol} is exiting ({state})"),
            ));
        }
        None
    }

    /// Place one reduce-only trigger. A trigger rejected as immediately
    /// firing is moved twice the safety margin from a fresh mark and sent once
    /// more.
    async fn submit_trigger(
        &self,
        position: &Position,
        order_type: OrderType,
        trigger: Price,
        filters: &SymbolFilters,
    ) -> ExecutorResult<OrderAck> {
        let symbol = &position.symbol;
        let agent = Some(&position.agent_id);
        let side = position.side.exit_side();
        let kind = if order_type == OrderType::StopMarket { "stop_loss" } else { "take_profit" };

        let request = OrderRequest::trigger(symbol.clone(), side, position.qty, order_type, trigger);
        let err = match self.submit_order(agent, &request).await {
            Ok(ack) => {
                Metrics::order_submitted(kind);
                return Ok(ack);
            }
            Err(e) => e,
        };
        if err.action() != ErrorAction::Fallback || err.code() != Some(IMMEDIATE_TRIGGER_CODE) {
            return Err(err.into());
        }

        let mark = self.mark_price(agent, symbol).await?;
        let single = if order_type == OrderType::StopMarket {
            ProtectionPrices { take_profit: None, stop_loss: Some(trigger) }
        } else {
            ProtectionPrices { take_profit: Some(trigger), stop_loss: None }
        };
        let moved = enforce_safety_margin(
            single,
            position.side,
            mark,
            filters.tick_size,
            self.config.safety_margin_ticks.saturating_mul(2),
        );
        let Some(retry_trigger) = moved.stop_loss.or(moved.take_profit) else {
            return Err(err.into());
        };
        warn!(%symbol, kind, from = %trigger, to = %retry_trigger, %mark, "Trigger would fire immediately, moving it");

        let request = OrderRequest::trigger(symbol.clone(), side, position.qty, order_type, retry_trigger);
        let ack = self.submit_order(agent, &request).await?;
        Metrics::order_submitted(kind);
        Ok(ack)
    }

    /// Resubmit missing TP/SL legs for `position`.
    pub async fn repair_protection(&self, position: &Position) -> ExecutorResult<RepairOutcome> {
        let symbol = &position.symbol;
        if matches!(self.states.state(symbol), TradeState::Closing | TradeState::Closed) {
            return Ok(RepairOutcome::Skipped(Rejection::new(
                RejectReason::ExitInFlight,
                format!("{symbol} is exiting"),
            )));
        }
        let status = self.fetch_protection_status(position).await?;
        if status.is_complete_for(position) {
            return Ok(RepairOutcome::AlreadyProtected);
        }
        let outcome = self.submit_protection(position, status).await?;
        if let RepairOutcome::Reattached { legs } = outcome {
            info!(%symbol, legs, "Protection reattached");
        }
        Ok(outcome)
    }

    /// Cancel resting reduce-only protection for `position`. Failures are
    /// logged; returns how many orders were cancelled.
    async fn cancel_protection(&self, position: &Position) -> usize {
        let symbol = &position.symbol;
        let agent = Some(&position.agent_id);
        let orders = match self
            .timed(agent, "get_open_orders", || self.venue.get_open_orders(symbol))
            .await
        {
            Ok(orders) => orders,
            Err(e) => {
                warn!(%symbol, error = %e, "Could not list protection to cancel");
                return 0;
            }
        };

        let exit_side = position.side.exit_side();
        let mut cancelled = 0;
        for order in orders
            .iter()
            .filter(|o| o.reduce_only && o.order_type.is_protection() && o.side == exit_side)
        {
            if self.cancel_logged(position, &order.order_id).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Cancel one protection order. Failures are logged; returns whether the
    /// venue confirmed the cancel.
    async fn cancel_logged(&self, position: &Position, order_id: &str) -> bool {
        let symbol = &position.symbol;
        match self
            .timed(Some(&position.agent_id), "cancel_order", || self.venue.cancel_order(symbol, order_id))
            .await
        {
            Ok(()) => true,
            Err(e) if e.action() == ErrorAction::Skip => {
                debug!(%symbol, order_id, "Protection order already gone");
                false
            }
            Err(e) => {
                warn!(%symbol, order_id, error = %e, "Protection cancel failed");
                false
            }
        }
    }

    // ------------------------------------------------------------------------
    // Exit
    // ------------------------------------------------------------------------

    /// Close the whole position with a reduce-only market order.
    pub async fn close(&self, position: &Position, reason: ExitReason) -> ExecutorResult<ExitOutcome> {
        let symbol = &position.symbol;
        let Some(current) = self.book.get(symbol) else {
            return Ok(ExitOutcome::Skipped(Rejection::new(
                RejectReason::ExitInFlight,
                format!("no open position on {symbol}"),
            )));
        };
        if !self.states.try_begin_exit(symbol) {
            return Ok(ExitOutcome::Skipped(Rejection::new(
                RejectReason::ExitInFlight,
                format!("exit for {symbol} in flight or debounced"),
            )));
        }
        self.book.update(symbol, |p| p.state = TradeState::Closing);

        let realized = match self.execute_exit(&current).await {
            Ok(realized) => realized,
            Err(e) => {
                self.states.record_exit_failed(symbol);
                self.book.update(symbol, |p| p.state = TradeState::Open);
                warn!(%symbol, %reason, error = %e, "Exit failed");
                return Err(e);
            }
        };

        self.states.record_exit_complete(symbol);
        self.book.remove(symbol);
        Metrics::open_positions_set(self.book.len() as i64);

        let agent = &current.agent_id;
        let is_win = realized > Decimal::ZERO;
        self.risk.record_trade_outcome(agent, is_win);
        self.journal.record(JournalRecord::Outcome {
            agent_id: agent.clone(),
            symbol: symbol.clone(),
            realized_pnl: realized,
            is_win,
        });

        info!(%symbol, agent = %agent, %reason, realized_pnl = %realized, "Position closed");
        Ok(ExitOutcome::Closed { realized_pnl: realized })
    }

    async fn execute_exit(&self, position: &Position) -> ExecutorResult<Decimal> {
        let symbol = &position.symbol;
        let agent = Some(&position.agent_id);
        let venue_position = self
            .timed(agent, "get_position", || self.venue.get_position(symbol))
            .await?;

        let (qty, fill) = match venue_position {
            Some(info) => {
                let request = OrderRequest::market_reduce_only(symbol.clone(), position.side.exit_side(), info.qty);
                let ack = self.submit_order(agent, &request).await?;
                Metrics::order_submitted("exit");
                let fill = if ack.avg_price.is_positive() {
                    ack.avg_price
                } else {
                    self.mark_price(agent, symbol).await?
                };
                (ack.executed_qty, fill)
            }
            None => {
                // Protection already filled at the venue.
                let mark = self.mark_price(agent, symbol).await?;
                info!(%symbol, %mark, "Venue already flat, estimating PnL at mark");
                (position.qty, mark)
            }
        };

        self.cancel_protection(position).await;
        self.journal.record(JournalRecord::Trade {
            agent_id: position.agent_id.clone(),
            symbol: symbol.clone(),
            side: position.side,
            action: TradeAction::Close,
            qty,
            price: fill,
        });
        Ok(realized_pnl(position.side, position.entry_price, fill, qty))
    }

    /// Close `fraction` of the position and move the stop to breakeven.
    pub async fn partial_close(&self, position: &Position, fraction: Decimal) -> ExecutorResult<ExitOutcome> {
        let symbol = &position.symbol;
        let current = self
            .book
            .get(symbol)
            .ok_or_else(|| ExecutorError::NoPosition(symbol.to_string()))?;
        if current.partial_taken {
            return Ok(ExitOutcome::Skipped(Rejection::new(
                RejectReason::ExitInFlight,
                format!("partial profit on {symbol} already taken"),
            )));
        }

        let filters = self.symbol_filters(symbol).await?;
        let close_qty = Size::new(current.qty.inner() * fraction).floor_to_step(filters.step_size);
        let remaining = current.qty - close_qty;
        if !close_qty.is_positive() || close_qty < filters.min_qty || remaining < filters.min_qty {
            return Ok(ExitOutcome::Skipped(Rejection::new(
                RejectReason::BelowMinNotional,
                format!("{symbol} partial {close_qty} of {} below min qty {}", current.qty, filters.min_qty),
            )));
        }
        if !self.states.try_begin_exit(symbol) {
            return Ok(ExitOutcome::Skipped(Rejection::new(
                RejectReason::ExitInFlight,
                format!("exit for {symbol} in flight or debounced"),
            )));
        }

        let (realized, updated) = match self.execute_partial(&current, close_qty, &filters).await {
            Ok(done) => done,
            Err(e) => {
                self.states.record_exit_failed(symbol);
                warn!(%symbol, error = %e, "Partial close failed");
                return Err(e);
            }
        };
        self.states.record_exit_partial(symbol);

        match self.submit_protection(&updated, ProtectionStatus::default()).await {
            Ok(outcome) => debug!(%symbol, ?outcome, "Protection replaced after partial close"),
            Err(e) => warn!(%symbol, error = %e, "Protection replacement failed, monitors will repair"),
        }
        Ok(ExitOutcome::Closed { realized_pnl: realized })
    }

    /// Fill the partial exit and update the book. Returns the realized PnL
    /// and the remaining position.
    async fn execute_partial(
        &self,
        position: &Position,
        close_qty: Size,
        filters: &SymbolFilters,
    ) -> ExecutorResult<(Decimal, Position)> {
        let symbol = &position.symbol;
        let agent = Some(&position.agent_id);
        let request = OrderRequest::market_reduce_only(symbol.clone(), position.side.exit_side(), close_qty);
        let ack = self.submit_order(agent, &request).await?;
        Metrics::order_submitted("partial");

        let closed = if ack.executed_qty.is_positive() { ack.executed_qty } else { close_qty };
        let fill = if ack.avg_price.is_positive() {
            ack.avg_price
        } else {
            self.mark_price(agent, symbol).await?
        };
        let realized = realized_pnl(position.side, position.entry_price, fill, closed);

        self.cancel_protection(position).await;
        let breakeven = filters.normalize_price(position.entry_price);
        let updated = Position {
            qty: position.qty - closed,
            stop_loss: Some(breakeven),
            partial_taken: true,
            ..position.clone()
        };
        self.book.update(symbol, |p| {
            p.qty = updated.qty;
            p.stop_loss = updated.stop_loss;
            p.partial_taken = true;
        });
        self.journal.record(JournalRecord::Trade {
            agent_id: position.agent_id.clone(),
            symbol: symbol.clone(),
            side: position.side,
            action: TradeAction::PartialClose,
            qty: closed,
            price: fill,
        });
        info!(
            %symbol,
            closed = %closed,
            remaining = %updated.qty,
            realized_pnl = %realized,
            stop_loss = %breakeven,
            "Partial profit taken, stop moved to breakeven"
        );
        Ok((realized, updated))
    }
}

// ============================================================================
// ProtectionActions
// ============================================================================

fn action_error(e: ExecutorError) -> PositionError {
    PositionError::Action(e.to_string())
}

impl ProtectionActions for OrderManager {
    fn protection_status<'a>(
        &'a self,
        position: &'a Position,
    ) -> BoxFuture<'a, PositionResult<ProtectionStatus>> {
        Box::pin(async move { self.fetch_protection_status(position).await.map_err(action_error) })
    }

    fn reattach_protection<'a>(
        &'a self,
        position: &'a Position,
    ) -> BoxFuture<'a, PositionResult<RepairOutcome>> {
        Box::pin(async move { self.repair_protection(position).await.map_err(action_error) })
    }

    fn mark_price<'a>(&'a self, symbol: &'a Symbol) -> BoxFuture<'a, PositionResult<Price>> {
        Box::pin(async move {
            let owner = self.book.get(symbol).map(|p| p.agent_id);
            OrderManager::mark_price(self, owner.as_ref(), symbol)
                .await
                .map_err(action_error)
        })
    }

    fn force_close<'a>(
        &'a self,
        position: &'a Position,
        reason: ExitReason,
    ) -> BoxFuture<'a, PositionResult<ExitOutcome>> {
        Box::pin(async move { self.close(position, reason).await.map_err(action_error) })
    }

    fn take_partial_profit<'a>(
        &'a self,
        position: &'a Position,
    ) -> BoxFuture<'a, PositionResult<ExitOutcome>> {
        Box::pin(async move {
            self.partial_close(position, self.config.partial_close_fraction)
                .await
                .map_err(action_error)
        })
    }
}
