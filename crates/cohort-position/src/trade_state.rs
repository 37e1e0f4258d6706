//! Per-symbol trade lifecycle.
//!
//! `NONE -> OPEN -> CLOSING -> CLOSED`, then `reset` back to `NONE`.
//!
//! The state machine is the single serialization point for exits: every exit
//! path (orchestrator reversal, live monitor breach, sentinel repair) calls
//! `try_begin_exit`, and only the first caller within the debounce window
//! wins. It also owns the per-symbol registry of submitted TP/SL pairs so
//! repair passes do not resubmit an equivalent pair.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cohort_core::{Clock, PositionSide, Price, Symbol, TradeState};

use crate::error::{PositionError, PositionResult};

/// Dedup key of a TP/SL pair.
pub type ProtectionHash = u64;

/// Hash of `(symbol, side, round(tp, 2), round(sl, 2))`.
///
/// A missing leg hashes as `-`.
#[must_use]
pub fn protection_hash(
    symbol: &Symbol,
    side: PositionSide,
    take_profit: Option<Price>,
    stop_loss: Option<Price>,
) -> ProtectionHash {
    let leg = |p: Option<Price>| p.map_or_else(|| "-".to_string(), |p| format!("{:.2}", p.inner().round_dp(2)));
    let key = format!("{}|{}|{}|{}", symbol, side, leg(take_profit), leg(stop_loss));
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

// ============================================================================
// TradeStateConfig
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeStateConfig {
    /// Minimum time between exit attempts on one symbol. Default: 5s.
    #[serde(default = "default_exit_debounce_secs")]
    pub exit_debounce_secs: u64,
    /// Window in which a registered TP/SL pair counts as in flight. Default: 30s.
    #[serde(default = "default_protection_dedup_secs")]
    pub protection_dedup_secs: u64,
}

fn default_exit_debounce_secs() -> u64 {
    5
}

fn default_protection_dedup_secs() -> u64 {
    30
}

impl Default for TradeStateConfig {
    fn default() -> Self {
        Self {
            exit_debounce_secs: default_exit_debounce_secs(),
            protection_dedup_secs: default_protection_dedup_secs(),
        }
    }
}

impl TradeStateConfig {
    pub fn validate(&self) -> PositionResult<()> {
        if self.protection_dedup_secs == 0 {
            return Err(PositionError::InvalidConfig(
                "protection_dedup_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// TradeStateMachine
// ============================================================================

#[derive(Debug, Default)]
struct SymbolTrade {
    state: TradeState,
    last_exit_attempt_ms: Option<i64>,
    /// Registered pair -> registration time.
    protection: HashMap<ProtectionHash, i64>,
}

/// Lifecycle state and TP/SL registry for every symbol.
pub struct TradeStateMachine {
    trades: Mutex<HashMap<Symbol, SymbolTrade>>,
    config: TradeStateConfig,
    clock: Arc<dyn Clock>,
}

impl TradeStateMachine {
    #[must_use]
    pub fn new(config: TradeStateConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            trades: Mutex::new(HashMap::new()),
            config,
            clock,
        }
    }

    fn debounce_ms(&self) -> i64 {
        (self.config.exit_debounce_secs as i64) * 1000
    }

    #[must_use]
    pub fn state(&self, symbol: &Symbol) -> TradeState {
        self.trades
            .lock()
            .get(symbol)
            .map_or(TradeState::None, |t| t.state)
    }

    fn exit_allowed(trade: &SymbolTrade, now: i64, debounce_ms: i64) -> bool {
        if matches!(trade.state, TradeState::Closing | TradeState::Closed) {
            return false;
        }
        trade
            .last_exit_attempt_ms
            .map_or(true, |at| now - at >= debounce_ms)
    }

    /// Whether an exit may start now.
    #[must_use]
    pub fn is_exit_allowed(&self, symbol: &Symbol) -> bool {
        let now = self.clock.now_ms();
        self.trades
            .lock()
            .get(symbol)
            .map_or(true, |t| Self::exit_allowed(t, now, self.debounce_ms()))
    }

    /// Transition to `CLOSING` and stamp the attempt.
    pub fn record_exit_attempt(&self, symbol: &Symbol) {
        let now = self.clock.now_ms();
        let mut trades = self.trades.lock();
        let trade = trades.entry(symbol.clone()).or_default();
        trade.state = TradeState::Closing;
        trade.last_exit_attempt_ms = Some(now);
        debug!(%symbol, "Exit attempt recorded");
    }

    /// Atomic `is_exit_allowed` + `record_exit_attempt`.
    ///
    /// Returns `false` when another exit path got there first.
    pub fn try_begin_exit(&self, symbol: &Symbol) -> bool {
        let now = self.clock.now_ms();
        let debounce_ms = self.debounce_ms();
        let mut trades = self.trades.lock();
        let trade = trades.entry(symbol.clone()).or_default();
        if !Self::exit_allowed(trade, now, debounce_ms) {
            debug!(%symbol, state = %trade.state, "Exit not allowed");
            return false;
        }
        trade.state = TradeState::Closing;
        trade.last_exit_attempt_ms = Some(now);
        true
    }

    /// Transition to `CLOSED`.
    pub fn record_exit_complete(&self, symbol: &Symbol) {
        let mut trades = self.trades.lock();
        let trade = trades.entry(symbol.clone()).or_default();
        trade.state = TradeState::Closed;
        info!(%symbol, "Exit complete");
    }

    /// An exit attempt failed: back to `OPEN`, keeping the attempt stamp so
    /// the debounce still applies to the next attempt.
    pub fn record_exit_failed(&self, symbol: &Symbol) {
        let mut trades = self.trades.lock();
        if let Some(trade) = trades.get_mut(symbol) {
            if trade.state == TradeState::Closing {
                trade.state = TradeState::Open;
                warn!(%symbol, "Exit failed, state back to OPEN");
            }
        }
    }

    /// A partial exit filled: back to `OPEN` with the debounce cleared so a
    /// full exit of the remainder is not held back.
    pub fn record_exit_partial(&self, symbol: &Symbol) {
        let mut trades = self.trades.lock();
        if let Some(trade) = trades.get_mut(symbol) {
            if trade.state == TradeState::Closing {
                trade.state = TradeState::Open;
                trade.last_exit_attempt_ms = None;
            }
        }
    }

    /// Start a fresh lifecycle in `OPEN`.
    pub fn mark_open(&self, symbol: &Symbol) {
        let mut trades = self.trades.lock();
        trades.insert(
            symbol.clone(),
            SymbolTrade {
                state: TradeState::Open,
                ..SymbolTrade::default()
            },
        );
    }

    /// Clear state and the TP/SL registry.
    pub fn reset(&self, symbol: &Symbol) {
        self.trades.lock().remove(symbol);
    }

    /// Whether `hash` was registered for `symbol` inside the dedup window.
    #[must_use]
    pub fn is_duplicate(&self, symbol: &Symbol, hash: ProtectionHash) -> bool {
        let now = self.clock.now_ms();
        let window_ms = (self.config.protection_dedup_secs as i64) * 1000;
        self.trades
            .lock()
            .get(symbol)
            .and_then(|t| t.protection.get(&hash))
            .is_some_and(|&at| now - at < window_ms)
    }

    /// Record a submitted TP/SL pair.
    pub fn register(&self, symbol: &Symbol, hash: ProtectionHash) {
        let now = self.clock.now_ms();
        self.trades
            .lock()
            .entry(symbol.clone())
            .or_default()
            .protection
            .insert(hash, now);
    }

    /// Atomic `is_duplicate` + `register`. Returns `false` for a duplicate.
    pub fn register_if_new(&self, symbol: &Symbol, hash: ProtectionHash) -> bool {
        let now = self.clock.now_ms();
        let window_ms = (self.config.protection_dedup_secs as i64) * 1000;
        let mut trades = self.trades.lock();
        let registry = &mut trades.entry(symbol.clone()).or_default().protection;
        if registry.get(&hash).is_some_and(|&at| now - at < window_ms) {
            return false;
        }
        registry.insert(hash, now);
        true
    }

    /// Drop a registered pair that never reached the venue, so the next
    /// repair pass may submit it again.
    pub fn unregister(&self, symbol: &Symbol, hash: ProtectionHash) {
        if let Some(trade) = self.trades.lock().get_mut(symbol) {
            trade.protection.remove(&hash);
        }
    }
}
