//! Account-level exposure gates.
//!
//! - `ExposureGate`: caps concurrent open positions and dampens size when a
//!   new entry stacks on a correlated position in the same direction.
//! - `ReversalCooldown`: blocks flipping a symbol's direction too soon after
//!   the last entry while a position is still open.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use cohort_core::{Clock, Position, PositionSide, RejectReason, Rejection, Symbol};

use crate::error::{RiskError, RiskResult};

// ============================================================================
// ExposureGate
// ============================================================================

/// Exposure limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureConfig {
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
    /// Groups of symbols treated as one correlated exposure.
    #[serde(default)]
    pub correlation_groups: Vec<Vec<String>>,
    /// Size multiplier for a same-direction entry inside an occupied group.
    #[serde(default = "default_correlated_size_multiplier")]
    pub correlated_size_multiplier: Decimal,
}

fn default_max_open_positions() -> usize {
    5
}

fn default_correlated_size_multiplier() -> Decimal {
    dec!(0.5)
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            max_open_positions: default_max_open_positions(),
            correlation_groups: Vec::new(),
            correlated_size_multiplier: default_correlated_size_multiplier(),
        }
    }
}

impl ExposureConfig {
    pub fn validate(&self) -> RiskResult<()> {
        if self.max_open_positions == 0 {
            return Err(RiskError::InvalidConfig(
                "max_open_positions must be >= 1".to_string(),
            ));
        }
        if self.correlated_size_multiplier < Decimal::ZERO
            || self.correlated_size_multiplier > Decimal::ONE
        {
            return Err(RiskError::InvalidConfig(format!(
                "correlated_size_multiplier must be in [0, 1], got {}",
                self.correlated_size_multiplier
            )));
        }
        Ok(())
    }
}

/// Position stacking and correlation gate.
#[derive(Debug, Clone)]
pub struct ExposureGate {
    config: ExposureConfig,
    /// Symbol -> group index.
    groups: HashMap<Symbol, usize>,
}

impl ExposureGate {
    #[must_use]
    pub fn new(config: ExposureConfig) -> Self {
        let groups = config
            .correlation_groups
            .iter()
            .enumerate()
            .flat_map(|(i, group)| group.iter().map(move |s| (Symbol::new(s.as_str()), i)))
            .collect();
        Self { config, groups }
    }

    /// Reject a new entry once the account holds `max_open_positions`.
    pub fn check_stacking(&self, open_positions: usize) -> Result<(), Rejection> {
        if open_positions >= self.config.max_open_positions {
            return Err(Rejection::new(
                RejectReason::PositionStacking,
                format!(
                    "{open_positions} open positions, limit {}",
                    self.config.max_open_positions
                ),
            ));
        }
        Ok(())
    }

    /// Size multiplier for entering `symbol` in `side` given the open book.
    #[must_use]
    pub fn correlation_multiplier(
        &self,
        symbol: &Symbol,
        side: PositionSide,
        open: &[Position],
    ) -> Decimal {
        let Some(group) = self.groups.get(symbol) else {
            return Decimal::ONE;
        };
        let stacked = open.iter().find(|p| {
            &p.symbol != symbol && p.side == side && self.groups.get(&p.symbol) == Some(group)
        });
        match stacked {
            Some(p) => {
                debug!(
                    %symbol,
                    correlated_with = %p.symbol,
                    multiplier = %self.config.correlated_size_multiplier,
                    "Correlated same-direction exposure, dampening size"
                );
                self.config.correlated_size_multiplier
            }
            None => Decimal::ONE,
        }
    }
}

// ============================================================================
// ReversalCooldown
// ============================================================================

/// Blocks direction flips within a cooldown of the last entry.
pub struct ReversalCooldown {
    cooldown: Duration,
    last_entry: Mutex<HashMap<Symbol, (PositionSide, i64)>>,
    clock: Arc<dyn Clock>,
}

impl ReversalCooldown {
    #[must_use]
    pub fn new(cooldown: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            cooldown,
            last_entry: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Report an entry on `symbol`.
    pub fn record_entry(&self, symbol: &Symbol, side: PositionSide) {
        let now = self.clock.now_ms();
        self.last_entry.lock().insert(symbol.clone(), (side, now));
    }

    /// Check a requested entry. Only enforced while a position is open.
    pub fn check(
        &self,
        symbol: &Symbol,
        requested: PositionSide,
        position_open: bool,
    ) -> Result<(), Rejection> {
        if !position_open {
            return Ok(());
        }
        let now = self.clock.now_ms();
        let last = self.last_entry.lock().get(symbol).copied();
        if let Some((side, at_ms)) = last {
            let elapsed = Duration::from_millis(now.saturating_sub(at_ms).max(0) as u64);
            if side != requested && elapsed < self.cooldown {
                return Err(Rejection::new(
                    RejectReason::ReversalCooldown,
                    format!(
                        "{symbol} entered {side} {}s ago, reversal to {requested} needs {}s",
                        elapsed.as_secs(),
                        self.cooldown.as_secs()
                    ),
                ));
            }
        }
        Ok(())
    }
}
