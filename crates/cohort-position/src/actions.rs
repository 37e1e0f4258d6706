//! Seam between the protection monitors and the order manager.
//!
//! Monitors never touch the venue. Every status query, repair and exit goes
//! through `ProtectionActions`, which the order manager implements.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cohort_core::{BoxFuture, Position, Price, Rejection, Symbol};

use crate::error::PositionResult;

/// Which protection legs are resting at the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProtectionStatus {
    pub has_take_profit: bool,
    pub has_stop_loss: bool,
}

impl ProtectionStatus {
    /// Whether every leg the position expects is resting.
    #[must_use]
    pub fn is_complete_for(&self, position: &Position) -> bool {
        (position.take_profit.is_none() || self.has_take_profit)
            && (position.stop_loss.is_none() || self.has_stop_loss)
    }
}

/// Why an exit was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    Reversal,
    Manual,
}

impl ExitReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TakeProfit => "take_profit",
            Self::StopLoss => "stop_loss",
            Self::Reversal => "reversal",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an exit request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exit filled; PnL realized on the closed quantity.
    Closed { realized_pnl: Decimal },
    /// Exit not attempted (another exit in flight, debounced, nothing to close).
    Skipped(Rejection),
}

/// Result of a protection repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// Missing legs resubmitted.
    Reattached { legs: usize },
    /// Venue already shows every expected leg.
    AlreadyProtected,
    /// Repair not attempted (duplicate pair in flight, exit in progress).
    Skipped(Rejection),
}

/// Operations the monitors need from the execution side.
pub trait ProtectionActions: Send + Sync {
    /// Query resting protection orders for `position`.
    fn protection_status<'a>(
        &'a self,
        position: &'a Position,
    ) -> BoxFuture<'a, PositionResult<ProtectionStatus>>;

    /// Resubmit missing TP/SL legs for `position`.
    fn reattach_protection<'a>(
        &'a self,
        position: &'a Position,
    ) -> BoxFuture<'a, PositionResult<RepairOutcome>>;

    fn mark_price<'a>(&'a self, symbol: &'a Symbol) -> BoxFuture<'a, PositionResult<Price>>;

    /// Close the whole position through the trade state machine.
    fn force_close<'a>(
        &'a self,
        position: &'a Position,
        reason: ExitReason,
    ) -> BoxFuture<'a, PositionResult<ExitOutcome>>;

    /// Take the configured partial profit and move the stop to breakeven.
    fn take_partial_profit<'a>(
        &'a self,
        position: &'a Position,
    ) -> BoxFuture<'a, PositionResult<ExitOutcome>>;
}
