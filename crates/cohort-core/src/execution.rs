//! Soft-reject reason codes.
//!
//! Gates never raise errors for "not this cycle". They return a `Rejection`
//! carrying a stable machine-checkable code plus a human-readable message,
//! and the caller decides what to log and count.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-checkable reason an action was not taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    /// Agent is halted by its daily kill-switch.
    KillSwitch,
    /// Symbol is paused by the circuit breaker.
    CircuitBreaker,
    /// Market data for the symbol could not be refreshed.
    MarketDataUnavailable,
    /// Arbitration produced no winner.
    ArbitrationConflict,
    /// Agent confidence below the configured floor.
    LowConfidence,
    /// Regime table says skip new entries.
    RegimeSkip,
    /// Maximum number of concurrent positions reached.
    PositionStacking,
    /// Already holding a position in the same direction.
    PositionExists,
    /// Opposite-direction entry too soon after the last entry.
    ReversalCooldown,
    /// Sizing produced zero or a sub-minimum notional.
    BelowMinNotional,
    /// Symbol lock held or cooling down.
    SymbolLocked,
    /// Another exit for this symbol is in flight or debounced.
    ExitInFlight,
    /// Equivalent TP/SL pair already submitted.
    DuplicateProtection,
    /// Venue rejected with a structural error mapped to skip.
    VenueSkip,
    /// Venue call failed after retries or with a fatal structural error.
    VenueFailure,
}

impl RejectReason {
    /// Stable string code used in logs, metrics labels and journal records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KillSwitch => "KILL_SWITCH",
            Self::CircuitBreaker => "CIRCUIT_BREAKER",
            Self::MarketDataUnavailable => "MARKET_DATA_UNAVAILABLE",
            Self::ArbitrationConflict => "ARBITRATION_CONFLICT",
            Self::LowConfidence => "LOW_CONFIDENCE",
            Self::RegimeSkip => "REGIME_SKIP",
            Self::PositionStacking => "POSITION_STACKING",
            Self::PositionExists => "POSITION_EXISTS",
            Self::ReversalCooldown => "REVERSAL_COOLDOWN",
            Self::BelowMinNotional => "BELOW_MIN_NOTIONAL",
            Self::SymbolLocked => "SYMBOL_LOCKED",
            Self::ExitInFlight => "EXIT_IN_FLIGHT",
            Self::DuplicateProtection => "DUPLICATE_PROTECTION",
            Self::VenueSkip => "VENUE_SKIP",
            Self::VenueFailure => "VENUE_FAILURE",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A soft rejection: reason code plus detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub reason: RejectReason,
    pub message: String,
}

impl Rejection {
    pub fn new(reason: RejectReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.reason, self.message)
    }
}
