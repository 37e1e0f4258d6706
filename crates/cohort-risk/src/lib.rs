//! Risk coordination for the cohort execution layer.
//!
//! Components:
//! - `RiskEngine`: margin-capped position sizing
//! - `DailyLossTracker`: per-agent kill-switch latch (daily loss, loss streak, API lag)
//! - `CircuitBreaker`: per-symbol volatility/funding/spread pause
//! - `RegimeEngine`: dual-ATR volatility regime and its size/SL/TP adjustments
//! - `ExposureGate`, `ReversalCooldown`: position stacking, correlation and flip limits

pub mod circuit_breaker;
pub mod error;
pub mod exposure;
pub mod kill_switch;
pub mod regime;
pub mod sizing;

pub use circuit_breaker::{
    BreakerReason, BreakerState, CircuitBreaker, CircuitBreakerConfig, MarketObservation, Trigger,
};
pub use error::{RiskError, RiskResult};
pub use exposure::{ExposureConfig, ExposureGate, ReversalCooldown};
pub use kill_switch::{DailyLossTracker, KillSwitchConfig, KillSwitchReason, RiskState};
pub use regime::{Regime, RegimeAdjustment, RegimeConfig, RegimeEngine, RegimeSnapshot};
pub use sizing::{RiskEngine, SizingConfig, SizingInput};
