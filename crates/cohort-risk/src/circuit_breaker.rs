//! Per-symbol volatility circuit breaker.
//!
//! Three independent detectors run only while the symbol is not paused:
//! candle-range spikes against the trailing median, funding-rate jumps, and
//! order-book spread widening. The first evaluation that trips stores a pause
//! whose length scales with severity. Expired pauses are purged lazily on the
//! next query.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use cohort_core::{BookTop, Candle, Clock, FundingSnapshot, RejectReason, Rejection, Symbol};

use crate::error::{RiskError, RiskResult};

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Trailing bars used for the median range.
    #[serde(default = "default_spread_lookback")]
    pub spread_lookback: usize,
    /// Trip when the current range exceeds this multiple of the median.
    #[serde(default = "default_spike_multiplier")]
    pub spike_multiplier: f64,
    /// Ratio at or above which a spike is severe.
    #[serde(default = "default_severe_spike_ratio")]
    pub severe_spike_ratio: f64,
    /// Absolute funding-rate change (fraction, 0.001 = 0.10pp).
    #[serde(default = "default_funding_delta_threshold")]
    pub funding_delta_threshold: Decimal,
    #[serde(default = "default_funding_window_secs")]
    pub funding_window_secs: u64,
    /// Book spread as a fraction of bid (0.0025 = 0.25%).
    #[serde(default = "default_book_spread_threshold")]
    pub book_spread_threshold: Decimal,
    #[serde(default = "default_base_pause_secs")]
    pub base_pause_secs: u64,
    /// Cap on the pause for severity <= 1.0.
    #[serde(default = "default_minor_pause_cap_secs")]
    pub minor_pause_cap_secs: u64,
}

fn default_spread_lookback() -> usize {
    30
}

fn default_spike_multiplier() -> f64 {
    2.5
}

fn default_severe_spike_ratio() -> f64 {
    3.0
}

fn default_funding_delta_threshold() -> Decimal {
    dec!(0.001)
}

fn default_funding_window_secs() -> u64 {
    3_600
}

fn default_book_spread_threshold() -> Decimal {
    dec!(0.0025)
}

fn default_base_pause_secs() -> u64 {
    600
}

fn default_minor_pause_cap_secs() -> u64 {
    300
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            spread_lookback: default_spread_lookback(),
            spike_multiplier: default_spike_multiplier(),
            severe_spike_ratio: default_severe_spike_ratio(),
            funding_delta_threshold: default_funding_delta_threshold(),
            funding_window_secs: default_funding_window_secs(),
            book_spread_threshold: default_book_spread_threshold(),
            base_pause_secs: default_base_pause_secs(),
            minor_pause_cap_secs: default_minor_pause_cap_secs(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> RiskResult<()> {
        if self.spread_lookback < 3 {
            return Err(RiskError::InvalidConfig(
                "spread_lookback must be >= 3".to_string(),
            ));
        }
        if self.spike_multiplier <= 1.0 || self.severe_spike_ratio < self.spike_multiplier {
            return Err(RiskError::InvalidConfig(format!(
                "need 1 < spike_multiplier ({}) <= severe_spike_ratio ({})",
                self.spike_multiplier, self.severe_spike_ratio
            )));
        }
        if self.base_pause_secs == 0 {
            return Err(RiskError::InvalidConfig(
                "base_pause_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Pause length for a trigger of `severity`.
    #[must_use]
    pub fn pause_duration(&self, severity: f64) -> Duration {
        let secs = self.base_pause_secs as f64 * severity;
        let secs = if severity <= 1.0 {
            secs.min(self.minor_pause_cap_secs as f64)
        } else {
            secs
        };
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// What tripped the breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BreakerReason {
    SpreadSpike { ratio: f64 },
    FundingSpike { delta: Decimal },
    BookSpread { spread: Decimal },
}

impl BreakerReason {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::SpreadSpike { .. } => "spread_spike",
            Self::FundingSpike { .. } => "funding_spike",
            Self::BookSpread { .. } => "book_spread",
        }
    }
}

impl fmt::Display for BreakerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpreadSpike { ratio } => write!(f, "candle range {ratio:.2}x trailing median"),
            Self::FundingSpike { delta } => {
                write!(f, "funding moved {:.3}pp", delta * Decimal::ONE_HUNDRED)
            }
            Self::BookSpread { spread } => {
                write!(f, "book spread {:.3}%", spread * Decimal::ONE_HUNDRED)
            }
        }
    }
}

/// A detector firing.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub reason: BreakerReason,
    pub severity: f64,
}

/// Active pause for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerState {
    pub reason: BreakerReason,
    pub activated_at_ms: i64,
    pub pause_until_ms: i64,
    pub severity: f64,
}

impl BreakerState {
    #[must_use]
    pub fn to_rejection(&self) -> Rejection {
        Rejection::new(
            RejectReason::CircuitBreaker,
            format!("{} (severity {:.1}, paused until {})", self.reason, self.severity, self.pause_until_ms),
        )
    }
}

/// Market inputs for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct MarketObservation<'a> {
    /// Oldest first; the last bar is the current one.
    pub candles: &'a [Candle],
    /// Oldest first.
    pub funding: &'a [FundingSnapshot],
    pub book: Option<&'a BookTop>,
}

// ============================================================================
// Detectors
// ============================================================================

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

/// Current bar range versus the median of the trailing `spread_lookback` bars.
#[must_use]
pub fn detect_spread_spike(config: &CircuitBreakerConfig, candles: &[Candle]) -> Option<Trigger> {
    let (current, history) = candles.split_last()?;
    if history.len() < config.spread_lookback {
        return None;
    }
    let current = current.spread_ratio()?;
    let start = history.len() - config.spread_lookback;
    let mut trailing: Vec<f64> = history[start..]
        .iter()
        .filter_map(Candle::spread_ratio)
        .collect();
    let median = median(&mut trailing)?;
    if median <= 0.0 {
        return None;
    }
    let ratio = current / median;
    if ratio > config.spike_multiplier {
        let severity = if ratio >= config.severe_spike_ratio { 2.0 } else { 1.0 };
        Some(Trigger {
            reason: BreakerReason::SpreadSpike { ratio },
            severity,
        })
    } else {
        None
    }
}

/// Absolute funding change between the latest sample and the oldest sample
/// inside the funding window.
#[must_use]
pub fn detect_funding_spike(config: &CircuitBreakerConfig, funding: &[FundingSnapshot]) -> Option<Trigger> {
    let latest = funding.last()?;
    let window_start = latest.timestamp_ms - (config.funding_window_secs as i64) * 1000;
    let baseline = funding.iter().find(|f| f.timestamp_ms >= window_start)?;
    if baseline.timestamp_ms == latest.timestamp_ms {
        return None;
    }
    let delta = (latest.rate - baseline.rate).abs();
    if delta > config.funding_delta_threshold {
        Some(Trigger {
            reason: BreakerReason::FundingSpike { delta },
            severity: 2.0,
        })
    } else {
        None
    }
}

#[must_use]
pub fn detect_book_spread(config: &CircuitBreakerConfig, book: &BookTop) -> Option<Trigger> {
    let spread = book.spread_frac()?;
    if spread > config.book_spread_threshold {
        Some(Trigger {
            reason: BreakerReason::BookSpread { spread },
            severity: 1.0,
        })
    } else {
        None
    }
}

// ============================================================================
// CircuitBreaker
// ============================================================================

/// Per-symbol circuit breaker.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    states: Mutex<HashMap<Symbol, BreakerState>>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            states: Mutex::new(HashMap::new()),
            clock,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Active pause for `symbol`, purging it if expired.
    pub fn active(&self, symbol: &Symbol) -> Option<BreakerState> {
        let now = self.clock.now_ms();
        let mut states = self.states.lock();
        match states.get(symbol) {
            Some(state) if now >= state.pause_until_ms => {
                info!(%symbol, reason = %state.reason, "Circuit breaker pause expired");
                states.remove(symbol);
                None
            }
            Some(state) => Some(state.clone()),
            None => None,
        }
    }

    /// Gate check: `Err` while the symbol is paused.
    pub fn check(&self, symbol: &Symbol) -> Result<(), Rejection> {
        match self.active(symbol) {
            Some(state) => Err(state.to_rejection()),
            None => Ok(()),
        }
    }

    /// Run all detectors for `symbol` unless it is already paused.
    ///
    /// Returns the active pause, if any, after evaluation.
    pub fn evaluate(&self, symbol: &Symbol, obs: MarketObservation<'_>) -> Option<BreakerState> {
        if let Some(state) = self.active(symbol) {
            return Some(state);
        }

        let trigger = [
            detect_spread_spike(&self.config, obs.candles),
            detect_funding_spike(&self.config, obs.funding),
            obs.book.and_then(|b| detect_book_spread(&self.config, b)),
        ]
        .into_iter()
        .flatten()
        .max_by(|a, b| a.severity.total_cmp(&b.severity))?;

        Some(self.trip(symbol, trigger))
    }

    /// Record a pause for `symbol` from `trigger`.
    pub fn trip(&self, symbol: &Symbol, trigger: Trigger) -> BreakerState {
        let now = self.clock.now_ms();
        let pause = self.config.pause_duration(trigger.severity);
        let state = BreakerState {
            reason: trigger.reason,
            activated_at_ms: now,
            pause_until_ms: now + pause.as_millis() as i64,
            severity: trigger.severity,
        };
        warn!(
            %symbol,
            reason = %state.reason,
            severity = state.severity,
            pause_secs = pause.as_secs(),
            "Circuit breaker tripped"
        );
        self.states.lock().insert(symbol.clone(), state.clone());
        state
    }

    /// Number of symbols currently stored as paused (expired entries included
    /// until queried).
    #[must_use]
    pub fn paused_count(&self) -> usize {
        self.states.lock().len()
    }
}
