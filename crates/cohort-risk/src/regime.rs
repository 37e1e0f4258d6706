//! Dual-ATR volatility regime.
//!
//! `volatility_ratio = ATR(fast) / ATR(slow)` over the trailing candle window.
//! Each regime maps to a fixed adjustment of size, stop distance and target
//! distance, plus whether new entries are skipped.

use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use cohort_core::Candle;

use crate::error::{RiskError, RiskResult};

/// Volatility regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    Low,
    Normal,
    High,
    Extreme,
}

impl Regime {
    /// Classify a fast/slow ATR ratio.
    #[must_use]
    pub fn classify(volatility_ratio: f64) -> Self {
        if volatility_ratio >= 1.8 {
            Self::Extreme
        } else if volatility_ratio >= 1.2 {
            Self::High
        } else if volatility_ratio >= 0.5 {
            Self::Normal
        } else {
            Self::Low
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Normal => write!(f, "NORMAL"),
            Self::High => write!(f, "HIGH"),
            Self::Extreme => write!(f, "EXTREME"),
        }
    }
}

/// Adjustment applied to an entry in a given regime.
///
/// `sl_factor`/`tp_factor` multiply the stop and target distances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegimeAdjustment {
    pub size_multiplier: Decimal,
    pub sl_factor: Decimal,
    pub tp_factor: Decimal,
    pub skip_entry: bool,
}

impl RegimeAdjustment {
    pub const NEUTRAL: Self = Self {
        size_multiplier: Decimal::ONE,
        sl_factor: Decimal::ONE,
        tp_factor: Decimal::ONE,
        skip_entry: false,
    };

    /// Fixed table. `atr_pct` only matters in the low regime, where a dead
    /// market (below `dead_atr_pct`) is skipped and stops tighten.
    #[must_use]
    pub fn for_regime(regime: Regime, atr_pct: f64, dead_atr_pct: f64) -> Self {
        match regime {
            Regime::Extreme => Self {
                size_multiplier: Decimal::ZERO,
                sl_factor: dec!(1.5),
                tp_factor: dec!(1.2),
                skip_entry: true,
            },
            Regime::High => Self {
                size_multiplier: dec!(0.75),
                sl_factor: dec!(1.3),
                tp_factor: dec!(1.15),
                skip_entry: false,
            },
            Regime::Normal => Self::NEUTRAL,
            Regime::Low if atr_pct < dead_atr_pct => Self {
                size_multiplier: Decimal::ONE,
                sl_factor: dec!(0.9),
                tp_factor: dec!(0.9),
                skip_entry: true,
            },
            Regime::Low => Self::NEUTRAL,
        }
    }
}

/// Regime computed from one candle window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    pub atr_fast: f64,
    pub atr_slow: f64,
    pub volatility_ratio: f64,
    /// Fast ATR as a fraction of the last close.
    pub atr_pct: f64,
    pub regime: Regime,
    pub adjustment: RegimeAdjustment,
}

/// Regime engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeConfig {
    #[serde(default = "default_fast_period")]
    pub fast_period: usize,
    #[serde(default = "default_slow_period")]
    pub slow_period: usize,
    /// Low-regime ATR% below which entries are skipped (0.002 = 0.2%).
    #[serde(default = "default_dead_atr_pct")]
    pub dead_atr_pct: f64,
}

fn default_fast_period() -> usize {
    7
}

fn default_slow_period() -> usize {
    21
}

fn default_dead_atr_pct() -> f64 {
    0.002
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            fast_period: default_fast_period(),
            slow_period: default_slow_period(),
            dead_atr_pct: default_dead_atr_pct(),
        }
    }
}

impl RegimeConfig {
    pub fn validate(&self) -> RiskResult<()> {
        if self.fast_period == 0 || self.fast_period >= self.slow_period {
            return Err(RiskError::InvalidConfig(format!(
                "need 0 < fast_period ({}) < slow_period ({})",
                self.fast_period, self.slow_period
            )));
        }
        Ok(())
    }
}

/// Stateless regime classifier; every query recomputes from candles.
#[derive(Debug, Clone, Default)]
pub struct RegimeEngine {
    config: RegimeConfig,
}

impl RegimeEngine {
    #[must_use]
    pub fn new(config: RegimeConfig) -> Self {
        Self { config }
    }

    /// Candles needed for a snapshot (one extra for the first true range).
    #[must_use]
    pub fn required_candles(&self) -> usize {
        self.config.slow_period + 1
    }

    /// Simple average of the last `period` true ranges.
    fn atr(true_ranges: &[f64], period: usize) -> Option<f64> {
        if period == 0 || true_ranges.len() < period {
            return None;
        }
        let window = &true_ranges[true_ranges.len() - period..];
        Some(window.iter().sum::<f64>() / period as f64)
    }

    /// Compute the regime from `candles` (oldest first).
    ///
    /// Returns `None` when there is not enough history or ATR is zero.
    #[must_use]
    pub fn snapshot(&self, candles: &[Candle]) -> Option<RegimeSnapshot> {
        if candles.len() < self.required_candles() {
            return None;
        }
        let true_ranges: Vec<f64> = candles
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, c)| c.true_range(Some(candles[i - 1].close)))
            .collect();

        let atr_fast = Self::atr(&true_ranges, self.config.fast_period)?;
        let atr_slow = Self::atr(&true_ranges, self.config.slow_period)?;
        if atr_slow <= 0.0 {
            return None;
        }
        let volatility_ratio = atr_fast / atr_slow;
        let last_close = candles.last()?.close.to_f64();
        let atr_pct = if last_close > 0.0 { atr_fast / last_close } else { 0.0 };

        let regime = Regime::classify(volatility_ratio);
        Some(RegimeSnapshot {
            atr_fast,
            atr_slow,
            volatility_ratio,
            atr_pct,
            regime,
            adjustment: RegimeAdjustment::for_regime(regime, atr_pct, self.config.dead_atr_pct),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::{Price, Size};

    fn flat_bar(close: Decimal, range: Decimal) -> Candle {
        let half = range / Decimal::TWO;
        Candle {
            open_time_ms: 0,
            open: Price::new(close),
            high: Price::new(close + half),
            low: Price::new(close - half),
            close: Price::new(close),
            volume: Size::ZERO,
        }
    }

    /// 15 quiet bars then 7 bars with a different range.
    fn window(quiet: Decimal, loud: Decimal) -> Vec<Candle> {
        let mut candles: Vec<Candle> = (0..15).map(|_| flat_bar(dec!(100), quiet)).collect();
        candles.extend((0..7).map(|_| flat_bar(dec!(100), loud)));
        candles
    }

    #[test]
    fn test_classification_thresholds() {
        assert_eq!(Regime::classify(2.0), Regime::Extreme);
        assert_eq!(Regime::classify(1.3), Regime::High);
        assert_eq!(Regime::classify(0.8), Regime::Normal);
        assert_eq!(Regime::classify(0.3), Regime::Low);
        assert_eq!(Regime::classify(1.8), Regime::Extreme);
        assert_eq!(Regime::classify(0.5), Regime::Normal);
    }

    #[test]
    fn test_adjustment_table() {
        let extreme = RegimeAdjustment::for_regime(Regime::Extreme, 0.01, 0.002);
        assert!(extreme.skip_entry);
        assert_eq!(extreme.size_multiplier, Decimal::ZERO);

        let high = RegimeAdjustment::for_regime(Regime::High, 0.01, 0.002);
        assert_eq!(high.size_multiplier, dec!(0.75));
        assert_eq!(high.sl_factor, dec!(1.3));
        assert_eq!(high.tp_factor, dec!(1.15));

        assert_eq!(
            RegimeAdjustment::for_regime(Regime::Low, 0.01, 0.002),
            RegimeAdjustment::NEUTRAL
        );
        let dead = RegimeAdjustment::for_regime(Regime::Low, 0.001, 0.002);
        assert!(dead.skip_entry);
        assert_eq!(dead.sl_factor, dec!(0.9));
    }

    #[test]
    fn test_snapshot_requires_history() {
        let engine = RegimeEngine::default();
        let candles = window(dec!(1), dec!(1));
        assert!(engine.snapshot(&candles[..21]).is_none());
        assert!(engine.snapshot(&candles).is_some());
    }

    #[test]
    fn test_uniform_volatility_is_normal() {
        let snap = RegimeEngine::default()
            .snapshot(&window(dec!(1), dec!(1)))
            .unwrap();
        assert!((snap.volatility_ratio - 1.0).abs() < 1e-9);
        assert_eq!(snap.regime, Regime::Normal);
    }

    #[test]
    fn test_volatility_burst_is_extreme() {
        // Fast ATR = 4, slow ATR = (7*4 + 14*1) / 21 = 2.0
        let snap = RegimeEngine::default()
            .snapshot(&window(dec!(1), dec!(4)))
            .unwrap();
        assert!((snap.atr_fast - 4.0).abs() < 1e-9);
        assert!((snap.volatility_ratio - 2.0).abs() < 1e-9);
        assert_eq!(snap.regime, Regime::Extreme);
        assert!(snap.adjustment.skip_entry);
    }

    #[test]
    fn test_dead_market_skips_in_low_regime() {
        // Quiet tail: fast ATR 0.1 on price 100 = 0.1%.
        let snap = RegimeEngine::default()
            .snapshot(&window(dec!(1), dec!(0.1)))
            .unwrap();
        assert_eq!(snap.regime, Regime::Low);
        assert!(snap.adjustment.skip_entry);
    }
}
