//! Position sizing.
//!
//! `risk_amount = equity * clamp(risk_fraction) * adjust`, clamped into the
//! per-trade margin band, levered, then fitted to the symbol's filters. A
//! result that cannot clear the venue minimum notional is zero, never a
//! micro order.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use cohort_core::{Price, Size, SymbolFilters};

use crate::error::{RiskError, RiskResult};

/// Sizing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingConfig {
    /// Hard cap on the per-trade risk fraction an agent may request.
    #[serde(default = "default_risk_cap")]
    pub risk_cap: Decimal,
    /// Floor applied to the requested risk fraction.
    #[serde(default = "default_min_risk_fraction")]
    pub min_risk_fraction: Decimal,
    #[serde(default = "default_min_margin")]
    pub min_margin_per_trade: Decimal,
    #[serde(default = "default_max_margin")]
    pub max_margin_per_trade: Decimal,
    #[serde(default = "default_max_leverage")]
    pub max_leverage: u32,
}

fn default_risk_cap() -> Decimal {
    dec!(0.05)
}

fn default_min_risk_fraction() -> Decimal {
    dec!(0.005)
}

fn default_min_margin() -> Decimal {
    dec!(10)
}

fn default_max_margin() -> Decimal {
    dec!(1000)
}

fn default_max_leverage() -> u32 {
    20
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            risk_cap: default_risk_cap(),
            min_risk_fraction: default_min_risk_fraction(),
            min_margin_per_trade: default_min_margin(),
            max_margin_per_trade: default_max_margin(),
            max_leverage: default_max_leverage(),
        }
    }
}

impl SizingConfig {
    pub fn validate(&self) -> RiskResult<()> {
        if self.risk_cap <= Decimal::ZERO || self.risk_cap > Decimal::ONE {
            return Err(RiskError::InvalidConfig(format!(
                "risk_cap must be in (0, 1], got {}",
                self.risk_cap
            )));
        }
        if self.min_risk_fraction < Decimal::ZERO || self.min_risk_fraction > self.risk_cap {
            return Err(RiskError::InvalidConfig(format!(
                "min_risk_fraction must be in [0, risk_cap], got {}",
                self.min_risk_fraction
            )));
        }
        if self.min_margin_per_trade > self.max_margin_per_trade {
            return Err(RiskError::InvalidConfig(format!(
                "min_margin_per_trade {} exceeds max_margin_per_trade {}",
                self.min_margin_per_trade, self.max_margin_per_trade
            )));
        }
        if self.max_leverage == 0 {
            return Err(RiskError::InvalidConfig("max_leverage must be >= 1".to_string()));
        }
        Ok(())
    }
}

/// Inputs for a single sizing call.
#[derive(Debug, Clone)]
pub struct SizingInput<'a> {
    pub equity: Decimal,
    pub price: Price,
    /// Informational; sizing is margin-based.
    pub atr: f64,
    pub risk_fraction: Decimal,
    pub leverage: u32,
    pub filters: &'a SymbolFilters,
    /// Regime/correlation multiplier, 1.0 when unadjusted.
    pub adjust: Decimal,
}

/// Position sizing engine.
#[derive(Debug, Clone, Default)]
pub struct RiskEngine {
    config: SizingConfig,
}

impl RiskEngine {
    #[must_use]
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Effective leverage after config and venue caps.
    #[must_use]
    pub fn effective_leverage(&self, requested: u32, filters: &SymbolFilters) -> u32 {
        let venue_cap = if filters.max_leverage == 0 {
            u32::MAX
        } else {
            filters.max_leverage
        };
        requested.min(self.config.max_leverage).min(venue_cap).max(1)
    }

    /// Quantity to trade, or `Size::ZERO` to reject.
    #[must_use]
    pub fn position_size(&self, input: &SizingInput<'_>) -> Size {
        if input.equity <= Decimal::ZERO || !input.price.is_positive() || input.adjust <= Decimal::ZERO {
            return Size::ZERO;
        }

        let fraction = input
            .risk_fraction
            .min(self.config.risk_cap)
            .max(self.config.min_risk_fraction);
        let risk_amount = input.equity * fraction * input.adjust;

        let margin = risk_amount
            .max(self.config.min_margin_per_trade)
            .min(self.config.max_margin_per_trade)
            .min(input.equity);

        let leverage = self.effective_leverage(input.leverage, input.filters);
        let raw_qty = Size::new(margin * Decimal::from(leverage) / input.price.inner());

        let filters = input.filters;
        let qty = filters.normalize_qty(raw_qty);

        if !filters.meets_min_notional(qty, input.price) {
            debug!(
                symbol = %filters.symbol,
                qty = %qty,
                price = %input.price,
                min_notional = %filters.min_notional,
                "Sized order below minimum notional, rejecting"
            );
            return Size::ZERO;
        }

        debug!(
            symbol = %filters.symbol,
            equity = %input.equity,
            fraction = %fraction,
            adjust = %input.adjust,
            margin = %margin,
            leverage,
            atr = input.atr,
            qty = %qty,
            "Position sized"
        );
        qty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::Symbol;

    fn filters(min_notional: Decimal) -> SymbolFilters {
        SymbolFilters {
            symbol: Symbol::new("BTCUSDT"),
            tick_size: Price::new(dec!(0.1)),
            step_size: Size::new(dec!(0.001)),
            min_qty: Size::new(dec!(0.001)),
            max_qty: Size::new(dec!(100)),
            min_notional,
            max_leverage: 50,
        }
    }

    fn input<'a>(f: &'a SymbolFilters, equity: Decimal, price: Decimal) -> SizingInput<'a> {
        SizingInput {
            equity,
            price: Price::new(price),
            atr: 120.0,
            risk_fraction: dec!(0.02),
            leverage: 10,
            filters: f,
            adjust: Decimal::ONE,
        }
    }

    #[test]
    fn test_basic_sizing() {
        let engine = RiskEngine::default();
        let f = filters(dec!(5));
        // 10000 * 0.02 = 200 margin, x10 = 2000 notional / 50000 = 0.04
        let qty = engine.position_size(&input(&f, dec!(10000), dec!(50000)));
        assert_eq!(qty, Size::new(dec!(0.04)));
    }

    #[test]
    fn test_risk_fraction_capped() {
        let engine = RiskEngine::default();
        let f = filters(dec!(5));
        let mut req = input(&f, dec!(10000), dec!(50000));
        req.risk_fraction = dec!(0.5);
        // capped to 0.05 -> 500 margin -> 5000 notional -> 0.1
        assert_eq!(engine.position_size(&req), Size::new(dec!(0.1)));
    }

    #[test]
    fn test_margin_clamped_to_band() {
        let engine = RiskEngine::default();
        let f = filters(dec!(5));
        // 100000 * 0.02 = 2000 -> clamped to 1000 margin -> 10000 notional
        let qty = engine.position_size(&input(&f, dec!(100000), dec!(50000)));
        assert_eq!(qty, Size::new(dec!(0.2)));
    }

    #[test]
    fn test_leverage_capped_by_config() {
        let engine = RiskEngine::default();
        let f = filters(dec!(5));
        let mut req = input(&f, dec!(10000), dec!(50000));
        req.leverage = 100;
        // config max 20x -> 4000 notional
        assert_eq!(engine.position_size(&req), Size::new(dec!(0.08)));
    }

    #[test]
    fn test_below_min_notional_returns_zero() {
        let engine = RiskEngine::default();
        let f = filters(dec!(5000));
        let qty = engine.position_size(&input(&f, dec!(10000), dec!(50000)));
        assert_eq!(qty, Size::ZERO);
    }

    #[test]
    fn test_zero_adjust_never_trades() {
        let engine = RiskEngine::default();
        let f = filters(dec!(5));
        let mut req = input(&f, dec!(10000), dec!(50000));
        req.adjust = Decimal::ZERO;
        assert_eq!(engine.position_size(&req), Size::ZERO);
    }

    #[test]
    fn test_positive_qty_always_clears_min_notional() {
        let engine = RiskEngine::default();
        for min_notional in [dec!(1), dec!(5), dec!(50), dec!(500), dec!(5000)] {
            let f = filters(min_notional);
            for equity in [dec!(1), dec!(50), dec!(1000), dec!(25000)] {
                for price in [dec!(0.5), dec!(20), dec!(3000), dec!(60000)] {
                    let req = input(&f, equity, price);
                    let qty = engine.position_size(&req);
                    assert!(qty >= Size::ZERO);
                    if qty.is_positive() {
                        assert!(qty.notional(req.price) >= min_notional);
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(SizingConfig::default().validate().is_ok());
        let bad = SizingConfig {
            min_margin_per_trade: dec!(2000),
            ..SizingConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
