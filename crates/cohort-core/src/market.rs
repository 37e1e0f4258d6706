//! Venue symbols and their exchange-imposed precision filters.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Price, Size};

/// Venue symbol, e.g. `BTCUSDT`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Per-symbol precision and sizing constraints published by the venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolFilters {
    pub symbol: Symbol,
    /// Minimum price increment.
    pub tick_size: Price,
    /// Minimum quantity increment.
    pub step_size: Size,
    pub min_qty: Size,
    pub max_qty: Size,
    /// Minimum order notional in quote currency.
    pub min_notional: Decimal,
    /// Maximum leverage the venue allows on this symbol.
    pub max_leverage: u32,
}

impl SymbolFilters {
    /// Round a price to the nearest valid tick.
    #[must_use]
    pub fn normalize_price(&self, price: Price) -> Price {
        price.round_to_tick(self.tick_size)
    }

    /// Floor a quantity to the step size and clamp it into `[min_qty, max_qty]`.
    ///
    /// A quantity below `min_qty` is raised to `min_qty`; callers that must not
    /// grow an order check `meets_min_notional` afterwards.
    #[must_use]
    pub fn normalize_qty(&self, qty: Size) -> Size {
        let stepped = qty.floor_to_step(self.step_size);
        let clamped = if stepped < self.min_qty {
            self.min_qty
        } else {
            stepped
        };
        if self.max_qty.is_positive() && clamped > self.max_qty {
            self.max_qty.floor_to_step(self.step_size)
        } else {
            clamped
        }
    }

    /// Whether `qty` at `price` clears the venue minimum notional.
    #[must_use]
    pub fn meets_min_notional(&self, qty: Size, price: Price) -> bool {
        qty.notional(price) >= self.min_notional
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn filters() -> SymbolFilters {
        SymbolFilters {
            symbol: Symbol::new("btcusdt"),
            tick_size: Price::new(dec!(0.1)),
            step_size: Size::new(dec!(0.001)),
            min_qty: Size::new(dec!(0.001)),
            max_qty: Size::new(dec!(100)),
            min_notional: dec!(5),
            max_leverage: 125,
        }
    }

    #[test]
    fn test_symbol_uppercased() {
        assert_eq!(Symbol::new("ethusdt").as_str(), "ETHUSDT");
    }

    #[test]
    fn test_normalize_qty_clamps() {
        let f = filters();
        assert_eq!(f.normalize_qty(Size::new(dec!(0.0004))), Size::new(dec!(0.001)));
        assert_eq!(f.normalize_qty(Size::new(dec!(0.01234))), Size::new(dec!(0.012)));
        assert_eq!(f.normalize_qty(Size::new(dec!(250))), Size::new(dec!(100)));
    }

    #[test]
    fn test_min_notional() {
        let f = filters();
        assert!(!f.meets_min_notional(Size::new(dec!(0.001)), Price::new(dec!(4000))));
        assert!(f.meets_min_notional(Size::new(dec!(0.002)), Price::new(dec!(4000))));
    }
}
