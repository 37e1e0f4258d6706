//! TP/SL trigger derivation.
//!
//! Long: TP above entry, SL below. Short: inverted. Every trigger is then
//! pushed at least `safety_margin_ticks` away from the current mark on the
//! side where it would otherwise fire on arrival.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use cohort_core::{PositionSide, Price};

/// TP/SL trigger prices. A `None` leg is not placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProtectionPrices {
    pub take_profit: Option<Price>,
    pub stop_loss: Option<Price>,
}

impl ProtectionPrices {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.take_profit.is_none() && self.stop_loss.is_none()
    }
}

/// Derive triggers from the entry price. `tp_pct`/`sl_pct` are fractions of
/// entry (0.02 = 2%); zero or negative omits that leg.
#[must_use]
pub fn derive_protection(
    side: PositionSide,
    entry: Price,
    tp_pct: Decimal,
    sl_pct: Decimal,
    tick: Price,
) -> ProtectionPrices {
    let at = |frac: Decimal| Price::new(entry.inner() * (Decimal::ONE + frac)).round_to_tick(tick);
    let (tp, sl) = match side {
        PositionSide::Long => (at(tp_pct), at(-sl_pct)),
        PositionSide::Short => (at(-tp_pct), at(sl_pct)),
    };
    ProtectionPrices {
        take_profit: (tp_pct > Decimal::ZERO && tp.is_positive()).then_some(tp),
        stop_loss: (sl_pct > Decimal::ZERO && sl.is_positive()).then_some(sl),
    }
}

/// Keep every trigger at least `margin_ticks` ticks beyond `mark`.
#[must_use]
pub fn enforce_safety_margin(
    prices: ProtectionPrices,
    side: PositionSide,
    mark: Price,
    tick: Price,
    margin_ticks: u32,
) -> ProtectionPrices {
    let gap = tick.inner() * Decimal::from(margin_ticks);
    let above = Price::new(mark.inner() + gap).ceil_to_tick(tick);
    let below = Price::new(mark.inner() - gap).floor_to_tick(tick);

    let (take_profit, stop_loss) = match side {
        PositionSide::Long => (
            prices.take_profit.map(|tp| tp.max(above)),
            prices.stop_loss.map(|sl| sl.min(below)),
        ),
        PositionSide::Short => (
            prices.take_profit.map(|tp| tp.min(below)),
            prices.stop_loss.map(|sl| sl.max(above)),
        ),
    };

    let adjusted = ProtectionPrices {
        take_profit: take_profit.filter(Price::is_positive),
        stop_loss: stop_loss.filter(Price::is_positive),
    };
    if adjusted != prices {
        debug!(
            %side,
            %mark,
            margin_ticks,
            from = ?prices,
            to = ?adjusted,
            "Protection triggers moved away from mark"
        );
    }
    adjusted
}
