//! Market data snapshots and the open-position record.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{AgentId, PositionSide, Price, Size, Symbol};

/// OHLC bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time_ms: i64,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Size,
}

impl Candle {
    /// Bar range relative to the close, `(high - low) / close`.
    ///
    /// Returns `None` when the close is zero.
    pub fn spread_ratio(&self) -> Option<f64> {
        let close = self.close.to_f64();
        if close <= 0.0 {
            return None;
        }
        Some((self.high.to_f64() - self.low.to_f64()) / close)
    }

    /// True range against the previous close.
    pub fn true_range(&self, prev_close: Option<Price>) -> f64 {
        let high = self.high.to_f64();
        let low = self.low.to_f64();
        match prev_close {
            Some(pc) => {
                let pc = pc.to_f64();
                (high - low).max((high - pc).abs()).max((low - pc).abs())
            }
            None => high - low,
        }
    }
}

/// Top of the order book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookTop {
    pub best_bid: Price,
    pub best_ask: Price,
    pub bid_qty: Size,
    pub ask_qty: Size,
}

impl BookTop {
    /// Mid price: (bid + ask) / 2.
    pub fn mid(&self) -> Price {
        Price::new((self.best_bid.inner() + self.best_ask.inner()) / Decimal::TWO)
    }

    /// Spread as a fraction of the best bid, `(ask - bid) / bid`.
    ///
    /// Returns `None` for an empty or crossed book.
    pub fn spread_frac(&self) -> Option<Decimal> {
        if !self.best_bid.is_positive() || self.best_ask < self.best_bid {
            return None;
        }
        self.best_ask.frac_from(self.best_bid)
    }
}

/// Funding rate observation (rate as a fraction, 0.0001 = 0.01%).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingSnapshot {
    pub rate: Decimal,
    pub timestamp_ms: i64,
}

/// Per-symbol trade lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeState {
    #[default]
    None,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for TradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::Open => write!(f, "OPEN"),
            Self::Closing => write!(f, "CLOSING"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// An open position owned by one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub side: PositionSide,
    /// Always positive.
    pub qty: Size,
    pub entry_price: Price,
    pub leverage: u32,
    pub take_profit: Option<Price>,
    pub stop_loss: Option<Price>,
    pub opened_at_ms: i64,
    pub agent_id: AgentId,
    pub state: TradeState,
    /// Set once the partial take-profit has been executed.
    #[serde(default)]
    pub partial_taken: bool,
}

impl Position {
    #[must_use]
    pub fn notional(&self, mark: Price) -> Decimal {
        self.qty.notional(mark)
    }

    /// Unrealized PnL in quote currency at `mark`.
    #[must_use]
    pub fn unrealized_pnl(&self, mark: Price) -> Decimal {
        let diff = mark.inner() - self.entry_price.inner();
        diff * self.qty.inner() * Decimal::from(self.side.sign())
    }

    /// Unrealized price move in the position's favour, as a fraction of entry.
    #[must_use]
    pub fn pnl_frac(&self, mark: Price) -> Option<Decimal> {
        mark.frac_from(self.entry_price)
            .map(|f| f * Decimal::from(self.side.sign()))
    }

    /// Whether `mark` has crossed the take-profit boundary.
    #[must_use]
    pub fn take_profit_hit(&self, mark: Price) -> bool {
        match (self.take_profit, self.side) {
            (Some(tp), PositionSide::Long) => mark >= tp,
            (Some(tp), PositionSide::Short) => mark <= tp,
            (None, _) => false,
        }
    }

    /// Whether `mark` has crossed the stop-loss boundary.
    #[must_use]
    pub fn stop_loss_hit(&self, mark: Price) -> bool {
        match (self.stop_loss, self.side) {
            (Some(sl), PositionSide::Long) => mark <= sl,
            (Some(sl), PositionSide::Short) => mark >= sl,
            (None, _) => false,
        }
    }
}
