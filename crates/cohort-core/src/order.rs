//! Order-related types and identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{Price, Size, Symbol};

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Order side that opens a position in this direction.
    pub fn entry_side(&self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Buy,
            Self::Short => OrderSide::Sell,
        }
    }

    /// Order side that reduces a position in this direction.
    pub fn exit_side(&self) -> OrderSide {
        self.entry_side().opposite()
    }

    pub fn opposite(&self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// Returns 1 for long, -1 for short (for PnL calculations).
    pub fn sign(&self) -> i8 {
        match self {
            Self::Long => 1,
            Self::Short => -1,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    /// Conditional stop-loss, triggered at `price`.
    StopMarket,
    /// Conditional take-profit, triggered at `price`.
    TakeProfitMarket,
}

impl OrderType {
    /// Whether this is a conditional protection order.
    pub fn is_protection(&self) -> bool {
        matches!(self, Self::StopMarket | Self::TakeProfitMarket)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Market => write!(f, "MARKET"),
            Self::Limit => write!(f, "LIMIT"),
            Self::StopMarket => write!(f, "STOP_MARKET"),
            Self::TakeProfitMarket => write!(f, "TAKE_PROFIT_MARKET"),
        }
    }
}

/// Client order ID for idempotent submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientOrderId(String);

impl ClientOrderId {
    /// Create a new random client order ID.
    pub fn new() -> Self {
        Self(format!("coh-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientOrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order submission request handed to the venue.
///
/// The client order ID is generated once per request so a retried submission
/// carries the same ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: ClientOrderId,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub qty: Size,
    pub order_type: OrderType,
    /// Limit price or trigger price, depending on `order_type`.
    pub price: Option<Price>,
    pub reduce_only: bool,
}

impl OrderRequest {
    #[must_use]
    pub fn market(symbol: Symbol, side: OrderSide, qty: Size) -> Self {
        Self {
            client_order_id: ClientOrderId::new(),
            symbol,
            side,
            qty,
            order_type: OrderType::Market,
            price: None,
            reduce_only: false,
        }
    }

    /// Reduce-only market order used for exits.
    #[must_use]
    pub fn market_reduce_only(symbol: Symbol, side: OrderSide, qty: Size) -> Self {
        Self {
            reduce_only: true,
            ..Self::market(symbol, side, qty)
        }
    }

    /// Reduce-only conditional protection order.
    #[must_use]
    pub fn trigger(
        symbol: Symbol,
        side: OrderSide,
        qty: Size,
        order_type: OrderType,
        trigger_price: Price,
    ) -> Self {
        Self {
            client_order_id: ClientOrderId::new(),
            symbol,
            side,
            qty,
            order_type,
            price: Some(trigger_price),
            reduce_only: true,
        }
    }
}

/// Venue acknowledgement of an accepted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub client_order_id: ClientOrderId,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub executed_qty: Size,
    /// Average fill price; zero for resting conditional orders.
    pub avg_price: Price,
}

/// Resting order as reported by the venue's open-orders query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: String,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub qty: Size,
    pub trigger_price: Option<Price>,
    pub reduce_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_position_side_maps_to_order_side() {
        assert_eq!(PositionSide::Long.entry_side(), OrderSide::Buy);
        assert_eq!(PositionSide::Long.exit_side(), OrderSide::Sell);
        assert_eq!(PositionSide::Short.entry_side(), OrderSide::Sell);
        assert_eq!(PositionSide::Short.exit_side(), OrderSide::Buy);
    }

    #[test]
    fn test_client_order_ids_are_unique() {
        assert_ne!(ClientOrderId::new(), ClientOrderId::new());
        assert!(ClientOrderId::new().as_str().starts_with("coh-"));
    }

    #[test]
    fn test_trigger_order_is_reduce_only() {
        let req = OrderRequest::trigger(
            Symbol::new("BTCUSDT"),
            OrderSide::Sell,
            Size::new(dec!(0.01)),
            OrderType::StopMarket,
            Price::new(dec!(49000)),
        );
        assert!(req.reduce_only);
        assert!(req.order_type.is_protection());
        assert_eq!(req.price, Some(Price::new(dec!(49000))));
    }
}
