//! Venue trait.
//!
//! Only the order manager holds a `Venue`. Methods
//! return boxed futures so the trait stays dyn-compatible and can be shared
//! as `Arc<dyn Venue>` between the cycle loop and background monitors.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cohort_core::{
    BookTop, BoxFuture, Candle, ClientOrderId, FundingSnapshot, OpenOrder, OrderAck, OrderRequest,
    PositionSide, Price, Size, Symbol, SymbolFilters,
};

use crate::error::VenueResult;

/// Venue-side view of a position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionInfo {
    pub symbol: Symbol,
    pub side: PositionSide,
    pub qty: Size,
    pub entry_price: Price,
}

/// Execution venue API.
pub trait Venue: Send + Sync {
    fn get_symbol_filters<'a>(&'a self, symbol: &'a Symbol) -> BoxFuture<'a, VenueResult<SymbolFilters>>;

    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, VenueResult<OrderAck>>;

    /// Look up an order by the client order ID it was submitted with.
    /// `None` when the venue never accepted it.
    fn get_order<'a>(
        &'a self,
        symbol: &'a Symbol,
        client_order_id: &'a ClientOrderId,
    ) -> BoxFuture<'a, VenueResult<Option<OrderAck>>>;

    fn cancel_order<'a>(&'a self, symbol: &'a Symbol, order_id: &'a str) -> BoxFuture<'a, VenueResult<()>>;

    fn get_open_orders<'a>(&'a self, symbol: &'a Symbol) -> BoxFuture<'a, VenueResult<Vec<OpenOrder>>>;

    /// Current position, `None` when flat.
    fn get_position<'a>(&'a self, symbol: &'a Symbol) -> BoxFuture<'a, VenueResult<Option<PositionInfo>>>;

    fn get_mark_price<'a>(&'a self, symbol: &'a Symbol) -> BoxFuture<'a, VenueResult<Price>>;

    fn get_klines<'a>(
        &'a self,
        symbol: &'a Symbol,
        interval: &'a str,
        limit: usize,
    ) -> BoxFuture<'a, VenueResult<Vec<Candle>>>;

    fn get_funding_rate<'a>(&'a self, symbol: &'a Symbol) -> BoxFuture<'a, VenueResult<FundingSnapshot>>;

    fn get_order_book<'a>(&'a self, symbol: &'a Symbol, depth: usize) -> BoxFuture<'a, VenueResult<BookTop>>;

    /// Total account equity in quote currency.
    fn get_account_equity(&self) -> BoxFuture<'_, VenueResult<Decimal>>;
}
