//! Core domain types for the cohort execution layer.
//!
//! This crate provides fundamental types shared by every other crate:
//! - `Price`, `Size`: Precision-safe numeric types
//! - `Symbol`, `SymbolFilters`: Venue symbols and their precision constraints
//! - `OrderSide`, `PositionSide`, `OrderRequest`: Order plumbing
//! - `Signal`, `AgentSignal`, `Decision`: Agent output handed to the arbitrator
//! - `Position`, `TradeState`: Open position snapshot and lifecycle
//! - `RejectReason`, `Rejection`: Machine-checkable soft-reject codes
//! - `Clock`: Injectable time source

use std::future::Future;
use std::pin::Pin;

pub mod clock;
pub mod decimal;
pub mod error;
pub mod execution;
pub mod market;
pub mod order;
pub mod signal;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use execution::{RejectReason, Rejection};
pub use market::{Symbol, SymbolFilters};
pub use order::{ClientOrderId, OpenOrder, OrderAck, OrderRequest, OrderSide, OrderType, PositionSide};
pub use signal::{AgentId, AgentSignal, Decision, Signal, StrategyStyle};
pub use types::{BookTop, Candle, FundingSnapshot, Position, TradeState};

/// Boxed future used by the dyn-compatible async traits across the workspace.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
