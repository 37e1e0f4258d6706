//! Order execution.
//!
//! - [`OrderManager`]: entry, full and partial exits, TP/SL placement and repair
//! - [`derive_protection`], [`enforce_safety_margin`]: trigger price math
//!
//! The order manager implements `ProtectionActions`, so the background
//! monitors reach the venue only through it.

pub mod error;
pub mod order_manager;
pub mod protection;

pub use error::{ExecutorError, ExecutorResult};
pub use order_manager::{OrderManager, OrderManagerConfig, PlaceOutcome, PlaceRequest};
pub use protection::{derive_protection, enforce_safety_margin, ProtectionPrices};
