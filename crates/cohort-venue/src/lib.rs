//! Execution venue boundary.
//!
//! Everything that talks to the exchange lives behind this crate:
//! - `Venue`: dyn-compatible async trait for every venue call
//! - `VenueError`, `ErrorAction`: error taxonomy and the static code table
//! - `RetryPolicy`, `retry`: one generic backoff wrapper for all venue calls
//! - `FilterCache`: TTL cache of per-symbol precision filters
//! - `PaperVenue`: in-memory venue for dry runs and tests

pub mod error;
pub mod filter_cache;
pub mod paper;
pub mod retry;
pub mod venue;

pub use error::{lookup_error_code, ErrorAction, VenueError, VenueResult};
pub use filter_cache::{FilterCache, DEFAULT_FILTER_TTL};
pub use paper::PaperVenue;
pub use retry::{retry, retry_with, RetryPolicy};
pub use venue::{PositionInfo, Venue};
