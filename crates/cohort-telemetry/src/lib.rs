//! Prometheus metrics, structured logging and the trade journal.
//!
//! - `init_logging`: tracing subscriber with env filter, JSON in production
//! - `Metrics`: facade over the process-wide Prometheus collectors
//! - `TradeJournal`: non-blocking JSON Lines sink for decisions, trades and outcomes

pub mod error;
pub mod journal;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use journal::{JournalConfig, JournalEntry, JournalRecord, TradeAction, TradeJournal};
pub use logging::init_logging;
pub use metrics::Metrics;
