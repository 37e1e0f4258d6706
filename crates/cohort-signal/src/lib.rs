//! Signal arbitration across agents.
//!
//! Agents vote independently each cycle; the orchestrator collects every vote
//! on a symbol and hands the set to [`SignalArbitrator::arbitrate`] exactly
//! once. Scores are confidence weighted by strategy style.

pub mod arbitrator;
pub mod config;
pub mod error;

pub use arbitrator::{normalize_confidence, Arbitration, SignalArbitrator};
pub use config::{ArbitratorConfig, StyleWeights};
pub use error::{SignalError, SignalResult};
