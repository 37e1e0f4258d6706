//! Multi-agent trading cohort.
//!
//! Wires the execution layer together:
//! - Configuration loading and validation
//! - Shared market data cache with staleness refresh
//! - The strategy seam supplying one decision per agent and symbol
//! - The cycle orchestrator (gates, deferred arbitration, sizing, execution)
//! - Live monitor and sentinel protection loops

pub mod app;
pub mod config;
pub mod error;
pub mod market_data;
pub mod orchestrator;
pub mod strategy;

pub use app::Application;
pub use config::{AgentConfig, AppConfig};
pub use error::{AppError, AppResult};
pub use market_data::{MarketDataCache, MarketDataConfig, MarketSnapshot};
pub use orchestrator::{
    AgentOutcome, AgentReport, CycleReport, ExecutionOutcome, ExecutionReport, Orchestrator,
    SharedServices,
};
pub use strategy::{RawDecision, ScriptedStrategy, StrategyProvider};
