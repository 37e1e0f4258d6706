//! External decision layer seam.
//!
//! Indicator computation and strategy reasoning live outside this workspace.
//! The orchestrator only sees an untyped [`RawDecision`] per agent and symbol,
//! validates it, and treats anything malformed as a contract violation.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use cohort_core::{AgentId, BoxFuture, Decision, Symbol};

use crate::config::AgentConfig;
use crate::error::{AppError, AppResult};
use crate::market_data::MarketSnapshot;

/// Strategy output before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDecision {
    pub signal: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub strategy_tag: String,
}

impl RawDecision {
    pub fn new(signal: impl Into<String>, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self {
            signal: signal.into(),
            confidence,
            reasoning: reasoning.into(),
            strategy_tag: String::new(),
        }
    }

    #[must_use]
    pub fn hold() -> Self {
        Self::new("hold", 0.0, "no decision")
    }

    /// Signal must be long/short/hold and confidence within `[0, 1]`.
    pub fn validate(&self) -> cohort_core::Result<Decision> {
        Decision::parse(
            &self.signal,
            self.confidence,
            self.reasoning.clone(),
            self.strategy_tag.clone(),
        )
    }
}

/// Supplies one decision per agent per symbol per cycle.
pub trait StrategyProvider: Send + Sync {
    fn decide<'a>(
        &'a self,
        agent: &'a AgentConfig,
        snapshot: &'a MarketSnapshot,
    ) -> BoxFuture<'a, AppResult<RawDecision>>;
}

/// Replays preset decisions. Anything not scripted holds.
#[derive(Default)]
pub struct ScriptedStrategy {
    decisions: Mutex<HashMap<(AgentId, Symbol), Result<RawDecision, String>>>,
}

impl ScriptedStrategy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decision returned for `agent` on `symbol` until replaced.
    pub fn set(&self, agent: &str, symbol: &str, decision: RawDecision) {
        self.decisions
            .lock()
            .insert((AgentId::new(agent), Symbol::new(symbol)), Ok(decision));
    }

    /// Make the strategy call itself fail for `agent` on `symbol`.
    pub fn fail(&self, agent: &str, symbol: &str, message: &str) {
        self.decisions.lock().insert(
            (AgentId::new(agent), Symbol::new(symbol)),
            Err(message.to_string()),
        );
    }

    pub fn clear(&self) {
        self.decisions.lock().clear();
    }
}

impl StrategyProvider for ScriptedStrategy {
    fn decide<'a>(
        &'a self,
        agent: &'a AgentConfig,
        snapshot: &'a MarketSnapshot,
    ) -> BoxFuture<'a, AppResult<RawDecision>> {
        let key = (agent.agent_id(), snapshot.symbol.clone());
        let decision = match self.decisions.lock().get(&key) {
            Some(Ok(decision)) => Ok(decision.clone()),
            Some(Err(message)) => Err(AppError::Strategy(message.clone())),
            None => Ok(RawDecision::hold()),
        };
        Box::pin(async move { decision })
    }
}
