//! Agent signals and decisions.
//!
//! A `Decision` is what the external strategy layer hands back for one agent
//! in one cycle. It is validated on construction; anything that fails
//! validation is a contract violation, not a soft reject.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};
use crate::{PositionSide, Symbol};

/// Trading agent identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Directional signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Long,
    Short,
    Hold,
}

impl Signal {
    /// Position direction this signal asks for, `None` for hold.
    pub fn direction(&self) -> Option<PositionSide> {
        match self {
            Self::Long => Some(PositionSide::Long),
            Self::Short => Some(PositionSide::Short),
            Self::Hold => None,
        }
    }

    pub fn is_hold(&self) -> bool {
        matches!(self, Self::Hold)
    }
}

impl From<PositionSide> for Signal {
    fn from(side: PositionSide) -> Self {
        match side {
            PositionSide::Long => Self::Long,
            PositionSide::Short => Self::Short,
        }
    }
}

impl FromStr for Signal {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(Self::Long),
            "short" | "sell" => Ok(Self::Short),
            "hold" | "none" => Ok(Self::Hold),
            _ => Err(CoreError::InvalidSignal(s.to_string())),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
            Self::Hold => write!(f, "hold"),
        }
    }
}

/// Strategy style an agent trades with. Drives the arbitration weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyStyle {
    TrendFollowing,
    Momentum,
    Breakout,
    MeanReversion,
    Scalping,
}

impl FromStr for StrategyStyle {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "trend_following" | "trend" => Ok(Self::TrendFollowing),
            "momentum" => Ok(Self::Momentum),
            "breakout" => Ok(Self::Breakout),
            "mean_reversion" => Ok(Self::MeanReversion),
            "scalping" | "scalp" => Ok(Self::Scalping),
            _ => Err(CoreError::InvalidStyle(s.to_string())),
        }
    }
}

impl fmt::Display for StrategyStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TrendFollowing => "trend_following",
            Self::Momentum => "momentum",
            Self::Breakout => "breakout",
            Self::MeanReversion => "mean_reversion",
            Self::Scalping => "scalping",
        };
        f.write_str(s)
    }
}

/// Validated output of the strategy layer for one agent and one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub signal: Signal,
    pub confidence: f64,
    pub reasoning: String,
    pub strategy_tag: String,
}

impl Decision {
    /// Validating constructor.
    pub fn new(
        signal: Signal,
        confidence: f64,
        reasoning: impl Into<String>,
        strategy_tag: impl Into<String>,
    ) -> Result<Self> {
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(CoreError::InvalidConfidence(confidence));
        }
        Ok(Self {
            signal,
            confidence,
            reasoning: reasoning.into(),
            strategy_tag: strategy_tag.into(),
        })
    }

    /// Build from untyped strategy output (signal as a string).
    pub fn parse(
        signal: &str,
        confidence: f64,
        reasoning: impl Into<String>,
        strategy_tag: impl Into<String>,
    ) -> Result<Self> {
        Self::new(signal.parse()?, confidence, reasoning, strategy_tag)
    }

    /// A hold decision with zero confidence.
    #[must_use]
    pub fn hold(reasoning: impl Into<String>) -> Self {
        Self {
            signal: Signal::Hold,
            confidence: 0.0,
            reasoning: reasoning.into(),
            strategy_tag: String::new(),
        }
    }
}

/// A single agent's vote on a symbol, collected for arbitration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSignal {
    pub agent_id: AgentId,
    pub symbol: Symbol,
    pub signal: Signal,
    pub confidence: f64,
    pub style: StrategyStyle,
    pub timestamp_ms: i64,
}
