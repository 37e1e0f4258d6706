//! Application configuration.
//!
//! Every section is optional in the TOML file; missing fields take the
//! defaults of the owning component.

use std::collections::HashSet;
use std::path::Path;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use cohort_core::{AgentId, StrategyStyle, Symbol};
use cohort_executor::OrderManagerConfig;
use cohort_position::{LiveMonitorConfig, SentinelConfig};
use cohort_risk::{CircuitBreakerConfig, ExposureConfig, KillSwitchConfig, RegimeConfig, SizingConfig};
use cohort_signal::ArbitratorConfig;
use cohort_telemetry::JournalConfig;

use crate::error::{AppError, AppResult};
use crate::market_data::MarketDataConfig;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "COHORT_CONFIG";

/// Config file used when neither an explicit path nor `COHORT_CONFIG` is set.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

// ============================================================================
// AgentConfig
// ============================================================================

/// One strategy agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub style: StrategyStyle,
    pub symbols: Vec<String>,
    /// Fraction of equity risked per trade. Default: 0.02.
    #[serde(default = "default_risk_fraction")]
    pub risk_fraction: Decimal,
    /// Requested leverage, capped by sizing config and venue. Default: 5.
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    /// Take-profit distance as a fraction of entry. Default: 0.02.
    #[serde(default = "default_tp_pct")]
    pub tp_pct: Decimal,
    /// Stop-loss distance as a fraction of entry. Default: 0.01.
    #[serde(default = "default_sl_pct")]
    pub sl_pct: Decimal,
}

fn default_risk_fraction() -> Decimal {
    dec!(0.02)
}

fn default_leverage() -> u32 {
    5
}

fn default_tp_pct() -> Decimal {
    dec!(0.02)
}

fn default_sl_pct() -> Decimal {
    dec!(0.01)
}

impl AgentConfig {
    #[must_use]
    pub fn agent_id(&self) -> AgentId {
        AgentId::new(self.id.as_str())
    }

    pub fn symbols(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.symbols.iter().map(|s| Symbol::new(s.as_str()))
    }

    fn validate(&self) -> AppResult<()> {
        let fail = |msg: String| Err(AppError::Config(format!("agent {}: {msg}", self.id)));
        if self.id.trim().is_empty() {
            return Err(AppError::Config("agent id must not be empty".to_string()));
        }
        if self.symbols.is_empty() {
            return fail("symbols must not be empty".to_string());
        }
        if self.risk_fraction <= Decimal::ZERO || self.risk_fraction > Decimal::ONE {
            return fail(format!("risk_fraction must be in (0, 1], got {}", self.risk_fraction));
        }
        if self.leverage == 0 {
            return fail("leverage must be >= 1".to_string());
        }
        if self.tp_pct < Decimal::ZERO {
            return fail(format!("tp_pct must be >= 0, got {}", self.tp_pct));
        }
        if self.sl_pct < Decimal::ZERO || self.sl_pct >= Decimal::ONE {
            return fail(format!("sl_pct must be in [0, 1), got {}", self.sl_pct));
        }
        Ok(())
    }
}

// ============================================================================
// AppConfig
// ============================================================================

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    /// Orchestrator cycle interval. Default: 60s.
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,
    /// Opposite-direction entry cooldown while a position is open. Default: 900s.
    #[serde(default = "default_reversal_cooldown_secs")]
    pub reversal_cooldown_secs: u64,
    #[serde(default)]
    pub sizing: SizingConfig,
    #[serde(default)]
    pub kill_switch: KillSwitchConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub regime: RegimeConfig,
    #[serde(default)]
    pub exposure: ExposureConfig,
    #[serde(default)]
    pub arbitrator: ArbitratorConfig,
    #[serde(default)]
    pub order_manager: OrderManagerConfig,
    #[serde(default)]
    pub live_monitor: LiveMonitorConfig,
    #[serde(default)]
    pub sentinel: SentinelConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    #[serde(default)]
    pub market_data: MarketDataConfig,
}

fn default_cycle_interval_ms() -> u64 {
    60_000
}

fn default_reversal_cooldown_secs() -> u64 {
    900
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            agents: Vec::new(),
            cycle_interval_ms: default_cycle_interval_ms(),
            reversal_cooldown_secs: default_reversal_cooldown_secs(),
            sizing: SizingConfig::default(),
            kill_switch: KillSwitchConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            regime: RegimeConfig::default(),
            exposure: ExposureConfig::default(),
            arbitrator: ArbitratorConfig::default(),
            order_manager: OrderManagerConfig::default(),
            live_monitor: LiveMonitorConfig::default(),
            sentinel: SentinelConfig::default(),
            journal: JournalConfig::default(),
            market_data: MarketDataConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path`, else `COHORT_CONFIG`, else the default path.
    ///
    /// A missing file yields defaults; a present but malformed file is an error.
    pub fn load(path: Option<&str>) -> AppResult<Self> {
        let config_path = path
            .map(str::to_string)
            .or_else(|| std::env::var(CONFIG_ENV).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        if Path::new(&config_path).exists() {
            info!(path = %config_path, "Loading configuration");
            Self::from_file(&config_path)
        } else {
            warn!(path = %config_path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Fail fast on contract violations.
    pub fn validate(&self) -> AppResult<()> {
        if self.agents.is_empty() {
            return Err(AppError::Config("at least one agent is required".to_string()));
        }
        let mut seen = HashSet::new();
        for agent in &self.agents {
            agent.validate()?;
            if !seen.insert(agent.id.as_str()) {
                return Err(AppError::Config(format!("duplicate agent id {}", agent.id)));
            }
        }
        if self.cycle_interval_ms == 0 {
            return Err(AppError::Config("cycle_interval_ms must be > 0".to_string()));
        }

        self.sizing.validate()?;
        self.kill_switch.validate()?;
        self.circuit_breaker.validate()?;
        self.regime.validate()?;
        self.exposure.validate()?;
        self.arbitrator.validate()?;
        self.order_manager.validate()?;
        self.live_monitor.validate()?;
        self.sentinel.validate()?;
        self.journal.validate()?;
        self.market_data.validate()?;
        Ok(())
    }

    /// Every symbol traded by any agent, deduplicated and sorted.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.agents.iter().flat_map(AgentConfig::symbols).collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }
}
