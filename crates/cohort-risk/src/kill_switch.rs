//! Per-agent daily kill-switch.
//!
//! `DailyLossTracker` keeps a `RiskState` per agent and evaluates the halt
//! triggers in a fixed order. Once an agent is halted the latch holds until
//! the next local-day reset or a manual reset; later equity recoveries do not
//! re-open it.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use cohort_core::{AgentId, Clock, RejectReason, Rejection};

use crate::error::{RiskError, RiskResult};

// ============================================================================
// KillSwitchConfig
// ============================================================================

/// Kill-switch thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchConfig {
    /// Halt once the day's loss reaches this fraction of starting equity.
    #[serde(default = "default_max_daily_loss_pct")]
    pub max_daily_loss_pct: Decimal,
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,
    /// Halt when the mean venue round trip exceeds this many seconds.
    #[serde(default = "default_max_api_lag_secs")]
    pub max_api_lag_secs: f64,
    /// Halt when daily PnL falls below `-max_daily_drawdown_pct`.
    #[serde(default = "default_max_daily_drawdown_pct")]
    pub max_daily_drawdown_pct: Decimal,
    /// Number of latency samples kept per agent.
    #[serde(default = "default_latency_window")]
    pub latency_window: usize,
}

fn default_max_daily_loss_pct() -> Decimal {
    dec!(0.05)
}

fn default_max_consecutive_losses() -> u32 {
    5
}

fn default_max_api_lag_secs() -> f64 {
    5.0
}

fn default_max_daily_drawdown_pct() -> Decimal {
    dec!(0.02)
}

fn default_latency_window() -> usize {
    20
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            max_daily_loss_pct: default_max_daily_loss_pct(),
            max_consecutive_losses: default_max_consecutive_losses(),
            max_api_lag_secs: default_max_api_lag_secs(),
            max_daily_drawdown_pct: default_max_daily_drawdown_pct(),
            latency_window: default_latency_window(),
        }
    }
}

impl KillSwitchConfig {
    pub fn validate(&self) -> RiskResult<()> {
        if self.max_daily_loss_pct <= Decimal::ZERO || self.max_daily_loss_pct > Decimal::ONE {
            return Err(RiskError::InvalidConfig(format!(
                "max_daily_loss_pct must be in (0, 1], got {}",
                self.max_daily_loss_pct
            )));
        }
        if self.max_daily_drawdown_pct <= Decimal::ZERO {
            return Err(RiskError::InvalidConfig(
                "max_daily_drawdown_pct must be positive".to_string(),
            ));
        }
        if self.max_consecutive_losses == 0 || self.latency_window == 0 {
            return Err(RiskError::InvalidConfig(
                "max_consecutive_losses and latency_window must be >= 1".to_string(),
            ));
        }
        if self.max_api_lag_secs.is_nan() || self.max_api_lag_secs <= 0.0 {
            return Err(RiskError::InvalidConfig(
                "max_api_lag_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// KillSwitchReason
// ============================================================================

/// Why an agent was halted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KillSwitchReason {
    DailyLoss { loss_pct: Decimal },
    ConsecutiveLosses { count: u32 },
    ApiLag { mean_secs: f64 },
    DailyDrawdown { pnl_pct: Decimal },
    Manual { message: String },
}

impl KillSwitchReason {
    /// Metrics label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::DailyLoss { .. } => "daily_loss",
            Self::ConsecutiveLosses { .. } => "consecutive_losses",
            Self::ApiLag { .. } => "api_lag",
            Self::DailyDrawdown { .. } => "daily_drawdown",
            Self::Manual { .. } => "manual",
        }
    }

    #[must_use]
    pub fn to_rejection(&self) -> Rejection {
        Rejection::new(RejectReason::KillSwitch, self.to_string())
    }
}

impl fmt::Display for KillSwitchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DailyLoss { loss_pct } => {
                write!(f, "daily loss {:.2}%", loss_pct * Decimal::ONE_HUNDRED)
            }
            Self::ConsecutiveLosses { count } => write!(f, "{count} consecutive losses"),
            Self::ApiLag { mean_secs } => write!(f, "mean API latency {mean_secs:.2}s"),
            Self::DailyDrawdown { pnl_pct } => {
                write!(f, "daily PnL {:.2}%", pnl_pct * Decimal::ONE_HUNDRED)
            }
            Self::Manual { message } => write!(f, "manual: {message}"),
        }
    }
}

// ============================================================================
// RiskState
// ============================================================================

/// Per-agent risk state.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskState {
    pub day: NaiveDate,
    pub daily_starting_equity: Decimal,
    pub current_equity: Decimal,
    pub consecutive_losses: u32,
    pub halted: Option<KillSwitchReason>,
    pub halted_at_ms: Option<i64>,
    pub latency_samples: VecDeque<f64>,
}

impl RiskState {
    fn new(day: NaiveDate, equity: Decimal) -> Self {
        Self {
            day,
            daily_starting_equity: equity,
            current_equity: equity,
            consecutive_losses: 0,
            halted: None,
            halted_at_ms: None,
            latency_samples: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn mean_latency_secs(&self) -> Option<f64> {
        if self.latency_samples.is_empty() {
            return None;
        }
        Some(self.latency_samples.iter().sum::<f64>() / self.latency_samples.len() as f64)
    }

    /// Daily PnL as a fraction of starting equity.
    #[must_use]
    pub fn daily_pnl_pct(&self) -> Decimal {
        if self.daily_starting_equity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.current_equity - self.daily_starting_equity) / self.daily_starting_equity
    }

    fn roll_day(&mut self, today: NaiveDate, equity: Decimal) {
        if let Some(reason) = &self.halted {
            info!(previous_reason = %reason, "Kill-switch released by day reset");
        }
        self.day = today;
        self.daily_starting_equity = equity;
        self.current_equity = equity;
        self.consecutive_losses = 0;
        self.halted = None;
        self.halted_at_ms = None;
    }
}

// ============================================================================
// DailyLossTracker
// ============================================================================

/// Per-agent daily loss tracker and kill-switch latch.
pub struct DailyLossTracker {
    config: KillSwitchConfig,
    states: Mutex<HashMap<AgentId, RiskState>>,
    clock: Arc<dyn Clock>,
}

impl DailyLossTracker {
    #[must_use]
    pub fn new(config: KillSwitchConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            states: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Evaluate the kill-switch for `agent` at `equity`.
    ///
    /// Checks, in order: daily loss, consecutive losses, mean API latency,
    /// daily drawdown. Returns `Err` with the latched reason when halted.
    pub fn check_kill_switch_triggers(
        &self,
        agent: &AgentId,
        equity: Decimal,
    ) -> Result<(), KillSwitchReason> {
        let today = self.clock.local_date();
        let mut states = self.states.lock();
        let state = states
            .entry(agent.clone())
            .or_insert_with(|| RiskState::new(today, equity));

        if state.day != today {
            state.roll_day(today, equity);
        }
        if state.daily_starting_equity <= Decimal::ZERO {
            state.daily_starting_equity = equity;
        }
        state.current_equity = equity;

        if let Some(reason) = &state.halted {
            return Err(reason.clone());
        }

        let start = state.daily_starting_equity;
        let loss_pct = if start > Decimal::ZERO {
            (start - equity) / start
        } else {
            Decimal::ZERO
        };

        let trigger = if loss_pct >= self.config.max_daily_loss_pct {
            Some(KillSwitchReason::DailyLoss { loss_pct })
        } else if state.consecutive_losses >= self.config.max_consecutive_losses {
            Some(KillSwitchReason::ConsecutiveLosses {
                count: state.consecutive_losses,
            })
        } else if let Some(mean) = state
            .mean_latency_secs()
            .filter(|m| *m > self.config.max_api_lag_secs)
        {
            Some(KillSwitchReason::ApiLag { mean_secs: mean })
        } else if state.daily_pnl_pct() < -self.config.max_daily_drawdown_pct {
            Some(KillSwitchReason::DailyDrawdown {
                pnl_pct: state.daily_pnl_pct(),
            })
        } else {
            None
        };

        match trigger {
            Some(reason) => {
                error!(agent = %agent, reason = %reason, "KILL SWITCH TRIGGERED");
                state.halted = Some(reason.clone());
                state.halted_at_ms = Some(self.clock.now_ms());
                Err(reason)
            }
            None => Ok(()),
        }
    }

    /// Record a closed trade: a win resets the loss streak, a loss extends it.
    pub fn record_trade_outcome(&self, agent: &AgentId, is_win: bool) {
        let today = self.clock.local_date();
        let mut states = self.states.lock();
        let state = states
            .entry(agent.clone())
            .or_insert_with(|| RiskState::new(today, Decimal::ZERO));
        if is_win {
            state.consecutive_losses = 0;
        } else {
            state.consecutive_losses += 1;
        }
    }

    /// Record one venue round trip made on behalf of `agent`.
    pub fn record_api_latency(&self, agent: &AgentId, latency: Duration) {
        let today = self.clock.local_date();
        let window = self.config.latency_window;
        let mut states = self.states.lock();
        let state = states
            .entry(agent.clone())
            .or_insert_with(|| RiskState::new(today, Decimal::ZERO));
        state.latency_samples.push_back(latency.as_secs_f64());
        while state.latency_samples.len() > window {
            state.latency_samples.pop_front();
        }
    }

    /// Halt an agent by operator request.
    pub fn halt(&self, agent: &AgentId, message: impl Into<String>) {
        let today = self.clock.local_date();
        let now = self.clock.now_ms();
        let reason = KillSwitchReason::Manual {
            message: message.into(),
        };
        let mut states = self.states.lock();
        let state = states
            .entry(agent.clone())
            .or_insert_with(|| RiskState::new(today, Decimal::ZERO));
        if state.halted.is_none() {
            error!(agent = %agent, reason = %reason, "KILL SWITCH TRIGGERED");
            state.halted = Some(reason);
            state.halted_at_ms = Some(now);
        }
    }

    /// Clear the latch for `agent`. Starting equity is re-based at the next check.
    pub fn reset(&self, agent: &AgentId) {
        let mut states = self.states.lock();
        if let Some(state) = states.get_mut(agent) {
            info!(agent = %agent, previous_reason = ?state.halted, "Kill-switch manually reset");
            state.halted = None;
            state.halted_at_ms = None;
            state.consecutive_losses = 0;
            state.latency_samples.clear();
            state.daily_starting_equity = state.current_equity;
        }
    }

    #[must_use]
    pub fn is_halted(&self, agent: &AgentId) -> bool {
        self.states
            .lock()
            .get(agent)
            .is_some_and(|s| s.halted.is_some())
    }

    #[must_use]
    pub fn snapshot(&self, agent: &AgentId) -> Option<RiskState> {
        self.states.lock().get(agent).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::ManualClock;

    // 2024-03-01T12:00:00Z
    const NOON: i64 = 1_709_294_400_000;

    fn tracker(clock: Arc<ManualClock>) -> DailyLossTracker {
        DailyLossTracker::new(
            KillSwitchConfig {
                max_daily_drawdown_pct: dec!(0.5),
                ..KillSwitchConfig::default()
            },
            clock,
        )
    }

    #[test]
    fn test_daily_loss_latches_until_day_reset() {
        let clock = Arc::new(ManualClock::new(NOON));
        let tracker = tracker(clock.clone());
        let agent = AgentId::new("trend-1");

        assert!(tracker.check_kill_switch_triggers(&agent, dec!(10000)).is_ok());

        let err = tracker
            .check_kill_switch_triggers(&agent, dec!(9400))
            .unwrap_err();
        assert!(matches!(err, KillSwitchReason::DailyLoss { .. }));
        assert!(tracker.is_halted(&agent));

        // Recovery later the same day does not release the latch.
        clock.advance(Duration::from_secs(3 * 3600));
        assert!(tracker.check_kill_switch_triggers(&agent, dec!(9800)).is_err());

        // Next day: released and re-based.
        clock.advance(Duration::from_secs(12 * 3600));
        assert!(tracker.check_kill_switch_triggers(&agent, dec!(9800)).is_ok());
        assert_eq!(
            tracker.snapshot(&agent).unwrap().daily_starting_equity,
            dec!(9800)
        );
    }

    #[test]
    fn test_consecutive_losses() {
        let clock = Arc::new(ManualClock::new(NOON));
        let tracker = tracker(clock);
        let agent = AgentId::new("scalper");
        tracker.check_kill_switch_triggers(&agent, dec!(1000)).unwrap();

        for _ in 0..4 {
            tracker.record_trade_outcome(&agent, false);
        }
        tracker.record_trade_outcome(&agent, true);
        assert!(tracker.check_kill_switch_triggers(&agent, dec!(1000)).is_ok());

        for _ in 0..5 {
            tracker.record_trade_outcome(&agent, false);
        }
        assert_eq!(
            tracker.check_kill_switch_triggers(&agent, dec!(1000)),
            Err(KillSwitchReason::ConsecutiveLosses { count: 5 })
        );
    }

    #[test]
    fn test_api_lag_uses_window_mean() {
        let clock = Arc::new(ManualClock::new(NOON));
        let tracker = tracker(clock);
        let agent = AgentId::new("breakout");
        tracker.check_kill_switch_triggers(&agent, dec!(1000)).unwrap();

        tracker.record_api_latency(&agent, Duration::from_secs(9));
        for _ in 0..19 {
            tracker.record_api_latency(&agent, Duration::from_millis(100));
        }
        // Mean (9 + 1.9) / 20 < 5s
        assert!(tracker.check_kill_switch_triggers(&agent, dec!(1000)).is_ok());

        for _ in 0..20 {
            tracker.record_api_latency(&agent, Duration::from_secs(6));
        }
        assert!(matches!(
            tracker.check_kill_switch_triggers(&agent, dec!(1000)),
            Err(KillSwitchReason::ApiLag { .. })
        ));
    }

    #[test]
    fn test_drawdown_check_runs_last() {
        let clock = Arc::new(ManualClock::new(NOON));
        let tracker = DailyLossTracker::new(KillSwitchConfig::default(), clock);
        let agent = AgentId::new("mr");
        tracker.check_kill_switch_triggers(&agent, dec!(10000)).unwrap();
        // -3%: below the 5% loss limit but under -2% daily PnL.
        assert!(matches!(
            tracker.check_kill_switch_triggers(&agent, dec!(9700)),
            Err(KillSwitchReason::DailyDrawdown { .. })
        ));
    }

    #[test]
    fn test_manual_halt_and_reset() {
        let clock = Arc::new(ManualClock::new(NOON));
        let tracker = tracker(clock);
        let agent = AgentId::new("momo");
        tracker.halt(&agent, "operator");
        assert!(tracker.check_kill_switch_triggers(&agent, dec!(500)).is_err());
        tracker.reset(&agent);
        assert!(tracker.check_kill_switch_triggers(&agent, dec!(500)).is_ok());
    }
}
