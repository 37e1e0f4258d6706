//! Background protection monitors.
//!
//! Two loops iterate every open position independently of the cycle loop:
//!
//! - Live monitor (fast): compares mark price against the locally stored
//!   TP/SL boundary and force-closes on a breach, takes the one-time partial
//!   profit, and repairs missing TP/SL legs.
//! - Sentinel (slow): only verifies and repairs TP/SL legs.
//!
//! A repair is attempted only when BOTH the minimum elapsed time and the
//! minimum number of monitor cycles have passed since the last attempt on
//! that symbol, so a venue that keeps rejecting is not hammered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cohort_core::{Clock, Position, Symbol};
use cohort_telemetry::Metrics;

use crate::actions::{ExitOutcome, ExitReason, ProtectionActions, RepairOutcome};
use crate::error::{PositionError, PositionResult};
use crate::tracker::PositionBook;

// ============================================================================
// Configs
// ============================================================================

/// Live monitor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveMonitorConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Default: 5000ms.
    #[serde(default = "default_live_interval_ms")]
    pub interval_ms: u64,
    /// Default: 30s.
    #[serde(default = "default_live_repair_secs")]
    pub repair_min_interval_secs: u64,
    /// Default: 3 cycles.
    #[serde(default = "default_live_repair_cycles")]
    pub repair_min_cycles: u64,
    /// Force-close when mark crosses the stored TP/SL. Default: true.
    #[serde(default = "default_enabled")]
    pub force_close_on_breach: bool,
    /// Favourable move that triggers the partial close (0.015 = 1.5%).
    /// Zero disables it.
    #[serde(default = "default_partial_close_profit_pct")]
    pub partial_close_profit_pct: Decimal,
}

fn default_enabled() -> bool {
    true
}

fn default_live_interval_ms() -> u64 {
    5_000
}

fn default_live_repair_secs() -> u64 {
    30
}

fn default_live_repair_cycles() -> u64 {
    3
}

fn default_partial_close_profit_pct() -> Decimal {
    dec!(0.015)
}

impl Default for LiveMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_ms: default_live_interval_ms(),
            repair_min_interval_secs: default_live_repair_secs(),
            repair_min_cycles: default_live_repair_cycles(),
            force_close_on_breach: default_enabled(),
            partial_close_profit_pct: default_partial_close_profit_pct(),
        }
    }
}

/// Sentinel configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentinelConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Default: 60000ms.
    #[serde(default = "default_sentinel_interval_ms")]
    pub interval_ms: u64,
    /// Default: 120s.
    #[serde(default = "default_sentinel_repair_secs")]
    pub repair_min_interval_secs: u64,
    /// Default: 2 cycles.
    #[serde(default = "default_sentinel_repair_cycles")]
    pub repair_min_cycles: u64,
}

fn default_sentinel_interval_ms() -> u64 {
    60_000
}

fn default_sentinel_repair_secs() -> u64 {
    120
}

fn default_sentinel_repair_cycles() -> u64 {
    2
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_ms: default_sentinel_interval_ms(),
            repair_min_interval_secs: default_sentinel_repair_secs(),
            repair_min_cycles: default_sentinel_repair_cycles(),
        }
    }
}

fn validate_interval(name: &str, interval_ms: u64) -> PositionResult<()> {
    if interval_ms == 0 {
        return Err(PositionError::InvalidConfig(format!(
            "{name}.interval_ms must be > 0"
        )));
    }
    Ok(())
}

impl LiveMonitorConfig {
    pub fn validate(&self) -> PositionResult<()> {
        validate_interval("live_monitor", self.interval_ms)?;
        if self.partial_close_profit_pct < Decimal::ZERO {
            return Err(PositionError::InvalidConfig(
                "partial_close_profit_pct must be >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl SentinelConfig {
    pub fn validate(&self) -> PositionResult<()> {
        validate_interval("sentinel", self.interval_ms)
    }
}

// ============================================================================
// ProtectionMonitor
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorKind {
    Live,
    Sentinel,
}

impl MonitorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Sentinel => "sentinel",
        }
    }
}

#[derive(Debug, Clone)]
struct MonitorSettings {
    enabled: bool,
    interval: Duration,
    repair_min_interval_ms: i64,
    repair_min_cycles: u64,
    force_close_on_breach: bool,
    partial_close_profit_pct: Option<Decimal>,
}

#[derive(Debug, Clone, Copy)]
struct RepairStamp {
    at_ms: i64,
    cycle: u64,
}

/// What one monitor pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorReport {
    pub cycle: u64,
    pub checked: usize,
    pub missing_protection: usize,
    pub repaired: usize,
    pub debounced: usize,
    pub forced_exits: usize,
    pub partial_closes: usize,
    pub errors: usize,
}

/// One background protection loop.
pub struct ProtectionMonitor {
    kind: MonitorKind,
    settings: MonitorSettings,
    book: Arc<PositionBook>,
    actions: Arc<dyn ProtectionActions>,
    clock: Arc<dyn Clock>,
    cycle: AtomicU64,
    last_repair: Mutex<HashMap<Symbol, RepairStamp>>,
}

impl ProtectionMonitor {
    #[must_use]
    pub fn live(
        config: &LiveMonitorConfig,
        book: Arc<PositionBook>,
        actions: Arc<dyn ProtectionActions>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let partial = (config.partial_close_profit_pct > Decimal::ZERO)
            .then_some(config.partial_close_profit_pct);
        Self::with_settings(
            MonitorKind::Live,
            MonitorSettings {
                enabled: config.enabled,
                interval: Duration::from_millis(config.interval_ms),
                repair_min_interval_ms: (config.repair_min_interval_secs as i64) * 1000,
                repair_min_cycles: config.repair_min_cycles,
                force_close_on_breach: config.force_close_on_breach,
                partial_close_profit_pct: partial,
            },
            book,
            actions,
            clock,
        )
    }

    #[must_use]
    pub fn sentinel(
        config: &SentinelConfig,
        book: Arc<PositionBook>,
        actions: Arc<dyn ProtectionActions>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_settings(
            MonitorKind::Sentinel,
            MonitorSettings {
                enabled: config.enabled,
                interval: Duration::from_millis(config.interval_ms),
                repair_min_interval_ms: (config.repair_min_interval_secs as i64) * 1000,
                repair_min_cycles: config.repair_min_cycles,
                force_close_on_breach: false,
                partial_close_profit_pct: None,
            },
            book,
            actions,
            clock,
        )
    }

    fn with_settings(
        kind: MonitorKind,
        settings: MonitorSettings,
        book: Arc<PositionBook>,
        actions: Arc<dyn ProtectionActions>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            kind,
            settings,
            book,
            actions,
            clock,
            cycle: AtomicU64::new(0),
            last_repair: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn kind(&self) -> MonitorKind {
        self.kind
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        if !self.settings.enabled {
            info!(monitor = self.kind.as_str(), "Protection monitor disabled");
            return;
        }

        info!(
            monitor = self.kind.as_str(),
            interval_ms = self.settings.interval.as_millis() as u64,
            repair_min_interval_ms = self.settings.repair_min_interval_ms,
            repair_min_cycles = self.settings.repair_min_cycles,
            "Protection monitor started"
        );

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(monitor = self.kind.as_str(), "Protection monitor stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.run_cycle().await;
                    if report.repaired + report.forced_exits + report.partial_closes + report.errors > 0 {
                        info!(monitor = self.kind.as_str(), ?report, "Protection pass");
                    }
                }
            }
        }
    }

    /// One pass over every open position.
    pub async fn run_cycle(&self) -> MonitorReport {
        let cycle = self.cycle.fetch_add(1, Ordering::SeqCst) + 1;
        let positions = self.book.open_positions();
        let mut report = MonitorReport {
            cycle,
            ..MonitorReport::default()
        };

        self.last_repair
            .lock()
            .retain(|symbol, _| positions.iter().any(|p| &p.symbol == symbol));

        for position in positions {
            report.checked += 1;
            if self.kind == MonitorKind::Live && self.check_boundaries(&position, &mut report).await {
                continue;
            }
            self.check_protection(&position, cycle, &mut report).await;
        }

        trace_report(self.kind, &report);
        report
    }

    /// Live-only mark checks. Returns `true` when an exit was requested.
    async fn check_boundaries(&self, position: &Position, report: &mut MonitorReport) -> bool {
        let symbol = &position.symbol;
        let mark = match self.actions.mark_price(symbol).await {
            Ok(mark) => mark,
            Err(e) => {
                warn!(%symbol, error = %e, "Mark price unavailable");
                report.errors += 1;
                return false;
            }
        };

        if self.settings.force_close_on_breach {
            let breach = if position.stop_loss_hit(mark) {
                Some(ExitReason::StopLoss)
            } else if position.take_profit_hit(mark) {
                Some(ExitReason::TakeProfit)
            } else {
                None
            };

            if let Some(reason) = breach {
                warn!(
                    %symbol,
                    %mark,
                    %reason,
                    take_profit = ?position.take_profit,
                    stop_loss = ?position.stop_loss,
                    "Mark crossed local boundary, forcing exit"
                );
                match self.actions.force_close(position, reason).await {
                    Ok(ExitOutcome::Closed { realized_pnl }) => {
                        info!(%symbol, %reason, %realized_pnl, "Forced exit filled");
                        Metrics::forced_exit(reason.as_str());
                        report.forced_exits += 1;
                    }
                    Ok(ExitOutcome::Skipped(rejection)) => {
                        debug!(%symbol, %rejection, "Forced exit skipped");
                    }
                    Err(e) => {
                        warn!(%symbol, error = %e, "Forced exit failed");
                        report.errors += 1;
                    }
                }
                return true;
            }
        }

        if let Some(threshold) = self.settings.partial_close_profit_pct {
            let in_profit = position.pnl_frac(mark).is_some_and(|f| f >= threshold);
            if !position.partial_taken && in_profit {
                match self.actions.take_partial_profit(position).await {
                    Ok(ExitOutcome::Closed { realized_pnl }) => {
                        info!(%symbol, %realized_pnl, "Partial profit taken");
                        report.partial_closes += 1;
                    }
                    Ok(ExitOutcome::Skipped(rejection)) => {
                        debug!(%symbol, %rejection, "Partial close skipped");
                    }
                    Err(e) => {
                        warn!(%symbol, error = %e, "Partial close failed");
                        report.errors += 1;
                    }
                }
            }
        }
        false
    }

    fn repair_due(&self, symbol: &Symbol, now_ms: i64, cycle: u64) -> bool {
        match self.last_repair.lock().get(symbol) {
            None => true,
            Some(stamp) => {
                now_ms - stamp.at_ms >= self.settings.repair_min_interval_ms
                    && cycle.saturating_sub(stamp.cycle) >= self.settings.repair_min_cycles
            }
        }
    }

    async fn check_protection(&self, position: &Position, cycle: u64, report: &mut MonitorReport) {
        if position.take_profit.is_none() && position.stop_loss.is_none() {
            return;
        }
        let symbol = &position.symbol;
        let monitor = self.kind.as_str();

        let status = match self.actions.protection_status(position).await {
            Ok(status) => status,
            Err(e) => {
                warn!(%symbol, monitor, error = %e, "Protection status query failed");
                report.errors += 1;
                return;
            }
        };
        if status.is_complete_for(position) {
            return;
        }
        report.missing_protection += 1;

        let now = self.clock.now_ms();
        if !self.repair_due(symbol, now, cycle) {
            debug!(%symbol, monitor, cycle, "Protection missing, repair debounced");
            Metrics::protection_repair(monitor, "debounced");
            report.debounced += 1;
            return;
        }
        self.last_repair
            .lock()
            .insert(symbol.clone(), RepairStamp { at_ms: now, cycle });

        warn!(
            %symbol,
            monitor,
            has_take_profit = status.has_take_profit,
            has_stop_loss = status.has_stop_loss,
            "Protection missing, reattaching"
        );
        match self.actions.reattach_protection(position).await {
            Ok(RepairOutcome::Reattached { legs }) => {
                info!(%symbol, monitor, legs, "Protection reattached");
                Metrics::protection_repair(monitor, "reattached");
                report.repaired += 1;
            }
            Ok(RepairOutcome::AlreadyProtected) => {
                debug!(%symbol, monitor, "Protection already present");
            }
            Ok(RepairOutcome::Skipped(rejection)) => {
                debug!(%symbol, monitor, %rejection, "Protection repair skipped");
                Metrics::protection_repair(monitor, "duplicate");
            }
            Err(e) => {
                warn!(%symbol, monitor, error = %e, "Protection repair failed");
                Metrics::protection_repair(monitor, "failed");
                report.errors += 1;
            }
        }
    }
}

fn trace_report(kind: MonitorKind, report: &MonitorReport) {
    tracing::trace!(
        monitor = kind.as_str(),
        cycle = report.cycle,
        checked = report.checked,
        missing = report.missing_protection,
        debounced = report.debounced,
        "Protection pass complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ProtectionStatus;
    use cohort_core::{
        AgentId, BoxFuture, ManualClock, PositionSide, Price, RejectReason, Rejection, Size,
        TradeState,
    };
    use std::sync::atomic::AtomicU32;

    /// Scripted actions: protection stays missing until `heal` is set.
    #[derive(Default)]
    struct FakeActions {
        mark: Mutex<Price>,
        healed: Mutex<bool>,
        status_calls: AtomicU32,
        reattach_calls: AtomicU32,
        close_calls: AtomicU32,
        partial_calls: AtomicU32,
    }

    impl ProtectionActions for FakeActions {
        fn protection_status<'a>(
            &'a self,
            _position: &'a Position,
        ) -> BoxFuture<'a, PositionResult<ProtectionStatus>> {
            Box::pin(async move {
                self.status_calls.fetch_add(1, Ordering::SeqCst);
                let healed = *self.healed.lock();
                Ok(ProtectionStatus {
                    has_take_profit: true,
                    has_stop_loss: healed,
                })
            })
        }

        fn reattach_protection<'a>(
            &'a self,
            _position: &'a Position,
        ) -> BoxFuture<'a, PositionResult<RepairOutcome>> {
            Box::pin(async move {
                self.reattach_calls.fetch_add(1, Ordering::SeqCst);
                Ok(RepairOutcome::Reattached { legs: 1 })
            })
        }

        fn mark_price<'a>(&'a self, _symbol: &'a Symbol) -> BoxFuture<'a, PositionResult<Price>> {
            Box::pin(async move { Ok(*self.mark.lock()) })
        }

        fn force_close<'a>(
            &'a self,
            _position: &'a Position,
            _reason: ExitReason,
        ) -> BoxFuture<'a, PositionResult<ExitOutcome>> {
            Box::pin(async move {
                let n = self.close_calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Ok(ExitOutcome::Closed {
                        realized_pnl: dec!(-10),
                    })
                } else {
                    Ok(ExitOutcome::Skipped(Rejection::new(
                        RejectReason::ExitInFlight,
                        "exit already in flight",
                    )))
                }
            })
        }

        fn take_partial_profit<'a>(
            &'a self,
            _position: &'a Position,
        ) -> BoxFuture<'a, PositionResult<ExitOutcome>> {
            Box::pin(async move {
                self.partial_calls.fetch_add(1, Ordering::SeqCst);
                Ok(ExitOutcome::Closed {
                    realized_pnl: dec!(3),
                })
            })
        }
    }

    fn long_position() -> Position {
        Position {
            symbol: Symbol::new("BTCUSDT"),
            side: PositionSide::Long,
            qty: Size::new(dec!(0.1)),
            entry_price: Price::new(dec!(100)),
            leverage: 5,
            take_profit: Some(Price::new(dec!(110))),
            stop_loss: Some(Price::new(dec!(95))),
            opened_at_ms: 0,
            agent_id: AgentId::new("a1"),
            state: TradeState::Open,
            partial_taken: false,
        }
    }

    fn setup(mark: Price) -> (Arc<ManualClock>, Arc<PositionBook>, Arc<FakeActions>) {
        let clock = Arc::new(ManualClock::new(0));
        let book = Arc::new(PositionBook::new());
        book.insert(long_position());
        let actions = Arc::new(FakeActions::default());
        *actions.mark.lock() = mark;
        (clock, book, actions)
    }

    #[tokio::test]
    async fn test_sentinel_dual_debounce_needs_time_and_cycles() {
        let (clock, book, actions) = setup(Price::new(dec!(100)));
        let sentinel = ProtectionMonitor::sentinel(
            &SentinelConfig::default(),
            book,
            actions.clone(),
            clock.clone(),
        );

        let first = sentinel.run_cycle().await;
        assert_eq!(first.repaired, 1);

        // Cycles pass but time does not.
        let second = sentinel.run_cycle().await;
        let third = sentinel.run_cycle().await;
        assert_eq!(second.debounced + third.debounced, 2);
        assert_eq!(actions.reattach_calls.load(Ordering::SeqCst), 1);

        // Time passes, and this is cycle 4: both conditions met.
        clock.advance(Duration::from_secs(120));
        let fourth = sentinel.run_cycle().await;
        assert_eq!(fourth.repaired, 1);
        assert_eq!(actions.reattach_calls.load(Ordering::SeqCst), 2);

        // Time alone is not enough.
        clock.advance(Duration::from_secs(600));
        assert_eq!(sentinel.run_cycle().await.debounced, 1);
        assert_eq!(actions.reattach_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_healthy_position_is_left_alone() {
        let (clock, book, actions) = setup(Price::new(dec!(100)));
        *actions.healed.lock() = true;
        let sentinel =
            ProtectionMonitor::sentinel(&SentinelConfig::default(), book, actions.clone(), clock);
        let report = sentinel.run_cycle().await;
        assert_eq!(report.checked, 1);
        assert_eq!(report.missing_protection, 0);
        assert_eq!(actions.reattach_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_live_monitor_forces_exit_on_stop_breach() {
        let (clock, book, actions) = setup(Price::new(dec!(94)));
        let live =
            ProtectionMonitor::live(&LiveMonitorConfig::default(), book, actions.clone(), clock);

        let report = live.run_cycle().await;
        assert_eq!(report.forced_exits, 1);
        // Exit path short-circuits the repair path.
        assert_eq!(actions.status_calls.load(Ordering::SeqCst), 0);

        // Second request is refused by the state machine behind the actions.
        assert_eq!(live.run_cycle().await.forced_exits, 0);
        assert_eq!(actions.close_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sentinel_never_forces_exit() {
        let (clock, book, actions) = setup(Price::new(dec!(94)));
        let sentinel =
            ProtectionMonitor::sentinel(&SentinelConfig::default(), book, actions.clone(), clock);
        sentinel.run_cycle().await;
        assert_eq!(actions.close_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_live_monitor_partial_close_once() {
        let (clock, book, actions) = setup(Price::new(dec!(102)));
        *actions.healed.lock() = true;
        let live = ProtectionMonitor::live(
            &LiveMonitorConfig::default(),
            book.clone(),
            actions.clone(),
            clock,
        );

        assert_eq!(live.run_cycle().await.partial_closes, 1);
        // The order manager marks the position; emulate that here.
        book.update(&Symbol::new("BTCUSDT"), |p| p.partial_taken = true);
        assert_eq!(live.run_cycle().await.partial_closes, 0);
        assert_eq!(actions.partial_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (clock, book, actions) = setup(Price::new(dec!(100)));
        *actions.healed.lock() = true;
        let config = SentinelConfig {
            interval_ms: 5,
            ..SentinelConfig::default()
        };
        let sentinel = Arc::new(ProtectionMonitor::sentinel(&config, book, actions.clone(), clock));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(sentinel.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();
        handle.await.unwrap();
        assert!(actions.status_calls.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_config_defaults() {
        let live = LiveMonitorConfig::default();
        assert_eq!((live.repair_min_interval_secs, live.repair_min_cycles), (30, 3));
        let sentinel = SentinelConfig::default();
        assert_eq!(
            (sentinel.repair_min_interval_secs, sentinel.repair_min_cycles),
            (120, 2)
        );
        assert!(SentinelConfig {
            interval_ms: 0,
            ..SentinelConfig::default()
        }
        .validate()
        .is_err());
    }
}
