//! Application wiring and the cycle loop.
//!
//! Builds every shared component once, hands the order manager to both
//! protection monitors, and drives the orchestrator on a fixed interval until
//! ctrl-c or the shutdown token fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use cohort_core::Clock;
use cohort_executor::OrderManager;
use cohort_position::{PositionBook, ProtectionActions, ProtectionMonitor};
use cohort_risk::{CircuitBreaker, DailyLossTracker};
use cohort_telemetry::TradeJournal;
use cohort_venue::Venue;

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::market_data::MarketDataCache;
use crate::orchestrator::{Orchestrator, SharedServices};
use crate::strategy::StrategyProvider;

/// Main application.
pub struct Application {
    config: AppConfig,
    orchestrator: Arc<Orchestrator>,
    live_monitor: Arc<ProtectionMonitor>,
    sentinel: Arc<ProtectionMonitor>,
    journal_handle: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl Application {
    /// Validate `config` and build every component.
    ///
    /// Must be called inside a tokio runtime; the journal writer is spawned here.
    pub async fn new(
        config: AppConfig,
        venue: Arc<dyn Venue>,
        strategy: Arc<dyn StrategyProvider>,
        clock: Arc<dyn Clock>,
    ) -> AppResult<Self> {
        config.validate()?;

        let (journal, journal_handle) = if config.journal.enabled {
            let (journal, handle) = TradeJournal::spawn(&config.journal, clock.clone()).await?;
            (journal, Some(handle))
        } else {
            info!("Trade journal disabled");
            (TradeJournal::disabled(clock.clone()), None)
        };
        let journal = Arc::new(journal);

        let book = Arc::new(PositionBook::new());
        let risk = Arc::new(DailyLossTracker::new(config.kill_switch.clone(), clock.clone()));
        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone(), clock.clone()));
        let orders = Arc::new(OrderManager::new(
            config.order_manager.clone(),
            venue,
            book.clone(),
            risk.clone(),
            journal.clone(),
            clock.clone(),
        ));
        let market_data = Arc::new(MarketDataCache::new(config.market_data.clone(), orders.clone(), clock.clone()));

        let actions: Arc<dyn ProtectionActions> = orders.clone();
        let live_monitor = Arc::new(ProtectionMonitor::live(
            &config.live_monitor,
            book.clone(),
            actions.clone(),
            clock.clone(),
        ));
        let sentinel = Arc::new(ProtectionMonitor::sentinel(
            &config.sentinel,
            book,
            actions,
            clock.clone(),
        ));

        let services = SharedServices {
            orders,
            market_data,
            risk,
            breaker,
            journal,
            clock,
        };
        let orchestrator = Arc::new(Orchestrator::new(&config, services, strategy));

        info!(
            agents = config.agents.len(),
            symbols = ?config.symbols(),
            cycle_interval_ms = config.cycle_interval_ms,
            "Application initialized"
        );

        Ok(Self {
            config,
            orchestrator,
            live_monitor,
            sentinel,
            journal_handle,
            shutdown: CancellationToken::new(),
        })
    }

    /// Token that stops `run` when cancelled.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    #[must_use]
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    #[must_use]
    pub fn orders(&self) -> &Arc<OrderManager> {
        &self.orchestrator.services().orders
    }

    /// Run cycles until shutdown, then stop the monitors and drain the journal.
    pub async fn run(self) -> AppResult<()> {
        info!("Starting application");

        let live = tokio::spawn(self.live_monitor.clone().run(self.shutdown.clone()));
        let sentinel = tokio::spawn(self.sentinel.clone().run(self.shutdown.clone()));

        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.cycle_interval_ms));
        // A slow cycle delays the next one instead of bunching ticks.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = 0u64;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }

                _ = ticker.tick() => {
                    let report = self.orchestrator.run_cycle().await;
                    cycles += 1;
                    for violation in report.contract_violations() {
                        error!(
                            cycle = report.cycle,
                            agent = %violation.agent_id,
                            symbol = ?violation.symbol,
                            outcome = ?violation.outcome,
                            "Contract violation escalated"
                        );
                    }
                }
            }
        }

        info!(cycles, "Shutting down");
        self.shutdown.cancel();
        for (name, handle) in [("live", live), ("sentinel", sentinel)] {
            if let Err(e) = handle.await {
                warn!(monitor = name, error = %e, "Protection monitor task failed");
            }
        }

        let Self {
            orchestrator,
            live_monitor,
            sentinel,
            journal_handle,
            ..
        } = self;
        // Every journal sender must be gone before the writer can finish.
        drop(orchestrator);
        drop(live_monitor);
        drop(sentinel);
        if let Some(handle) = journal_handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Journal writer task failed");
            }
        }

        info!("Application stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::strategy::{RawDecision, ScriptedStrategy};
    use cohort_core::{ManualClock, Price, Size, Symbol, SymbolFilters};
    use cohort_venue::PaperVenue;
    use rust_decimal_macros::dec;

    fn venue(clock: Arc<ManualClock>) -> Arc<PaperVenue> {
        let venue = Arc::new(PaperVenue::new(clock));
        venue.add_symbol(
            SymbolFilters {
                symbol: Symbol::new("ETHUSDT"),
                tick_size: Price::new(dec!(0.01)),
                step_size: Size::new(dec!(0.001)),
                min_qty: Size::new(dec!(0.001)),
                max_qty: Size::new(dec!(1000)),
                min_notional: dec!(5),
                max_leverage: 50,
            },
            Price::new(dec!(2000)),
        );
        venue
    }

    fn config(journal_dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::from_toml(
            r#"
                cycle_interval_ms = 20

                [[agents]]
                id = "momo"
                style = "momentum"
                symbols = ["ETHUSDT"]

                [order_manager.retry]
                max_attempts = 1
            "#,
        )
        .unwrap();
        config.journal.dir = journal_dir.to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_invalid_config_fails_fast() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let result = Application::new(
            AppConfig::default(),
            venue(clock.clone()),
            Arc::new(ScriptedStrategy::new()),
            clock,
        )
        .await;
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_run_trades_then_shuts_down_and_drains_journal() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let venue = venue(clock.clone());
        let strategy = Arc::new(ScriptedStrategy::new());
        strategy.set("momo", "ETHUSDT", RawDecision::new("short", 0.9, "fading the move"));

        let app = Application::new(config(dir.path()), venue.clone(), strategy, clock)
            .await
            .unwrap();
        let book = app.orders().book().clone();
        let shutdown = app.shutdown_token();
        let handle = tokio::spawn(app.run());

        tokio::time::sleep(Duration::from_millis(150)).await;
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        let eth = Symbol::new("ETHUSDT");
        assert_eq!(
            book.get(&eth).map(|p| p.side),
            Some(cohort_core::PositionSide::Short)
        );
        assert!(venue.position(&eth).is_some());

        let journal = std::fs::read_to_string(dir.path().join("journal-2023-11-14.jsonl")).unwrap();
        assert!(journal.contains("\"kind\":\"decision\""));
        assert!(journal.contains("\"kind\":\"trade\""));
    }
}
