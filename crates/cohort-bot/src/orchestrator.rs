//! Cycle orchestrator.
//!
//! One pass per cycle, never overlapping:
//! 1. Per agent: kill-switch, then per symbol circuit breaker, market data,
//!    strategy decision, confidence normalization. Votes are deferred.
//! 2. Per symbol: exactly one arbitration over every deferred vote.
//! 3. Per non-hold result: stacking, regime and correlation adjustments,
//!    sizing, reversal cooldown, then the order manager.
//!
//! Every per-agent failure degrades to "no action this cycle" for that agent.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use cohort_core::{
    AgentId, AgentSignal, Clock, Position, PositionSide, RejectReason, Rejection, Signal, Symbol,
};
use cohort_executor::{OrderManager, PlaceOutcome, PlaceRequest};
use cohort_position::{ExitOutcome, ExitReason};
use cohort_risk::{
    CircuitBreaker, DailyLossTracker, ExposureGate, MarketObservation, RegimeAdjustment,
    RegimeEngine, ReversalCooldown, RiskEngine, SizingInput,
};
use cohort_signal::{normalize_confidence, Arbitration, SignalArbitrator};
use cohort_telemetry::{JournalRecord, Metrics, TradeJournal};

use crate::config::{AgentConfig, AppConfig};
use crate::market_data::{MarketDataCache, MarketSnapshot};
use crate::strategy::StrategyProvider;

// ============================================================================
// Reports
// ============================================================================

/// What happened to one agent on one symbol (or to the agent as a whole).
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutcome {
    /// Vote collected for arbitration.
    Deferred { signal: Signal, confidence: f64 },
    Hold,
    Rejected(Rejection),
    /// Strategy output broke the decision contract.
    ContractViolation(String),
    /// Agent step aborted by an error.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentReport {
    pub agent_id: AgentId,
    /// `None` when the outcome covers every symbol of the agent.
    pub symbol: Option<Symbol>,
    pub outcome: AgentOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Opened(Position),
    Rejected(Rejection),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub symbol: Symbol,
    /// Agent whose parameters sized and protected the order.
    pub agent_id: AgentId,
    pub side: PositionSide,
    /// Realized PnL of the position closed to reverse, if any.
    pub reversed_pnl: Option<Decimal>,
    pub outcome: ExecutionOutcome,
}

/// Result of one orchestrator cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub agents: Vec<AgentReport>,
    pub arbitrations: Vec<Arbitration>,
    pub executions: Vec<ExecutionReport>,
}

impl CycleReport {
    /// Contract violations raised this cycle, for escalation to the scheduler.
    #[must_use]
    pub fn contract_violations(&self) -> Vec<&AgentReport> {
        self.agents
            .iter()
            .filter(|r| matches!(r.outcome, AgentOutcome::ContractViolation(_)))
            .collect()
    }

    #[must_use]
    pub fn opened(&self) -> Vec<&Position> {
        self.executions
            .iter()
            .filter_map(|e| match &e.outcome {
                ExecutionOutcome::Opened(p) => Some(p),
                _ => None,
            })
            .collect()
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Long-lived components shared with the monitors and the application.
#[derive(Clone)]
pub struct SharedServices {
    pub orders: Arc<OrderManager>,
    pub market_data: Arc<MarketDataCache>,
    pub risk: Arc<DailyLossTracker>,
    pub breaker: Arc<CircuitBreaker>,
    pub journal: Arc<TradeJournal>,
    pub clock: Arc<dyn Clock>,
}

pub struct Orchestrator {
    agents: Vec<AgentConfig>,
    services: SharedServices,
    strategy: Arc<dyn StrategyProvider>,
    regime: RegimeEngine,
    sizing: RiskEngine,
    exposure: ExposureGate,
    reversal: ReversalCooldown,
    arbitrator: SignalArbitrator,
    cycle: AtomicU64,
    running: AsyncMutex<()>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(config: &AppConfig, services: SharedServices, strategy: Arc<dyn StrategyProvider>) -> Self {
        let clock = services.clock.clone();
        Self {
            agents: config.agents.clone(),
            strategy,
            regime: RegimeEngine::new(config.regime.clone()),
            sizing: RiskEngine::new(config.sizing.clone()),
            exposure: ExposureGate::new(config.exposure.clone()),
            reversal: ReversalCooldown::new(Duration::from_secs(config.reversal_cooldown_secs), clock.clone()),
            arbitrator: SignalArbitrator::new(config.arbitrator.clone(), clock),
            services,
            cycle: AtomicU64::new(0),
            running: AsyncMutex::new(()),
        }
    }

    #[must_use]
    pub fn services(&self) -> &SharedServices {
        &self.services
    }

    /// Run one full cycle. Concurrent callers wait for the previous cycle.
    pub async fn run_cycle(&self) -> CycleReport {
        let _running = self.running.lock().await;
        let started = Instant::now();
        let cycle = self.cycle.fetch_add(1, Ordering::SeqCst) + 1;
        let mut report = CycleReport {
            cycle,
            ..CycleReport::default()
        };

        let mut votes: BTreeMap<Symbol, Vec<AgentSignal>> = BTreeMap::new();
        let mut equities: HashMap<AgentId, Decimal> = HashMap::new();
        for agent in &self.agents {
            for symbol in agent.symbols() {
                votes.entry(symbol).or_default();
            }
            self.collect_agent(agent, &mut votes, &mut equities, &mut report.agents)
                .await;
        }

        for (symbol, signals) in &votes {
            let arbitration = self.arbitrator.arbitrate(symbol, signals);
            match (&arbitration.conflict, arbitration.direction()) {
                (Some(conflict), _) if arbitration.voters > 0 => {
                    self.reject(None, Some(symbol), conflict.clone());
                }
                (None, Some(side)) => {
                    let execution = self.execute(&arbitration, side, signals, &equities).await;
                    report.executions.push(execution);
                }
                _ => {}
            }
            report.arbitrations.push(arbitration);
        }

        let elapsed = started.elapsed();
        Metrics::cycle_completed(elapsed.as_secs_f64());
        info!(
            cycle,
            agents = self.agents.len(),
            symbols = report.arbitrations.len(),
            executions = report.executions.len(),
            opened = report.opened().len(),
            contract_violations = report.contract_violations().len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Cycle complete"
        );
        report
    }

    // ------------------------------------------------------------------------
    // Collection
    // ------------------------------------------------------------------------

    async fn collect_agent(
        &self,
        agent: &AgentConfig,
        votes: &mut BTreeMap<Symbol, Vec<AgentSignal>>,
        equities: &mut HashMap<AgentId, Decimal>,
        reports: &mut Vec<AgentReport>,
    ) {
        let agent_id = agent.agent_id();
        let risk = &self.services.risk;

        let equity = match self.services.orders.account_equity(&agent_id).await {
            Ok(equity) => equity,
            Err(e) => {
                warn!(agent = %agent_id, error = %e, "Equity unavailable, skipping agent");
                reports.push(AgentReport {
                    agent_id,
                    symbol: None,
                    outcome: AgentOutcome::Failed(e.to_string()),
                });
                return;
            }
        };

        let was_halted = risk.is_halted(&agent_id);
        if let Err(reason) = risk.check_kill_switch_triggers(&agent_id, equity) {
            if !was_halted {
                Metrics::kill_switch_tripped(reason.label());
            }
            let rejection = self.reject(Some(&agent_id), None, reason.to_rejection());
            reports.push(AgentReport {
                agent_id,
                symbol: None,
                outcome: AgentOutcome::Rejected(rejection),
            });
            return;
        }
        equities.insert(agent_id.clone(), equity);

        for symbol in agent.symbols() {
            let outcome = match self.evaluate_symbol(agent, &agent_id, &symbol).await {
                Ok(signal) => {
                    let outcome = AgentOutcome::Deferred {
                        signal: signal.signal,
                        confidence: signal.confidence,
                    };
                    votes.entry(symbol.clone()).or_default().push(signal);
                    outcome
                }
                Err(outcome) => outcome,
            };
            reports.push(AgentReport {
                agent_id: agent_id.clone(),
                symbol: Some(symbol),
                outcome,
            });
        }
    }

    /// Gates and decision for one agent on one symbol. `Ok` is a vote to defer.
    async fn evaluate_symbol(
        &self,
        agent: &AgentConfig,
        agent_id: &AgentId,
        symbol: &Symbol,
    ) -> Result<AgentSignal, AgentOutcome> {
        let breaker = &self.services.breaker;
        let rejected = |rejection: Rejection| {
            AgentOutcome::Rejected(self.reject(Some(agent_id), Some(symbol), rejection))
        };

        breaker.check(symbol).map_err(rejected)?;

        let snapshot = self.services.market_data.snapshot(Some(agent_id), symbol).await.map_err(|e| {
            rejected(Rejection::new(
                RejectReason::MarketDataUnavailable,
                format!("{symbol}: {e}"),
            ))
        })?;

        let observation = MarketObservation {
            candles: &snapshot.candles,
            funding: &snapshot.funding,
            book: snapshot.book.as_ref(),
        };
        if let Some(state) = breaker.evaluate(symbol, observation) {
            if state.activated_at_ms == self.services.clock.now_ms() {
                Metrics::circuit_breaker_tripped(state.reason.label());
            }
            return Err(rejected(state.to_rejection()));
        }

        let raw = self.strategy.decide(agent, &snapshot).await.map_err(|e| {
            warn!(agent = %agent_id, %symbol, error = %e, "Strategy call failed");
            AgentOutcome::Failed(e.to_string())
        })?;

        let decision = raw.validate().map_err(|e| {
            error!(agent = %agent_id, %symbol, error = %e, raw = ?raw, "Strategy contract violation");
            Metrics::rejection("CONTRACT_VIOLATION");
            AgentOutcome::ContractViolation(e.to_string())
        })?;

        self.services.journal.record(JournalRecord::Decision {
            agent_id: agent_id.clone(),
            symbol: symbol.clone(),
            signal: decision.signal,
            confidence: decision.confidence,
            reasoning: decision.reasoning.clone(),
            strategy_tag: decision.strategy_tag.clone(),
        });

        if decision.signal.is_hold() {
            debug!(agent = %agent_id, %symbol, "Hold");
            return Err(AgentOutcome::Hold);
        }

        let config = self.arbitrator.config();
        let confidence = normalize_confidence(decision.confidence, config.min_confidence, config.max_confidence)
            .ok_or_else(|| {
                rejected(Rejection::new(
                    RejectReason::LowConfidence,
                    format!(
                        "confidence {:.3} below {:.3}",
                        decision.confidence, config.min_confidence
                    ),
                ))
            })?;

        debug!(agent = %agent_id, %symbol, signal = %decision.signal, confidence, "Vote deferred");
        Ok(AgentSignal {
            agent_id: agent_id.clone(),
            symbol: symbol.clone(),
            signal: decision.signal,
            confidence,
            style: agent.style,
            timestamp_ms: self.services.clock.now_ms(),
        })
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    /// Contributor with the largest weighted vote on the winning side.
    fn lead_agent(&self, arbitration: &Arbitration, signals: &[AgentSignal]) -> Option<&AgentConfig> {
        let weights = &self.arbitrator.config().style_weights;
        let lead = signals
            .iter()
            .filter(|s| arbitration.contributors.contains(&s.agent_id))
            .max_by(|a, b| {
                (a.confidence * weights.weight(a.style)).total_cmp(&(b.confidence * weights.weight(b.style)))
            })?;
        self.agents.iter().find(|a| a.agent_id() == lead.agent_id)
    }

    async fn execute(
        &self,
        arbitration: &Arbitration,
        side: PositionSide,
        signals: &[AgentSignal],
        equities: &HashMap<AgentId, Decimal>,
    ) -> ExecutionReport {
        let symbol = &arbitration.symbol;
        let Some(lead) = self.lead_agent(arbitration, signals) else {
            // Contributors always come from configured agents.
            return ExecutionReport {
                symbol: symbol.clone(),
                agent_id: AgentId::new("unknown"),
                side,
                reversed_pnl: None,
                outcome: ExecutionOutcome::Failed("no contributing agent".to_string()),
            };
        };
        let agent_id = lead.agent_id();
        let mut reversed_pnl = None;
        let outcome = match self
            .execute_for(lead, &agent_id, symbol, side, equities, &mut reversed_pnl)
            .await
        {
            Ok(position) => ExecutionOutcome::Opened(position),
            Err(ExecutionOutcome::Rejected(rejection)) => {
                ExecutionOutcome::Rejected(self.reject(Some(&agent_id), Some(symbol), rejection))
            }
            Err(other) => other,
        };
        ExecutionReport {
            symbol: symbol.clone(),
            agent_id,
            side,
            reversed_pnl,
            outcome,
        }
    }

    async fn execute_for(
        &self,
        lead: &AgentConfig,
        agent_id: &AgentId,
        symbol: &Symbol,
        side: PositionSide,
        equities: &HashMap<AgentId, Decimal>,
        reversed_pnl: &mut Option<Decimal>,
    ) -> Result<Position, ExecutionOutcome> {
        let orders = &self.services.orders;
        let book = orders.book();
        let reject = |reason: RejectReason, message: String| ExecutionOutcome::Rejected(Rejection::new(reason, message));
        let failed = |error: String| {
            warn!(%symbol, agent = %agent_id, %error, "Execution failed");
            ExecutionOutcome::Failed(error)
        };

        let existing = book.get(symbol);
        match &existing {
            Some(p) if p.side == side => {
                return Err(reject(
                    RejectReason::PositionExists,
                    format!("{symbol} already {side}"),
                ));
            }
            Some(_) => {}
            None => self
                .exposure
                .check_stacking(book.len())
                .map_err(ExecutionOutcome::Rejected)?,
        }

        let snapshot: MarketSnapshot = self.services.market_data.cached(symbol).ok_or_else(|| {
            reject(
                RejectReason::MarketDataUnavailable,
                format!("no market snapshot for {symbol}"),
            )
        })?;

        let regime = self.regime.snapshot(&snapshot.candles);
        let adjustment = regime.as_ref().map_or(RegimeAdjustment::NEUTRAL, |r| r.adjustment);
        if adjustment.skip_entry {
            let regime = regime.as_ref().map(|r| r.regime);
            return Err(reject(
                RejectReason::RegimeSkip,
                format!("{symbol} regime {regime:?} skips entries"),
            ));
        }

        let correlation = self
            .exposure
            .correlation_multiplier(symbol, side, &book.open_positions());
        let filters = orders.symbol_filters(symbol).await.map_err(|e| failed(e.to_string()))?;
        let leverage = self.sizing.effective_leverage(lead.leverage, &filters);
        let equity = match equities.get(agent_id) {
            Some(equity) => *equity,
            None => orders.account_equity(agent_id).await.map_err(|e| failed(e.to_string()))?,
        };

        let qty = self.sizing.position_size(&SizingInput {
            equity,
            price: snapshot.mark,
            atr: regime.as_ref().map_or(0.0, |r| r.atr_fast),
            risk_fraction: lead.risk_fraction,
            leverage,
            filters: &filters,
            adjust: adjustment.size_multiplier * correlation,
        });
        if qty.is_zero() {
            return Err(reject(
                RejectReason::BelowMinNotional,
                format!("{symbol} sized to zero at {}", snapshot.mark),
            ));
        }

        if let Some(open) = existing {
            self.reversal
                .check(symbol, side, true)
                .map_err(ExecutionOutcome::Rejected)?;
            match orders.close(&open, ExitReason::Reversal).await {
                Ok(ExitOutcome::Closed { realized_pnl }) => {
                    info!(%symbol, from = %open.side, to = %side, %realized_pnl, "Position reversed");
                    *reversed_pnl = Some(realized_pnl);
                }
                Ok(ExitOutcome::Skipped(rejection)) => return Err(ExecutionOutcome::Rejected(rejection)),
                Err(e) => return Err(failed(e.to_string())),
            }
        }

        let request = PlaceRequest {
            agent_id: agent_id.clone(),
            symbol: symbol.clone(),
            side,
            qty,
            leverage,
            tp_pct: lead.tp_pct * adjustment.tp_factor,
            sl_pct: lead.sl_pct * adjustment.sl_factor,
        };
        match orders.place(&request).await {
            Ok(PlaceOutcome::Opened(position)) => {
                self.reversal.record_entry(symbol, side);
                Ok(position)
            }
            Ok(PlaceOutcome::Rejected(rejection)) => Err(ExecutionOutcome::Rejected(rejection)),
            Err(e) => Err(failed(e.to_string())),
        }
    }

    /// Count, log and journal a soft rejection.
    fn reject(&self, agent: Option<&AgentId>, symbol: Option<&Symbol>, rejection: Rejection) -> Rejection {
        Metrics::rejection(rejection.reason.as_str());
        info!(
            agent = ?agent.map(AgentId::as_str),
            symbol = ?symbol.map(Symbol::as_str),
            reason = %rejection.reason,
            message = %rejection.message,
            "Rejected"
        );
        self.services.journal.record(JournalRecord::Rejection {
            agent_id: agent.cloned(),
            symbol: symbol.cloned(),
            reason: rejection.reason,
            message: rejection.message.clone(),
        });
        rejection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{RawDecision, ScriptedStrategy};
    use cohort_core::{Candle, ManualClock, Price, Size, SymbolFilters};
    use cohort_executor::OrderManagerConfig;
    use cohort_position::PositionBook;
    use cohort_venue::{PaperVenue, RetryPolicy};
    use rust_decimal_macros::dec;

    const CONFIG: &str = r#"
        [[agents]]
        id = "trend"
        style = "trend_following"
        symbols = ["BTCUSDT"]

        [[agents]]
        id = "revert"
        style = "mean_reversion"
        symbols = ["BTCUSDT"]
    "#;

    struct Harness {
        clock: Arc<ManualClock>,
        venue: Arc<PaperVenue>,
        strategy: Arc<ScriptedStrategy>,
        orchestrator: Orchestrator,
    }

    fn harness() -> Harness {
        let config = AppConfig::from_toml(CONFIG).unwrap();

        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let venue = Arc::new(PaperVenue::new(clock.clone()));
        venue.add_symbol(
            SymbolFilters {
                symbol: Symbol::new("BTCUSDT"),
                tick_size: Price::new(dec!(0.01)),
                step_size: Size::new(dec!(0.001)),
                min_qty: Size::new(dec!(0.001)),
                max_qty: Size::new(dec!(1000)),
                min_notional: dec!(5),
                max_leverage: 50,
            },
            Price::new(dec!(100)),
        );

        let journal = Arc::new(TradeJournal::disabled(clock.clone()));
        let risk = Arc::new(DailyLossTracker::new(config.kill_switch.clone(), clock.clone()));
        let orders = Arc::new(OrderManager::new(
            OrderManagerConfig {
                retry: RetryPolicy::none(),
                ..OrderManagerConfig::default()
            },
            venue.clone(),
            Arc::new(PositionBook::new()),
            risk.clone(),
            journal.clone(),
            clock.clone(),
        ));
        let services = SharedServices {
            orders: orders.clone(),
            market_data: Arc::new(MarketDataCache::new(config.market_data.clone(), orders, clock.clone())),
            risk,
            breaker: Arc::new(CircuitBreaker::new(config.circuit_breaker.clone(), clock.clone())),
            journal,
            clock: clock.clone(),
        };
        let strategy = Arc::new(ScriptedStrategy::new());
        let orchestrator = Orchestrator::new(&config, services, strategy.clone());
        Harness {
            clock,
            venue,
            strategy,
            orchestrator,
        }
    }

    fn outcome_for<'a>(report: &'a CycleReport, agent: &str) -> &'a AgentOutcome {
        &report
            .agents
            .iter()
            .find(|r| r.agent_id.as_str() == agent)
            .unwrap()
            .outcome
    }

    #[tokio::test]
    async fn test_agreeing_agents_open_one_position() {
        let h = harness();
        h.strategy.set("trend", "BTCUSDT", RawDecision::new("long", 0.8, "uptrend"));
        h.strategy.set("revert", "BTCUSDT", RawDecision::new("long", 0.6, "oversold"));

        let report = h.orchestrator.run_cycle().await;

        assert_eq!(report.arbitrations.len(), 1);
        assert_eq!(report.arbitrations[0].signal, Signal::Long);
        assert_eq!(report.executions.len(), 1);
        let opened = report.opened();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].side, PositionSide::Long);
        // Trend vote weighs 0.8 * 1.2 against 0.6 * 1.0.
        assert_eq!(opened[0].agent_id, AgentId::new("trend"));
        // margin 10000 * 0.02 = 200, x5 leverage at 100.
        assert_eq!(opened[0].qty, Size::new(dec!(10)));
        assert!(h.orchestrator.services().orders.book().has_position(&Symbol::new("BTCUSDT")));
        // Entry plus TP and SL.
        assert_eq!(h.venue.submissions().len(), 3);
    }

    #[tokio::test]
    async fn test_tied_votes_hold_with_conflict() {
        let h = harness();
        h.strategy.set("trend", "BTCUSDT", RawDecision::new("long", 0.5, ""));
        // 0.6 * 1.0 == 0.5 * 1.2
        h.strategy.set("revert", "BTCUSDT", RawDecision::new("short", 0.6, ""));

        let report = h.orchestrator.run_cycle().await;

        assert_eq!(report.arbitrations[0].signal, Signal::Hold);
        assert_eq!(
            report.arbitrations[0].conflict.as_ref().map(|c| c.reason),
            Some(RejectReason::ArbitrationConflict)
        );
        assert!(report.executions.is_empty());
        assert!(h.venue.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_contract_violation_isolated_to_agent() {
        let h = harness();
        h.strategy.set("trend", "BTCUSDT", RawDecision::new("moon", 0.9, ""));
        h.strategy.set("revert", "BTCUSDT", RawDecision::new("long", 0.9, ""));

        let report = h.orchestrator.run_cycle().await;

        assert_eq!(report.contract_violations().len(), 1);
        assert!(matches!(
            outcome_for(&report, "revert"),
            AgentOutcome::Deferred { signal: Signal::Long, .. }
        ));
        assert_eq!(report.opened().len(), 1);
        assert_eq!(report.opened()[0].agent_id, AgentId::new("revert"));
    }

    #[tokio::test]
    async fn test_strategy_failure_degrades_to_no_action() {
        let h = harness();
        h.strategy.fail("trend", "BTCUSDT", "model timeout");

        let report = h.orchestrator.run_cycle().await;

        assert!(matches!(outcome_for(&report, "trend"), AgentOutcome::Failed(_)));
        assert_eq!(outcome_for(&report, "revert"), &AgentOutcome::Hold);
        assert!(report.executions.is_empty());
    }

    #[tokio::test]
    async fn test_halted_agent_is_skipped() {
        let h = harness();
        h.orchestrator.services().risk.halt(&AgentId::new("trend"), "operator");
        h.strategy.set("trend", "BTCUSDT", RawDecision::new("long", 0.9, ""));

        let report = h.orchestrator.run_cycle().await;

        match outcome_for(&report, "trend") {
            AgentOutcome::Rejected(r) => assert_eq!(r.reason, RejectReason::KillSwitch),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(report.executions.is_empty());
    }

    #[tokio::test]
    async fn test_low_confidence_vote_dropped() {
        let h = harness();
        h.strategy.set("trend", "BTCUSDT", RawDecision::new("long", 0.1, ""));

        let report = h.orchestrator.run_cycle().await;

        match outcome_for(&report, "trend") {
            AgentOutcome::Rejected(r) => assert_eq!(r.reason, RejectReason::LowConfidence),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(report.arbitrations[0].voters, 0);
    }

    #[tokio::test]
    async fn test_same_direction_entry_rejected_when_position_open() {
        let h = harness();
        h.strategy.set("trend", "BTCUSDT", RawDecision::new("long", 0.9, ""));
        h.orchestrator.run_cycle().await;

        let report = h.orchestrator.run_cycle().await;
        match &report.executions[0].outcome {
            ExecutionOutcome::Rejected(r) => assert_eq!(r.reason, RejectReason::PositionExists),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(report.cycle, 2);
    }

    #[tokio::test]
    async fn test_reversal_blocked_by_cooldown_then_allowed() {
        let h = harness();
        let btc = Symbol::new("BTCUSDT");
        h.strategy.set("trend", "BTCUSDT", RawDecision::new("long", 0.9, ""));
        h.orchestrator.run_cycle().await;

        h.strategy.set("trend", "BTCUSDT", RawDecision::new("short", 0.9, ""));
        h.clock.advance(Duration::from_secs(60));
        let report = h.orchestrator.run_cycle().await;
        match &report.executions[0].outcome {
            ExecutionOutcome::Rejected(r) => assert_eq!(r.reason, RejectReason::ReversalCooldown),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(h.orchestrator.services().orders.book().get(&btc).unwrap().side, PositionSide::Long);

        h.clock.advance(Duration::from_secs(900));
        let report = h.orchestrator.run_cycle().await;
        let execution = &report.executions[0];
        assert_eq!(execution.reversed_pnl, Some(Decimal::ZERO));
        assert!(matches!(execution.outcome, ExecutionOutcome::Opened(_)));
        assert_eq!(h.orchestrator.services().orders.book().get(&btc).unwrap().side, PositionSide::Short);
    }

    #[tokio::test]
    async fn test_dead_market_skips_entry() {
        let h = harness();
        let btc = Symbol::new("BTCUSDT");
        let bar = |i: i64, range: Decimal| Candle {
            open_time_ms: i * 300_000,
            open: Price::new(dec!(100)),
            high: Price::new(dec!(100) + range / dec!(2)),
            low: Price::new(dec!(100) - range / dec!(2)),
            close: Price::new(dec!(100)),
            volume: Size::new(dec!(1)),
        };
        // Wide bars then seven nearly flat ones: low regime with ATR well under 0.2%.
        let candles = (0..22)
            .map(|i| bar(i, if i < 15 { dec!(1) } else { dec!(0.02) }))
            .collect();
        h.venue.set_candles(&btc, candles);
        h.strategy.set("trend", "BTCUSDT", RawDecision::new("long", 0.9, ""));

        let report = h.orchestrator.run_cycle().await;
        match &report.executions[0].outcome {
            ExecutionOutcome::Rejected(r) => assert_eq!(r.reason, RejectReason::RegimeSkip),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(h.venue.submissions().is_empty());
    }
}
