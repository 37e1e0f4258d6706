//! End-to-end protection tests.
//!
//! The orchestrator opens a position against the paper venue, then the
//! background monitors repair or exit it through the order manager.

use std::sync::Arc;
use std::time::Duration;

use cohort_bot::{AppConfig, MarketDataCache, Orchestrator, RawDecision, ScriptedStrategy, SharedServices};
use cohort_core::{ManualClock, OrderType, PositionSide, Price, RejectReason, Size, Symbol, SymbolFilters};
use cohort_executor::OrderManager;
use cohort_position::{
    ExitOutcome, ExitReason, PositionBook, ProtectionActions, ProtectionMonitor,
};
use cohort_risk::{CircuitBreaker, DailyLossTracker};
use cohort_telemetry::TradeJournal;
use cohort_venue::PaperVenue;
use rust_decimal_macros::dec;

const CONFIG: &str = r#"
    [[agents]]
    id = "breakout-1"
    style = "breakout"
    symbols = ["SOLUSDT"]

    [order_manager.retry]
    max_attempts = 1
"#;

struct Fixture {
    clock: Arc<ManualClock>,
    venue: Arc<PaperVenue>,
    config: AppConfig,
    orders: Arc<OrderManager>,
    orchestrator: Orchestrator,
}

fn symbol() -> Symbol {
    Symbol::new("SOLUSDT")
}

fn fixture() -> Fixture {
    let config = AppConfig::from_toml(CONFIG).unwrap();
    config.validate().unwrap();

    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let venue = Arc::new(PaperVenue::new(clock.clone()));
    venue.add_symbol(
        SymbolFilters {
            symbol: symbol(),
            tick_size: Price::new(dec!(0.01)),
            step_size: Size::new(dec!(0.001)),
            min_qty: Size::new(dec!(0.001)),
            max_qty: Size::new(dec!(10000)),
            min_notional: dec!(5),
            max_leverage: 20,
        },
        Price::new(dec!(100)),
    );

    let journal = Arc::new(TradeJournal::disabled(clock.clone()));
    let risk = Arc::new(DailyLossTracker::new(config.kill_switch.clone(), clock.clone()));
    let orders = Arc::new(OrderManager::new(
        config.order_manager.clone(),
        venue.clone(),
        Arc::new(PositionBook::new()),
        risk.clone(),
        journal.clone(),
        clock.clone(),
    ));
    let services = SharedServices {
        orders: orders.clone(),
        market_data: Arc::new(MarketDataCache::new(config.market_data.clone(), orders.clone(), clock.clone())),
        risk,
        breaker: Arc::new(CircuitBreaker::new(config.circuit_breaker.clone(), clock.clone())),
        journal,
        clock: clock.clone(),
    };

    let strategy = Arc::new(ScriptedStrategy::new());
    strategy.set("breakout-1", "SOLUSDT", RawDecision::new("long", 0.9, "range break"));
    let orchestrator = Orchestrator::new(&config, services, strategy);

    Fixture {
        clock,
        venue,
        config,
        orders,
        orchestrator,
    }
}

#[tokio::test]
async fn test_sentinel_reattaches_missing_stop_once_then_debounces() {
    let f = fixture();
    let sol = symbol();

    let report = f.orchestrator.run_cycle().await;
    assert_eq!(report.opened().len(), 1);
    let position = f.orders.book().get(&sol).unwrap();
    assert_eq!(position.side, PositionSide::Long);
    assert!(position.stop_loss.is_some());
    // Entry, take-profit, stop-loss.
    assert_eq!(f.venue.submissions().len(), 3);

    // Past the protection dedup window, the stop disappears at the venue.
    f.clock.advance(Duration::from_secs(31));
    assert_eq!(f.venue.drop_open_orders(&sol, OrderType::StopMarket), 1);

    let actions: Arc<dyn ProtectionActions> = f.orders.clone();
    let sentinel = ProtectionMonitor::sentinel(
        &f.config.sentinel,
        f.orders.book().clone(),
        actions,
        f.clock.clone(),
    );

    let first = sentinel.run_cycle().await;
    assert_eq!(first.missing_protection, 1);
    assert_eq!(first.repaired, 1);
    let after_repair = f.venue.submissions();
    assert_eq!(after_repair.len(), 4);
    assert_eq!(after_repair[3].order_type, OrderType::StopMarket);
    assert!(f
        .venue
        .resting_orders(&sol)
        .iter()
        .any(|o| o.order_type == OrderType::StopMarket));

    // The stop goes missing again inside the sentinel debounce window.
    assert_eq!(f.venue.drop_open_orders(&sol, OrderType::StopMarket), 1);
    for _ in 0..2 {
        let pass = sentinel.run_cycle().await;
        assert_eq!(pass.missing_protection, 1);
        assert_eq!(pass.debounced, 1);
        assert_eq!(pass.repaired, 0);
    }
    assert_eq!(f.venue.submissions().len(), 4);
}

#[tokio::test]
async fn test_live_monitor_forces_exit_once_on_stop_breach() {
    let f = fixture();
    let sol = symbol();

    f.orchestrator.run_cycle().await;
    let position = f.orders.book().get(&sol).unwrap();
    assert_eq!(position.stop_loss, Some(Price::new(dec!(99))));

    let actions: Arc<dyn ProtectionActions> = f.orders.clone();
    let live = ProtectionMonitor::live(
        &f.config.live_monitor,
        f.orders.book().clone(),
        actions,
        f.clock.clone(),
    );

    f.venue.set_mark(&sol, Price::new(dec!(98.5)));
    let pass = live.run_cycle().await;
    assert_eq!(pass.forced_exits, 1);
    assert!(!f.orders.book().has_position(&sol));
    assert!(f.venue.position(&sol).is_none());

    // A late exit from another path observes the finished exit and no-ops.
    let submitted = f.venue.submissions().len();
    match f.orders.close(&position, ExitReason::Reversal).await.unwrap() {
        ExitOutcome::Skipped(rejection) => assert_eq!(rejection.reason, RejectReason::ExitInFlight),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(f.venue.submissions().len(), submitted);

    // The loss feeds the agent's kill-switch streak.
    let state = f
        .orchestrator
        .services()
        .risk
        .snapshot(&position.agent_id)
        .unwrap();
    assert_eq!(state.consecutive_losses, 1);
}
