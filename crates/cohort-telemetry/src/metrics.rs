//! Prometheus metrics for the cohort execution layer.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_int_gauge, Counter,
    CounterVec, Histogram, IntGauge,
};

/// Completed orchestrator cycles.
pub static CYCLES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("cohort_cycles_total", "Completed orchestrator cycles").unwrap()
});

/// Orchestrator cycle wall time in seconds.
pub static CYCLE_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "cohort_cycle_duration_seconds",
        "Orchestrator cycle wall time in seconds",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .unwrap()
});

/// Soft rejections by reason code.
/// Labels: reason (KILL_SWITCH, CIRCUIT_BREAKER, ...)
pub static REJECTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "cohort_rejections_total",
        "Soft rejections by reason code",
        &["reason"]
    )
    .unwrap()
});

/// Orders accepted by the venue.
/// Labels: kind (entry/exit/partial/take_profit/stop_loss)
pub static ORDERS_SUBMITTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "cohort_orders_submitted_total",
        "Orders accepted by the venue",
        &["kind"]
    )
    .unwrap()
});

/// Venue errors surfaced to the order manager.
/// Labels: action (retry/skip/fallback/fail)
pub static VENUE_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "cohort_venue_errors_total",
        "Venue errors surfaced after retry handling",
        &["action"]
    )
    .unwrap()
});

/// Kill-switch latches.
/// Labels: reason (daily_loss/consecutive_losses/api_lag/daily_drawdown/manual)
pub static KILL_SWITCH_TRIPS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "cohort_kill_switch_trips_total",
        "Kill-switch latches by trigger",
        &["reason"]
    )
    .unwrap()
});

/// Circuit-breaker pauses.
/// Labels: reason (spread_spike/funding_spike/book_spread)
pub static CIRCUIT_BREAKER_TRIPS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "cohort_circuit_breaker_trips_total",
        "Circuit-breaker pauses by detector",
        &["reason"]
    )
    .unwrap()
});

/// Protection repair attempts.
/// Labels: monitor (live/sentinel), outcome (reattached/duplicate/debounced/failed)
pub static PROTECTION_REPAIRS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "cohort_protection_repairs_total",
        "Protection repair attempts by monitor and outcome",
        &["monitor", "outcome"]
    )
    .unwrap()
});

/// Positions force-closed by the live monitor.
/// Labels: reason (take_profit/stop_loss)
pub static FORCED_EXITS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "cohort_forced_exits_total",
        "Positions force-closed on a local TP/SL breach",
        &["reason"]
    )
    .unwrap()
});

/// Currently open positions.
pub static OPEN_POSITIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("cohort_open_positions", "Currently open positions").unwrap()
});

/// Journal records dropped because the sink was full or closed.
pub static JOURNAL_DROPPED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "cohort_journal_dropped_total",
        "Journal records dropped without blocking"
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Record a completed cycle and its duration.
    pub fn cycle_completed(duration_secs: f64) {
        CYCLES_TOTAL.inc();
        CYCLE_DURATION_SECONDS.observe(duration_secs);
    }

    pub fn rejection(reason: &str) {
        REJECTIONS_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn order_submitted(kind: &str) {
        ORDERS_SUBMITTED_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn venue_error(action: &str) {
        VENUE_ERRORS_TOTAL.with_label_values(&[action]).inc();
    }

    pub fn kill_switch_tripped(reason: &str) {
        KILL_SWITCH_TRIPS_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn circuit_breaker_tripped(reason: &str) {
        CIRCUIT_BREAKER_TRIPS_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn protection_repair(monitor: &str, outcome: &str) {
        PROTECTION_REPAIRS_TOTAL
            .with_label_values(&[monitor, outcome])
            .inc();
    }

    pub fn forced_exit(reason: &str) {
        FORCED_EXITS_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn open_positions_set(count: i64) {
        OPEN_POSITIONS.set(count);
    }

    pub fn journal_dropped() {
        JOURNAL_DROPPED_TOTAL.inc();
    }
}
