//! Per-symbol market data cache.
//!
//! Agents trading the same symbol share one snapshot per refresh. Mark price,
//! book top and funding are volatility-critical and refreshed once older
//! than `max_volatile_age_secs`; candles refresh on their own slower cadence.
//! Funding samples are kept as a short history for the circuit breaker.
//!
//! Reads go through the [`OrderManager`] so they share its retry policy and
//! feed the requesting agent's latency window.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use cohort_core::{AgentId, BookTop, Candle, Clock, FundingSnapshot, Price, Symbol};
use cohort_executor::{ExecutorResult, OrderManager};

use crate::error::{AppError, AppResult};

/// Upper bound on `max_volatile_age_secs`.
pub const MAX_VOLATILE_AGE_SECS: u64 = 10;

// ============================================================================
// MarketDataConfig
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDataConfig {
    /// Refresh mark/book/funding once older than this. Must be below 10s.
    /// Default: 5s.
    #[serde(default = "default_max_volatile_age_secs")]
    pub max_volatile_age_secs: u64,
    /// Candle refresh cadence. Default: 60s.
    #[serde(default = "default_candle_refresh_secs")]
    pub candle_refresh_secs: u64,
    #[serde(default = "default_candle_interval")]
    pub candle_interval: String,
    /// Candles fetched per refresh. Default: 64.
    #[serde(default = "default_candle_limit")]
    pub candle_limit: usize,
    #[serde(default = "default_book_depth")]
    pub book_depth: usize,
    /// Funding history retained for spike detection. Default: 7200s.
    #[serde(default = "default_funding_history_secs")]
    pub funding_history_secs: u64,
}

fn default_max_volatile_age_secs() -> u64 {
    5
}

fn default_candle_refresh_secs() -> u64 {
    60
}

fn default_candle_interval() -> String {
    "5m".to_string()
}

fn default_candle_limit() -> usize {
    64
}

fn default_book_depth() -> usize {
    5
}

fn default_funding_history_secs() -> u64 {
    7_200
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            max_volatile_age_secs: default_max_volatile_age_secs(),
            candle_refresh_secs: default_candle_refresh_secs(),
            candle_interval: default_candle_interval(),
            candle_limit: default_candle_limit(),
            book_depth: default_book_depth(),
            funding_history_secs: default_funding_history_secs(),
        }
    }
}

impl MarketDataConfig {
    pub fn validate(&self) -> AppResult<()> {
        if self.max_volatile_age_secs == 0 || self.max_volatile_age_secs >= MAX_VOLATILE_AGE_SECS {
            return Err(AppError::Config(format!(
                "market_data.max_volatile_age_secs must be in [1, {MAX_VOLATILE_AGE_SECS}), got {}",
                self.max_volatile_age_secs
            )));
        }
        if self.candle_refresh_secs == 0 || self.candle_limit == 0 {
            return Err(AppError::Config(
                "market_data.candle_refresh_secs and candle_limit must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// MarketSnapshot
// ============================================================================

/// Market view of one symbol handed to strategies and gates.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    pub symbol: Symbol,
    pub mark: Price,
    /// Oldest first.
    pub candles: Vec<Candle>,
    /// Oldest first.
    pub funding: Vec<FundingSnapshot>,
    pub book: Option<BookTop>,
    pub volatile_at_ms: i64,
    pub candles_at_ms: i64,
}

// ============================================================================
// MarketDataCache
// ============================================================================

pub struct MarketDataCache {
    config: MarketDataConfig,
    orders: Arc<OrderManager>,
    entries: DashMap<Symbol, MarketSnapshot>,
    clock: Arc<dyn Clock>,
}

impl MarketDataCache {
    #[must_use]
    pub fn new(config: MarketDataConfig, orders: Arc<OrderManager>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            orders,
            entries: DashMap::new(),
            clock,
        }
    }

    /// Cached snapshot without refreshing.
    #[must_use]
    pub fn cached(&self, symbol: &Symbol) -> Option<MarketSnapshot> {
        self.entries.get(symbol).map(|e| e.value().clone())
    }

    /// Fresh snapshot for `symbol`, refreshing whatever is stale.
    ///
    /// Mark price and candles are required; a failed book fetch leaves the
    /// book empty rather than failing the snapshot. Venue latency is charged
    /// to `agent`.
    pub async fn snapshot(&self, agent: Option<&AgentId>, symbol: &Symbol) -> ExecutorResult<MarketSnapshot> {
        let now = self.clock.now_ms();
        let volatile_ms = (self.config.max_volatile_age_secs as i64) * 1000;
        let candle_ms = (self.config.candle_refresh_secs as i64) * 1000;

        // Clone out so no map guard is held across an await.
        let cached = self.cached(symbol);
        let volatile_fresh = cached.as_ref().is_some_and(|s| now - s.volatile_at_ms < volatile_ms);
        let candles_fresh = cached.as_ref().is_some_and(|s| now - s.candles_at_ms < candle_ms);

        if let Some(snapshot) = cached.as_ref().filter(|_| volatile_fresh && candles_fresh) {
            return Ok(snapshot.clone());
        }

        let mut snapshot = cached.unwrap_or_else(|| MarketSnapshot {
            symbol: symbol.clone(),
            mark: Price::ZERO,
            candles: Vec::new(),
            funding: Vec::new(),
            book: None,
            volatile_at_ms: 0,
            candles_at_ms: 0,
        });

        if !volatile_fresh {
            snapshot.mark = self.orders.mark_price(agent, symbol).await?;
            snapshot.book = match self.orders.order_book(agent, symbol, self.config.book_depth).await {
                Ok(book) => Some(book),
                Err(e) => {
                    warn!(%symbol, error = %e, "Order book unavailable");
                    None
                }
            };
            match self.orders.funding_rate(agent, symbol).await {
                Ok(funding) => self.push_funding(&mut snapshot.funding, funding, now),
                Err(e) => warn!(%symbol, error = %e, "Funding rate unavailable"),
            }
            snapshot.volatile_at_ms = now;
        }

        if !candles_fresh {
            let interval = self.config.candle_interval.as_str();
            snapshot.candles = self
                .orders
                .klines(agent, symbol, interval, self.config.candle_limit)
                .await?;
            snapshot.candles_at_ms = now;
        }

        debug!(
            %symbol,
            mark = %snapshot.mark,
            candles = snapshot.candles.len(),
            funding_samples = snapshot.funding.len(),
            "Market data refreshed"
        );
        self.entries.insert(symbol.clone(), snapshot.clone());
        Ok(snapshot)
    }

    fn push_funding(&self, history: &mut Vec<FundingSnapshot>, sample: FundingSnapshot, now: i64) {
        if history.last().map_or(true, |last| last.timestamp_ms != sample.timestamp_ms) {
            history.push(sample);
        }
        let horizon = now - (self.config.funding_history_secs as i64) * 1000;
        history.retain(|f| f.timestamp_ms >= horizon);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::{ManualClock, Size, SymbolFilters};
    use cohort_executor::OrderManagerConfig;
    use cohort_position::PositionBook;
    use cohort_risk::{DailyLossTracker, KillSwitchConfig};
    use cohort_telemetry::TradeJournal;
    use cohort_venue::{PaperVenue, RetryPolicy};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Setup {
        clock: Arc<ManualClock>,
        venue: Arc<PaperVenue>,
        risk: Arc<DailyLossTracker>,
        cache: MarketDataCache,
    }

    fn setup() -> Setup {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let venue = Arc::new(PaperVenue::new(clock.clone()));
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
        let risk = Arc::new(DailyLossTracker::new(KillSwitchConfig::default(), clock.clone()));
        let orders = Arc::new(OrderManager::new(
            OrderManagerConfig {
                retry: RetryPolicy::none(),
                ..OrderManagerConfig::default()
            },
            venue.clone(),
            Arc::new(PositionBook::new()),
            risk.clone(),
            Arc::new(TradeJournal::disabled(clock.clone())),
            clock.clone(),
        ));
        let cache = MarketDataCache::new(MarketDataConfig::default(), orders, clock.clone());
        Setup { clock, venue, risk, cache }
    }

    #[tokio::test]
    async fn test_volatile_fields_refresh_after_max_age() {
        let Setup { clock, venue, cache, .. } = setup();
        let eth = Symbol::new("ETHUSDT");

        assert_eq!(cache.snapshot(None, &eth).await.unwrap().mark, Price::new(dec!(2000)));
        venue.set_mark(&eth, Price::new(dec!(2010)));

        clock.advance(Duration::from_secs(4));
        assert_eq!(cache.snapshot(None, &eth).await.unwrap().mark, Price::new(dec!(2000)));
        assert_eq!(venue.call_count("get_mark_price"), 1);

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.snapshot(None, &eth).await.unwrap().mark, Price::new(dec!(2010)));
        assert_eq!(venue.call_count("get_mark_price"), 2);
        // Candles are still inside their 60s cadence.
        assert_eq!(venue.call_count("get_klines"), 1);
    }

    #[tokio::test]
    async fn test_funding_history_accumulates_distinct_samples() {
        let Setup { clock, venue, cache, .. } = setup();
        let eth = Symbol::new("ETHUSDT");

        cache.snapshot(None, &eth).await.unwrap();
        clock.advance(Duration::from_secs(10));
        // Same venue sample: not duplicated.
        cache.snapshot(None, &eth).await.unwrap();
        venue.set_funding(&eth, dec!(0.0005));
        clock.advance(Duration::from_secs(10));
        let snapshot = cache.snapshot(None, &eth).await.unwrap();
        assert_eq!(snapshot.funding.len(), 2);
        assert_eq!(snapshot.funding[1].rate, dec!(0.0005));
    }

    #[tokio::test]
    async fn test_refresh_latency_charged_to_requesting_agent() {
        let Setup { venue, risk, cache, .. } = setup();
        let agent = AgentId::new("scalper-1");
        venue.set_latency(Duration::from_millis(5));

        cache.snapshot(Some(&agent), &Symbol::new("ETHUSDT")).await.unwrap();
        let state = risk.snapshot(&agent).unwrap();
        // Mark, book, funding and candles.
        assert_eq!(state.latency_samples.len(), 4);
    }

    #[tokio::test]
    async fn test_unknown_symbol_fails() {
        let Setup { cache, .. } = setup();
        assert!(cache.snapshot(None, &Symbol::new("NOPE")).await.is_err());
    }

    #[test]
    fn test_volatile_age_must_stay_below_ten_seconds() {
        let config = MarketDataConfig {
            max_volatile_age_secs: 10,
            ..MarketDataConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(MarketDataConfig::default().validate().is_ok());
    }
}
