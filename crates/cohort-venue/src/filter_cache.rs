//! Symbol filter cache.
//!
//! Caches per-symbol precision filters with a TTL so normalization does not
//! cost a venue round trip per order. Fetches happen outside the cache lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use cohort_core::{Clock, Symbol, SymbolFilters};

use crate::error::VenueResult;
use crate::retry::{retry, RetryPolicy};
use crate::venue::Venue;

/// Default time-to-live for cached filters.
pub const DEFAULT_FILTER_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct CacheEntry {
    filters: SymbolFilters,
    fetched_at_ms: i64,
}

/// TTL cache of symbol filters.
pub struct FilterCache {
    entries: Mutex<HashMap<Symbol, CacheEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl FilterCache {
    #[must_use]
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    /// Cached filters for `symbol` if present and not expired.
    pub fn get(&self, symbol: &Symbol) -> Option<SymbolFilters> {
        let now = self.clock.now_ms();
        let entries = self.entries.lock();
        entries
            .get(symbol)
            .filter(|e| now - e.fetched_at_ms < self.ttl.as_millis() as i64)
            .map(|e| e.filters.clone())
    }

    /// Store freshly fetched filters.
    ///
    /// A changed tick or step size is logged, since orders normalized with
    /// the old values may be rejected.
    pub fn insert(&self, filters: SymbolFilters) {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&filters.symbol) {
            let old = &existing.filters;
            if old.tick_size != filters.tick_size || old.step_size != filters.step_size {
                warn!(
                    symbol = %filters.symbol,
                    old_tick = %old.tick_size,
                    new_tick = %filters.tick_size,
                    old_step = %old.step_size,
                    new_step = %filters.step_size,
                    "Symbol filters changed"
                );
            }
        }
        entries.insert(
            filters.symbol.clone(),
            CacheEntry {
                filters,
                fetched_at_ms: now,
            },
        );
    }

    pub fn invalidate(&self, symbol: &Symbol) {
        self.entries.lock().remove(symbol);
    }

    /// Cached filters, fetching through the retry policy on miss or expiry.
    pub async fn get_or_fetch(
        &self,
        venue: &dyn Venue,
        policy: &RetryPolicy,
        symbol: &Symbol,
    ) -> VenueResult<SymbolFilters> {
        if let Some(filters) = self.get(symbol) {
            return Ok(filters);
        }
        debug!(%symbol, "Filter cache miss, fetching");
        let filters = retry(policy, "get_symbol_filters", || venue.get_symbol_filters(symbol)).await?;
        self.insert(filters.clone());
        Ok(filters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::PaperVenue;
    use cohort_core::{ManualClock, Price, Size};
    use rust_decimal_macros::dec;

    fn filters(symbol: &str) -> SymbolFilters {
        SymbolFilters {
            symbol: Symbol::new(symbol),
            tick_size: Price::new(dec!(0.01)),
            step_size: Size::new(dec!(0.001)),
            min_qty: Size::new(dec!(0.001)),
            max_qty: Size::new(dec!(1000)),
            min_notional: dec!(5),
            max_leverage: 50,
        }
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = FilterCache::new(DEFAULT_FILTER_TTL, clock.clone());
        let symbol = Symbol::new("SOLUSDT");
        cache.insert(filters("SOLUSDT"));

        clock.advance(Duration::from_secs(299));
        assert!(cache.get(&symbol).is_some());

        clock.advance(Duration::from_secs(1));
        assert!(cache.get(&symbol).is_none());
    }

    #[tokio::test]
    async fn test_get_or_fetch_hits_venue_once_within_ttl() {
        let clock = Arc::new(ManualClock::new(0));
        let venue = PaperVenue::new(clock.clone());
        venue.add_symbol(filters("SOLUSDT"), Price::new(dec!(150)));
        let cache = FilterCache::new(DEFAULT_FILTER_TTL, clock.clone());
        let symbol = Symbol::new("SOLUSDT");
        let policy = RetryPolicy::none();

        cache.get_or_fetch(&venue, &policy, &symbol).await.unwrap();
        cache.get_or_fetch(&venue, &policy, &symbol).await.unwrap();
        assert_eq!(venue.call_count("get_symbol_filters"), 1);

        clock.advance(Duration::from_secs(301));
        cache.get_or_fetch(&venue, &policy, &symbol).await.unwrap();
        assert_eq!(venue.call_count("get_symbol_filters"), 2);
    }
}
