//! Advisory per-symbol mutual exclusion.
//!
//! One mutex guards the lock table. `acquire` never waits for another holder:
//! it either records the lock or returns `false`. A release after a failed
//! trade puts the symbol into a cooldown during which `acquire` fails.
//!
//! The lock is advisory. If the table itself cannot be taken within
//! `lock_timeout_ms`, `acquire` grants the request and logs an error instead
//! of blocking the trading path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use cohort_core::{AgentId, Clock, Symbol};

use crate::error::{PositionError, PositionResult};

// ============================================================================
// SymbolLockConfig
// ============================================================================

/// Symbol lock configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolLockConfig {
    /// Cooldown after a failed trade before the symbol can be locked again.
    /// Default: 300s.
    #[serde(default = "default_failure_cooldown_secs")]
    pub failure_cooldown_secs: u64,
    /// A lock held longer than this is considered abandoned and may be taken over.
    /// Default: 600s.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// Maximum wait for the lock table itself before failing open.
    /// Default: 50ms.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_failure_cooldown_secs() -> u64 {
    300
}

fn default_stale_after_secs() -> u64 {
    600
}

fn default_lock_timeout_ms() -> u64 {
    50
}

impl Default for SymbolLockConfig {
    fn default() -> Self {
        Self {
            failure_cooldown_secs: default_failure_cooldown_secs(),
            stale_after_secs: default_stale_after_secs(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl SymbolLockConfig {
    pub fn validate(&self) -> PositionResult<()> {
        if self.lock_timeout_ms == 0 {
            return Err(PositionError::InvalidConfig(
                "lock_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.stale_after_secs == 0 {
            return Err(PositionError::InvalidConfig(
                "stale_after_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SymbolLock
// ============================================================================

/// Holder of a symbol lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEntry {
    pub agent_id: AgentId,
    pub acquired_at_ms: i64,
}

#[derive(Debug, Default)]
struct LockTable {
    held: HashMap<Symbol, LockEntry>,
    cooldown_until: HashMap<Symbol, i64>,
}

/// Per-symbol advisory lock with failure cooldown.
pub struct SymbolLock {
    table: Mutex<LockTable>,
    config: SymbolLockConfig,
    clock: Arc<dyn Clock>,
}

impl SymbolLock {
    #[must_use]
    pub fn new(config: SymbolLockConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            config,
            clock,
        }
    }

    fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.config.lock_timeout_ms)
    }

    /// Try to lock `symbol` for `agent`.
    ///
    /// Returns `false` if another holder has it or the symbol is cooling down.
    pub fn acquire(&self, symbol: &Symbol, agent: &AgentId) -> bool {
        let Some(mut table) = self.table.try_lock_for(self.lock_timeout()) else {
            error!(%symbol, %agent, "Symbol lock table unavailable, granting lock");
            return true;
        };
        let now = self.clock.now_ms();

        if let Some(&until) = table.cooldown_until.get(symbol) {
            if now < until {
                debug!(%symbol, %agent, remaining_ms = until - now, "Symbol in failure cooldown");
                return false;
            }
            table.cooldown_until.remove(symbol);
        }

        if let Some(holder) = table.held.get(symbol) {
            let held_ms = now - holder.acquired_at_ms;
            if held_ms < (self.config.stale_after_secs as i64) * 1000 {
                debug!(%symbol, %agent, holder = %holder.agent_id, "Symbol already locked");
                return false;
            }
            warn!(
                %symbol,
                %agent,
                stale_holder = %holder.agent_id,
                held_ms,
                "Taking over stale symbol lock"
            );
        }

        table.held.insert(
            symbol.clone(),
            LockEntry {
                agent_id: agent.clone(),
                acquired_at_ms: now,
            },
        );
        true
    }

    /// Release `symbol`. A failed trade starts the cooldown.
    pub fn release(&self, symbol: &Symbol, success: bool) {
        let Some(mut table) = self.table.try_lock_for(self.lock_timeout()) else {
            error!(%symbol, success, "Symbol lock table unavailable, release dropped");
            return;
        };
        table.held.remove(symbol);
        if !success {
            let until = self.clock.now_ms() + (self.config.failure_cooldown_secs as i64) * 1000;
            table.cooldown_until.insert(symbol.clone(), until);
            info!(
                %symbol,
                cooldown_secs = self.config.failure_cooldown_secs,
                "Symbol released after failure, cooling down"
            );
        }
    }

    /// Current holder, if any.
    pub fn holder(&self, symbol: &Symbol) -> Option<LockEntry> {
        self.table.lock().held.get(symbol).cloned()
    }

    /// Whether `symbol` is inside its failure cooldown.
    pub fn in_cooldown(&self, symbol: &Symbol) -> bool {
        let now = self.clock.now_ms();
        self.table
            .lock()
            .cooldown_until
            .get(symbol)
            .is_some_and(|&until| now < until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn lock() -> (Arc<ManualClock>, SymbolLock) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        (clock.clone(), SymbolLock::new(SymbolLockConfig::default(), clock))
    }

    #[test]
    fn test_second_acquire_fails_until_release() {
        let (_, lock) = lock();
        let btc = Symbol::new("BTCUSDT");
        assert!(lock.acquire(&btc, &AgentId::new("a1")));
        assert!(!lock.acquire(&btc, &AgentId::new("a2")));
        assert_eq!(lock.holder(&btc).unwrap().agent_id, AgentId::new("a1"));

        lock.release(&btc, true);
        assert!(lock.acquire(&btc, &AgentId::new("a2")));
    }

    #[test]
    fn test_concurrent_acquire_grants_exactly_one() {
        let (_, lock) = lock();
        let symbol = Symbol::new("ETHUSDT");
        let granted = AtomicU32::new(0);

        std::thread::scope(|s| {
            for i in 0..8 {
                let lock = &lock;
                let symbol = &symbol;
                let granted = &granted;
                s.spawn(move || {
                    if lock.acquire(symbol, &AgentId::new(format!("agent-{i}"))) {
                        granted.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(granted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_sets_cooldown() {
        let (clock, lock) = lock();
        let sol = Symbol::new("SOLUSDT");
        assert!(lock.acquire(&sol, &AgentId::new("a1")));
        lock.release(&sol, false);

        assert!(lock.in_cooldown(&sol));
        assert!(!lock.acquire(&sol, &AgentId::new("a1")));

        clock.advance(Duration::from_secs(299));
        assert!(!lock.acquire(&sol, &AgentId::new("a1")));

        clock.advance(Duration::from_secs(1));
        assert!(lock.acquire(&sol, &AgentId::new("a1")));
        assert!(!lock.in_cooldown(&sol));
    }

    #[test]
    fn test_stale_lock_taken_over() {
        let (clock, lock) = lock();
        let sym = Symbol::new("XRPUSDT");
        assert!(lock.acquire(&sym, &AgentId::new("crashed")));
        clock.advance(Duration::from_secs(601));
        assert!(lock.acquire(&sym, &AgentId::new("a2")));
        assert_eq!(lock.holder(&sym).unwrap().agent_id, AgentId::new("a2"));
    }

    #[test]
    fn test_fails_open_when_table_unavailable() {
        let (_, lock) = lock();
        let sym = Symbol::new("BTCUSDT");
        let _guard = lock.table.lock();
        // Same thread holds the table: the timed try fails and the lock is granted.
        assert!(lock.acquire(&sym, &AgentId::new("a1")));
    }

    #[test]
    fn test_config_from_toml() {
        let config: SymbolLockConfig = toml::from_str("failure_cooldown_secs = 60").unwrap();
        assert_eq!(config.failure_cooldown_secs, 60);
        assert_eq!(config.stale_after_secs, 600);
        assert!(config.validate().is_ok());
    }
}
