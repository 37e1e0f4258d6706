//! Open position store.
//!
//! `PositionBook` is the single owned record of positions the bot holds. It
//! is created once and injected into the order manager, the orchestrator and
//! both monitors. Mutation goes through the order manager; monitors read
//! snapshots.

use std::collections::HashMap;

use parking_lot::RwLock;

use cohort_core::{Position, Symbol, TradeState};

/// Shared store of open positions, one per symbol.
#[derive(Debug, Default)]
pub struct PositionBook {
    positions: RwLock<HashMap<Symbol, Position>>,
}

impl PositionBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the position on `position.symbol`.
    pub fn insert(&self, position: Position) {
        self.positions.write().insert(position.symbol.clone(), position);
    }

    #[must_use]
    pub fn get(&self, symbol: &Symbol) -> Option<Position> {
        self.positions.read().get(symbol).cloned()
    }

    pub fn remove(&self, symbol: &Symbol) -> Option<Position> {
        self.positions.write().remove(symbol)
    }

    /// Apply `f` to the position on `symbol`. Returns `false` if there is none.
    pub fn update<F>(&self, symbol: &Symbol, f: F) -> bool
    where
        F: FnOnce(&mut Position),
    {
        match self.positions.write().get_mut(symbol) {
            Some(position) => {
                f(position);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn has_position(&self, symbol: &Symbol) -> bool {
        self.positions.read().contains_key(symbol)
    }

    /// Snapshot of every tracked position.
    #[must_use]
    pub fn positions_snapshot(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.positions.read().values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }

    /// Positions still open (not closing or closed).
    #[must_use]
    pub fn open_positions(&self) -> Vec<Position> {
        self.positions_snapshot()
            .into_iter()
            .filter(|p| p.state == TradeState::Open)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.read().is_empty()
    }
}
