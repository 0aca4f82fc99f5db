//! Authoritative set of open positions, plus per-symbol locks.
//!
//! Every store operation is atomic on its own. Multi-step work on one symbol
//! (trailing update, evaluation, execution) is serialized by holding that
//! symbol's [`SymbolLocks`] guard for the whole path.

use parking_lot::{Mutex, RwLock};
use rotator_core::{Position, PositionStatus, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

#[derive(Debug, Default)]
pub struct PositionStore {
    positions: RwLock<HashMap<String, Position>>,
}

impl PositionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the position held on `symbol`.
    ///
    /// # Errors
    ///
    /// `NotFound` if no position is held on `symbol`.
    pub fn get(&self, symbol: &str) -> Result<Position, StoreError> {
        self.positions
            .read()
            .get(symbol)
            .cloned()
            .ok_or_else(|| StoreError::not_found(symbol))
    }

    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.positions.read().contains_key(symbol)
    }

    /// Inserts or replaces the position for its symbol.
    ///
    /// Replacing is only allowed for the same side. An open position on the
    /// opposite side means the caller skipped the close leg.
    ///
    /// # Errors
    ///
    /// `InvariantViolation` if a different open position already exists for the symbol.
    pub fn upsert(&self, position: Position) -> Result<(), StoreError> {
        let mut positions = self.positions.write();
        if let Some(existing) = positions.get(&position.symbol) {
            if existing.side != position.side && existing.status != PositionStatus::Closed {
                return Err(StoreError::invariant(
                    &position.symbol,
                    format!(
                        "{} position already held while upserting {}",
                        existing.side, position.side
                    ),
                ));
            }
        }
        positions.insert(position.symbol.clone(), position);
        Ok(())
    }

    /// Removes and returns the position on `symbol`.
    ///
    /// # Errors
    ///
    /// `NotFound` if it was already removed (e.g. by a concurrent flip).
    pub fn remove(&self, symbol: &str) -> Result<Position, StoreError> {
        self.positions
            .write()
            .remove(symbol)
            .ok_or_else(|| StoreError::not_found(symbol))
    }

    /// Applies `f` to the stored position atomically and returns the result.
    ///
    /// # Errors
    ///
    /// `NotFound` if no position is held on `symbol`.
    pub fn update<F>(&self, symbol: &str, f: F) -> Result<Position, StoreError>
    where
        F: FnOnce(&mut Position),
    {
        let mut positions = self.positions.write();
        let position = positions
            .get_mut(symbol)
            .ok_or_else(|| StoreError::not_found(symbol))?;
        f(position);
        Ok(position.clone())
    }

    /// # Errors
    ///
    /// `NotFound` if no position is held on `symbol`.
    pub fn set_status(&self, symbol: &str, status: PositionStatus) -> Result<Position, StoreError> {
        self.update(symbol, |p| p.status = status)
    }

    /// Open positions, ordered by symbol. Taken under one read lock, so the
    /// result is a consistent view of the whole store.
    #[must_use]
    pub fn list_open(&self) -> Vec<Position> {
        let mut open: Vec<Position> = self
            .positions
            .read()
            .values()
            .filter(|p| p.is_open())
            .cloned()
            .collect();
        open.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        open
    }

    /// Every tracked position regardless of status, ordered by symbol.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Position> {
        let mut all: Vec<Position> = self.positions.read().values().cloned().collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        all
    }

    /// Replaces the store content with recovered positions.
    ///
    /// Positions left `Closing` by a crash are restored as `Open`: the close
    /// was never confirmed. Symbols that appear more than once are dropped and
    /// returned so the caller can halt them.
    pub fn restore(&self, recovered: Vec<Position>) -> Vec<String> {
        let mut by_symbol: HashMap<String, Vec<Position>> = HashMap::new();
        for position in recovered {
            if position.status == PositionStatus::Closed {
                continue;
            }
            by_symbol
                .entry(position.symbol.clone())
                .or_default()
                .push(position);
        }

        let mut conflicting = Vec::new();
        let mut positions = self.positions.write();
        positions.clear();
        for (symbol, mut entries) in by_symbol {
            if entries.len() > 1 {
                conflicting.push(symbol);
                continue;
            }
            if let Some(mut position) = entries.pop() {
                position.status = PositionStatus::Open;
                positions.insert(symbol, position);
            }
        }
        conflicting.sort();
        conflicting
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

/// One async mutex per symbol. Holding the guard grants exclusive right to
/// evaluate and execute decisions for that symbol.
#[derive(Debug, Default)]
pub struct SymbolLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SymbolLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `symbol`.
    pub async fn acquire(&self, symbol: &str) -> OwnedMutexGuard<()> {
        let lock = self.lock_for(symbol);
        lock.lock_owned().await
    }

    /// Returns `None` if another decision for `symbol` is in progress.
    #[must_use]
    pub fn try_acquire(&self, symbol: &str) -> Option<OwnedMutexGuard<()>> {
        self.lock_for(symbol).try_lock_owned().ok()
    }

    fn lock_for(&self, symbol: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(symbol.to_string())
            .or_default()
            .clone()
    }
}
