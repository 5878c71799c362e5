//! In-memory ledger counters and the representative weight map, seeded
//! from storage on startup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::store::{RepWeightTable, WriteTransaction};
use crate::types::Amount;
use crate::Account;

/// Confirmed representative weights, write-through to the `rep_weight`
/// table. Weights of uncemented blocks live in the unconfirmed overlay,
/// not here.
#[derive(Default)]
pub struct RepWeights {
    weights: Mutex<HashMap<Account, Amount>>,
}

impl RepWeights {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, representative: &Account) -> Amount {
        self.weights
            .lock()
            .expect("rep weights lock poisoned")
            .get(representative)
            .copied()
            .unwrap_or(0)
    }

    /// Seed an entry without touching storage; used while scanning the
    /// table at startup.
    pub fn put(&self, representative: Account, weight: Amount) {
        let mut weights = self.weights.lock().expect("rep weights lock poisoned");
        if weight == 0 {
            weights.remove(&representative);
        } else {
            weights.insert(representative, weight);
        }
    }

    /// Apply a wrapping delta and persist the result.
    pub fn add(
        &self,
        tx: &WriteTransaction,
        table: &RepWeightTable,
        representative: &Account,
        amount: Amount,
    ) {
        let mut weights = self.weights.lock().expect("rep weights lock poisoned");
        let current = weights.get(representative).copied().unwrap_or(0);
        let new_weight = current.wrapping_add(amount);
        if new_weight == 0 {
            weights.remove(representative);
        } else {
            weights.insert(*representative, new_weight);
        }
        table.put(tx, representative, new_weight);
    }

    pub fn len(&self) -> usize {
        self.weights.lock().expect("rep weights lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Counters over the persistent (cemented) portion of the ledger. The
/// totals callers usually want add the unconfirmed overlay on top; see
/// the count accessors on [`crate::ledger::Ledger`].
#[derive(Default)]
pub struct LedgerCache {
    pub block_count: AtomicU64,
    pub cemented_count: AtomicU64,
    pub account_count: AtomicU64,
    pub pruned_count: AtomicU64,
    pub rep_weights: RepWeights,
}

impl LedgerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_count(&self) -> u64 {
        self.block_count.load(Ordering::SeqCst)
    }

    pub fn cemented_count(&self) -> u64 {
        self.cemented_count.load(Ordering::SeqCst)
    }

    pub fn account_count(&self) -> u64 {
        self.account_count.load(Ordering::SeqCst)
    }

    pub fn pruned_count(&self) -> u64 {
        self.pruned_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Store, Writer};

    #[test]
    fn rep_weights_write_through() {
        let store = Store::open_temporary().expect("temporary store");
        let weights = RepWeights::new();
        let rep = [5u8; 32];
        let tx = store.tx_begin_write(Writer::Generic);
        weights.add(&tx, &store.rep_weight, &rep, 100);
        assert_eq!(weights.get(&rep), 100);
        assert_eq!(store.rep_weight.get(&tx, &rep), 100);
        weights.add(&tx, &store.rep_weight, &rep, 100u128.wrapping_neg());
        assert_eq!(weights.get(&rep), 0);
        assert_eq!(store.rep_weight.count(&tx), 0);
    }

    #[test]
    fn put_seeds_without_store() {
        let weights = RepWeights::new();
        weights.put([1u8; 32], 7);
        assert_eq!(weights.get(&[1u8; 32]), 7);
        weights.put([1u8; 32], 0);
        assert!(weights.is_empty());
    }
}
