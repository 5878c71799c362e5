//! Account prioritization for the ascending bootstrap.
//!
//! Accounts carry a float priority adapted from block-processing feedback;
//! accounts gated on a missing source move to the blocking set, keeping
//! their saved priority. Selection is a weighted draw over a random sample
//! of the priority set, falling back to a cycling database cursor when the
//! set is empty.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rand::distributions::{Distribution, WeightedIndex};

use crate::ledger::Ledger;
use crate::stats::{StatDetail, StatType, Stats};
use crate::types::PendingKey;
use crate::{Account, Hash};

/// Priority assigned on first insertion.
const PRIORITY_INITIAL: f32 = 1.0;
/// Increment applied by `priority_up` to an existing entry.
const PRIORITY_INCREASE: f32 = 0.4;

/// Which table the fallback cursor is walking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CursorTable {
    Account,
    Pending,
}

/// Configuration knobs lifted from [`crate::config::BootstrapConfig`].
pub struct AccountSetsConfig {
    pub priorities_max: usize,
    pub consideration_count: usize,
}

/// The priority and blocking sets.
pub struct AccountSets {
    config: AccountSetsConfig,
    stats: Arc<Stats>,
    /// Ordered so random-key ceiling sampling works
    priorities: BTreeMap<Account, f32>,
    /// account -> (dependency hash, saved priority)
    blocking: HashMap<Account, (Hash, f32)>,
    cursor: (CursorTable, Account),
}

impl AccountSets {
    pub fn new(config: AccountSetsConfig, stats: Arc<Stats>) -> Self {
        AccountSets {
            config,
            stats,
            priorities: BTreeMap::new(),
            blocking: HashMap::new(),
            cursor: (CursorTable::Account, [0u8; 32]),
        }
    }

    /// Reward an account that produced progress: bump its priority, or
    /// accumulate into the saved priority while it is blocked.
    pub fn priority_up(&mut self, account: &Account) {
        match self.blocking.get_mut(account) {
            None => {
                self.stats
                    .inc(StatType::BootstrapAscendingAccounts, StatDetail::Prioritize);
                match self.priorities.get_mut(account) {
                    Some(priority) => *priority += PRIORITY_INCREASE,
                    None => {
                        if self.priorities.len() < self.config.priorities_max {
                            self.priorities
                                .insert(*account, PRIORITY_INITIAL + PRIORITY_INCREASE);
                        }
                    }
                }
            }
            Some((_, saved)) => *saved += 1.0,
        }
    }

    /// Halve the priority; entries at or below the initial value drop out.
    pub fn priority_down(&mut self, account: &Account) {
        if let Some(priority) = self.priorities.get_mut(account) {
            let new_priority = *priority / 2.0;
            if new_priority <= PRIORITY_INITIAL {
                self.priorities.remove(account);
            } else {
                *priority = new_priority;
            }
        }
        if let Some((_, saved)) = self.blocking.get_mut(account) {
            *saved /= 2.0;
        }
    }

    /// Charge an account for being selected.
    pub fn priority_dec(&mut self, account: &Account) {
        if let Some(priority) = self.priorities.get_mut(account) {
            let new_priority = *priority - 0.5;
            if new_priority <= PRIORITY_INITIAL {
                self.priorities.remove(account);
            } else {
                *priority = new_priority;
            }
        }
        if let Some((_, saved)) = self.blocking.get_mut(account) {
            *saved -= 0.5;
        }
    }

    /// Gate an account on a missing dependency, carrying its priority.
    pub fn block(&mut self, account: &Account, dependency: Hash) {
        self.stats
            .inc(StatType::BootstrapAscendingAccounts, StatDetail::Block);
        let saved = self
            .priorities
            .remove(account)
            .unwrap_or(PRIORITY_INITIAL);
        self.blocking.insert(*account, (dependency, saved));
    }

    /// Release the gate if the fulfilled dependency matches (or none is
    /// given), restoring the saved priority.
    pub fn unblock(&mut self, account: &Account, hash: Option<Hash>) {
        let matches = self
            .blocking
            .get(account)
            .map(|(dependency, _)| hash.map(|h| h == *dependency).unwrap_or(true))
            .unwrap_or(false);
        if matches {
            self.stats
                .inc(StatType::BootstrapAscendingAccounts, StatDetail::Unblock);
            let (_, saved) = self
                .blocking
                .remove(account)
                .expect("checked to exist above");
            if self.priorities.len() < self.config.priorities_max {
                // The saved priority may have decayed while blocked; never
                // restore below the initial value
                self.priorities
                    .insert(*account, saved.max(PRIORITY_INITIAL));
            }
        } else {
            self.stats.inc(
                StatType::BootstrapAscendingAccounts,
                StatDetail::UnblockFailed,
            );
        }
    }

    pub fn blocked(&self, account: &Account) -> bool {
        self.blocking.contains_key(account)
    }

    pub fn priority_size(&self) -> usize {
        self.priorities.len()
    }

    pub fn blocked_size(&self) -> usize {
        self.blocking.len()
    }

    /// Current priority: zero while blocked, initial when untracked.
    pub fn priority(&self, account: &Account) -> f32 {
        if self.blocked(account) {
            return 0.0;
        }
        self.priorities
            .get(account)
            .copied()
            .unwrap_or(PRIORITY_INITIAL)
    }

    /// Pick an account for the next pull: a weighted draw across a random
    /// sample of the priority set, or the database cursor when empty. The
    /// chosen account is charged via `priority_dec`.
    pub fn random(&mut self, ledger: &Ledger) -> Option<Account> {
        if self.priorities.is_empty() {
            return self.next_database(ledger);
        }
        let mut candidates = Vec::with_capacity(self.config.consideration_count);
        let mut weights: Vec<f32> = Vec::with_capacity(self.config.consideration_count);
        while candidates.len() < self.config.consideration_count {
            let mut probe = [0u8; 32];
            rand::Rng::fill(&mut rand::thread_rng(), &mut probe[..]);
            // Ceiling entry, wrapping to the beginning
            let (account, priority) = self
                .priorities
                .range(probe..)
                .next()
                .or_else(|| self.priorities.iter().next())
                .map(|(account, priority)| (*account, *priority))
                .expect("priority set checked non-empty");
            candidates.push(account);
            weights.push(priority);
        }
        let dist = WeightedIndex::new(&weights).ok()?;
        let selection = candidates[dist.sample(&mut rand::thread_rng())];
        self.priority_dec(&selection);
        Some(selection)
    }

    /// Cycle the account and pending tables for an account to probe.
    fn next_database(&mut self, ledger: &Ledger) -> Option<Account> {
        self.stats
            .inc(StatType::BootstrapAscendingAccounts, StatDetail::NextDatabase);
        let tx = ledger.store.tx_begin_read();
        for _ in 0..2 {
            match self.cursor.0 {
                CursorTable::Account => {
                    let start = crate::ledger::any::inc_bytes(&self.cursor.1)?;
                    if let Some((account, _)) =
                        ledger.store.accounts.iter_from(&tx, &start).next()
                    {
                        self.cursor.1 = account;
                        return Some(account);
                    }
                    self.cursor = (CursorTable::Pending, [0u8; 32]);
                }
                CursorTable::Pending => {
                    let start = crate::ledger::any::inc_bytes(&self.cursor.1)
                        .map(|account| PendingKey::new(account, [0u8; 32]))?;
                    if let Some((key, _)) = ledger.store.pending.iter_from(&tx, &start).next() {
                        self.cursor.1 = key.account;
                        return Some(key.account);
                    }
                    self.cursor = (CursorTable::Account, [0u8; 32]);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::LedgerConstants;
    use crate::store::Store;

    fn test_sets() -> AccountSets {
        AccountSets::new(
            AccountSetsConfig {
                priorities_max: 8,
                consideration_count: 4,
            },
            Arc::new(Stats::new()),
        )
    }

    #[test]
    fn priority_up_inserts_above_initial() {
        let mut sets = test_sets();
        let account = [1u8; 32];
        assert_eq!(sets.priority(&account), PRIORITY_INITIAL);
        sets.priority_up(&account);
        assert_eq!(sets.priority(&account), PRIORITY_INITIAL + PRIORITY_INCREASE);
        sets.priority_up(&account);
        assert_eq!(
            sets.priority(&account),
            PRIORITY_INITIAL + 2.0 * PRIORITY_INCREASE
        );
    }

    #[test]
    fn priority_down_halves_until_removal() {
        let mut sets = test_sets();
        let account = [1u8; 32];
        for _ in 0..4 {
            sets.priority_up(&account);
        }
        assert!(sets.priority(&account) > 2.0);
        sets.priority_down(&account);
        assert!(sets.priority(&account) > PRIORITY_INITIAL);
        sets.priority_down(&account);
        // Dropped back to untracked
        assert_eq!(sets.priority_size(), 0);
        assert_eq!(sets.priority(&account), PRIORITY_INITIAL);
    }

    #[test]
    fn priority_dec_subtracts() {
        let mut sets = test_sets();
        let account = [1u8; 32];
        sets.priority_up(&account);
        sets.priority_up(&account);
        let before = sets.priority(&account);
        sets.priority_dec(&account);
        assert!((sets.priority(&account) - (before - 0.5)).abs() < f32::EPSILON);
        sets.priority_dec(&account);
        assert_eq!(sets.priority_size(), 0);
    }

    #[test]
    fn block_and_unblock_roundtrip() {
        let mut sets = test_sets();
        let account = [1u8; 32];
        let dependency = [9u8; 32];
        sets.priority_up(&account);
        let saved = sets.priority(&account);
        sets.block(&account, dependency);
        assert!(sets.blocked(&account));
        assert_eq!(sets.priority(&account), 0.0);
        // Mismatched dependency does not unblock
        sets.unblock(&account, Some([8u8; 32]));
        assert!(sets.blocked(&account));
        sets.unblock(&account, Some(dependency));
        assert!(!sets.blocked(&account));
        assert_eq!(sets.priority(&account), saved);
    }

    #[test]
    fn blocked_accounts_accumulate_priority() {
        let mut sets = test_sets();
        let account = [1u8; 32];
        sets.block(&account, [9u8; 32]);
        sets.priority_up(&account);
        sets.priority_up(&account);
        sets.unblock(&account, None);
        assert_eq!(sets.priority(&account), PRIORITY_INITIAL + 2.0);
    }

    #[test]
    fn priorities_capped() {
        let mut sets = test_sets();
        for byte in 0..20u8 {
            sets.priority_up(&[byte; 32]);
        }
        assert_eq!(sets.priority_size(), 8);
    }

    #[test]
    fn random_prefers_priorities_and_charges() {
        let store = Arc::new(Store::open_temporary().expect("temporary store"));
        let ledger = Ledger::new(store, LedgerConstants::dev(), Arc::new(Stats::new()));
        let mut sets = test_sets();
        let account = [1u8; 32];
        sets.priority_up(&account);
        sets.priority_up(&account);
        let picked = sets.random(&ledger).expect("selection");
        assert_eq!(picked, account);
        assert!(sets.priority(&account) < PRIORITY_INITIAL + 2.0 * PRIORITY_INCREASE);
    }

    #[test]
    fn random_falls_back_to_database() {
        let store = Arc::new(Store::open_temporary().expect("temporary store"));
        let ledger = Ledger::new(store, LedgerConstants::dev(), Arc::new(Stats::new()));
        let mut sets = test_sets();
        // Only the genesis account exists on disk
        let picked = sets.random(&ledger).expect("database fallback");
        assert_eq!(picked, ledger.constants.genesis_account);
    }
}
