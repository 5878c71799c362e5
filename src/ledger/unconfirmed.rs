//! The unconfirmed overlay: accepted-but-not-cemented ledger state.
//!
//! Blocks accepted by [`crate::ledger::Ledger::process`] live here until the
//! cementation worker moves them into the persistent tables. One mutex
//! guards the whole overlay; lock holders pass the guarded view into the
//! lookup helpers so a single operation never re-locks.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::block::SavedBlock;
use crate::types::{AccountInfo, Amount, PendingInfo, PendingKey};
use crate::{Account, Hash};

/// The ledger mutation produced by validating one block: everything needed
/// to apply, roll back, or cement it.
#[derive(Clone, Debug)]
pub struct BlockDelta {
    /// The validated block with its sideband attached
    pub block: SavedBlock,
    /// Account state after this block
    pub head: AccountInfo,
    /// Receivable effect: `(Some(key), Some(info))` creates a pending entry
    /// (send), `(Some(key), None)` consumes one (receive), `(None, None)`
    /// leaves receivables untouched
    pub receivable: (Option<PendingKey>, Option<PendingInfo>),
    /// Previous representative and previous balance, absent for first
    /// blocks; drives the rep-weight delta
    pub weight: Option<(Account, Amount)>,
}

/// Mutable overlay contents, accessed under the set's single mutex.
#[derive(Default)]
pub struct UnconfirmedView {
    /// hash -> delta for every accepted, uncemented block
    pub block: HashMap<Hash, BlockDelta>,
    /// account -> head info as of the newest uncemented block
    pub account: BTreeMap<Account, AccountInfo>,
    /// receivables created by uncemented sends
    pub receivable: BTreeMap<PendingKey, PendingInfo>,
    /// receivables consumed by uncemented receives
    pub received: HashSet<PendingKey>,
    /// hash -> child hash for uncemented chain links
    pub successor: HashMap<Hash, Hash>,
    /// representative -> absolute weight including uncemented deltas
    pub weight: HashMap<Account, Amount>,
    /// Number of `account` entries that shadow an on-disk account rather
    /// than introduce a new one
    pub accounts_updated: u64,
}

impl UnconfirmedView {
    /// Apply a wrapping weight delta for `account`. `base` is the cemented
    /// weight; an entry equal to its base carries no information and is
    /// removed.
    pub fn weight_add(&mut self, account: &Account, amount: Amount, base: Amount) {
        match self.weight.get_mut(account) {
            Some(existing) => {
                let new_value = existing.wrapping_add(amount);
                if new_value == base {
                    self.weight.remove(account);
                } else {
                    *existing = new_value;
                }
            }
            None => {
                self.weight.insert(*account, base.wrapping_add(amount));
            }
        }
    }

    /// Drop the entry for `account` if it equals the (freshly cemented)
    /// base, its delta having been materialized on disk.
    pub fn weight_rebase(&mut self, account: &Account, base: Amount) {
        if self.weight.get(account) == Some(&base) {
            self.weight.remove(account);
        }
    }

    /// Whether the overlay holds any unconsumed receivable for `account`.
    pub fn receivable_any(&self, account: &Account) -> bool {
        self.receivable
            .range(PendingKey::new(*account, [0u8; 32])..)
            .filter(|(key, _)| !self.received.contains(key))
            .take_while(|(key, _)| key.account == *account)
            .next()
            .is_some()
    }

    pub fn block_size(&self) -> usize {
        self.block.len()
    }

    /// Accounts introduced by the overlay (not merely shadowed).
    pub fn account_size(&self) -> usize {
        self.account.len() - self.accounts_updated as usize
    }
}

/// The overlay and its lock.
#[derive(Default)]
pub struct UnconfirmedSet {
    view: Mutex<UnconfirmedView>,
}

impl UnconfirmedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, UnconfirmedView> {
        self.view.lock().expect("unconfirmed overlay lock poisoned")
    }

    pub fn block_size(&self) -> usize {
        self.lock().block_size()
    }

    pub fn account_size(&self) -> usize {
        self.lock().account_size()
    }
}
