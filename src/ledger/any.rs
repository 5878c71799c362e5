//! The `any` ledger view: union of cemented tables and the unconfirmed
//! overlay. Default view for validation and for presenting best-known
//! state.
//!
//! Free functions take a locked overlay view so internal ledger paths can
//! compose lookups under one lock; the public [`LedgerSetAny`] wrapper
//! locks per call.

use crate::block::SavedBlock;
use crate::ledger::unconfirmed::UnconfirmedView;
use crate::ledger::Ledger;
use crate::store::Transaction;
use crate::types::{AccountInfo, Amount, PendingInfo, PendingKey, QualifiedRoot};
use crate::{is_zero, Account, Hash};

/// Increment a 32-byte big-endian value, `None` on overflow.
pub(crate) fn inc_bytes(bytes: &[u8; 32]) -> Option<[u8; 32]> {
    let mut out = *bytes;
    for byte in out.iter_mut().rev() {
        let (value, carry) = byte.overflowing_add(1);
        *byte = value;
        if !carry {
            return Some(out);
        }
    }
    None
}

pub(crate) fn block_get(
    ledger: &Ledger,
    view: &UnconfirmedView,
    tx: &dyn Transaction,
    hash: &Hash,
) -> Option<SavedBlock> {
    match view.block.get(hash) {
        Some(delta) => Some(delta.block.clone()),
        None => ledger.store.blocks.get(tx, hash),
    }
}

pub(crate) fn block_exists(
    ledger: &Ledger,
    view: &UnconfirmedView,
    tx: &dyn Transaction,
    hash: &Hash,
) -> bool {
    view.block.contains_key(hash) || ledger.store.blocks.exists(tx, hash)
}

pub(crate) fn block_exists_or_pruned(
    ledger: &Ledger,
    view: &UnconfirmedView,
    tx: &dyn Transaction,
    hash: &Hash,
) -> bool {
    block_exists(ledger, view, tx, hash) || ledger.store.pruned.exists(tx, hash)
}

pub(crate) fn account_get(
    ledger: &Ledger,
    view: &UnconfirmedView,
    tx: &dyn Transaction,
    account: &Account,
) -> Option<AccountInfo> {
    match view.account.get(account) {
        Some(info) => Some(info.clone()),
        None => ledger.store.accounts.get(tx, account),
    }
}

/// Receivable lookup honoring overlay additions and consumptions.
pub(crate) fn pending_get(
    ledger: &Ledger,
    view: &UnconfirmedView,
    tx: &dyn Transaction,
    key: &PendingKey,
) -> Option<PendingInfo> {
    if view.received.contains(key) {
        return None;
    }
    if let Some(info) = view.receivable.get(key) {
        return Some(*info);
    }
    ledger.store.pending.get(tx, key)
}

/// First receivable with key >= (account, hash), merged across overlay and
/// disk in key order, skipping consumed entries.
pub(crate) fn receivable_lower_bound(
    ledger: &Ledger,
    view: &UnconfirmedView,
    tx: &dyn Transaction,
    account: &Account,
    hash: &Hash,
) -> Option<(PendingKey, PendingInfo)> {
    let start = PendingKey::new(*account, *hash);
    let mem = view
        .receivable
        .range(start..)
        .find(|(key, _)| !view.received.contains(key))
        .map(|(key, info)| (*key, *info));
    let disk = ledger
        .store
        .pending
        .iter_from(tx, &start)
        .find(|(key, _)| !view.received.contains(key));
    match (mem, disk) {
        (None, disk) => disk,
        (mem, None) => mem,
        (Some(mem), Some(disk)) => {
            if mem.0 <= disk.0 {
                Some(mem)
            } else {
                Some(disk)
            }
        }
    }
}

pub(crate) fn successor_by_hash(
    ledger: &Ledger,
    view: &UnconfirmedView,
    tx: &dyn Transaction,
    hash: &Hash,
) -> Option<Hash> {
    match view.successor.get(hash) {
        Some(successor) => Some(*successor),
        None => ledger.store.blocks.successor(tx, hash),
    }
}

pub(crate) fn successor_by_root(
    ledger: &Ledger,
    view: &UnconfirmedView,
    tx: &dyn Transaction,
    root: &QualifiedRoot,
) -> Option<Hash> {
    if !is_zero(&root.previous) {
        successor_by_hash(ledger, view, tx, &root.previous)
    } else {
        account_get(ledger, view, tx, &root.root).map(|info| info.open_block)
    }
}

/// First account entry with key >= `start`, merged across overlay and disk.
pub(crate) fn account_lower_bound(
    ledger: &Ledger,
    view: &UnconfirmedView,
    tx: &dyn Transaction,
    start: &Account,
) -> Option<(Account, AccountInfo)> {
    let mem = view
        .account
        .range(*start..)
        .next()
        .map(|(account, info)| (*account, info.clone()));
    let disk = ledger.store.accounts.iter_from(tx, start).next();
    match (mem, disk) {
        (None, disk) => disk,
        (mem, None) => mem,
        (Some(mem), Some(disk)) => {
            if mem.0 <= disk.0 {
                Some(mem)
            } else {
                Some(disk)
            }
        }
    }
}

/// Union view over confirmed tables and the unconfirmed overlay.
pub struct LedgerSetAny<'a> {
    pub(crate) ledger: &'a Ledger,
}

impl<'a> LedgerSetAny<'a> {
    pub fn get_block(&self, tx: &dyn Transaction, hash: &Hash) -> Option<SavedBlock> {
        let view = self.ledger.unconfirmed.lock();
        block_get(self.ledger, &view, tx, hash)
    }

    pub fn get_account(&self, tx: &dyn Transaction, account: &Account) -> Option<AccountInfo> {
        let view = self.ledger.unconfirmed.lock();
        account_get(self.ledger, &view, tx, account)
    }

    pub fn get_pending(&self, tx: &dyn Transaction, key: &PendingKey) -> Option<PendingInfo> {
        let view = self.ledger.unconfirmed.lock();
        pending_get(self.ledger, &view, tx, key)
    }

    pub fn block_exists(&self, tx: &dyn Transaction, hash: &Hash) -> bool {
        let view = self.ledger.unconfirmed.lock();
        block_exists(self.ledger, &view, tx, hash)
    }

    pub fn block_exists_or_pruned(&self, tx: &dyn Transaction, hash: &Hash) -> bool {
        let view = self.ledger.unconfirmed.lock();
        block_exists_or_pruned(self.ledger, &view, tx, hash)
    }

    /// Owning account of a stored block.
    pub fn block_account(&self, tx: &dyn Transaction, hash: &Hash) -> Option<Account> {
        self.get_block(tx, hash).map(|block| block.account())
    }

    /// Balance after the given block.
    pub fn block_balance(&self, tx: &dyn Transaction, hash: &Hash) -> Option<Amount> {
        if is_zero(hash) {
            return None;
        }
        self.get_block(tx, hash).map(|block| block.balance())
    }

    /// Balance at the account frontier.
    pub fn account_balance(&self, tx: &dyn Transaction, account: &Account) -> Option<Amount> {
        let head = self.head(tx, account)?;
        self.block_balance(tx, &head)
    }

    /// Value moved by the block: absolute difference against the previous
    /// balance.
    pub fn amount(&self, tx: &dyn Transaction, hash: &Hash) -> Option<Amount> {
        let block = self.get_block(tx, hash)?;
        let balance = block.balance();
        let previous = block.block.previous();
        if is_zero(&previous) {
            return Some(balance);
        }
        let previous_balance = self.block_balance(tx, &previous)?;
        Some(balance.abs_diff(previous_balance))
    }

    pub fn head(&self, tx: &dyn Transaction, account: &Account) -> Option<Hash> {
        self.get_account(tx, account).map(|info| info.head)
    }

    pub fn height(&self, tx: &dyn Transaction, hash: &Hash) -> u64 {
        self.get_block(tx, hash)
            .map(|block| block.height())
            .unwrap_or(0)
    }

    pub fn account_height(&self, tx: &dyn Transaction, account: &Account) -> u64 {
        match self.head(tx, account) {
            Some(head) => self.height(tx, &head),
            None => 0,
        }
    }

    pub fn successor_by_hash(&self, tx: &dyn Transaction, hash: &Hash) -> Option<Hash> {
        let view = self.ledger.unconfirmed.lock();
        successor_by_hash(self.ledger, &view, tx, hash)
    }

    pub fn successor_by_root(&self, tx: &dyn Transaction, root: &QualifiedRoot) -> Option<Hash> {
        let view = self.ledger.unconfirmed.lock();
        successor_by_root(self.ledger, &view, tx, root)
    }

    pub fn account_lower_bound(
        &self,
        tx: &dyn Transaction,
        start: &Account,
    ) -> Option<(Account, AccountInfo)> {
        let view = self.ledger.unconfirmed.lock();
        account_lower_bound(self.ledger, &view, tx, start)
    }

    /// Whether the account has any unconsumed receivable.
    pub fn receivable_any(&self, tx: &dyn Transaction, account: &Account) -> bool {
        self.receivable_upper_bound(tx, account, &crate::ZERO_HASH)
            .next()
            .is_some()
    }

    /// Receivables of `account` with send hash strictly greater than
    /// `hash`, in key order.
    pub fn receivable_upper_bound<'t>(
        &self,
        tx: &'t dyn Transaction,
        account: &Account,
        hash: &Hash,
    ) -> ReceivableIterator<'t>
    where
        'a: 't,
    {
        ReceivableIterator {
            ledger: self.ledger,
            tx,
            account: Some(*account),
            next_start: inc_bytes(hash).map(|next| PendingKey::new(*account, next)),
        }
    }

    /// Receivables of the next account strictly greater than `account`.
    pub fn receivable_account_upper_bound<'t>(
        &self,
        tx: &'t dyn Transaction,
        account: &Account,
    ) -> ReceivableIterator<'t>
    where
        'a: 't,
    {
        ReceivableIterator {
            ledger: self.ledger,
            tx,
            account: None,
            next_start: inc_bytes(account).map(|next| PendingKey::new(next, crate::ZERO_HASH)),
        }
    }
}

/// Streaming receivable iterator; re-locks the overlay per step so it can
/// be held across other ledger calls.
pub struct ReceivableIterator<'a> {
    ledger: &'a Ledger,
    tx: &'a dyn Transaction,
    /// When set, iteration is clamped to this account; when unset, the
    /// account of the first yielded entry clamps the rest.
    account: Option<Account>,
    next_start: Option<PendingKey>,
}

impl Iterator for ReceivableIterator<'_> {
    type Item = (PendingKey, PendingInfo);

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next_start?;
        let found = {
            let view = self.ledger.unconfirmed.lock();
            receivable_lower_bound(self.ledger, &view, self.tx, &start.account, &start.hash)
        }?;
        if let Some(account) = self.account {
            if found.0.account != account {
                self.next_start = None;
                return None;
            }
        } else {
            self.account = Some(found.0.account);
        }
        self.next_start = match inc_bytes(&found.0.hash) {
            Some(next_hash) => Some(PendingKey::new(found.0.account, next_hash)),
            None => None,
        };
        Some(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inc_bytes_carries() {
        let mut value = [0u8; 32];
        value[31] = 0xff;
        let next = inc_bytes(&value).unwrap();
        assert_eq!(next[30], 1);
        assert_eq!(next[31], 0);
        assert_eq!(inc_bytes(&[0xffu8; 32]), None);
    }
}
