//! The `confirmed` ledger view: cemented prefix only, straight from the
//! persistent tables. Used for operations requiring finality.

use crate::block::SavedBlock;
use crate::ledger::Ledger;
use crate::store::Transaction;
use crate::types::{AccountInfo, Amount, PendingInfo, PendingKey, QualifiedRoot};
use crate::{is_zero, Account, Hash};

pub struct LedgerSetConfirmed<'a> {
    pub(crate) ledger: &'a Ledger,
}

impl<'a> LedgerSetConfirmed<'a> {
    pub fn get_block(&self, tx: &dyn Transaction, hash: &Hash) -> Option<SavedBlock> {
        self.ledger.store.blocks.get(tx, hash)
    }

    pub fn get_account(&self, tx: &dyn Transaction, account: &Account) -> Option<AccountInfo> {
        self.ledger.store.accounts.get(tx, account)
    }

    pub fn get_pending(&self, tx: &dyn Transaction, key: &PendingKey) -> Option<PendingInfo> {
        self.ledger.store.pending.get(tx, key)
    }

    pub fn block_exists(&self, tx: &dyn Transaction, hash: &Hash) -> bool {
        self.ledger.store.blocks.exists(tx, hash)
    }

    pub fn block_exists_or_pruned(&self, tx: &dyn Transaction, hash: &Hash) -> bool {
        self.ledger.store.pruned.exists(tx, hash) || self.block_exists(tx, hash)
    }

    pub fn block_balance(&self, tx: &dyn Transaction, hash: &Hash) -> Option<Amount> {
        if is_zero(hash) {
            return None;
        }
        self.get_block(tx, hash).map(|block| block.balance())
    }

    pub fn account_balance(&self, tx: &dyn Transaction, account: &Account) -> Option<Amount> {
        let head = self.head(tx, account)?;
        self.block_balance(tx, &head)
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

    pub fn successor_by_root(&self, tx: &dyn Transaction, root: &QualifiedRoot) -> Option<Hash> {
        if !is_zero(&root.previous) {
            self.ledger.store.blocks.successor(tx, &root.previous)
        } else {
            self.get_account(tx, &root.root).map(|info| info.open_block)
        }
    }

    /// First cemented receivable with key >= (account, hash). Entries whose
    /// send block is not cemented are skipped.
    pub fn receivable_lower_bound(
        &self,
        tx: &dyn Transaction,
        account: &Account,
        hash: &Hash,
    ) -> Option<(PendingKey, PendingInfo)> {
        self.ledger
            .store
            .pending
            .iter_from(tx, &PendingKey::new(*account, *hash))
            .find(|(key, _)| self.block_exists_or_pruned(tx, &key.hash))
    }

    /// Cemented receivables of `account` with send hash strictly greater
    /// than `hash`.
    pub fn receivable_upper_bound<'t>(
        &self,
        tx: &'t dyn Transaction,
        account: &Account,
        hash: &Hash,
    ) -> ConfirmedReceivableIterator<'t>
    where
        'a: 't,
    {
        ConfirmedReceivableIterator {
            ledger: self.ledger,
            tx,
            account: *account,
            next_start: crate::ledger::any::inc_bytes(hash)
                .map(|next| PendingKey::new(*account, next)),
        }
    }
}

/// Streaming iterator over one account's cemented receivables.
pub struct ConfirmedReceivableIterator<'a> {
    ledger: &'a Ledger,
    tx: &'a dyn Transaction,
    account: Account,
    next_start: Option<PendingKey>,
}

impl Iterator for ConfirmedReceivableIterator<'_> {
    type Item = (PendingKey, PendingInfo);

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next_start?;
        let found = self
            .ledger
            .confirmed()
            .receivable_lower_bound(self.tx, &start.account, &start.hash)?;
        if found.0.account != self.account {
            self.next_start = None;
            return None;
        }
        self.next_start = crate::ledger::any::inc_bytes(&found.0.hash)
            .map(|next_hash| PendingKey::new(found.0.account, next_hash));
        Some(found)
    }
}
