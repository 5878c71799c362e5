//! The canonical account/block/receivable store.
//!
//! State is split between the persistent tables (cemented prefix) and the
//! unconfirmed overlay (accepted, not yet cemented). Three views answer
//! queries: [`any`] unions both, [`confirmed`] sees only the cemented
//! prefix, and the overlay itself is the `unconfirmed` view. `process`
//! appends to the overlay, `rollback` unwinds it, and `confirm` moves
//! blocks from the overlay into the tables.

pub mod any;
pub mod cache;
mod check;
pub mod confirmed;
pub mod unconfirmed;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::block::{Block, SavedBlock};
use crate::crypto::{work_value, WorkNonce};
use crate::genesis::LedgerConstants;
use crate::stats::{StatDetail, StatType, Stats};
use crate::store::{Store, Transaction, WriteTransaction, Writer};
use crate::types::{Amount, ConfirmationHeightInfo, Epoch, PendingKey, QualifiedRoot};
use crate::{is_zero, Account, Hash, ZERO_HASH};

pub use any::LedgerSetAny;
pub use cache::LedgerCache;
pub use confirmed::LedgerSetConfirmed;
pub use unconfirmed::{BlockDelta, UnconfirmedSet};

use unconfirmed::UnconfirmedView;

/// Outcome of processing one block. Only `Progress` mutates state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockStatus {
    Progress,
    Old,
    GapPrevious,
    GapSource,
    GapEpochOpenPending,
    BadSignature,
    NegativeSpend,
    Unreceivable,
    Fork,
    BlockPosition,
    InsufficientWork,
    OpenedBurnAccount,
}

impl std::fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BlockStatus::Progress => "progress",
            BlockStatus::Old => "old",
            BlockStatus::GapPrevious => "gap_previous",
            BlockStatus::GapSource => "gap_source",
            BlockStatus::GapEpochOpenPending => "gap_epoch_open_pending",
            BlockStatus::BadSignature => "bad_signature",
            BlockStatus::NegativeSpend => "negative_spend",
            BlockStatus::Unreceivable => "unreceivable",
            BlockStatus::Fork => "fork",
            BlockStatus::BlockPosition => "block_position",
            BlockStatus::InsufficientWork => "insufficient_work",
            BlockStatus::OpenedBurnAccount => "opened_burn_account",
        };
        f.write_str(name)
    }
}

/// Rollback refusal: the target is already cemented.
#[derive(Debug, thiserror::Error)]
#[error("block is cemented and cannot be rolled back")]
pub struct AlreadyCemented;

/// The ledger.
pub struct Ledger {
    pub store: Arc<Store>,
    pub cache: LedgerCache,
    pub constants: LedgerConstants,
    pub unconfirmed: UnconfirmedSet,
    pub stats: Arc<Stats>,
    /// Enables weighting of `hash_root_random` draws across the pruned set
    pub pruning: AtomicBool,
    /// Preconfigured weights consulted while the ledger is shorter than
    /// `bootstrap_weight_max_blocks`
    pub bootstrap_weights: Mutex<HashMap<Account, Amount>>,
    pub bootstrap_weight_max_blocks: AtomicU64,
    check_bootstrap_weights: AtomicBool,
}

impl Ledger {
    /// Open the ledger over `store`, seeding the genesis block on first
    /// run and rebuilding the in-memory cache otherwise.
    pub fn new(store: Arc<Store>, constants: LedgerConstants, stats: Arc<Stats>) -> Self {
        let ledger = Ledger {
            store,
            cache: LedgerCache::new(),
            constants,
            unconfirmed: UnconfirmedSet::new(),
            stats,
            pruning: AtomicBool::new(false),
            bootstrap_weights: Mutex::new(HashMap::new()),
            bootstrap_weight_max_blocks: AtomicU64::new(
                crate::constants::BOOTSTRAP_WEIGHT_MAX_BLOCKS,
            ),
            check_bootstrap_weights: AtomicBool::new(true),
        };
        let empty = {
            let tx = ledger.store.tx_begin_read();
            ledger.store.blocks.is_empty(&tx)
        };
        if empty {
            ledger.seed_genesis();
        } else {
            ledger.initialize();
        }
        ledger
    }

    fn seed_genesis(&self) {
        let genesis = &self.constants.genesis_block;
        let account = self.constants.genesis_account;
        let hash = genesis.hash();
        let tx = self.store.tx_begin_write(Writer::Generic);
        self.store.blocks.put(&tx, &hash, genesis);
        self.store.accounts.put(
            &tx,
            &account,
            &crate::types::AccountInfo {
                head: hash,
                representative: account,
                open_block: hash,
                balance: self.constants.genesis_amount,
                modified: crate::seconds_since_epoch(),
                block_count: 1,
                epoch: Epoch::Epoch0,
            },
        );
        self.store.confirmation_height.put(
            &tx,
            &account,
            &ConfirmationHeightInfo {
                height: 1,
                frontier: hash,
            },
        );
        self.cache
            .rep_weights
            .add(&tx, &self.store.rep_weight, &account, self.constants.genesis_amount);
        tx.commit();
        self.cache.block_count.store(1, Ordering::SeqCst);
        self.cache.cemented_count.store(1, Ordering::SeqCst);
        self.cache.account_count.store(1, Ordering::SeqCst);
        tracing::info!("seeded genesis block {}", crate::to_hex_short(&hash));
    }

    fn initialize(&self) {
        let block_count = AtomicU64::new(0);
        let account_count = AtomicU64::new(0);
        self.store.accounts.for_each_par(|iter| {
            let mut blocks = 0u64;
            let mut accounts = 0u64;
            for (_, info) in iter {
                blocks += info.block_count;
                accounts += 1;
            }
            block_count.fetch_add(blocks, Ordering::Relaxed);
            account_count.fetch_add(accounts, Ordering::Relaxed);
        });
        self.cache
            .block_count
            .store(block_count.load(Ordering::Relaxed), Ordering::SeqCst);
        // On-disk blocks are exactly the cemented prefix
        self.cache
            .cemented_count
            .store(block_count.load(Ordering::Relaxed), Ordering::SeqCst);
        self.cache
            .account_count
            .store(account_count.load(Ordering::Relaxed), Ordering::SeqCst);

        self.store.rep_weight.for_each_par(|iter| {
            for (representative, weight) in iter {
                self.cache.rep_weights.put(representative, weight);
            }
        });

        let tx = self.store.tx_begin_read();
        self.cache
            .pruned_count
            .store(self.store.pruned.count(&tx), Ordering::SeqCst);
    }

    /// Best-known view: cemented tables plus the unconfirmed overlay.
    pub fn any(&self) -> LedgerSetAny<'_> {
        LedgerSetAny { ledger: self }
    }

    /// Cemented prefix only.
    pub fn confirmed(&self) -> LedgerSetConfirmed<'_> {
        LedgerSetConfirmed { ledger: self }
    }

    /// Validate `block` against the `any` view and, on progress, record its
    /// delta in the unconfirmed overlay. Atomic with respect to the held
    /// write transaction.
    pub fn process(&self, tx: &WriteTransaction, block: &Block) -> BlockStatus {
        let mut view = self.unconfirmed.lock();
        match check::check(self, &view, tx, block) {
            Ok(delta) => {
                self.track(tx, &mut view, delta);
                BlockStatus::Progress
            }
            Err(status) => status,
        }
    }

    fn track(&self, tx: &WriteTransaction, view: &mut UnconfirmedView, delta: BlockDelta) {
        let hash = delta.block.hash();
        let account = delta.block.account();
        let previous = delta.block.block.previous();
        if !is_zero(&previous) {
            debug_assert!(!view.successor.contains_key(&previous));
            view.successor.insert(previous, hash);
            if !view.account.contains_key(&account) {
                view.accounts_updated += 1;
            }
        }
        view.account.insert(account, delta.head.clone());
        match &delta.receivable {
            (Some(key), Some(info)) => {
                view.receivable.insert(*key, *info);
            }
            (Some(key), None) => {
                view.received.insert(*key);
            }
            _ => {}
        }
        if let Some((old_representative, old_balance)) = delta.weight {
            let base = self.weight_exact(tx, &old_representative);
            view.weight_add(&old_representative, old_balance.wrapping_neg(), base);
        }
        let representative = delta.head.representative;
        let base = self.weight_exact(tx, &representative);
        view.weight_add(&representative, delta.head.balance, base);
        view.block.insert(hash, delta);
    }

    /// Remove `target` and every overlay descendant, restoring receivables,
    /// weights and successor links. Refuses cemented targets.
    pub fn rollback(
        &self,
        tx: &WriteTransaction,
        target: &Hash,
    ) -> Result<Vec<SavedBlock>, AlreadyCemented> {
        let mut view = self.unconfirmed.lock();
        let mut list = Vec::new();
        let mut stack = vec![*target];
        while let Some(&hash) = stack.last() {
            match any::block_get(self, &view, tx, &hash) {
                Some(block) => {
                    if self.confirmed().block_exists_or_pruned(tx, &hash) {
                        return Err(AlreadyCemented);
                    }
                    if view.successor.contains_key(&hash) {
                        // Descendants on the same chain roll back first
                        let head = view
                            .account
                            .get(&block.account())
                            .expect("overlay head missing for unconfirmed chain")
                            .head;
                        debug_assert_ne!(head, hash);
                        stack.push(head);
                    }
                    if block.is_send() {
                        let destination = block.destination().expect("send without destination");
                        if view.received.contains(&PendingKey::new(destination, hash)) {
                            // The receive consuming this send goes too
                            let head = view
                                .account
                                .get(&destination)
                                .expect("overlay head missing for receiving account")
                                .head;
                            stack.push(head);
                        }
                    }
                    if *stack.last().expect("stack emptied unexpectedly") == hash {
                        list.push(block.clone());
                        stack.pop();
                        self.rollback_one(tx, &mut view, &block);
                    }
                }
                None => {
                    stack.pop();
                }
            }
        }
        Ok(list)
    }

    fn rollback_one(&self, tx: &WriteTransaction, view: &mut UnconfirmedView, block: &SavedBlock) {
        let account = block.account();
        let hash = block.hash();
        let previous = block.block.previous();
        debug_assert_eq!(
            view.account.get(&account).map(|info| info.head),
            Some(hash)
        );
        let delta = view
            .block
            .remove(&hash)
            .expect("rolling back a block without an overlay delta");
        if is_zero(&previous) {
            self.stats.inc(StatType::Rollback, StatDetail::Open);
            view.account.remove(&account);
        } else {
            view.successor.remove(&previous);
            match view.block.get(&previous) {
                Some(previous_delta) => {
                    view.account.insert(account, previous_delta.head.clone());
                }
                None => {
                    view.account.remove(&account);
                    debug_assert!(view.accounts_updated > 0);
                    view.accounts_updated -= 1;
                }
            }
        }
        match &delta.receivable {
            (Some(key), Some(_)) => {
                view.receivable.remove(key);
                self.stats.inc(StatType::Rollback, StatDetail::Send);
            }
            (Some(key), None) => {
                view.received.remove(key);
                self.stats.inc(StatType::Rollback, StatDetail::Receive);
            }
            _ => {
                self.stats.inc(StatType::Rollback, StatDetail::Change);
            }
        }
        let representative = delta.head.representative;
        let base = self.weight_exact(tx, &representative);
        view.weight_add(&representative, block.balance().wrapping_neg(), base);
        if let Some((old_representative, old_balance)) = delta.weight {
            let base = self.weight_exact(tx, &old_representative);
            view.weight_add(&old_representative, old_balance, base);
        }
    }

    /// Drive `hash` and every uncemented dependency to cemented status.
    /// Returns the blocks newly cemented by this call, in cement order.
    pub fn confirm(&self, tx: &WriteTransaction, hash: &Hash) -> Vec<SavedBlock> {
        let mut view = self.unconfirmed.lock();
        let mut cemented = Vec::new();
        let mut stack = vec![*hash];
        while let Some(&current) = stack.last() {
            let Some(block) = any::block_get(self, &view, tx, &current) else {
                // Unknown hash: nothing to cement. Reachable after a losing
                // fork candidate was rolled back.
                tracing::warn!(
                    "confirm requested for unknown block {}",
                    crate::to_hex_short(&current)
                );
                stack.pop();
                continue;
            };
            for dependency in self.dependent_blocks(&block) {
                if !is_zero(&dependency) && !self.confirmed().block_exists_or_pruned(tx, &dependency)
                {
                    stack.push(dependency);
                }
            }
            if *stack.last().expect("stack emptied unexpectedly") == current {
                stack.pop();
                if !self.confirmed().block_exists_or_pruned(tx, &current) {
                    let delta = view
                        .block
                        .get(&current)
                        .cloned()
                        .expect("unconfirmed block without an overlay delta");
                    self.confirm_one(tx, &mut view, &delta);
                    cemented.push(delta.block);
                }
            }
            // Otherwise unconfirmed dependencies were pushed; cement them
            // first.
        }
        cemented
    }

    fn confirm_one(&self, tx: &WriteTransaction, view: &mut UnconfirmedView, delta: &BlockDelta) {
        let block = &delta.block;
        let account = block.account();
        let hash = block.hash();
        let previous = block.block.previous();

        self.store.blocks.put(tx, &hash, block);
        self.stats
            .inc(StatType::ConfirmationHeight, StatDetail::BlocksConfirmed);
        self.cache.cemented_count.fetch_add(1, Ordering::SeqCst);
        self.cache.block_count.fetch_add(1, Ordering::SeqCst);
        view.block
            .remove(&hash)
            .expect("cementing a block without an overlay delta");
        if !is_zero(&previous) {
            view.successor.remove(&previous);
            self.store.blocks.successor_set(tx, &previous, hash);
        }
        if view.account.get(&account).map(|info| info.head) == Some(hash) {
            view.account.remove(&account);
            if !is_zero(&previous) {
                debug_assert!(view.accounts_updated > 0);
                view.accounts_updated -= 1;
            }
        } else if is_zero(&previous) {
            // Later overlay blocks still shadow this account; the entry now
            // shadows an on-disk account instead of introducing one
            view.accounts_updated += 1;
        }
        if block.is_send() {
            let destination = block.destination().expect("send without destination");
            let key = PendingKey::new(destination, hash);
            let info = delta
                .receivable
                .1
                .expect("send delta without receivable info");
            self.store.pending.put(tx, &key, &info);
            view.receivable.remove(&key);
        } else if block.is_receive() {
            let source = block.source().expect("receive without source");
            let key = PendingKey::new(account, source);
            self.store.pending.del(tx, &key);
            view.received.remove(&key);
        }
        self.store.accounts.put(tx, &account, &delta.head);
        self.store.confirmation_height.put(
            tx,
            &account,
            &ConfirmationHeightInfo {
                height: block.height(),
                frontier: hash,
            },
        );
        if is_zero(&previous) {
            self.cache.account_count.fetch_add(1, Ordering::SeqCst);
        }

        // Materialize the weight delta on the cemented side, then drop the
        // now-redundant overlay entries
        let representative = delta.head.representative;
        if let Some((old_representative, old_balance)) = delta.weight {
            self.cache.rep_weights.add(
                tx,
                &self.store.rep_weight,
                &old_representative,
                old_balance.wrapping_neg(),
            );
        }
        self.cache
            .rep_weights
            .add(tx, &self.store.rep_weight, &representative, delta.head.balance);
        view.weight_rebase(&representative, self.weight_exact(tx, &representative));
        if let Some((old_representative, _)) = delta.weight {
            view.weight_rebase(&old_representative, self.weight_exact(tx, &old_representative));
        }
    }

    /// Hashes this block depends on: predecessor and, for receives, the
    /// matched send. Zero entries mean no dependency.
    pub fn dependent_blocks(&self, block: &SavedBlock) -> [Hash; 2] {
        match &block.block {
            Block::Send(b) => [b.previous, ZERO_HASH],
            Block::Receive(b) => [b.previous, b.source],
            Block::Open(b) => {
                if b.source == self.constants.genesis_account {
                    [ZERO_HASH, ZERO_HASH]
                } else {
                    [b.source, ZERO_HASH]
                }
            }
            Block::Change(b) => [b.previous, ZERO_HASH],
            Block::State(b) => {
                let link_dependency = if self.constants.epochs.is_epoch_link(&b.link)
                    || block.sideband.details.is_send
                {
                    ZERO_HASH
                } else {
                    b.link
                };
                [b.previous, link_dependency]
            }
        }
    }

    /// All dependencies cemented (or absent).
    pub fn dependents_confirmed(&self, tx: &dyn Transaction, block: &SavedBlock) -> bool {
        self.dependent_blocks(block)
            .iter()
            .all(|hash| is_zero(hash) || self.confirmed().block_exists_or_pruned(tx, hash))
    }

    /// Vote weight of a representative: preconfigured bootstrap weight
    /// while the ledger is short, otherwise the cemented weight overlaid
    /// with pending deltas.
    pub fn weight(&self, account: &Account) -> Amount {
        if self.check_bootstrap_weights.load(Ordering::SeqCst) {
            if self.cache.block_count() < self.bootstrap_weight_max_blocks.load(Ordering::SeqCst) {
                let weights = self
                    .bootstrap_weights
                    .lock()
                    .expect("bootstrap weights lock poisoned");
                if let Some(weight) = weights.get(account) {
                    return *weight;
                }
            } else {
                self.check_bootstrap_weights.store(false, Ordering::SeqCst);
            }
        }
        {
            let view = self.unconfirmed.lock();
            if let Some(weight) = view.weight.get(account) {
                return *weight;
            }
        }
        self.cache.rep_weights.get(account)
    }

    /// Cemented weight, straight from storage.
    pub fn weight_exact(&self, tx: &dyn Transaction, representative: &Account) -> Amount {
        self.store.rep_weight.get(tx, representative)
    }

    /// Sum of receivable amounts for `account`. With `only_confirmed`, only
    /// entries whose send is cemented count.
    pub fn account_receivable(
        &self,
        tx: &dyn Transaction,
        account: &Account,
        only_confirmed: bool,
    ) -> Amount {
        let any = self.any();
        let mut result = 0;
        for (key, info) in any.receivable_upper_bound(tx, account, &ZERO_HASH) {
            if !only_confirmed || self.confirmed().block_exists_or_pruned(tx, &key.hash) {
                result += info.amount;
            }
        }
        result
    }

    /// Root for the next block on `account`: its head hash, or the account
    /// itself when unopened.
    pub fn latest_root(&self, tx: &dyn Transaction, account: &Account) -> Hash {
        match self.any().get_account(tx, account) {
            Some(info) => info.head,
            None => *account,
        }
    }

    /// Walk back from `hash` to the block that names the chain's current
    /// representative.
    pub fn representative_block(&self, tx: &dyn Transaction, hash: &Hash) -> Option<Hash> {
        let mut current = *hash;
        loop {
            let block = self.any().get_block(tx, &current)?;
            if block.block.representative_field().is_some() {
                return Some(current);
            }
            current = block.block.previous();
        }
    }

    /// Given the hash of a cemented send, find the receive on the
    /// destination chain that consumes it, walking down from the cemented
    /// frontier.
    pub fn find_receive_block_by_send_hash(
        &self,
        tx: &dyn Transaction,
        destination: &Account,
        send_hash: &Hash,
    ) -> Option<SavedBlock> {
        debug_assert!(!is_zero(send_hash));
        let info = self.confirmed().get_account(tx, destination)?;
        let mut current = self.any().get_block(tx, &info.head);
        while let Some(block) = current {
            if block.is_receive() && block.source() == Some(*send_hash) {
                return Some(block);
            }
            current = self.any().get_block(tx, &block.block.previous());
        }
        None
    }

    /// Epoch recorded for a stored block.
    pub fn version(&self, tx: &dyn Transaction, hash: &Hash) -> Epoch {
        self.any()
            .get_block(tx, hash)
            .map(|block| block.epoch())
            .unwrap_or(Epoch::Epoch0)
    }

    /// Replace the stored work of an uncemented block if `work` has higher
    /// difficulty. Returns true when the ledger was updated.
    pub fn update_work(&self, hash: &Hash, work: WorkNonce) -> bool {
        let mut view = self.unconfirmed.lock();
        let Some(delta) = view.block.get_mut(hash) else {
            return false;
        };
        let root = delta.block.block.root();
        if work_value(&root, work) <= work_value(&root, delta.block.block.work()) {
            return false;
        }
        delta.block.block.set_work(work);
        true
    }

    /// Sample a random (hash, root). With pruning enabled, draws fall on
    /// the pruned set proportionally to its share of the ledger.
    pub fn hash_root_random(&self, tx: &dyn Transaction) -> Option<(Hash, Hash)> {
        if !self.pruning.load(Ordering::SeqCst) {
            self.store
                .blocks
                .random(tx)
                .map(|block| (block.hash(), block.block.root()))
        } else {
            let count = self.cache.block_count();
            let region = if count > 0 {
                rand::Rng::gen_range(&mut rand::thread_rng(), 0..count)
            } else {
                0
            };
            if region < self.cache.pruned_count() {
                if let Some(hash) = self.store.pruned.random(tx) {
                    // Pruned blocks have no retrievable root
                    return Some((hash, ZERO_HASH));
                }
            }
            self.store
                .blocks
                .random(tx)
                .map(|block| (block.hash(), block.block.root()))
        }
    }

    /// Walk predecessors of `target`, moving each into the pruned set.
    /// Commits and renews the write transaction every `batch_size`
    /// deletions. Must only be called for cemented hashes.
    pub fn pruning_action(&self, tx: &WriteTransaction, target: &Hash, batch_size: u64) -> u64 {
        let mut pruned = 0u64;
        let mut current = *target;
        let genesis_hash = self.constants.genesis_hash();
        while !is_zero(&current) && current != genesis_hash {
            if let Some(block) = self.store.blocks.get(tx, &current) {
                debug_assert!(self.confirmed().block_exists(tx, &current));
                self.store.blocks.del(tx, &current);
                self.store.pruned.put(tx, &current);
                current = block.block.previous();
                pruned += 1;
                self.cache.pruned_count.fetch_add(1, Ordering::SeqCst);
                if pruned % batch_size == 0 {
                    tx.commit();
                    tx.renew();
                }
            } else if self.store.pruned.exists(tx, &current) {
                break;
            } else {
                tracing::error!(
                    "pruning walk hit unknown block {}",
                    crate::to_hex_short(&current)
                );
                break;
            }
        }
        pruned
    }

    /// Resolve the block currently occupying `block`'s position, for fork
    /// handling.
    pub fn forked_block(&self, tx: &dyn Transaction, block: &Block) -> Option<SavedBlock> {
        debug_assert!(!self.any().block_exists(tx, &block.hash()));
        let root = block.qualified_root();
        if let Some(successor) = self.any().successor_by_root(tx, &root) {
            if let Some(existing) = self.any().get_block(tx, &successor) {
                return Some(existing);
            }
        }
        let info = self.any().get_account(tx, &root.root)?;
        self.any().get_block(tx, &info.open_block)
    }

    /// Cemented blocks.
    pub fn cemented_count(&self) -> u64 {
        self.cache.cemented_count()
    }

    /// Cemented plus unconfirmed blocks.
    pub fn block_count(&self) -> u64 {
        self.cache.block_count() + self.unconfirmed.block_size() as u64
    }

    /// Cemented plus unconfirmed accounts.
    pub fn account_count(&self) -> u64 {
        self.cache.account_count() + self.unconfirmed.account_size() as u64
    }

    pub fn pruned_count(&self) -> u64 {
        self.cache.pruned_count()
    }
}
