//! Persistent storage façade: typed, ordered key-value tables over sled.
//!
//! Every durable table of the ledger lives here. Keys are fixed-width
//! big-endian byte layouts so sled's lexicographic order equals logical
//! order; values are bincode-encoded serde types. Write access is
//! serialized through a writer-class queue ([`write_queue::WriteQueue`]);
//! sled applies individual operations atomically and `commit` acts as a
//! durability barrier.
//!
//! Disk failure is fatal to the node: table operations log and panic on
//! sled errors rather than propagating them, and reads report absence as
//! `None`.

pub mod write_queue;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::block::SavedBlock;
use crate::types::{AccountInfo, Amount, ConfirmationHeightInfo, PendingInfo, PendingKey};
use crate::{Account, Hash};

pub use write_queue::{WriteGuard, WriteQueue, Writer};

/// Errors opening a database.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] sled::Error),
}

fn fatal<T>(result: sled::Result<T>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            tracing::error!("fatal storage error in {context}: {e}");
            panic!("fatal storage error in {context}: {e}");
        }
    }
}

fn bincode_config() -> bincode::config::Configuration<
    bincode::config::LittleEndian,
    bincode::config::Fixint,
    bincode::config::Limit<{ 16 * 1024 * 1024 }>,
> {
    bincode::config::legacy().with_limit::<{ 16 * 1024 * 1024 }>()
}

fn encode<T: Serialize>(value: &T, context: &str) -> Vec<u8> {
    match bincode::serde::encode_to_vec(value, bincode_config()) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("fatal encode error in {context}: {e}");
            panic!("fatal encode error in {context}: {e}");
        }
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8], context: &str) -> T {
    match bincode::serde::decode_from_slice(bytes, bincode_config()) {
        Ok((value, _)) => value,
        Err(e) => {
            tracing::error!("fatal decode error in {context}: {e}");
            panic!("fatal decode error in {context}: {e}");
        }
    }
}

fn array_32(bytes: &[u8]) -> [u8; 32] {
    bytes.try_into().expect("malformed 32-byte table key")
}

/// Marker for an open transaction; reads accept either kind.
pub trait Transaction {}

/// Snapshot-consistent read access.
pub struct ReadTransaction<'a> {
    _store: &'a Store,
}

impl Transaction for ReadTransaction<'_> {}

/// Serialized write access holding a write-queue ticket. `commit` flushes
/// to disk; `renew` commits and keeps the ticket for continued writing.
pub struct WriteTransaction<'a> {
    store: &'a Store,
    _guard: WriteGuard<'a>,
}

impl Transaction for WriteTransaction<'_> {}

impl WriteTransaction<'_> {
    /// Durability barrier: block until all prior writes reach disk.
    pub fn commit(&self) {
        fatal(self.store.db.flush().map(|_| ()), "commit");
    }

    /// Commit and continue writing under the same ticket.
    pub fn renew(&self) {
        self.commit();
    }
}

/// The database and its typed tables.
pub struct Store {
    db: sled::Db,
    pub accounts: AccountTable,
    pub blocks: BlockTable,
    pub pending: PendingTable,
    pub confirmation_height: ConfirmationHeightTable,
    pub pruned: PrunedTable,
    pub rep_weight: RepWeightTable,
    pub online_weight: OnlineWeightTable,
    pub final_votes: FinalVoteTable,
    write_queue: WriteQueue,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path)?)
    }

    /// Open a temporary database (for testing).
    pub fn open_temporary() -> Result<Self, StoreError> {
        let config = sled::Config::new().temporary(true);
        Self::from_db(config.open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        Ok(Store {
            accounts: AccountTable {
                tree: db.open_tree("accounts")?,
            },
            blocks: BlockTable {
                tree: db.open_tree("blocks")?,
            },
            pending: PendingTable {
                tree: db.open_tree("pending")?,
            },
            confirmation_height: ConfirmationHeightTable {
                tree: db.open_tree("confirmation_height")?,
            },
            pruned: PrunedTable {
                tree: db.open_tree("pruned")?,
            },
            rep_weight: RepWeightTable {
                tree: db.open_tree("rep_weight")?,
            },
            online_weight: OnlineWeightTable {
                tree: db.open_tree("online_weight")?,
            },
            final_votes: FinalVoteTable {
                tree: db.open_tree("final_votes")?,
            },
            write_queue: WriteQueue::new(),
            db,
        })
    }

    /// Open an auxiliary tree in the same database, used by the confirming
    /// set for its durable queue.
    pub fn open_tree(&self, name: &str) -> Result<sled::Tree, StoreError> {
        Ok(self.db.open_tree(name)?)
    }

    pub fn tx_begin_read(&self) -> ReadTransaction<'_> {
        ReadTransaction { _store: self }
    }

    /// Wait in the writer queue under `writer`, then open write access.
    pub fn tx_begin_write(&self, writer: Writer) -> WriteTransaction<'_> {
        let guard = self.write_queue.wait(writer);
        WriteTransaction {
            store: self,
            _guard: guard,
        }
    }

    pub fn write_queue(&self) -> &WriteQueue {
        &self.write_queue
    }

    pub fn flush(&self) {
        fatal(self.db.flush().map(|_| ()), "flush");
    }
}

/// account -> account_info
pub struct AccountTable {
    tree: sled::Tree,
}

impl AccountTable {
    pub fn get(&self, _tx: &dyn Transaction, account: &Account) -> Option<AccountInfo> {
        fatal(self.tree.get(account), "accounts.get")
            .map(|bytes| decode(&bytes, "accounts.get"))
    }

    pub fn put(&self, _tx: &WriteTransaction, account: &Account, info: &AccountInfo) {
        fatal(
            self.tree
                .insert(account, encode(info, "accounts.put"))
                .map(|_| ()),
            "accounts.put",
        );
    }

    pub fn del(&self, _tx: &WriteTransaction, account: &Account) {
        fatal(self.tree.remove(account).map(|_| ()), "accounts.del");
    }

    pub fn exists(&self, tx: &dyn Transaction, account: &Account) -> bool {
        self.get(tx, account).is_some()
    }

    pub fn count(&self, _tx: &dyn Transaction) -> u64 {
        self.tree.len() as u64
    }

    /// Forward iteration from the first entry with key >= `start`.
    pub fn iter_from<'a>(
        &'a self,
        _tx: &'a dyn Transaction,
        start: &Account,
    ) -> impl Iterator<Item = (Account, AccountInfo)> + 'a {
        self.tree.range(start.to_vec()..).map(|item| {
            let (key, value) = fatal(item, "accounts.iter");
            (array_32(&key), decode(&value, "accounts.iter"))
        })
    }

    /// Sharded parallel scan over the whole table.
    pub fn for_each_par(
        &self,
        action: impl Fn(&mut dyn Iterator<Item = (Account, AccountInfo)>) + Send + Sync,
    ) {
        use rayon::prelude::*;
        (0u16..=255).into_par_iter().for_each(|prefix| {
            let mut iter = self.tree.scan_prefix([prefix as u8]).map(|item| {
                let (key, value) = fatal(item, "accounts.for_each_par");
                (array_32(&key), decode(&value, "accounts.for_each_par"))
            });
            action(&mut iter);
        });
    }
}

/// hash -> (block, sideband); cemented blocks only
pub struct BlockTable {
    tree: sled::Tree,
}

impl BlockTable {
    pub fn get(&self, _tx: &dyn Transaction, hash: &Hash) -> Option<SavedBlock> {
        fatal(self.tree.get(hash), "blocks.get").map(|bytes| decode(&bytes, "blocks.get"))
    }

    pub fn put(&self, _tx: &WriteTransaction, hash: &Hash, block: &SavedBlock) {
        fatal(
            self.tree
                .insert(hash, encode(block, "blocks.put"))
                .map(|_| ()),
            "blocks.put",
        );
    }

    pub fn del(&self, _tx: &WriteTransaction, hash: &Hash) {
        fatal(self.tree.remove(hash).map(|_| ()), "blocks.del");
    }

    pub fn exists(&self, _tx: &dyn Transaction, hash: &Hash) -> bool {
        fatal(self.tree.contains_key(hash), "blocks.exists")
    }

    pub fn count(&self, _tx: &dyn Transaction) -> u64 {
        self.tree.len() as u64
    }

    /// Successor recorded in the stored sideband, if any.
    pub fn successor(&self, tx: &dyn Transaction, hash: &Hash) -> Option<Hash> {
        let block = self.get(tx, hash)?;
        if crate::is_zero(&block.sideband.successor) {
            None
        } else {
            Some(block.sideband.successor)
        }
    }

    /// Update the stored sideband's successor link.
    pub fn successor_set(&self, tx: &WriteTransaction, hash: &Hash, successor: Hash) {
        if let Some(mut block) = self.get(tx, hash) {
            block.sideband.successor = successor;
            self.put(tx, hash, &block);
        }
    }

    /// Uniformly sample a stored block by drawing a random key and taking
    /// the next entry, wrapping at the end.
    pub fn random(&self, _tx: &dyn Transaction) -> Option<SavedBlock> {
        if self.tree.is_empty() {
            return None;
        }
        let mut probe = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut probe[..]);
        let item = self
            .tree
            .range(probe.to_vec()..)
            .next()
            .or_else(|| self.tree.iter().next());
        item.map(|entry| {
            let (_, value) = fatal(entry, "blocks.random");
            decode(&value, "blocks.random")
        })
    }

    pub fn is_empty(&self, _tx: &dyn Transaction) -> bool {
        self.tree.is_empty()
    }
}

/// (destination_account, send_hash) -> (source, amount, epoch)
pub struct PendingTable {
    tree: sled::Tree,
}

impl PendingTable {
    pub fn get(&self, _tx: &dyn Transaction, key: &PendingKey) -> Option<PendingInfo> {
        fatal(self.tree.get(key.to_bytes()), "pending.get")
            .map(|bytes| decode(&bytes, "pending.get"))
    }

    pub fn put(&self, _tx: &WriteTransaction, key: &PendingKey, info: &PendingInfo) {
        fatal(
            self.tree
                .insert(key.to_bytes().as_slice(), encode(info, "pending.put"))
                .map(|_| ()),
            "pending.put",
        );
    }

    pub fn del(&self, _tx: &WriteTransaction, key: &PendingKey) {
        fatal(
            self.tree.remove(key.to_bytes().as_slice()).map(|_| ()),
            "pending.del",
        );
    }

    pub fn exists(&self, _tx: &dyn Transaction, key: &PendingKey) -> bool {
        fatal(self.tree.contains_key(key.to_bytes()), "pending.exists")
    }

    pub fn count(&self, _tx: &dyn Transaction) -> u64 {
        self.tree.len() as u64
    }

    /// Forward iteration from the first entry with key >= `start`.
    pub fn iter_from<'a>(
        &'a self,
        _tx: &'a dyn Transaction,
        start: &PendingKey,
    ) -> impl Iterator<Item = (PendingKey, PendingInfo)> + 'a {
        self.tree.range(start.to_bytes().to_vec()..).map(|item| {
            let (key, value) = fatal(item, "pending.iter");
            (
                PendingKey::from_bytes(&key).expect("malformed pending key"),
                decode(&value, "pending.iter"),
            )
        })
    }
}

/// account -> (height, frontier)
pub struct ConfirmationHeightTable {
    tree: sled::Tree,
}

impl ConfirmationHeightTable {
    pub fn get(&self, _tx: &dyn Transaction, account: &Account) -> Option<ConfirmationHeightInfo> {
        fatal(self.tree.get(account), "confirmation_height.get")
            .map(|bytes| decode(&bytes, "confirmation_height.get"))
    }

    pub fn put(&self, _tx: &WriteTransaction, account: &Account, info: &ConfirmationHeightInfo) {
        fatal(
            self.tree
                .insert(account, encode(info, "confirmation_height.put"))
                .map(|_| ()),
            "confirmation_height.put",
        );
    }

    pub fn del(&self, _tx: &WriteTransaction, account: &Account) {
        fatal(
            self.tree.remove(account).map(|_| ()),
            "confirmation_height.del",
        );
    }

    pub fn exists(&self, tx: &dyn Transaction, account: &Account) -> bool {
        self.get(tx, account).is_some()
    }

    pub fn count(&self, _tx: &dyn Transaction) -> u64 {
        self.tree.len() as u64
    }
}

/// hash -> (); bodies discarded below the pruning threshold
pub struct PrunedTable {
    tree: sled::Tree,
}

impl PrunedTable {
    pub fn put(&self, _tx: &WriteTransaction, hash: &Hash) {
        fatal(self.tree.insert(hash, &[][..]).map(|_| ()), "pruned.put");
    }

    pub fn del(&self, _tx: &WriteTransaction, hash: &Hash) {
        fatal(self.tree.remove(hash).map(|_| ()), "pruned.del");
    }

    pub fn exists(&self, _tx: &dyn Transaction, hash: &Hash) -> bool {
        fatal(self.tree.contains_key(hash), "pruned.exists")
    }

    pub fn count(&self, _tx: &dyn Transaction) -> u64 {
        self.tree.len() as u64
    }

    pub fn random(&self, _tx: &dyn Transaction) -> Option<Hash> {
        if self.tree.is_empty() {
            return None;
        }
        let mut probe = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut probe[..]);
        let item = self
            .tree
            .range(probe.to_vec()..)
            .next()
            .or_else(|| self.tree.iter().next());
        item.map(|entry| {
            let (key, _) = fatal(entry, "pruned.random");
            array_32(&key)
        })
    }
}

/// representative -> weight
pub struct RepWeightTable {
    tree: sled::Tree,
}

impl RepWeightTable {
    pub fn get(&self, _tx: &dyn Transaction, account: &Account) -> Amount {
        fatal(self.tree.get(account), "rep_weight.get")
            .map(|bytes| {
                Amount::from_le_bytes(bytes.as_ref().try_into().expect("malformed weight value"))
            })
            .unwrap_or(0)
    }

    pub fn put(&self, _tx: &WriteTransaction, account: &Account, weight: Amount) {
        if weight == 0 {
            fatal(self.tree.remove(account).map(|_| ()), "rep_weight.del");
        } else {
            fatal(
                self.tree
                    .insert(account, &weight.to_le_bytes()[..])
                    .map(|_| ()),
                "rep_weight.put",
            );
        }
    }

    pub fn count(&self, _tx: &dyn Transaction) -> u64 {
        self.tree.len() as u64
    }

    /// Sharded parallel scan over the whole table.
    pub fn for_each_par(
        &self,
        action: impl Fn(&mut dyn Iterator<Item = (Account, Amount)>) + Send + Sync,
    ) {
        use rayon::prelude::*;
        (0u16..=255).into_par_iter().for_each(|prefix| {
            let mut iter = self.tree.scan_prefix([prefix as u8]).map(|item| {
                let (key, value) = fatal(item, "rep_weight.for_each_par");
                (
                    array_32(&key),
                    Amount::from_le_bytes(
                        value.as_ref().try_into().expect("malformed weight value"),
                    ),
                )
            });
            action(&mut iter);
        });
    }
}

/// timestamp -> online weight sample, ordered by time
pub struct OnlineWeightTable {
    tree: sled::Tree,
}

impl OnlineWeightTable {
    pub fn put(&self, _tx: &WriteTransaction, timestamp: u64, weight: Amount) {
        fatal(
            self.tree
                .insert(timestamp.to_be_bytes(), &weight.to_le_bytes()[..])
                .map(|_| ()),
            "online_weight.put",
        );
    }

    pub fn del(&self, _tx: &WriteTransaction, timestamp: u64) {
        fatal(
            self.tree.remove(timestamp.to_be_bytes()).map(|_| ()),
            "online_weight.del",
        );
    }

    pub fn count(&self, _tx: &dyn Transaction) -> u64 {
        self.tree.len() as u64
    }

    /// All samples in time order.
    pub fn iter<'a>(
        &'a self,
        _tx: &'a dyn Transaction,
    ) -> impl Iterator<Item = (u64, Amount)> + 'a {
        self.tree.iter().map(|item| {
            let (key, value) = fatal(item, "online_weight.iter");
            (
                u64::from_be_bytes(key.as_ref().try_into().expect("malformed timestamp key")),
                Amount::from_le_bytes(value.as_ref().try_into().expect("malformed weight value")),
            )
        })
    }

    /// Drop oldest samples beyond `max`.
    pub fn trim(&self, tx: &WriteTransaction, max: usize) {
        while self.count(tx) as usize > max {
            let Some(item) = self.tree.iter().next() else {
                break;
            };
            let (key, _) = fatal(item, "online_weight.trim");
            fatal(self.tree.remove(key).map(|_| ()), "online_weight.trim");
        }
    }
}

/// (root, hash) registrations backing final-vote quorum
pub struct FinalVoteTable {
    tree: sled::Tree,
}

impl FinalVoteTable {
    /// Register `hash` as the final-vote target for `root`. Returns false
    /// if a different hash is already registered.
    pub fn put(&self, _tx: &WriteTransaction, root: &crate::types::QualifiedRoot, hash: &Hash) -> bool {
        let key = root.to_bytes();
        match fatal(self.tree.get(key), "final_votes.get") {
            Some(existing) => existing.as_ref() == hash.as_slice(),
            None => {
                fatal(
                    self.tree.insert(&key[..], &hash[..]).map(|_| ()),
                    "final_votes.put",
                );
                true
            }
        }
    }

    pub fn get(&self, _tx: &dyn Transaction, root: &crate::types::QualifiedRoot) -> Option<Hash> {
        fatal(self.tree.get(root.to_bytes()), "final_votes.get").map(|bytes| array_32(&bytes))
    }

    pub fn del(&self, _tx: &WriteTransaction, root: &crate::types::QualifiedRoot) {
        fatal(
            self.tree.remove(root.to_bytes().as_slice()).map(|_| ()),
            "final_votes.del",
        );
    }

    pub fn count(&self, _tx: &dyn Transaction) -> u64 {
        self.tree.len() as u64
    }
}
