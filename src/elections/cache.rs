//! Bounded rings remembering finished elections.
//!
//! `RecentlyConfirmed` backs vote replay detection: a root stays here from
//! quorum until well after cementation, bounded by insertion order.
//! `RecentlyCemented` keeps the last few finalized statuses for observers.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use crate::block::SavedBlock;
use crate::types::{Amount, QualifiedRoot};
use crate::Hash;

/// Insertion-ordered set of (root, winner hash) pairs with O(1) lookup by
/// either key.
pub struct RecentlyConfirmed {
    inner: Mutex<RecentlyConfirmedInner>,
    capacity: usize,
}

#[derive(Default)]
struct RecentlyConfirmedInner {
    order: VecDeque<(QualifiedRoot, Hash)>,
    by_root: HashSet<QualifiedRoot>,
    by_hash: HashSet<Hash>,
}

impl RecentlyConfirmed {
    pub fn new(capacity: usize) -> Self {
        RecentlyConfirmed {
            inner: Mutex::new(RecentlyConfirmedInner::default()),
            capacity,
        }
    }

    pub fn put(&self, root: QualifiedRoot, hash: Hash) {
        let mut inner = self.inner.lock().expect("recently confirmed lock poisoned");
        if inner.by_root.contains(&root) {
            return;
        }
        inner.order.push_back((root, hash));
        inner.by_root.insert(root);
        inner.by_hash.insert(hash);
        while inner.order.len() > self.capacity {
            if let Some((old_root, old_hash)) = inner.order.pop_front() {
                inner.by_root.remove(&old_root);
                inner.by_hash.remove(&old_hash);
            }
        }
    }

    pub fn root_exists(&self, root: &QualifiedRoot) -> bool {
        self.inner
            .lock()
            .expect("recently confirmed lock poisoned")
            .by_root
            .contains(root)
    }

    pub fn hash_exists(&self, hash: &Hash) -> bool {
        self.inner
            .lock()
            .expect("recently confirmed lock poisoned")
            .by_hash
            .contains(hash)
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("recently confirmed lock poisoned")
            .order
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget everything; test hook for exercising replay transitions.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("recently confirmed lock poisoned");
        inner.order.clear();
        inner.by_root.clear();
        inner.by_hash.clear();
    }
}

/// Final status of a finished election, kept for observers.
#[derive(Clone, Debug)]
pub struct CementedStatus {
    pub winner: SavedBlock,
    pub tally: Amount,
    pub final_tally: Amount,
    pub voter_count: u32,
    pub block_count: u32,
    pub confirmation_request_count: u32,
}

/// Bounded list of recently cemented election statuses.
pub struct RecentlyCemented {
    inner: Mutex<VecDeque<CementedStatus>>,
    capacity: usize,
}

impl RecentlyCemented {
    pub fn new(capacity: usize) -> Self {
        RecentlyCemented {
            inner: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn put(&self, status: CementedStatus) {
        let mut inner = self.inner.lock().expect("recently cemented lock poisoned");
        inner.push_back(status);
        while inner.len() > self.capacity {
            inner.pop_front();
        }
    }

    pub fn list(&self) -> Vec<CementedStatus> {
        self.inner
            .lock()
            .expect("recently cemented lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("recently cemented lock poisoned")
            .len()
    }
}
