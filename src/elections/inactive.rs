//! Cache of votes received for hashes with no active election.
//!
//! Votes arriving ahead of their block are remembered here. Enough distinct
//! voters promote the hash to an election (when the block is known) or flag
//! it for bootstrap; enough weight marks it confirmed outright, letting a
//! late-arriving block skip voting entirely.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

use crate::constants::ELECTION_START_VOTERS;
use crate::types::Amount;
use crate::{Account, Hash};

/// Sticky status flags; once set they stay set for the entry's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStatus {
    /// Enough voters to justify fetching the block
    pub bootstrap_started: bool,
    /// Enough voters to start an election when the block is present
    pub election_started: bool,
    /// Cached weight alone meets quorum
    pub confirmed: bool,
}

/// Votes accumulated for one hash.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub hash: Hash,
    /// Latest timestamp per voter, insertion-ordered
    pub voters: Vec<(Account, u64)>,
    pub arrival: Instant,
    pub status: CacheStatus,
}

impl CacheEntry {
    /// Sum of voter weights as valued by `weight_of`.
    pub fn tally(&self, mut weight_of: impl FnMut(&Account) -> Amount) -> Amount {
        self.voters
            .iter()
            .map(|(account, _)| weight_of(account))
            .sum()
    }
}

#[derive(Default)]
struct CacheInner {
    by_hash: HashMap<Hash, CacheEntry>,
    order: VecDeque<Hash>,
}

/// The inactive-votes cache, LRU-bounded by entry count.
pub struct InactiveVoteCache {
    inner: Mutex<CacheInner>,
    max_size: usize,
}

impl InactiveVoteCache {
    pub fn new(max_size: usize) -> Self {
        InactiveVoteCache {
            inner: Mutex::new(CacheInner::default()),
            max_size,
        }
    }

    /// Record a vote for `hash`. Returns the statuses before and after so
    /// the caller can act on edges (election start, confirmation).
    pub fn vote(
        &self,
        hash: &Hash,
        voter: &Account,
        timestamp: u64,
        weight_of: impl FnMut(&Account) -> Amount,
        quorum_delta: Amount,
    ) -> (CacheStatus, CacheStatus) {
        let mut inner = self.inner.lock().expect("inactive cache lock poisoned");
        if !inner.by_hash.contains_key(hash) {
            while inner.order.len() >= self.max_size {
                if let Some(oldest) = inner.order.pop_front() {
                    inner.by_hash.remove(&oldest);
                }
            }
            inner.order.push_back(*hash);
            inner.by_hash.insert(
                *hash,
                CacheEntry {
                    hash: *hash,
                    voters: Vec::new(),
                    arrival: Instant::now(),
                    status: CacheStatus::default(),
                },
            );
        }
        let entry = inner
            .by_hash
            .get_mut(hash)
            .expect("entry inserted just above");
        let previous = entry.status;
        match entry.voters.iter_mut().find(|(account, _)| account == voter) {
            Some((_, existing_timestamp)) => {
                if timestamp > *existing_timestamp {
                    *existing_timestamp = timestamp;
                }
            }
            None => entry.voters.push((*voter, timestamp)),
        }
        if entry.voters.len() >= ELECTION_START_VOTERS {
            entry.status.bootstrap_started = true;
            entry.status.election_started = true;
        }
        if quorum_delta > 0 && entry.tally(weight_of) >= quorum_delta {
            entry.status.confirmed = true;
        }
        (previous, entry.status)
    }

    pub fn find(&self, hash: &Hash) -> Option<CacheEntry> {
        self.inner
            .lock()
            .expect("inactive cache lock poisoned")
            .by_hash
            .get(hash)
            .cloned()
    }

    /// Remove and return the entry for `hash`, typically when its election
    /// starts.
    pub fn erase(&self, hash: &Hash) -> Option<CacheEntry> {
        let mut inner = self.inner.lock().expect("inactive cache lock poisoned");
        let entry = inner.by_hash.remove(hash);
        if entry.is_some() {
            inner.order.retain(|h| h != hash);
        }
        entry
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("inactive cache lock poisoned")
            .by_hash
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
