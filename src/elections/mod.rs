//! The active-elections engine: in-flight votes-in-progress on competing
//! blocks.
//!
//! One election exists per contested `QualifiedRoot` at most. Elections are
//! created by scheduler activation, by block arrival, or by inactive-vote
//! promotion; they terminate on quorum, by being dropped for bound, and
//! feed winners into the confirming set. A request-loop thread broadcasts
//! confirmation requests for unconfirmed elections.

pub mod cache;
pub mod election;
pub mod inactive;
pub mod vote_processor;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::block::{Block, SavedBlock};
use crate::config::ElectionsConfig;
use crate::confirming_set::ConfirmingSet;
use crate::constants;
use crate::ledger::Ledger;
use crate::network::{DropPolicy, Message, Network, NetworkFilter};
use crate::reps::OnlineReps;
use crate::stats::{StatDetail, StatType, Stats};
use crate::types::QualifiedRoot;
use crate::vote::{Vote, VoteCode};
use crate::Hash;

pub use cache::{CementedStatus, RecentlyCemented, RecentlyConfirmed};
pub use election::{CandidateInsertion, Election, ElectionBehavior, ElectionStatus, VoteApply};
pub use inactive::{CacheEntry, CacheStatus, InactiveVoteCache};
pub use vote_processor::VoteProcessor;

#[derive(Default)]
struct ActiveState {
    roots: HashMap<QualifiedRoot, Arc<Election>>,
    /// candidate hash -> owning election, across all elections
    blocks: HashMap<Hash, Arc<Election>>,
    stopped: bool,
}

/// The set of in-flight elections and the policy around them.
pub struct ActiveElections {
    config: ElectionsConfig,
    ledger: Arc<Ledger>,
    confirming_set: Arc<ConfirmingSet>,
    online_reps: Arc<OnlineReps>,
    network: Arc<dyn Network>,
    filter: Arc<NetworkFilter>,
    stats: Arc<Stats>,
    state: Mutex<ActiveState>,
    condition: Condvar,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    pub recently_confirmed: RecentlyConfirmed,
    pub recently_cemented: RecentlyCemented,
    recently_dropped: Mutex<VecDeque<QualifiedRoot>>,
    pub inactive_votes_cache: InactiveVoteCache,
    /// Notified with the new difficulty when a republish raises a stored
    /// block's work
    pub difficulty_observers: crate::observer::ObserverSet<u64>,
    /// Invoked whenever the vacancy count changes
    vacancy_update: Mutex<Box<dyn Fn() + Send + Sync>>,
}

impl ActiveElections {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ElectionsConfig,
        ledger: Arc<Ledger>,
        confirming_set: Arc<ConfirmingSet>,
        online_reps: Arc<OnlineReps>,
        network: Arc<dyn Network>,
        filter: Arc<NetworkFilter>,
        stats: Arc<Stats>,
    ) -> Arc<Self> {
        Arc::new(ActiveElections {
            config,
            ledger,
            confirming_set,
            online_reps,
            network,
            filter,
            stats,
            state: Mutex::new(ActiveState::default()),
            condition: Condvar::new(),
            thread: Mutex::new(None),
            recently_confirmed: RecentlyConfirmed::new(constants::RECENTLY_CONFIRMED_MAX),
            recently_cemented: RecentlyCemented::new(constants::RECENTLY_CEMENTED_MAX),
            recently_dropped: Mutex::new(VecDeque::new()),
            inactive_votes_cache: InactiveVoteCache::new(constants::INACTIVE_VOTES_CACHE_MAX),
            difficulty_observers: crate::observer::ObserverSet::new(),
            vacancy_update: Mutex::new(Box::new(|| {})),
        })
    }

    /// Register the callback invoked on vacancy edges; the scheduler uses
    /// it to push more work.
    pub fn set_vacancy_update(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self
            .vacancy_update
            .lock()
            .expect("vacancy callback lock poisoned") = Box::new(callback);
    }

    fn notify_vacancy(&self) {
        let callback = self
            .vacancy_update
            .lock()
            .expect("vacancy callback lock poisoned");
        callback();
    }

    pub fn size(&self) -> usize {
        self.state.lock().expect("elections lock poisoned").roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Remaining admission capacity; non-positive when full.
    pub fn vacancy(&self) -> i64 {
        self.config.active_elections_size as i64 - self.size() as i64
    }

    pub fn election(&self, root: &QualifiedRoot) -> Option<Arc<Election>> {
        self.state
            .lock()
            .expect("elections lock poisoned")
            .roots
            .get(root)
            .cloned()
    }

    pub fn election_by_block(&self, hash: &Hash) -> Option<Arc<Election>> {
        self.state
            .lock()
            .expect("elections lock poisoned")
            .blocks
            .get(hash)
            .cloned()
    }

    pub fn active(&self, block: &Block) -> bool {
        self.election_by_block(&block.hash()).is_some()
    }

    pub fn recently_dropped(&self) -> Vec<QualifiedRoot> {
        self.recently_dropped
            .lock()
            .expect("dropped ring lock poisoned")
            .iter()
            .copied()
            .collect()
    }

    /// Start (or join) an election for `block`. Refused when the root was
    /// already confirmed, or when the engine is full and neither the
    /// newcomer is wallet-local nor an existing election is evictable.
    pub fn insert(
        &self,
        block: &Block,
        behavior: ElectionBehavior,
        is_local: bool,
    ) -> (bool, Option<Arc<Election>>) {
        let root = block.qualified_root();
        let hash = block.hash();
        let mut cached_entry = None;
        let election;
        {
            let mut state = self.state.lock().expect("elections lock poisoned");
            if state.stopped {
                return (false, None);
            }
            if self.recently_confirmed.root_exists(&root) {
                return (false, None);
            }
            if let Some(existing) = state.roots.get(&root).cloned() {
                // The root is already contested; offer the block as a fork
                // candidate instead
                drop(state);
                self.publish(block);
                return (false, Some(existing));
            }
            if state.roots.len() >= self.config.active_elections_size && !is_local {
                if !self.evict_one(&mut state) {
                    self.stats
                        .inc(StatType::ElectionDrop, StatDetail::ElectionDropOverflow);
                    self.recently_dropped
                        .lock()
                        .expect("dropped ring lock poisoned")
                        .push_back(root);
                    return (false, None);
                }
            }
            election = Arc::new(Election::new(block.clone(), behavior, is_local));
            state.roots.insert(root, Arc::clone(&election));
            state.blocks.insert(hash, Arc::clone(&election));
            self.stats.inc(StatType::Election, StatDetail::ElectionStart);
            // Votes that arrived before the block count immediately
            if let Some(entry) = self.inactive_votes_cache.erase(&hash) {
                cached_entry = Some(entry);
            }
        }
        if let Some(entry) = cached_entry {
            for (voter, timestamp) in &entry.voters {
                if election.vote(voter, *timestamp, hash) == VoteApply::New {
                    self.stats.inc(StatType::Election, StatDetail::VoteCached);
                }
            }
            self.confirm_if_quorum(&election);
        }
        self.notify_vacancy();
        (true, Some(election))
    }

    /// Drop the least valuable unconfirmed, non-local election. Policy:
    /// lowest winner tally, then oldest.
    fn evict_one(&self, state: &mut ActiveState) -> bool {
        let victim = state
            .roots
            .values()
            .filter(|election| !election.is_local && !election.confirmed())
            .min_by(|a, b| {
                let tally_a = a.status().tally;
                let tally_b = b.status().tally;
                tally_a
                    .cmp(&tally_b)
                    .then_with(|| b.age().cmp(&a.age()))
            })
            .cloned();
        match victim {
            Some(election) => {
                let root = election.qualified_root();
                self.erase_locked(state, &election);
                self.stats
                    .inc(StatType::ElectionDrop, StatDetail::ElectionDropOverflow);
                self.recently_dropped
                    .lock()
                    .expect("dropped ring lock poisoned")
                    .push_back(root);
                for block in election.blocks() {
                    self.filter.clear_block(&block);
                }
                tracing::debug!(
                    "dropped election for root {} at bound",
                    crate::to_hex_short(&root.root)
                );
                true
            }
            None => false,
        }
    }

    fn erase_locked(&self, state: &mut ActiveState, election: &Arc<Election>) {
        state.roots.remove(&election.qualified_root());
        for block in election.blocks() {
            state.blocks.remove(&block.hash());
        }
    }

    /// Offer a fork candidate to the election already holding its root.
    /// Returns true when the block is now (or already was) a candidate.
    pub fn publish(&self, block: &Block) -> bool {
        let root = block.qualified_root();
        let hash = block.hash();
        let Some(election) = self.election(&root) else {
            return false;
        };
        let incoming_tally = self
            .inactive_votes_cache
            .find(&hash)
            .map(|entry| entry.tally(|account| self.ledger.weight(account)))
            .unwrap_or(0);
        match election.insert_candidate(block, incoming_tally, |account| {
            self.ledger.weight(account)
        }) {
            CandidateInsertion::Inserted => {
                let mut state = self.state.lock().expect("elections lock poisoned");
                state.blocks.insert(hash, Arc::clone(&election));
                true
            }
            CandidateInsertion::Replaced(evicted) => {
                let mut state = self.state.lock().expect("elections lock poisoned");
                state.blocks.remove(&evicted.hash());
                state.blocks.insert(hash, Arc::clone(&election));
                drop(state);
                self.filter.clear_block(&evicted);
                // Cached votes for the newcomer apply now
                if let Some(entry) = self.inactive_votes_cache.erase(&hash) {
                    for (voter, timestamp) in &entry.voters {
                        if election.vote(voter, *timestamp, hash) == VoteApply::New {
                            self.stats.inc(StatType::Election, StatDetail::VoteCached);
                        }
                    }
                    self.confirm_if_quorum(&election);
                }
                true
            }
            CandidateInsertion::Existed => true,
            CandidateInsertion::Refused => false,
        }
    }

    /// Submit a vote; one code per listed hash.
    pub fn vote(&self, vote: &Vote) -> HashMap<Hash, VoteCode> {
        let mut results = HashMap::new();
        for hash in &vote.hashes {
            let code = self.vote_one(vote, hash);
            results.insert(*hash, code);
        }
        results
    }

    fn vote_one(&self, vote: &Vote, hash: &Hash) -> VoteCode {
        if let Some(election) = self.election_by_block(hash) {
            if vote.is_final() {
                // A final vote binds (root, hash) durably; a conflicting
                // registration invalidates the vote
                let tx = self
                    .ledger
                    .store
                    .tx_begin_write(crate::store::Writer::Generic);
                let accepted =
                    self.ledger
                        .store
                        .final_votes
                        .put(&tx, &election.qualified_root(), hash);
                tx.commit();
                drop(tx);
                if !accepted {
                    self.stats.inc(StatType::Vote, StatDetail::VoteIndeterminate);
                    return VoteCode::Indeterminate;
                }
            }
            match election.vote(&vote.voter, vote.timestamp, *hash) {
                VoteApply::New => {
                    self.stats.inc(StatType::Vote, StatDetail::VoteNew);
                    self.confirm_if_quorum(&election);
                    VoteCode::Vote
                }
                VoteApply::Replay => {
                    self.stats.inc(StatType::Vote, StatDetail::VoteReplay);
                    VoteCode::Replay
                }
            }
        } else if self.recently_confirmed.hash_exists(hash) {
            self.stats.inc(StatType::Vote, StatDetail::VoteReplay);
            VoteCode::Replay
        } else {
            let delta = self.online_reps.delta();
            let (previous, current) = self.inactive_votes_cache.vote(
                hash,
                &vote.voter,
                vote.timestamp,
                |account| self.ledger.weight(account),
                delta,
            );
            if current.election_started && !previous.election_started {
                // Promote to an election when the block is already here
                let tx = self.ledger.store.tx_begin_read();
                if let Some(block) = self.ledger.any().get_block(&tx, hash) {
                    self.insert(&block.block, ElectionBehavior::Hinted, false);
                }
            }
            self.stats.inc(StatType::Vote, StatDetail::VoteIndeterminate);
            VoteCode::Indeterminate
        }
    }

    /// A block arrived; honor any verdict the inactive-vote cache already
    /// reached for it.
    pub fn trigger_inactive(&self, block: &Block) {
        let hash = block.hash();
        let Some(entry) = self.inactive_votes_cache.find(&hash) else {
            return;
        };
        if entry.status.confirmed {
            // Quorum was reached on the cache alone: skip voting
            self.inactive_votes_cache.erase(&hash);
            self.recently_confirmed.put(block.qualified_root(), hash);
            self.stats
                .inc(StatType::Election, StatDetail::ElectionConfirmed);
            self.confirming_set.add(&hash);
            self.notify_vacancy();
        } else if entry.status.election_started {
            self.insert(block, ElectionBehavior::Hinted, false);
        }
    }

    /// Re-evaluate an election after new votes; finalize on quorum.
    pub fn confirm_if_quorum(&self, election: &Arc<Election>) {
        let delta = self.online_reps.delta();
        let winner = election.check_quorum(delta, |account| self.ledger.weight(account));
        if let Some(winner) = winner {
            self.finalize(election, &winner);
        }
    }

    /// Confirm `election`'s current leading candidate regardless of tally.
    /// Test utility mirroring operator forced confirmation.
    pub fn force_confirm(&self, election: &Arc<Election>) {
        let winner = election
            .status()
            .winner
            .or_else(|| election.first_candidate());
        if let Some(winner) = winner {
            self.finalize(election, &winner);
        }
    }

    fn finalize(&self, election: &Arc<Election>, winner: &Block) {
        if !election.set_confirmed(winner) {
            return;
        }
        let winner_hash = winner.hash();
        let root = election.qualified_root();
        let candidate_hashes: Vec<Hash> =
            election.blocks().iter().map(|block| block.hash()).collect();
        self.recently_confirmed.put(root, winner_hash);
        // Losing candidate serializations may circulate again
        for block in election.retain_winner(&winner_hash) {
            self.filter.clear_block(&block);
        }
        {
            let mut state = self.state.lock().expect("elections lock poisoned");
            state.roots.remove(&root);
            for hash in &candidate_hashes {
                state.blocks.remove(hash);
            }
        }
        self.stats
            .inc(StatType::Election, StatDetail::ElectionConfirmed);
        tracing::debug!(
            "election confirmed winner {}",
            crate::to_hex_short(&winner_hash)
        );
        self.confirming_set.add(&winner_hash);
        self.notify_vacancy();
    }

    /// Handle a republish of a known block carrying more work: update the
    /// ledger and restart the election once.
    pub fn restart(&self, block: &Block) {
        let hash = block.hash();
        if !self.ledger.update_work(&hash, block.work()) {
            return;
        }
        self.difficulty_observers
            .notify(&crate::crypto::work_value(&block.root(), block.work()));
        if let Some(election) = self.election_by_block(&hash) {
            if election.restart_count.fetch_add(1, Ordering::SeqCst)
                < constants::ELECTION_RESTART_MAX
            {
                election.replace_work(&hash, block.work());
                election.confirmation_request_count.store(0, Ordering::SeqCst);
                self.stats
                    .inc(StatType::Election, StatDetail::ElectionRestart);
            }
        }
    }

    /// Record a cemented winner for observers.
    pub fn notify_cemented(&self, block: &SavedBlock) {
        self.recently_cemented.put(CementedStatus {
            winner: block.clone(),
            tally: 0,
            final_tally: 0,
            voter_count: 0,
            block_count: 1,
            confirmation_request_count: 0,
        });
    }

    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("request loop".into())
            .spawn(move || this.request_loop())
            .expect("spawning election request loop");
        *self.thread.lock().expect("elections thread lock") = Some(handle);
    }

    pub fn stop(&self) {
        {
            let mut state = self.state.lock().expect("elections lock poisoned");
            state.stopped = true;
            self.condition.notify_all();
        }
        if let Some(handle) = self.thread.lock().expect("elections thread lock").take() {
            let _ = handle.join();
        }
    }

    /// Periodically broadcast confirmation requests for unconfirmed
    /// elections and re-check quorum.
    fn request_loop(&self) {
        loop {
            let elections: Vec<Arc<Election>> = {
                let mut state = self.state.lock().expect("elections lock poisoned");
                while !state.stopped && state.roots.is_empty() {
                    let (next, _) = self
                        .condition
                        .wait_timeout(state, Duration::from_millis(self.config.request_interval_ms))
                        .expect("elections lock poisoned");
                    state = next;
                    if state.stopped {
                        return;
                    }
                    break;
                }
                if state.stopped {
                    return;
                }
                state.roots.values().cloned().collect()
            };
            let mut roots = Vec::new();
            for election in &elections {
                if election.confirmed() {
                    continue;
                }
                election
                    .confirmation_request_count
                    .fetch_add(1, Ordering::SeqCst);
                roots.push(election.qualified_root());
                self.confirm_if_quorum(election);
            }
            if !roots.is_empty() {
                for chunk in roots.chunks(7) {
                    self.network.flood_message(
                        &Message::ConfirmReq {
                            roots: chunk.to_vec(),
                        },
                        DropPolicy::Limiter,
                    );
                }
            }
            std::thread::sleep(Duration::from_millis(self.config.request_interval_ms));
            if self.state.lock().expect("elections lock poisoned").stopped {
                return;
            }
        }
    }
}
