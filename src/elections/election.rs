//! A single election: the candidate blocks and votes for one contested
//! chain position.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::block::Block;
use crate::constants::ELECTION_MAX_BLOCKS;
use crate::types::{Amount, QualifiedRoot};
use crate::vote::TIMESTAMP_MAX;
use crate::{Account, Hash};

/// Why the election was started; hinted and optimistic elections come from
/// the vote cache and the optimistic scheduler rather than normal
/// activation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElectionBehavior {
    Normal,
    Hinted,
    Optimistic,
}

/// Latest vote from one representative.
#[derive(Clone, Debug)]
pub struct VoteInfo {
    pub hash: Hash,
    pub timestamp: u64,
    pub time: Instant,
}

/// Rolling election outcome.
#[derive(Clone, Debug, Default)]
pub struct ElectionStatus {
    pub winner: Option<Block>,
    pub tally: Amount,
    pub final_tally: Amount,
    pub confirmed: bool,
    pub voter_count: u32,
    pub block_count: u32,
}

/// Result of applying one vote to the election.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteApply {
    /// Inserted or advanced the voter's entry
    New,
    /// Not newer than the voter's recorded vote
    Replay,
}

/// Result of offering a candidate block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CandidateInsertion {
    Inserted,
    Existed,
    /// Inserted by evicting the returned lowest-tally candidate
    Replaced(Block),
    /// Bounded out: every existing candidate outweighs the newcomer
    Refused,
}

struct ElectionData {
    /// Candidates in insertion order; bounded by `ELECTION_MAX_BLOCKS`
    candidates: Vec<(Hash, Block)>,
    votes: HashMap<Account, VoteInfo>,
    status: ElectionStatus,
}

/// In-memory state for one contested `QualifiedRoot`.
pub struct Election {
    root: QualifiedRoot,
    pub behavior: ElectionBehavior,
    /// Wallet-local elections are exempt from bounded admission
    pub is_local: bool,
    pub confirmation_request_count: AtomicU32,
    pub restart_count: AtomicU32,
    inserted: Instant,
    data: Mutex<ElectionData>,
}

impl Election {
    pub fn new(block: Block, behavior: ElectionBehavior, is_local: bool) -> Self {
        let root = block.qualified_root();
        let hash = block.hash();
        Election {
            root,
            behavior,
            is_local,
            confirmation_request_count: AtomicU32::new(0),
            restart_count: AtomicU32::new(0),
            inserted: Instant::now(),
            data: Mutex::new(ElectionData {
                candidates: vec![(hash, block.clone())],
                votes: HashMap::new(),
                status: ElectionStatus {
                    winner: Some(block),
                    block_count: 1,
                    ..Default::default()
                },
            }),
        }
    }

    pub fn qualified_root(&self) -> QualifiedRoot {
        self.root
    }

    pub fn age(&self) -> std::time::Duration {
        self.inserted.elapsed()
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.lock()
            .candidates
            .iter()
            .map(|(_, block)| block.clone())
            .collect()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.lock().candidates.iter().any(|(h, _)| h == hash)
    }

    pub fn votes(&self) -> HashMap<Account, VoteInfo> {
        self.lock().votes.clone()
    }

    pub fn status(&self) -> ElectionStatus {
        self.lock().status.clone()
    }

    pub fn confirmed(&self) -> bool {
        self.lock().status.confirmed
    }

    /// Apply a vote. The voter's entry advances only on a strictly greater
    /// timestamp.
    pub fn vote(&self, voter: &Account, timestamp: u64, hash: Hash) -> VoteApply {
        let mut data = self.lock();
        if let Some(existing) = data.votes.get(voter) {
            if existing.timestamp >= timestamp {
                return VoteApply::Replay;
            }
        }
        data.votes.insert(
            *voter,
            VoteInfo {
                hash,
                timestamp,
                time: Instant::now(),
            },
        );
        data.status.voter_count = data.votes.len() as u32;
        VoteApply::New
    }

    /// Offer a candidate. A full election evicts its lowest-tally candidate
    /// only when the newcomer carries strictly more tally; among
    /// equal-tally candidates the earliest-inserted one is evicted.
    pub fn insert_candidate(
        &self,
        block: &Block,
        incoming_tally: Amount,
        mut weight_of: impl FnMut(&Account) -> Amount,
    ) -> CandidateInsertion {
        let hash = block.hash();
        debug_assert_eq!(block.qualified_root(), self.root);
        let mut data = self.lock();
        if data.candidates.iter().any(|(h, _)| *h == hash) {
            return CandidateInsertion::Existed;
        }
        if data.candidates.len() < ELECTION_MAX_BLOCKS {
            data.candidates.push((hash, block.clone()));
            data.status.block_count = data.candidates.len() as u32;
            return CandidateInsertion::Inserted;
        }
        let tallies = tally_of(&data, &mut weight_of);
        let (evict_index, evict_tally) = data
            .candidates
            .iter()
            .enumerate()
            .map(|(index, (h, _))| (index, tallies.get(h).copied().unwrap_or(0)))
            .min_by_key(|(_, tally)| *tally)
            .expect("full election with no candidates");
        if incoming_tally <= evict_tally {
            return CandidateInsertion::Refused;
        }
        let (_, evicted) = data.candidates.remove(evict_index);
        data.candidates.push((hash, block.clone()));
        data.status.block_count = data.candidates.len() as u32;
        CandidateInsertion::Replaced(evicted)
    }

    /// Replace a candidate's stored work after a higher-difficulty
    /// republish.
    pub fn replace_work(&self, hash: &Hash, work: crate::crypto::WorkNonce) {
        let mut data = self.lock();
        if let Some((_, block)) = data.candidates.iter_mut().find(|(h, _)| h == hash) {
            block.set_work(work);
        }
        if let Some(winner) = &mut data.status.winner {
            if winner.hash() == *hash {
                winner.set_work(work);
            }
        }
    }

    /// Per-candidate tallies, sorted descending; ties resolve to insertion
    /// order.
    pub fn tally(&self, mut weight_of: impl FnMut(&Account) -> Amount) -> Vec<(Amount, Block)> {
        let data = self.lock();
        let tallies = tally_of(&data, &mut weight_of);
        let mut result: Vec<(Amount, Block)> = data
            .candidates
            .iter()
            .map(|(hash, block)| (tallies.get(hash).copied().unwrap_or(0), block.clone()))
            .collect();
        result.sort_by(|a, b| b.0.cmp(&a.0));
        result
    }

    /// Weight of final votes naming `hash`.
    pub fn final_tally(&self, hash: &Hash, mut weight_of: impl FnMut(&Account) -> Amount) -> Amount {
        let data = self.lock();
        data.votes
            .iter()
            .filter(|(_, vote)| vote.timestamp == TIMESTAMP_MAX && vote.hash == *hash)
            .map(|(account, _)| weight_of(account))
            .sum()
    }

    /// Evaluate quorum: the leader must reach `delta` and either clear the
    /// runner-up by `delta / 2` or hold final-vote quorum outright.
    /// Updates the rolling status and returns the winner on quorum.
    pub fn check_quorum(
        &self,
        delta: Amount,
        mut weight_of: impl FnMut(&Account) -> Amount,
    ) -> Option<Block> {
        let sorted = self.tally(&mut weight_of);
        let (leader_tally, leader) = match sorted.first() {
            Some((tally, block)) => (*tally, block.clone()),
            None => return None,
        };
        let runner_up = sorted.get(1).map(|(tally, _)| *tally).unwrap_or(0);
        let final_tally = self.final_tally(&leader.hash(), &mut weight_of);
        {
            let mut data = self.lock();
            data.status.tally = leader_tally;
            data.status.final_tally = final_tally;
            data.status.winner = Some(leader.clone());
        }
        if delta == 0 {
            return None;
        }
        let margin_ok = leader_tally.saturating_sub(runner_up) >= delta / 2;
        if leader_tally >= delta && (margin_ok || final_tally >= delta) {
            Some(leader)
        } else {
            None
        }
    }

    /// Mark confirmed with `winner`; returns false if already confirmed.
    pub(crate) fn set_confirmed(&self, winner: &Block) -> bool {
        let mut data = self.lock();
        if data.status.confirmed {
            return false;
        }
        data.status.confirmed = true;
        data.status.winner = Some(winner.clone());
        true
    }

    /// First candidate, used by forced confirmation.
    pub(crate) fn first_candidate(&self) -> Option<Block> {
        self.lock()
            .candidates
            .first()
            .map(|(_, block)| block.clone())
    }

    /// Drop losing candidates, keeping only the winner. Returns the
    /// removed blocks so the caller can clear publish filters.
    pub(crate) fn retain_winner(&self, winner_hash: &Hash) -> Vec<Block> {
        let mut data = self.lock();
        let mut removed = Vec::new();
        data.candidates.retain(|(hash, block)| {
            if hash == winner_hash {
                true
            } else {
                removed.push(block.clone());
                false
            }
        });
        data.status.block_count = data.candidates.len() as u32;
        removed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ElectionData> {
        self.data.lock().expect("election lock poisoned")
    }
}

fn tally_of(
    data: &ElectionData,
    weight_of: &mut impl FnMut(&Account) -> Amount,
) -> HashMap<Hash, Amount> {
    let mut tallies: HashMap<Hash, Amount> = HashMap::new();
    for (account, vote) in &data.votes {
        *tallies.entry(vote.hash).or_insert(0) += weight_of(account);
    }
    tallies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::builder;

    fn fork(byte: u8) -> Block {
        builder::send()
            .previous([1u8; 32])
            .destination([byte; 32])
            .balance(byte as u128)
            .build()
    }

    #[test]
    fn vote_timestamps_are_monotone() {
        let election = Election::new(fork(1), ElectionBehavior::Normal, false);
        let voter = [9u8; 32];
        assert_eq!(election.vote(&voter, 2, fork(1).hash()), VoteApply::New);
        assert_eq!(election.vote(&voter, 2, fork(1).hash()), VoteApply::Replay);
        assert_eq!(election.vote(&voter, 1, fork(1).hash()), VoteApply::Replay);
        assert_eq!(election.vote(&voter, 3, fork(2).hash()), VoteApply::New);
        assert_eq!(election.votes()[&voter].hash, fork(2).hash());
    }

    #[test]
    fn candidates_bounded_without_votes() {
        let election = Election::new(fork(0), ElectionBehavior::Normal, false);
        for byte in 1..ELECTION_MAX_BLOCKS as u8 {
            assert_eq!(
                election.insert_candidate(&fork(byte), 0, |_| 0),
                CandidateInsertion::Inserted
            );
        }
        // Full, and an unvoted newcomer cannot displace anything
        assert_eq!(
            election.insert_candidate(&fork(200), 0, |_| 0),
            CandidateInsertion::Refused
        );
        assert_eq!(election.blocks().len(), ELECTION_MAX_BLOCKS);
    }

    #[test]
    fn weighted_candidate_replaces_lowest() {
        let election = Election::new(fork(0), ElectionBehavior::Normal, false);
        for byte in 1..ELECTION_MAX_BLOCKS as u8 {
            election.insert_candidate(&fork(byte), 0, |_| 0);
        }
        // Vote for every candidate except fork(3)
        for byte in 0..ELECTION_MAX_BLOCKS as u8 {
            if byte == 3 {
                continue;
            }
            election.vote(&[byte; 32], 1, fork(byte).hash());
        }
        let result = election.insert_candidate(&fork(200), 10, |_| 5);
        assert_eq!(result, CandidateInsertion::Replaced(fork(3)));
        assert!(election.contains(&fork(200).hash()));
    }

    #[test]
    fn tally_sorts_descending() {
        let election = Election::new(fork(1), ElectionBehavior::Normal, false);
        election.insert_candidate(&fork(2), 0, |_| 0);
        election.vote(&[1u8; 32], 1, fork(1).hash());
        election.vote(&[2u8; 32], 1, fork(2).hash());
        election.vote(&[3u8; 32], 1, fork(2).hash());
        let tally = election.tally(|_| 7);
        assert_eq!(tally[0].0, 14);
        assert_eq!(tally[0].1, fork(2));
        assert_eq!(tally[1].0, 7);
    }

    #[test]
    fn quorum_requires_margin_or_final() {
        let election = Election::new(fork(1), ElectionBehavior::Normal, false);
        election.insert_candidate(&fork(2), 0, |_| 0);
        // 60/40 split of weight 100 with delta 100: no margin, no finals
        for byte in 0..6u8 {
            election.vote(&[byte; 32], 1, fork(1).hash());
        }
        for byte in 6..10u8 {
            election.vote(&[byte; 32], 1, fork(2).hash());
        }
        assert!(election.check_quorum(100, |_| 10).is_none());
        // Final votes push the leader through
        for byte in 0..10u8 {
            election.vote(&[byte; 32], TIMESTAMP_MAX, fork(1).hash());
        }
        let winner = election.check_quorum(100, |_| 10);
        assert_eq!(winner, Some(fork(1)));
    }
}
