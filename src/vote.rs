//! Representative votes over block hashes.

use serde::{Deserialize, Serialize};

use crate::crypto::{self, Keypair, Signature};
use crate::{Account, Hash};

/// Timestamp value marking a final vote: the representative commits to the
/// hash irrevocably and the vote carries full weight immediately.
pub const TIMESTAMP_MAX: u64 = u64::MAX;

/// A vote applies independently to each listed hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub voter: Account,
    /// Monotone per voter; `TIMESTAMP_MAX` marks a final vote
    pub timestamp: u64,
    pub signature: Signature,
    pub hashes: Vec<Hash>,
}

impl Vote {
    /// Build and sign a vote.
    pub fn new(keypair: &Keypair, timestamp: u64, hashes: Vec<Hash>) -> Self {
        let mut vote = Vote {
            voter: keypair.public(),
            timestamp,
            signature: Signature::empty(),
            hashes,
        };
        vote.signature = keypair.sign(&vote.digest());
        vote
    }

    /// Build and sign a final vote.
    pub fn new_final(keypair: &Keypair, hashes: Vec<Hash>) -> Self {
        Self::new(keypair, TIMESTAMP_MAX, hashes)
    }

    /// Signed digest over voter, timestamp and hashes.
    pub fn digest(&self) -> Hash {
        let mut parts: Vec<&[u8]> = vec![b"weave.vote", &self.voter];
        let timestamp_bytes = self.timestamp.to_le_bytes();
        parts.push(&timestamp_bytes);
        for hash in &self.hashes {
            parts.push(hash);
        }
        crate::hash_concat(&parts)
    }

    pub fn verify(&self) -> bool {
        crypto::verify(&self.voter, &self.digest(), &self.signature)
    }

    pub fn is_final(&self) -> bool {
        self.timestamp == TIMESTAMP_MAX
    }
}

/// Outcome of submitting a vote to the elections engine, per hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteCode {
    /// Counted toward an election or the inactive-vote cache
    Vote,
    /// The root was already finalized
    Replay,
    /// Unknown root
    Indeterminate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_vote_verifies() {
        let keypair = Keypair::generate();
        let vote = Vote::new(&keypair, 5, vec![[1u8; 32], [2u8; 32]]);
        assert!(vote.verify());
        assert!(!vote.is_final());
    }

    #[test]
    fn tampered_vote_fails() {
        let keypair = Keypair::generate();
        let mut vote = Vote::new(&keypair, 5, vec![[1u8; 32]]);
        vote.timestamp = 6;
        assert!(!vote.verify());
    }

    #[test]
    fn final_vote_marker() {
        let keypair = Keypair::generate();
        let vote = Vote::new_final(&keypair, vec![[3u8; 32]]);
        assert!(vote.is_final());
        assert!(vote.verify());
    }

    #[test]
    fn digest_covers_hash_list() {
        let keypair = Keypair::generate();
        let a = Vote::new(&keypair, 1, vec![[1u8; 32]]);
        let b = Vote::new(&keypair, 1, vec![[2u8; 32]]);
        assert_ne!(a.digest(), b.digest());
    }
}
