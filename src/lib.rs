//! # Weave
//!
//! An account-lattice delegated-proof-of-stake ledger and consensus engine:
//! - **Per-account block chains** — every account owns its own signed chain;
//!   forks are contested positions on a single chain, not global reorgs
//! - **Weighted voting** — representative accounts vote on fork winners;
//!   quorum is a fraction of observed online voting weight
//! - **Durable cementation** — confirmed blocks move from an in-memory
//!   overlay into persistent tables through a crash-safe FIFO
//! - **Ascending bootstrap** — account-prioritized pull-based catch-up that
//!   adapts from block-processing feedback
//!
//! The crate is the core of a node: wire transport, RPC, and wallets are
//! external collaborators reached through the traits in [`network`].

pub mod block;
pub mod bootstrap;
pub mod broadcast;
pub mod config;
pub mod confirming_set;
pub mod crypto;
pub mod elections;
pub mod genesis;
pub mod ledger;
pub mod network;
pub mod node;
pub mod observer;
pub mod processor;
pub mod reps;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod types;
pub mod vote;

/// Protocol constants
pub mod constants {
    use crate::types::Amount;

    /// Total supply, assigned to the genesis account's open block
    pub const GENESIS_AMOUNT: Amount = Amount::MAX;
    /// One Gxrb in raw units (10^33)
    pub const GXRB_RATIO: Amount = 1_000_000_000_000_000_000_000_000_000_000_000;
    /// One xrb in raw units (10^24)
    pub const XRB_RATIO: Amount = 1_000_000_000_000_000_000_000_000;

    /// Maximum candidate blocks tracked per election
    pub const ELECTION_MAX_BLOCKS: usize = 10;
    /// Distinct cache voters required before an inactive-vote entry starts an election
    pub const ELECTION_START_VOTERS: usize = 5;
    /// Bound on the inactive-votes cache
    pub const INACTIVE_VOTES_CACHE_MAX: usize = 16 * 1024;
    /// Bound on the recently-confirmed root ring
    pub const RECENTLY_CONFIRMED_MAX: usize = 65_536;
    /// Bound on the recently-cemented status ring
    pub const RECENTLY_CEMENTED_MAX: usize = 100;
    /// Bound on the recently-dropped election ring
    pub const RECENTLY_DROPPED_MAX: usize = 1024;
    /// Per-election cap on restarts triggered by higher-work republishes
    pub const ELECTION_RESTART_MAX: u32 = 1;

    /// Blocks requested per ascending-bootstrap pull
    pub const BOOTSTRAP_PULL_COUNT: u8 = 128;
    /// Frontiers returned per pull at most
    pub const BOOTSTRAP_MAX_FRONTIERS: u16 = 1000;
    /// Cap on the bootstrap priority set
    pub const BOOTSTRAP_PRIORITIES_MAX: usize = 4096;
    /// Accounts sampled per weighted bootstrap selection
    pub const BOOTSTRAP_CONSIDERATION_COUNT: usize = 4;

    /// Fraction of online weight required for quorum, in percent
    pub const QUORUM_PERCENT: u8 = 67;
    /// Stored online-weight samples kept for the trended median
    pub const ONLINE_WEIGHT_SAMPLES_MAX: usize = 4032;

    /// Ledger block-count threshold below which preconfigured bootstrap
    /// weights stand in for computed representative weights
    pub const BOOTSTRAP_WEIGHT_MAX_BLOCKS: u64 = 0;
}

/// 32-byte hash used throughout the protocol
pub type Hash = [u8; 32];

/// 32-byte account public key, also used as an address
pub type Account = [u8; 32];

/// All-zero hash, used as the null previous/link marker
pub const ZERO_HASH: Hash = [0u8; 32];

/// The burn account. Funds sent here are destroyed; opening it is rejected.
pub const BURN_ACCOUNT: Account = [0u8; 32];

/// Whether a 32-byte value is the null marker.
pub fn is_zero(bytes: &[u8; 32]) -> bool {
    bytes.iter().all(|b| *b == 0)
}

/// Compute a domain-separated BLAKE3 hash.
///
/// The domain MUST be valid UTF-8 (all Weave domains use ASCII).
/// Panics at runtime if domain is not valid UTF-8, a programming error.
pub fn hash_domain(domain: &[u8], data: &[u8]) -> Hash {
    let domain_str = std::str::from_utf8(domain).expect("hash_domain: domain must be valid UTF-8");
    let mut hasher = blake3::Hasher::new_derive_key(domain_str);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Compute BLAKE3 hash of length-prefixed concatenated slices.
///
/// Each part is prefixed with its length as a little-endian u64, preventing
/// ambiguous concatenation (e.g., `["AB","C"]` vs `["A","BC"]`).
pub fn hash_concat(parts: &[&[u8]]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// Short hex rendering of a hash or account for log output.
pub fn to_hex_short(bytes: &[u8; 32]) -> String {
    hex::encode(&bytes[..8])
}

/// Seconds since the Unix epoch.
pub fn seconds_since_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Milliseconds since the Unix epoch.
pub fn milliseconds_since_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
