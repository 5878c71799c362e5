//! Ledger value types: amounts, epochs, account metadata, receivable keys.

use serde::{Deserialize, Serialize};

use crate::{Account, Hash, ZERO_HASH};

/// 128-bit balance in raw currency units.
pub type Amount = u128;

/// Account upgrade generation. Each epoch is entered through a dedicated
/// epoch block signed by the epoch signer; accounts never downgrade.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Epoch {
    #[default]
    Epoch0,
    Epoch1,
    Epoch2,
}

impl Epoch {
    /// The next epoch up, or `None` from the highest.
    pub fn successor(self) -> Option<Epoch> {
        match self {
            Epoch::Epoch0 => Some(Epoch::Epoch1),
            Epoch::Epoch1 => Some(Epoch::Epoch2),
            Epoch::Epoch2 => None,
        }
    }
}

/// (previous, root) pair identifying the contested position on an account
/// chain. `root` is the previous hash for subsequent blocks and the account
/// itself for open blocks, so two forks of the same position share a root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedRoot {
    pub previous: Hash,
    pub root: Hash,
}

impl QualifiedRoot {
    pub fn new(previous: Hash, root: Hash) -> Self {
        QualifiedRoot { previous, root }
    }

    /// Serialized key for the final-votes table: previous then root.
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.previous);
        out[32..].copy_from_slice(&self.root);
        out
    }
}

/// Latest known state of one account: the chain frontier plus cached
/// aggregates that must stay equal to what replaying the chain would yield.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Hash of the newest block on the chain
    pub head: Hash,
    /// Representative named by the newest block that carries one
    pub representative: Account,
    /// Hash of the first block on the chain
    pub open_block: Hash,
    /// Balance at `head`
    pub balance: Amount,
    /// Seconds since epoch of the last modification
    pub modified: u64,
    /// Number of blocks on the chain; equals the height of `head`
    pub block_count: u64,
    /// Epoch of the account frontier
    pub epoch: Epoch,
}

impl Default for AccountInfo {
    fn default() -> Self {
        AccountInfo {
            head: ZERO_HASH,
            representative: [0u8; 32],
            open_block: ZERO_HASH,
            balance: 0,
            modified: 0,
            block_count: 0,
            epoch: Epoch::Epoch0,
        }
    }
}

/// Key of a receivable entry: the destination account and the hash of the
/// send that created it. Ordered by (account, hash) so all receivables of
/// one account are adjacent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PendingKey {
    pub account: Account,
    pub hash: Hash,
}

impl PendingKey {
    pub fn new(account: Account, hash: Hash) -> Self {
        PendingKey { account, hash }
    }

    /// Serialized table key: account then send hash, both big-endian-ordered
    /// byte arrays, so sled's lexicographic order matches `Ord`.
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.account);
        out[32..].copy_from_slice(&self.hash);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 64 {
            return None;
        }
        let mut account = [0u8; 32];
        let mut hash = [0u8; 32];
        account.copy_from_slice(&bytes[..32]);
        hash.copy_from_slice(&bytes[32..]);
        Some(PendingKey { account, hash })
    }
}

/// Value of a receivable entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInfo {
    /// Account that sent the funds
    pub source: Account,
    /// Amount sent
    pub amount: Amount,
    /// Epoch of the send block
    pub epoch: Epoch,
}

/// Cemented height and frontier for one account. `height` blocks of the
/// chain are cemented; `frontier` is the hash at that height.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationHeightInfo {
    pub height: u64,
    pub frontier: Hash,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_ordering_and_successor() {
        assert!(Epoch::Epoch0 < Epoch::Epoch1);
        assert!(Epoch::Epoch1 < Epoch::Epoch2);
        assert_eq!(Epoch::Epoch0.successor(), Some(Epoch::Epoch1));
        assert_eq!(Epoch::Epoch2.successor(), None);
    }

    #[test]
    fn pending_key_bytes_roundtrip() {
        let key = PendingKey::new([3u8; 32], [7u8; 32]);
        let bytes = key.to_bytes();
        assert_eq!(PendingKey::from_bytes(&bytes), Some(key));
        assert_eq!(PendingKey::from_bytes(&bytes[..63]), None);
    }

    #[test]
    fn pending_key_order_groups_by_account() {
        let a = PendingKey::new([1u8; 32], [9u8; 32]);
        let b = PendingKey::new([2u8; 32], [0u8; 32]);
        assert!(a < b);
        assert!(a.to_bytes() < b.to_bytes());
    }
}
