//! Block model for the account lattice.
//!
//! Five block variants exist. Send, receive, open and change are the legacy
//! epoch-0 forms with per-type fields; state blocks carry every field and
//! subsume all four operations plus epoch upgrades. A block's hash covers
//! only the unsigned body: signature and work can be attached or replaced
//! without changing identity.
//!
//! A validated block gains a sideband: metadata derived during ledger
//! processing (height, account, resulting balance, successor, flags) that
//! the raw wire form does not carry.

pub mod builder;

use serde::{Deserialize, Serialize};

use crate::crypto::{Signature, WorkNonce};
use crate::types::{Amount, Epoch, QualifiedRoot};
use crate::{hash_concat, is_zero, Account, Hash, ZERO_HASH};

/// Legacy send: moves funds from `previous`'s account to `destination`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendBlock {
    pub previous: Hash,
    pub destination: Account,
    /// Balance remaining on the sending account after this block
    pub balance: Amount,
    pub signature: Signature,
    pub work: WorkNonce,
}

/// Legacy receive: consumes the receivable created by `source`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveBlock {
    pub previous: Hash,
    pub source: Hash,
    pub signature: Signature,
    pub work: WorkNonce,
}

/// Legacy open: first block of an account, receiving `source`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenBlock {
    pub source: Hash,
    pub representative: Account,
    pub account: Account,
    pub signature: Signature,
    pub work: WorkNonce,
}

/// Legacy change: replaces the account's representative.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBlock {
    pub previous: Hash,
    pub representative: Account,
    pub signature: Signature,
    pub work: WorkNonce,
}

/// State block: carries the full resulting account state. The operation is
/// inferred by comparing `balance` against the previous balance and by the
/// `link` field (destination, source hash, or epoch marker).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateBlock {
    pub account: Account,
    pub previous: Hash,
    pub representative: Account,
    pub balance: Amount,
    pub link: Hash,
    pub signature: Signature,
    pub work: WorkNonce,
}

/// A block of any variant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Block {
    Send(SendBlock),
    Receive(ReceiveBlock),
    Open(OpenBlock),
    Change(ChangeBlock),
    State(StateBlock),
}

/// Discriminant of [`Block`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    Send,
    Receive,
    Open,
    Change,
    State,
}

impl Block {
    pub fn kind(&self) -> BlockKind {
        match self {
            Block::Send(_) => BlockKind::Send,
            Block::Receive(_) => BlockKind::Receive,
            Block::Open(_) => BlockKind::Open,
            Block::Change(_) => BlockKind::Change,
            Block::State(_) => BlockKind::State,
        }
    }

    /// Deterministic hash over the unsigned body. Work and signature are
    /// excluded so a republish with different work keeps its identity.
    pub fn hash(&self) -> Hash {
        match self {
            Block::Send(b) => hash_concat(&[
                b"weave.block.send",
                &b.previous,
                &b.destination,
                &b.balance.to_le_bytes(),
            ]),
            Block::Receive(b) => hash_concat(&[b"weave.block.receive", &b.previous, &b.source]),
            Block::Open(b) => hash_concat(&[
                b"weave.block.open",
                &b.source,
                &b.representative,
                &b.account,
            ]),
            Block::Change(b) => {
                hash_concat(&[b"weave.block.change", &b.previous, &b.representative])
            }
            Block::State(b) => hash_concat(&[
                b"weave.block.state",
                &b.account,
                &b.previous,
                &b.representative,
                &b.balance.to_le_bytes(),
                &b.link,
            ]),
        }
    }

    /// Hash of the predecessor, zero for open blocks.
    pub fn previous(&self) -> Hash {
        match self {
            Block::Send(b) => b.previous,
            Block::Receive(b) => b.previous,
            Block::Open(_) => ZERO_HASH,
            Block::Change(b) => b.previous,
            Block::State(b) => b.previous,
        }
    }

    /// Owning account, for the variants that carry it.
    pub fn account_field(&self) -> Option<Account> {
        match self {
            Block::Open(b) => Some(b.account),
            Block::State(b) => Some(b.account),
            _ => None,
        }
    }

    /// Resulting balance, for the variants that carry it.
    pub fn balance_field(&self) -> Option<Amount> {
        match self {
            Block::Send(b) => Some(b.balance),
            Block::State(b) => Some(b.balance),
            _ => None,
        }
    }

    /// Named representative, for the variants that carry one.
    pub fn representative_field(&self) -> Option<Account> {
        match self {
            Block::Open(b) => Some(b.representative),
            Block::Change(b) => Some(b.representative),
            Block::State(b) => Some(b.representative),
            _ => None,
        }
    }

    /// Source hash, for legacy receive and open.
    pub fn source_field(&self) -> Option<Hash> {
        match self {
            Block::Receive(b) => Some(b.source),
            Block::Open(b) => Some(b.source),
            _ => None,
        }
    }

    /// Send destination, for legacy send.
    pub fn destination_field(&self) -> Option<Account> {
        match self {
            Block::Send(b) => Some(b.destination),
            _ => None,
        }
    }

    /// Link field, state blocks only. Interpretation depends on the
    /// inferred operation.
    pub fn link_field(&self) -> Option<Hash> {
        match self {
            Block::State(b) => Some(b.link),
            _ => None,
        }
    }

    /// The contested position: previous hash, or the account for first
    /// blocks.
    pub fn root(&self) -> Hash {
        let previous = self.previous();
        if !is_zero(&previous) {
            previous
        } else {
            self.account_field().unwrap_or(ZERO_HASH)
        }
    }

    pub fn qualified_root(&self) -> QualifiedRoot {
        QualifiedRoot::new(self.previous(), self.root())
    }

    pub fn work(&self) -> WorkNonce {
        match self {
            Block::Send(b) => b.work,
            Block::Receive(b) => b.work,
            Block::Open(b) => b.work,
            Block::Change(b) => b.work,
            Block::State(b) => b.work,
        }
    }

    pub fn set_work(&mut self, work: WorkNonce) {
        match self {
            Block::Send(b) => b.work = work,
            Block::Receive(b) => b.work = work,
            Block::Open(b) => b.work = work,
            Block::Change(b) => b.work = work,
            Block::State(b) => b.work = work,
        }
    }

    pub fn signature(&self) -> &Signature {
        match self {
            Block::Send(b) => &b.signature,
            Block::Receive(b) => &b.signature,
            Block::Open(b) => &b.signature,
            Block::Change(b) => &b.signature,
            Block::State(b) => &b.signature,
        }
    }

    pub fn set_signature(&mut self, signature: Signature) {
        match self {
            Block::Send(b) => b.signature = signature,
            Block::Receive(b) => b.signature = signature,
            Block::Open(b) => b.signature = signature,
            Block::Change(b) => b.signature = signature,
            Block::State(b) => b.signature = signature,
        }
    }
}

/// Operation flags derived during validation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDetails {
    pub epoch: Epoch,
    pub is_send: bool,
    pub is_receive: bool,
    pub is_epoch: bool,
}

/// Metadata attached to a block once the ledger has validated it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSideband {
    /// Chain position, 1 for the open block
    pub height: u64,
    /// Seconds since epoch at local processing time
    pub timestamp: u64,
    /// Next block on the chain, zero at the frontier
    pub successor: Hash,
    /// Owning account, resolved for the variants that do not carry it
    pub account: Account,
    /// Balance after this block, resolved for the variants that do not
    /// carry it
    pub balance: Amount,
    pub details: BlockDetails,
    /// Epoch of the send matched by a receive, Epoch0 otherwise
    pub source_epoch: Epoch,
}

/// A block together with its sideband.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedBlock {
    pub block: Block,
    pub sideband: BlockSideband,
}

impl SavedBlock {
    pub fn hash(&self) -> Hash {
        self.block.hash()
    }

    pub fn account(&self) -> Account {
        self.sideband.account
    }

    pub fn height(&self) -> u64 {
        self.sideband.height
    }

    /// Balance after this block, from the block body when present and the
    /// sideband otherwise.
    pub fn balance(&self) -> Amount {
        self.block.balance_field().unwrap_or(self.sideband.balance)
    }

    pub fn is_send(&self) -> bool {
        self.sideband.details.is_send
    }

    pub fn is_receive(&self) -> bool {
        self.sideband.details.is_receive
    }

    pub fn is_epoch(&self) -> bool {
        self.sideband.details.is_epoch
    }

    pub fn epoch(&self) -> Epoch {
        self.sideband.details.epoch
    }

    /// Destination account of a send, in either legacy or state form.
    pub fn destination(&self) -> Option<Account> {
        match &self.block {
            Block::Send(b) => Some(b.destination),
            Block::State(b) if self.sideband.details.is_send => Some(b.link),
            _ => None,
        }
    }

    /// Source hash of a receive, in either legacy or state form.
    pub fn source(&self) -> Option<Hash> {
        match &self.block {
            Block::Receive(b) => Some(b.source),
            Block::Open(b) => Some(b.source),
            Block::State(b) if self.sideband.details.is_receive => Some(b.link),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::builder;
    use crate::crypto::Keypair;

    #[test]
    fn hash_excludes_work_and_signature() {
        let keypair = Keypair::generate();
        let block = builder::send()
            .previous([1u8; 32])
            .destination([2u8; 32])
            .balance(100)
            .sign(&keypair)
            .work(42)
            .build();
        let mut other = block.clone();
        other.set_work(43);
        other.set_signature(Signature::empty());
        assert_eq!(block.hash(), other.hash());
    }

    #[test]
    fn hash_covers_body() {
        let a = builder::send()
            .previous([1u8; 32])
            .destination([2u8; 32])
            .balance(100)
            .build();
        let b = builder::send()
            .previous([1u8; 32])
            .destination([2u8; 32])
            .balance(101)
            .build();
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn root_is_previous_or_account() {
        let send = builder::send().previous([1u8; 32]).build();
        assert_eq!(send.root(), [1u8; 32]);
        let open = builder::open().account([5u8; 32]).source([6u8; 32]).build();
        assert_eq!(open.root(), [5u8; 32]);
        let state_open = builder::state().account([7u8; 32]).build();
        assert_eq!(state_open.root(), [7u8; 32]);
    }

    #[test]
    fn qualified_root_shared_by_forks() {
        let a = builder::send()
            .previous([1u8; 32])
            .destination([2u8; 32])
            .balance(10)
            .build();
        let b = builder::send()
            .previous([1u8; 32])
            .destination([3u8; 32])
            .balance(20)
            .build();
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.qualified_root(), b.qualified_root());
    }

    #[test]
    fn serialize_roundtrip_preserves_hash() {
        let keypair = Keypair::generate();
        let block = builder::state()
            .account(keypair.public())
            .previous([9u8; 32])
            .representative(keypair.public())
            .balance(12345)
            .link([4u8; 32])
            .sign(&keypair)
            .work(7)
            .build();
        let bytes = bincode::serde::encode_to_vec(&block, bincode::config::legacy())
            .expect("block encodes");
        let (decoded, _): (Block, _) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::legacy())
                .expect("block decodes");
        assert_eq!(decoded.hash(), block.hash());
        assert_eq!(decoded, block);
    }
}
