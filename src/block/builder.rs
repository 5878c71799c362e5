//! Fluent block construction.
//!
//! Usage:
//! ```ignore
//! let send = builder::send()
//!     .previous(head)
//!     .destination(key.public())
//!     .balance(remaining)
//!     .sign(&genesis_key)
//!     .work_for(&thresholds)
//!     .build();
//! ```
//!
//! `sign` computes the signature over the body hash from the fields set so
//! far, so it must come after every body field. `work_for` searches a nonce
//! meeting the base threshold for the block's root.

use crate::block::{Block, ChangeBlock, OpenBlock, ReceiveBlock, SendBlock, StateBlock};
use crate::crypto::{generate_work, Keypair, Signature, WorkNonce, WorkThresholds};
use crate::types::Amount;
use crate::{Account, Hash};

macro_rules! common_builder_methods {
    () => {
        /// Sign the body assembled so far.
        pub fn sign(mut self, keypair: &Keypair) -> Self {
            let hash = self.assemble().hash();
            self.signature = keypair.sign(&hash);
            self
        }

        pub fn work(mut self, work: WorkNonce) -> Self {
            self.work = work;
            self
        }

        /// Generate work meeting the base threshold for this block's root.
        pub fn work_for(mut self, thresholds: &WorkThresholds) -> Self {
            let root = self.assemble().root();
            self.work = generate_work(&root, thresholds.base());
            self
        }

        pub fn build(self) -> Block {
            self.assemble()
        }
    };
}

pub fn send() -> SendBuilder {
    SendBuilder::default()
}

pub fn receive() -> ReceiveBuilder {
    ReceiveBuilder::default()
}

pub fn open() -> OpenBuilder {
    OpenBuilder::default()
}

pub fn change() -> ChangeBuilder {
    ChangeBuilder::default()
}

pub fn state() -> StateBuilder {
    StateBuilder::default()
}

#[derive(Default)]
pub struct SendBuilder {
    previous: Hash,
    destination: Account,
    balance: Amount,
    signature: Signature,
    work: WorkNonce,
}

impl SendBuilder {
    pub fn previous(mut self, previous: Hash) -> Self {
        self.previous = previous;
        self
    }

    pub fn destination(mut self, destination: Account) -> Self {
        self.destination = destination;
        self
    }

    pub fn balance(mut self, balance: Amount) -> Self {
        self.balance = balance;
        self
    }

    fn assemble(&self) -> Block {
        Block::Send(SendBlock {
            previous: self.previous,
            destination: self.destination,
            balance: self.balance,
            signature: self.signature,
            work: self.work,
        })
    }

    common_builder_methods!();
}

#[derive(Default)]
pub struct ReceiveBuilder {
    previous: Hash,
    source: Hash,
    signature: Signature,
    work: WorkNonce,
}

impl ReceiveBuilder {
    pub fn previous(mut self, previous: Hash) -> Self {
        self.previous = previous;
        self
    }

    pub fn source(mut self, source: Hash) -> Self {
        self.source = source;
        self
    }

    fn assemble(&self) -> Block {
        Block::Receive(ReceiveBlock {
            previous: self.previous,
            source: self.source,
            signature: self.signature,
            work: self.work,
        })
    }

    common_builder_methods!();
}

#[derive(Default)]
pub struct OpenBuilder {
    source: Hash,
    representative: Account,
    account: Account,
    signature: Signature,
    work: WorkNonce,
}

impl OpenBuilder {
    pub fn source(mut self, source: Hash) -> Self {
        self.source = source;
        self
    }

    pub fn representative(mut self, representative: Account) -> Self {
        self.representative = representative;
        self
    }

    pub fn account(mut self, account: Account) -> Self {
        self.account = account;
        self
    }

    fn assemble(&self) -> Block {
        Block::Open(OpenBlock {
            source: self.source,
            representative: self.representative,
            account: self.account,
            signature: self.signature,
            work: self.work,
        })
    }

    common_builder_methods!();
}

#[derive(Default)]
pub struct ChangeBuilder {
    previous: Hash,
    representative: Account,
    signature: Signature,
    work: WorkNonce,
}

impl ChangeBuilder {
    pub fn previous(mut self, previous: Hash) -> Self {
        self.previous = previous;
        self
    }

    pub fn representative(mut self, representative: Account) -> Self {
        self.representative = representative;
        self
    }

    fn assemble(&self) -> Block {
        Block::Change(ChangeBlock {
            previous: self.previous,
            representative: self.representative,
            signature: self.signature,
            work: self.work,
        })
    }

    common_builder_methods!();
}

#[derive(Default)]
pub struct StateBuilder {
    account: Account,
    previous: Hash,
    representative: Account,
    balance: Amount,
    link: Hash,
    signature: Signature,
    work: WorkNonce,
}

impl StateBuilder {
    pub fn account(mut self, account: Account) -> Self {
        self.account = account;
        self
    }

    pub fn previous(mut self, previous: Hash) -> Self {
        self.previous = previous;
        self
    }

    pub fn representative(mut self, representative: Account) -> Self {
        self.representative = representative;
        self
    }

    pub fn balance(mut self, balance: Amount) -> Self {
        self.balance = balance;
        self
    }

    pub fn link(mut self, link: Hash) -> Self {
        self.link = link;
        self
    }

    /// Copy every body field from an existing state block.
    pub fn from(mut self, block: &Block) -> Self {
        if let Block::State(b) = block {
            self.account = b.account;
            self.previous = b.previous;
            self.representative = b.representative;
            self.balance = b.balance;
            self.link = b.link;
            self.signature = b.signature;
            self.work = b.work;
        }
        self
    }

    fn assemble(&self) -> Block {
        Block::State(StateBlock {
            account: self.account,
            previous: self.previous,
            representative: self.representative,
            balance: self.balance,
            link: self.link,
            signature: self.signature,
            work: self.work,
        })
    }

    common_builder_methods!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{verify, WorkThresholds};

    #[test]
    fn signed_block_verifies() {
        let keypair = Keypair::generate();
        let block = state()
            .account(keypair.public())
            .previous([1u8; 32])
            .balance(5)
            .sign(&keypair)
            .build();
        assert!(verify(&keypair.public(), &block.hash(), block.signature()));
    }

    #[test]
    fn work_for_meets_threshold() {
        let thresholds = WorkThresholds::dev();
        let block = change()
            .previous([3u8; 32])
            .representative([4u8; 32])
            .work_for(&thresholds)
            .build();
        assert!(crate::crypto::work_value(&block.root(), block.work()) >= thresholds.base());
    }

    #[test]
    fn state_from_copies_body() {
        let keypair = Keypair::generate();
        let original = state()
            .account(keypair.public())
            .previous([1u8; 32])
            .balance(9)
            .link([2u8; 32])
            .sign(&keypair)
            .work(11)
            .build();
        let copy = state().from(&original).build();
        assert_eq!(copy, original);
    }
}
