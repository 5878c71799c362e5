//! Ledger constants: genesis block, epoch links, work thresholds.

use once_cell::sync::Lazy;

use crate::block::{builder, BlockDetails, BlockSideband, SavedBlock};
use crate::constants::GENESIS_AMOUNT;
use crate::crypto::{Keypair, WorkThresholds};
use crate::types::{Amount, Epoch};
use crate::{Account, Hash, ZERO_HASH};

/// Epoch upgrade parameters: the distinguished link values that mark a
/// state block as an epoch block, and the account allowed to sign them.
#[derive(Clone, Debug)]
pub struct Epochs {
    pub epoch_1_link: Hash,
    pub epoch_2_link: Hash,
    pub signer: Account,
}

impl Epochs {
    /// Epoch a link value selects, if it is an epoch link at all.
    pub fn epoch(&self, link: &Hash) -> Option<Epoch> {
        if *link == self.epoch_1_link {
            Some(Epoch::Epoch1)
        } else if *link == self.epoch_2_link {
            Some(Epoch::Epoch2)
        } else {
            None
        }
    }

    pub fn is_epoch_link(&self, link: &Hash) -> bool {
        self.epoch(link).is_some()
    }

    pub fn link(&self, epoch: Epoch) -> Hash {
        match epoch {
            Epoch::Epoch0 => ZERO_HASH,
            Epoch::Epoch1 => self.epoch_1_link,
            Epoch::Epoch2 => self.epoch_2_link,
        }
    }

    /// Account whose signature is accepted on epoch blocks.
    pub fn signer(&self, _epoch: Epoch) -> Account {
        self.signer
    }
}

/// Network-level ledger parameters.
#[derive(Clone, Debug)]
pub struct LedgerConstants {
    pub genesis_account: Account,
    pub genesis_block: SavedBlock,
    pub genesis_amount: Amount,
    pub epochs: Epochs,
    pub work: WorkThresholds,
}

impl LedgerConstants {
    pub fn genesis_hash(&self) -> Hash {
        self.genesis_block.hash()
    }

    /// Development constants: deterministic genesis key, cheap work.
    /// Every call shares one genesis so independent test nodes agree on
    /// the chain root.
    pub fn dev() -> Self {
        LedgerConstants {
            genesis_account: DEV_GENESIS_KEY.public(),
            genesis_block: DEV_GENESIS_BLOCK.clone(),
            genesis_amount: GENESIS_AMOUNT,
            epochs: Epochs {
                epoch_1_link: crate::hash_domain(b"weave.epoch", b"epoch v1 block"),
                epoch_2_link: crate::hash_domain(b"weave.epoch", b"epoch v2 block"),
                signer: DEV_GENESIS_KEY.public(),
            },
            work: WorkThresholds::dev(),
        }
    }
}

/// Well-known development genesis key. Never use outside tests and local
/// networks.
pub static DEV_GENESIS_KEY: Lazy<Keypair> =
    Lazy::new(|| Keypair::from_seed(crate::hash_domain(b"weave.dev", b"genesis seed")));

static DEV_GENESIS_BLOCK: Lazy<SavedBlock> = Lazy::new(|| {
    let key = &*DEV_GENESIS_KEY;
    let block = builder::open()
        .source(key.public())
        .representative(key.public())
        .account(key.public())
        .sign(key)
        .work_for(&WorkThresholds::dev())
        .build();
    SavedBlock {
        sideband: BlockSideband {
            height: 1,
            timestamp: 0,
            successor: ZERO_HASH,
            account: key.public(),
            balance: GENESIS_AMOUNT,
            details: BlockDetails {
                epoch: Epoch::Epoch0,
                is_send: false,
                is_receive: false,
                is_epoch: false,
            },
            source_epoch: Epoch::Epoch0,
        },
        block,
    }
});
