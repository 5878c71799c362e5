//! Serving side of the ascending pull protocol.
//!
//! Answers `AscPullReq` messages against the `any` ledger view: chain
//! pulls by hash or account, account info probes, and frontier scans.
//! Verification bounds request sizes before any ledger work happens.

use std::sync::Arc;

use crate::ledger::Ledger;
use crate::network::{
    AccountInfoAck, AscPullAck, AscPullAckPayload, AscPullReq, AscPullReqPayload, HashType,
};
use crate::stats::{StatDetail, StatType, Stats};
use crate::store::Transaction;
use crate::{is_zero, Hash};

/// Hard cap on blocks returned per pull.
pub const MAX_BLOCKS: usize = 128;

pub struct BootstrapServer {
    ledger: Arc<Ledger>,
    stats: Arc<Stats>,
}

impl BootstrapServer {
    pub fn new(ledger: Arc<Ledger>, stats: Arc<Stats>) -> Self {
        BootstrapServer { ledger, stats }
    }

    /// Bounds-check a request before processing.
    pub fn verify(&self, request: &AscPullReq) -> bool {
        match &request.payload {
            AscPullReqPayload::Blocks { count, .. } => {
                *count > 0 && *count as usize <= MAX_BLOCKS
            }
            AscPullReqPayload::AccountInfo { target, .. } => !is_zero(target),
            AscPullReqPayload::Frontiers { count, .. } => {
                *count > 0 && *count <= crate::constants::BOOTSTRAP_MAX_FRONTIERS
            }
        }
    }

    /// Produce the response for a verified request; `None` for requests
    /// failing verification.
    pub fn process(&self, tx: &dyn Transaction, request: &AscPullReq) -> Option<AscPullAck> {
        if !self.verify(request) {
            self.stats.inc(StatType::BootstrapServer, StatDetail::Invalid);
            return None;
        }
        self.stats
            .inc(StatType::BootstrapServer, StatDetail::Response);
        let ack = match &request.payload {
            AscPullReqPayload::Blocks {
                start,
                start_type,
                count,
            } => self.process_blocks(tx, request.id, start, *start_type, *count as usize),
            AscPullReqPayload::AccountInfo {
                target,
                target_type,
            } => self.process_account_info(tx, request.id, target, *target_type),
            AscPullReqPayload::Frontiers { start, count } => {
                self.process_frontiers(tx, request.id, start, *count as usize)
            }
        };
        Some(ack)
    }

    fn process_blocks(
        &self,
        tx: &dyn Transaction,
        id: u64,
        start: &Hash,
        start_type: HashType,
        count: usize,
    ) -> AscPullAck {
        let count = count.min(MAX_BLOCKS);
        let start_block = match start_type {
            HashType::Block => {
                if self.ledger.any().block_exists(tx, start) {
                    Some(*start)
                } else {
                    None
                }
            }
            HashType::Account => {
                // Pulling by account starts at the open block
                self.ledger
                    .any()
                    .get_account(tx, start)
                    .map(|info| info.open_block)
            }
        };
        let mut blocks = Vec::new();
        if let Some(start_block) = start_block {
            let mut current = self.ledger.any().get_block(tx, &start_block);
            while let Some(block) = current {
                let hash = block.hash();
                blocks.push(block.block);
                if blocks.len() >= count {
                    break;
                }
                current = self
                    .ledger
                    .any()
                    .successor_by_hash(tx, &hash)
                    .and_then(|successor| self.ledger.any().get_block(tx, &successor));
            }
            self.stats.add(
                StatType::BootstrapServer,
                StatDetail::Blocks,
                blocks.len() as u64,
            );
            self.stats
                .inc(StatType::BootstrapServer, StatDetail::ResponseBlocks);
        }
        // An empty payload tells the requester neither block nor account
        // was found
        AscPullAck {
            id,
            payload: AscPullAckPayload::Blocks(blocks),
        }
    }

    fn process_account_info(
        &self,
        tx: &dyn Transaction,
        id: u64,
        target: &Hash,
        target_type: HashType,
    ) -> AscPullAck {
        let account = match target_type {
            HashType::Account => *target,
            HashType::Block => self
                .ledger
                .any()
                .block_account(tx, target)
                .unwrap_or([0u8; 32]),
        };
        let mut payload = AccountInfoAck {
            account,
            ..Default::default()
        };
        if let Some(info) = self.ledger.any().get_account(tx, &account) {
            payload.account_open = info.open_block;
            payload.account_head = info.head;
            payload.account_block_count = info.block_count;
            if let Some(conf) = self.ledger.store.confirmation_height.get(tx, &account) {
                payload.account_conf_frontier = conf.frontier;
                payload.account_conf_height = conf.height;
            }
        }
        self.stats
            .inc(StatType::BootstrapServer, StatDetail::ResponseAccountInfo);
        AscPullAck {
            id,
            payload: AscPullAckPayload::AccountInfo(payload),
        }
    }

    fn process_frontiers(
        &self,
        tx: &dyn Transaction,
        id: u64,
        start: &crate::Account,
        count: usize,
    ) -> AscPullAck {
        let mut frontiers = Vec::new();
        let mut cursor = *start;
        while frontiers.len() < count {
            let Some((account, info)) = self.ledger.any().account_lower_bound(tx, &cursor) else {
                break;
            };
            frontiers.push((account, info.head));
            match crate::ledger::any::inc_bytes(&account) {
                Some(next) => cursor = next,
                None => break,
            }
        }
        self.stats
            .inc(StatType::BootstrapServer, StatDetail::ResponseFrontiers);
        AscPullAck {
            id,
            payload: AscPullAckPayload::Frontiers(frontiers),
        }
    }
}
