//! Per-block validation against the current `any` view.
//!
//! Produces the [`BlockDelta`] describing the ledger mutation, or the typed
//! rejection from the processing taxonomy. Validation never mutates state.

use crate::block::{Block, BlockDetails, BlockSideband, SavedBlock};
use crate::crypto;
use crate::ledger::any;
use crate::ledger::unconfirmed::{BlockDelta, UnconfirmedView};
use crate::ledger::{BlockStatus, Ledger};
use crate::store::Transaction;
use crate::types::{AccountInfo, Amount, Epoch, PendingInfo, PendingKey};
use crate::{is_zero, seconds_since_epoch, Account, Hash, BURN_ACCOUNT, ZERO_HASH};

/// Outcome of the per-variant semantic analysis.
struct Analysis {
    details: BlockDetails,
    balance: Amount,
    representative: Account,
    /// Epoch of the account after this block
    epoch: Epoch,
    receivable: (Option<PendingKey>, Option<PendingInfo>),
    source_epoch: Epoch,
}

pub(crate) fn check(
    ledger: &Ledger,
    view: &UnconfirmedView,
    tx: &dyn Transaction,
    block: &Block,
) -> Result<BlockDelta, BlockStatus> {
    let hash = block.hash();

    if any::block_exists_or_pruned(ledger, view, tx, &hash) {
        return Err(BlockStatus::Old);
    }

    let previous_hash = block.previous();
    let previous = if !is_zero(&previous_hash) {
        match any::block_get(ledger, view, tx, &previous_hash) {
            Some(block) => Some(block),
            None => return Err(BlockStatus::GapPrevious),
        }
    } else {
        None
    };

    // Resolve the owning account; legacy send/receive/change derive it from
    // the predecessor.
    let account = match block.account_field() {
        Some(account) => account,
        None => match &previous {
            Some(previous) => previous.account(),
            None => return Err(BlockStatus::GapPrevious),
        },
    };
    if account == BURN_ACCOUNT {
        return Err(BlockStatus::OpenedBurnAccount);
    }

    let existing = any::account_get(ledger, view, tx, &account);

    // Position: the block must extend the account frontier exactly. A
    // mismatch while the predecessor exists means the position is already
    // taken by a competitor.
    match &previous {
        Some(_) => {
            let head = existing.as_ref().map(|info| info.head).unwrap_or(ZERO_HASH);
            if head != previous_hash {
                return Err(BlockStatus::Fork);
            }
        }
        None => {
            if existing.is_some() {
                return Err(BlockStatus::Fork);
            }
        }
    }

    // Legacy variants cannot follow an upgraded frontier.
    if !matches!(block, Block::State(_)) {
        if let Some(info) = &existing {
            if info.epoch > Epoch::Epoch0 {
                return Err(BlockStatus::BlockPosition);
            }
        }
    }

    // Epoch blocks are signed by the epoch signer, everything else by the
    // account holder.
    let is_epoch_block = matches!(block, Block::State(b) if ledger.constants.epochs.is_epoch_link(&b.link));
    let signer = if is_epoch_block {
        ledger.constants.epochs.signer
    } else {
        account
    };
    if !crypto::verify(&signer, &hash, block.signature()) {
        return Err(BlockStatus::BadSignature);
    }

    let analysis = analyze(ledger, view, tx, block, &account, &previous, &existing)?;

    // Work against the exact epoch/direction threshold.
    if !ledger.constants.work.validate(
        &block.root(),
        block.work(),
        analysis.details.epoch,
        analysis.details.is_receive,
    ) {
        return Err(BlockStatus::InsufficientWork);
    }

    let now = seconds_since_epoch();
    let height = existing.as_ref().map(|info| info.block_count).unwrap_or(0) + 1;
    let open_block = existing
        .as_ref()
        .map(|info| info.open_block)
        .unwrap_or(hash);
    let head = AccountInfo {
        head: hash,
        representative: analysis.representative,
        open_block,
        balance: analysis.balance,
        modified: now,
        block_count: height,
        epoch: analysis.epoch,
    };
    let sideband = BlockSideband {
        height,
        timestamp: now,
        successor: ZERO_HASH,
        account,
        balance: analysis.balance,
        details: analysis.details,
        source_epoch: analysis.source_epoch,
    };
    // Previous representative and balance drive the weight delta; first
    // blocks have no weight to move.
    let weight = match (&previous, &existing) {
        (Some(previous), Some(info)) => Some((info.representative, previous.balance())),
        _ => None,
    };

    Ok(BlockDelta {
        block: SavedBlock {
            block: block.clone(),
            sideband,
        },
        head,
        receivable: analysis.receivable,
        weight,
    })
}

fn analyze(
    ledger: &Ledger,
    view: &UnconfirmedView,
    tx: &dyn Transaction,
    block: &Block,
    account: &Account,
    previous: &Option<SavedBlock>,
    existing: &Option<AccountInfo>,
) -> Result<Analysis, BlockStatus> {
    let hash = block.hash();
    match block {
        Block::Send(b) => {
            let previous = previous.as_ref().ok_or(BlockStatus::GapPrevious)?;
            let previous_balance = previous.balance();
            if b.balance > previous_balance {
                return Err(BlockStatus::NegativeSpend);
            }
            let info = existing.as_ref().ok_or(BlockStatus::GapPrevious)?;
            Ok(Analysis {
                details: BlockDetails {
                    epoch: Epoch::Epoch0,
                    is_send: true,
                    is_receive: false,
                    is_epoch: false,
                },
                balance: b.balance,
                representative: info.representative,
                epoch: Epoch::Epoch0,
                receivable: (
                    Some(PendingKey::new(b.destination, hash)),
                    Some(PendingInfo {
                        source: *account,
                        amount: previous_balance - b.balance,
                        epoch: Epoch::Epoch0,
                    }),
                ),
                source_epoch: Epoch::Epoch0,
            })
        }
        Block::Receive(b) => {
            let previous = previous.as_ref().ok_or(BlockStatus::GapPrevious)?;
            let pending = check_source(ledger, view, tx, account, &b.source)?;
            // Upgraded sends need a state receive
            if pending.epoch > Epoch::Epoch0 {
                return Err(BlockStatus::Unreceivable);
            }
            let info = existing.as_ref().ok_or(BlockStatus::GapPrevious)?;
            Ok(Analysis {
                details: BlockDetails {
                    epoch: Epoch::Epoch0,
                    is_send: false,
                    is_receive: true,
                    is_epoch: false,
                },
                balance: previous.balance() + pending.amount,
                representative: info.representative,
                epoch: Epoch::Epoch0,
                receivable: (Some(PendingKey::new(*account, b.source)), None),
                source_epoch: pending.epoch,
            })
        }
        Block::Open(b) => {
            let pending = check_source(ledger, view, tx, account, &b.source)?;
            if pending.epoch > Epoch::Epoch0 {
                return Err(BlockStatus::Unreceivable);
            }
            Ok(Analysis {
                details: BlockDetails {
                    epoch: Epoch::Epoch0,
                    is_send: false,
                    is_receive: true,
                    is_epoch: false,
                },
                balance: pending.amount,
                representative: b.representative,
                epoch: Epoch::Epoch0,
                receivable: (Some(PendingKey::new(*account, b.source)), None),
                source_epoch: pending.epoch,
            })
        }
        Block::Change(b) => {
            let previous = previous.as_ref().ok_or(BlockStatus::GapPrevious)?;
            Ok(Analysis {
                details: BlockDetails {
                    epoch: Epoch::Epoch0,
                    is_send: false,
                    is_receive: false,
                    is_epoch: false,
                },
                balance: previous.balance(),
                representative: b.representative,
                epoch: Epoch::Epoch0,
                receivable: (None, None),
                source_epoch: Epoch::Epoch0,
            })
        }
        Block::State(b) => {
            let previous_balance = previous.as_ref().map(|p| p.balance()).unwrap_or(0);
            let account_epoch = existing.as_ref().map(|info| info.epoch).unwrap_or_default();

            if let Some(target_epoch) = ledger.constants.epochs.epoch(&b.link) {
                // Epoch upgrade: no balance or representative movement,
                // exactly one epoch up.
                if b.balance != previous_balance {
                    return Err(BlockStatus::BlockPosition);
                }
                match existing {
                    Some(info) => {
                        if b.representative != info.representative {
                            return Err(BlockStatus::BlockPosition);
                        }
                    }
                    None => {
                        // Epoch open: only sensible when funds await; the
                        // source epoch cannot be determined without them.
                        if !is_zero(&b.representative) {
                            return Err(BlockStatus::BlockPosition);
                        }
                        let receivable_any = matches!(
                            any::receivable_lower_bound(ledger, view, tx, account, &ZERO_HASH),
                            Some((key, _)) if key.account == *account
                        );
                        if !receivable_any {
                            return Err(BlockStatus::GapEpochOpenPending);
                        }
                    }
                }
                if account_epoch.successor() != Some(target_epoch) {
                    return Err(BlockStatus::BlockPosition);
                }
                Ok(Analysis {
                    details: BlockDetails {
                        epoch: target_epoch,
                        is_send: false,
                        is_receive: false,
                        is_epoch: true,
                    },
                    balance: b.balance,
                    representative: existing
                        .as_ref()
                        .map(|info| info.representative)
                        .unwrap_or(b.representative),
                    epoch: target_epoch,
                    receivable: (None, None),
                    source_epoch: Epoch::Epoch0,
                })
            } else if b.balance < previous_balance {
                // Send; link is the destination account
                Ok(Analysis {
                    details: BlockDetails {
                        epoch: account_epoch,
                        is_send: true,
                        is_receive: false,
                        is_epoch: false,
                    },
                    balance: b.balance,
                    representative: b.representative,
                    epoch: account_epoch,
                    receivable: (
                        Some(PendingKey::new(b.link, hash)),
                        Some(PendingInfo {
                            source: *account,
                            amount: previous_balance - b.balance,
                            epoch: account_epoch,
                        }),
                    ),
                    source_epoch: Epoch::Epoch0,
                })
            } else if !is_zero(&b.link) {
                // Receive; link is the source send hash
                let pending = check_source(ledger, view, tx, account, &b.link)?;
                if b.balance - previous_balance != pending.amount {
                    return Err(BlockStatus::Unreceivable);
                }
                let epoch = account_epoch.max(pending.epoch);
                Ok(Analysis {
                    details: BlockDetails {
                        epoch,
                        is_send: false,
                        is_receive: true,
                        is_epoch: false,
                    },
                    balance: b.balance,
                    representative: b.representative,
                    epoch,
                    receivable: (Some(PendingKey::new(*account, b.link)), None),
                    source_epoch: pending.epoch,
                })
            } else {
                // No link: representative change only; a balance increase
                // without a source has nothing to receive from.
                if b.balance != previous_balance || previous.is_none() {
                    return Err(BlockStatus::GapSource);
                }
                Ok(Analysis {
                    details: BlockDetails {
                        epoch: account_epoch,
                        is_send: false,
                        is_receive: false,
                        is_epoch: false,
                    },
                    balance: b.balance,
                    representative: b.representative,
                    epoch: account_epoch,
                    receivable: (None, None),
                    source_epoch: Epoch::Epoch0,
                })
            }
        }
    }
}

/// Resolve the pending entry a receive consumes: the source block must be
/// known and the receivable unconsumed.
fn check_source(
    ledger: &Ledger,
    view: &UnconfirmedView,
    tx: &dyn Transaction,
    account: &Account,
    source: &Hash,
) -> Result<PendingInfo, BlockStatus> {
    if !any::block_exists_or_pruned(ledger, view, tx, source) {
        return Err(BlockStatus::GapSource);
    }
    any::pending_get(ledger, view, tx, &PendingKey::new(*account, *source))
        .ok_or(BlockStatus::Unreceivable)
}
