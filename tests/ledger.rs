//! Ledger integration tests: the processing taxonomy, rollback identity,
//! dependency-driven cementation, pruning, and weight movement.
//!
//! All tests run against a temporary store with the dev genesis, driving
//! the ledger directly through write transactions.

use std::sync::Arc;

use weave::block::{builder, Block};
use weave::constants::GENESIS_AMOUNT;
use weave::crypto::{generate_insufficient_work, work_value, Keypair};
use weave::genesis::{LedgerConstants, DEV_GENESIS_KEY};
use weave::ledger::{BlockStatus, Ledger};
use weave::stats::Stats;
use weave::store::{Store, Writer};
use weave::types::{Epoch, PendingKey};

// ── Helpers ─────────────────────────────────────────────────────────────

fn test_ledger() -> Arc<Ledger> {
    let store = Arc::new(Store::open_temporary().expect("temporary store"));
    Arc::new(Ledger::new(
        store,
        LedgerConstants::dev(),
        Arc::new(Stats::new()),
    ))
}

fn process(ledger: &Ledger, block: &Block) -> BlockStatus {
    let tx = ledger.store.tx_begin_write(Writer::BlockProcessor);
    let status = ledger.process(&tx, block);
    tx.commit();
    status
}

fn genesis_key() -> &'static Keypair {
    &DEV_GENESIS_KEY
}

/// Send `amount` from the genesis account to `destination`, on top of
/// `previous` holding `previous_balance`.
fn genesis_send(
    ledger: &Ledger,
    previous: weave::Hash,
    previous_balance: u128,
    destination: weave::Account,
    amount: u128,
) -> Block {
    builder::send()
        .previous(previous)
        .destination(destination)
        .balance(previous_balance - amount)
        .sign(genesis_key())
        .work_for(&ledger.constants.work)
        .build()
}

fn open_for(ledger: &Ledger, key: &Keypair, source: &Block) -> Block {
    builder::open()
        .source(source.hash())
        .representative(key.public())
        .account(key.public())
        .sign(key)
        .work_for(&ledger.constants.work)
        .build()
}

// ── Genesis ─────────────────────────────────────────────────────────────

#[test]
fn genesis_is_seeded_and_cemented() {
    let ledger = test_ledger();
    let tx = ledger.store.tx_begin_read();
    let genesis_hash = ledger.constants.genesis_hash();
    assert!(ledger.confirmed().block_exists(&tx, &genesis_hash));
    assert_eq!(ledger.block_count(), 1);
    assert_eq!(ledger.cemented_count(), 1);
    assert_eq!(ledger.account_count(), 1);
    assert_eq!(ledger.weight(&ledger.constants.genesis_account), GENESIS_AMOUNT);
    let info = ledger
        .confirmed()
        .get_account(&tx, &ledger.constants.genesis_account)
        .expect("genesis account");
    assert_eq!(info.head, genesis_hash);
    assert_eq!(info.block_count, 1);
    assert_eq!(info.balance, GENESIS_AMOUNT);
}

#[test]
fn reopened_ledger_rebuilds_cache() {
    let store = Arc::new(Store::open_temporary().expect("temporary store"));
    let first = Ledger::new(store.clone(), LedgerConstants::dev(), Arc::new(Stats::new()));
    assert_eq!(first.cemented_count(), 1);
    drop(first);
    let second = Ledger::new(store, LedgerConstants::dev(), Arc::new(Stats::new()));
    assert_eq!(second.cemented_count(), 1);
    assert_eq!(second.account_count(), 1);
    assert_eq!(second.weight(&second.constants.genesis_account), GENESIS_AMOUNT);
}

// ── Processing taxonomy ─────────────────────────────────────────────────

#[test]
fn process_send_progress() {
    let ledger = test_ledger();
    let key = Keypair::generate();
    let send = genesis_send(
        &ledger,
        ledger.constants.genesis_hash(),
        GENESIS_AMOUNT,
        key.public(),
        100,
    );
    assert_eq!(process(&ledger, &send), BlockStatus::Progress);

    let tx = ledger.store.tx_begin_read();
    let any = ledger.any();
    assert!(any.block_exists(&tx, &send.hash()));
    assert_eq!(
        any.account_balance(&tx, &ledger.constants.genesis_account),
        Some(GENESIS_AMOUNT - 100)
    );
    assert_eq!(any.amount(&tx, &send.hash()), Some(100));
    assert_eq!(any.height(&tx, &send.hash()), 2);
    // The receivable is visible, the weight delta tracked in the overlay
    assert!(any.receivable_any(&tx, &key.public()));
    assert_eq!(
        ledger.weight(&ledger.constants.genesis_account),
        GENESIS_AMOUNT - 100
    );
    assert_eq!(ledger.block_count(), 2);
    assert_eq!(ledger.cemented_count(), 1);
}

#[test]
fn process_rejections() {
    let ledger = test_ledger();
    let key = Keypair::generate();
    let genesis_hash = ledger.constants.genesis_hash();
    let send = genesis_send(&ledger, genesis_hash, GENESIS_AMOUNT, key.public(), 100);
    assert_eq!(process(&ledger, &send), BlockStatus::Progress);
    // duplicate
    assert_eq!(process(&ledger, &send), BlockStatus::Old);
    // unknown previous
    let orphan = builder::send()
        .previous([42u8; 32])
        .destination(key.public())
        .balance(1)
        .sign(genesis_key())
        .work_for(&ledger.constants.work)
        .build();
    assert_eq!(process(&ledger, &orphan), BlockStatus::GapPrevious);
    // bad signature
    let unsigned = builder::send()
        .previous(send.hash())
        .destination(key.public())
        .balance(GENESIS_AMOUNT - 200)
        .work_for(&ledger.constants.work)
        .build();
    assert_eq!(process(&ledger, &unsigned), BlockStatus::BadSignature);
    // insufficient work
    let mut weak = genesis_send(
        &ledger,
        send.hash(),
        GENESIS_AMOUNT - 100,
        key.public(),
        100,
    );
    weak.set_work(generate_insufficient_work(
        &weak.root(),
        ledger.constants.work.base(),
    ));
    assert_eq!(process(&ledger, &weak), BlockStatus::InsufficientWork);
    // spending more than the balance
    let overdraw = builder::send()
        .previous(send.hash())
        .destination(key.public())
        .balance(GENESIS_AMOUNT)
        .sign(genesis_key())
        .work_for(&ledger.constants.work)
        .build();
    assert_eq!(process(&ledger, &overdraw), BlockStatus::NegativeSpend);
    // competing successor of an occupied position
    let fork = genesis_send(&ledger, genesis_hash, GENESIS_AMOUNT, [7u8; 32], 50);
    assert_eq!(process(&ledger, &fork), BlockStatus::Fork);
}

#[test]
fn receive_rejections() {
    let ledger = test_ledger();
    let key = Keypair::generate();
    let other = Keypair::generate();
    let send = genesis_send(
        &ledger,
        ledger.constants.genesis_hash(),
        GENESIS_AMOUNT,
        key.public(),
        100,
    );
    assert_eq!(process(&ledger, &send), BlockStatus::Progress);
    // source not in the ledger
    let gap = builder::open()
        .source([42u8; 32])
        .representative(key.public())
        .account(key.public())
        .sign(&key)
        .work_for(&ledger.constants.work)
        .build();
    assert_eq!(process(&ledger, &gap), BlockStatus::GapSource);
    // source exists but the receivable belongs to someone else
    let stolen = builder::open()
        .source(send.hash())
        .representative(other.public())
        .account(other.public())
        .sign(&other)
        .work_for(&ledger.constants.work)
        .build();
    assert_eq!(process(&ledger, &stolen), BlockStatus::Unreceivable);
    // opening the burn account
    let burn = builder::open()
        .source(send.hash())
        .representative([0u8; 32])
        .account([0u8; 32])
        .sign(&key)
        .work_for(&ledger.constants.work)
        .build();
    assert_eq!(process(&ledger, &burn), BlockStatus::OpenedBurnAccount);
    // double receive
    let open = open_for(&ledger, &key, &send);
    assert_eq!(process(&ledger, &open), BlockStatus::Progress);
    let again = builder::receive()
        .previous(open.hash())
        .source(send.hash())
        .sign(&key)
        .work_for(&ledger.constants.work)
        .build();
    assert_eq!(process(&ledger, &again), BlockStatus::Unreceivable);
}

#[test]
fn state_receive_checks_amount() {
    let ledger = test_ledger();
    let key = Keypair::generate();
    let send = genesis_send(
        &ledger,
        ledger.constants.genesis_hash(),
        GENESIS_AMOUNT,
        key.public(),
        100,
    );
    assert_eq!(process(&ledger, &send), BlockStatus::Progress);
    // claimed amount disagrees with the pending entry
    let wrong = builder::state()
        .account(key.public())
        .representative(key.public())
        .balance(99)
        .link(send.hash())
        .sign(&key)
        .work_for(&ledger.constants.work)
        .build();
    assert_eq!(process(&ledger, &wrong), BlockStatus::Unreceivable);
    let right = builder::state()
        .account(key.public())
        .representative(key.public())
        .balance(100)
        .link(send.hash())
        .sign(&key)
        .work_for(&ledger.constants.work)
        .build();
    assert_eq!(process(&ledger, &right), BlockStatus::Progress);
    let tx = ledger.store.tx_begin_read();
    assert_eq!(ledger.any().account_balance(&tx, &key.public()), Some(100));
    assert_eq!(ledger.weight(&key.public()), 100);
}

#[test]
fn epoch_upgrade_and_legacy_rejection() {
    let ledger = test_ledger();
    let genesis = genesis_key();
    let account = ledger.constants.genesis_account;
    let epoch_link = ledger.constants.epochs.link(Epoch::Epoch1);
    let epoch = builder::state()
        .account(account)
        .previous(ledger.constants.genesis_hash())
        .representative(account)
        .balance(GENESIS_AMOUNT)
        .link(epoch_link)
        .sign(genesis)
        .work_for(&ledger.constants.work)
        .build();
    assert_eq!(process(&ledger, &epoch), BlockStatus::Progress);
    {
        let tx = ledger.store.tx_begin_read();
        assert_eq!(ledger.version(&tx, &epoch.hash()), Epoch::Epoch1);
        let info = ledger.any().get_account(&tx, &account).expect("account");
        assert_eq!(info.epoch, Epoch::Epoch1);
    }
    // Legacy blocks cannot follow an upgraded frontier
    let legacy = builder::send()
        .previous(epoch.hash())
        .destination([7u8; 32])
        .balance(GENESIS_AMOUNT - 1)
        .sign(genesis)
        .work_for(&ledger.constants.work)
        .build();
    assert_eq!(process(&ledger, &legacy), BlockStatus::BlockPosition);
    // Skipping an epoch is rejected
    let skip = builder::state()
        .account(account)
        .previous(epoch.hash())
        .representative(account)
        .balance(GENESIS_AMOUNT)
        .link(ledger.constants.epochs.link(Epoch::Epoch2))
        .sign(genesis)
        .work_for(&ledger.constants.work)
        .build();
    assert_eq!(process(&ledger, &skip), BlockStatus::Progress);
    // ... but only in order: a third upgrade has nowhere to go
    let beyond = builder::state()
        .account(account)
        .previous(skip.hash())
        .representative(account)
        .balance(GENESIS_AMOUNT)
        .link(ledger.constants.epochs.link(Epoch::Epoch2))
        .sign(genesis)
        .work_for(&ledger.constants.work)
        .build();
    assert_eq!(process(&ledger, &beyond), BlockStatus::BlockPosition);
}

// ── Rollback ────────────────────────────────────────────────────────────

#[test]
fn rollback_restores_ledger_state() {
    let ledger = test_ledger();
    let key = Keypair::generate();
    let genesis_account = ledger.constants.genesis_account;
    let send = genesis_send(
        &ledger,
        ledger.constants.genesis_hash(),
        GENESIS_AMOUNT,
        key.public(),
        100,
    );
    assert_eq!(process(&ledger, &send), BlockStatus::Progress);
    let open = open_for(&ledger, &key, &send);
    assert_eq!(process(&ledger, &open), BlockStatus::Progress);
    assert_eq!(ledger.weight(&key.public()), 100);

    // Rolling back the send cascades through the dependent receive
    let tx = ledger.store.tx_begin_write(Writer::Generic);
    let rolled = ledger.rollback(&tx, &send.hash()).expect("not cemented");
    tx.commit();
    let hashes: Vec<_> = rolled.iter().map(|block| block.hash()).collect();
    assert!(hashes.contains(&send.hash()));
    assert!(hashes.contains(&open.hash()));

    let tx = ledger.store.tx_begin_read();
    assert!(!ledger.any().block_exists(&tx, &send.hash()));
    assert!(!ledger.any().block_exists(&tx, &open.hash()));
    assert_eq!(
        ledger.any().account_balance(&tx, &genesis_account),
        Some(GENESIS_AMOUNT)
    );
    assert!(ledger.any().get_account(&tx, &key.public()).is_none());
    assert!(!ledger.any().receivable_any(&tx, &key.public()));
    assert_eq!(ledger.weight(&genesis_account), GENESIS_AMOUNT);
    assert_eq!(ledger.weight(&key.public()), 0);
    assert_eq!(ledger.block_count(), 1);
    assert_eq!(ledger.account_count(), 1);
}

#[test]
fn rollback_refuses_cemented() {
    let ledger = test_ledger();
    let tx = ledger.store.tx_begin_write(Writer::Generic);
    assert!(ledger
        .rollback(&tx, &ledger.constants.genesis_hash())
        .is_err());
}

#[test]
fn rollback_receive_restores_pending() {
    let ledger = test_ledger();
    let key = Keypair::generate();
    let send = genesis_send(
        &ledger,
        ledger.constants.genesis_hash(),
        GENESIS_AMOUNT,
        key.public(),
        100,
    );
    assert_eq!(process(&ledger, &send), BlockStatus::Progress);
    let open = open_for(&ledger, &key, &send);
    assert_eq!(process(&ledger, &open), BlockStatus::Progress);
    {
        let tx = ledger.store.tx_begin_read();
        assert!(!ledger.any().receivable_any(&tx, &key.public()));
    }
    let tx = ledger.store.tx_begin_write(Writer::Generic);
    let rolled = ledger.rollback(&tx, &open.hash()).expect("not cemented");
    tx.commit();
    assert_eq!(rolled.len(), 1);
    let tx = ledger.store.tx_begin_read();
    // The send stays, its receivable is visible again
    assert!(ledger.any().block_exists(&tx, &send.hash()));
    assert!(ledger.any().receivable_any(&tx, &key.public()));
    assert_eq!(
        ledger
            .any()
            .get_pending(&tx, &PendingKey::new(key.public(), send.hash()))
            .expect("restored pending")
            .amount,
        100
    );
}

// ── Cementation ─────────────────────────────────────────────────────────

/// Conservation checks over the cemented tables: balances plus in-flight
/// receivables equal the initial supply, and representative weights mirror
/// the balances they delegate.
fn assert_confirmed_supply(ledger: &Ledger) {
    let tx = ledger.store.tx_begin_read();
    let balances: u128 = ledger
        .store
        .accounts
        .iter_from(&tx, &[0u8; 32])
        .map(|(_, info)| info.balance)
        .sum();
    let pending: u128 = ledger
        .store
        .pending
        .iter_from(&tx, &PendingKey::new([0u8; 32], [0u8; 32]))
        .map(|(_, info)| info.amount)
        .sum();
    assert_eq!(balances + pending, GENESIS_AMOUNT);
    let weights = std::sync::Mutex::new(0u128);
    ledger.store.rep_weight.for_each_par(|iter| {
        let shard: u128 = iter.map(|(_, weight)| weight).sum();
        *weights.lock().unwrap() += shard;
    });
    assert_eq!(*weights.lock().unwrap(), balances);
}

#[test]
fn confirm_drives_dependencies() {
    let ledger = test_ledger();
    let key = Keypair::generate();
    let send1 = genesis_send(
        &ledger,
        ledger.constants.genesis_hash(),
        GENESIS_AMOUNT,
        key.public(),
        100,
    );
    let send2 = genesis_send(
        &ledger,
        send1.hash(),
        GENESIS_AMOUNT - 100,
        key.public(),
        50,
    );
    assert_eq!(process(&ledger, &send1), BlockStatus::Progress);
    assert_eq!(process(&ledger, &send2), BlockStatus::Progress);
    let open = open_for(&ledger, &key, &send1);
    assert_eq!(process(&ledger, &open), BlockStatus::Progress);

    let tx = ledger.store.tx_begin_write(Writer::ConfirmationHeight);
    let cemented = ledger.confirm(&tx, &open.hash());
    tx.commit();
    let order: Vec<_> = cemented.iter().map(|block| block.hash()).collect();
    // The matched send cements before its receive
    assert_eq!(order, vec![send1.hash(), open.hash()]);
    assert_eq!(ledger.cemented_count(), 3);

    let tx = ledger.store.tx_begin_read();
    assert!(ledger.confirmed().block_exists(&tx, &send1.hash()));
    assert!(ledger.confirmed().block_exists(&tx, &open.hash()));
    assert!(!ledger.confirmed().block_exists(&tx, &send2.hash()));
    // Confirmation heights advanced; the second send is still pending
    assert_eq!(
        ledger
            .store
            .confirmation_height
            .get(&tx, &ledger.constants.genesis_account)
            .expect("height info")
            .height,
        2
    );
    assert_eq!(
        ledger
            .store
            .confirmation_height
            .get(&tx, &key.public())
            .expect("height info")
            .height,
        1
    );
    // Weight for the receiving account is now confirmed
    assert_eq!(ledger.weight(&key.public()), 100);
    assert_eq!(
        ledger.weight_exact(&tx, &key.public()),
        100
    );
    // The consumed receivable is gone from both views
    assert!(ledger
        .any()
        .get_pending(&tx, &PendingKey::new(key.public(), send1.hash()))
        .is_none());
    drop(tx);
    assert_confirmed_supply(&ledger);
}

#[test]
fn confirm_is_idempotent() {
    let ledger = test_ledger();
    let key = Keypair::generate();
    let send = genesis_send(
        &ledger,
        ledger.constants.genesis_hash(),
        GENESIS_AMOUNT,
        key.public(),
        100,
    );
    assert_eq!(process(&ledger, &send), BlockStatus::Progress);
    let tx = ledger.store.tx_begin_write(Writer::ConfirmationHeight);
    assert_eq!(ledger.confirm(&tx, &send.hash()).len(), 1);
    assert!(ledger.confirm(&tx, &send.hash()).is_empty());
    tx.commit();
    drop(tx);
    assert_eq!(ledger.cemented_count(), 2);
    // The send's amount is in flight as a cemented receivable
    assert_confirmed_supply(&ledger);
}

#[test]
fn dependent_blocks_by_type() {
    let ledger = test_ledger();
    let key = Keypair::generate();
    let send = genesis_send(
        &ledger,
        ledger.constants.genesis_hash(),
        GENESIS_AMOUNT,
        key.public(),
        100,
    );
    assert_eq!(process(&ledger, &send), BlockStatus::Progress);
    let open = open_for(&ledger, &key, &send);
    assert_eq!(process(&ledger, &open), BlockStatus::Progress);
    let tx = ledger.store.tx_begin_read();
    let saved_send = ledger.any().get_block(&tx, &send.hash()).expect("send");
    assert_eq!(
        ledger.dependent_blocks(&saved_send),
        [ledger.constants.genesis_hash(), weave::ZERO_HASH]
    );
    let saved_open = ledger.any().get_block(&tx, &open.hash()).expect("open");
    assert_eq!(
        ledger.dependent_blocks(&saved_open),
        [send.hash(), weave::ZERO_HASH]
    );
    assert!(!ledger.dependents_confirmed(&tx, &saved_open));
    // Genesis depends on nothing
    let genesis = ledger
        .any()
        .get_block(&tx, &ledger.constants.genesis_hash())
        .expect("genesis");
    assert_eq!(
        ledger.dependent_blocks(&genesis),
        [weave::ZERO_HASH, weave::ZERO_HASH]
    );
    assert!(ledger.dependents_confirmed(&tx, &genesis));
}

// ── Queries ─────────────────────────────────────────────────────────────

#[test]
fn receivable_iteration_in_key_order() {
    let ledger = test_ledger();
    let key = Keypair::generate();
    let mut previous = ledger.constants.genesis_hash();
    let mut balance = GENESIS_AMOUNT;
    let mut sends = Vec::new();
    for amount in [30u128, 20, 10] {
        let send = genesis_send(&ledger, previous, balance, key.public(), amount);
        assert_eq!(process(&ledger, &send), BlockStatus::Progress);
        previous = send.hash();
        balance -= amount;
        sends.push(send);
    }
    let tx = ledger.store.tx_begin_read();
    let entries: Vec<_> = ledger
        .any()
        .receivable_upper_bound(&tx, &key.public(), &weave::ZERO_HASH)
        .collect();
    assert_eq!(entries.len(), 3);
    let mut keys: Vec<_> = entries.iter().map(|(key, _)| key.hash).collect();
    let sorted = {
        let mut copy = keys.clone();
        copy.sort();
        copy
    };
    assert_eq!(keys, sorted);
    keys.dedup();
    assert_eq!(keys.len(), 3);
    assert_eq!(ledger.account_receivable(&tx, &key.public(), false), 60);
    // Nothing is cemented yet
    assert_eq!(ledger.account_receivable(&tx, &key.public(), true), 0);
}

#[test]
fn receivable_iteration_by_next_account() {
    let ledger = test_ledger();
    // Two destination accounts with adjacent receivables
    let low = Keypair::from_seed([1u8; 32]);
    let high = Keypair::from_seed([200u8; 32]);
    let send1 = genesis_send(
        &ledger,
        ledger.constants.genesis_hash(),
        GENESIS_AMOUNT,
        low.public(),
        10,
    );
    assert_eq!(process(&ledger, &send1), BlockStatus::Progress);
    let send2 = genesis_send(&ledger, send1.hash(), GENESIS_AMOUNT - 10, high.public(), 20);
    assert_eq!(process(&ledger, &send2), BlockStatus::Progress);
    let (first_account, second_account) = if low.public() < high.public() {
        (low.public(), high.public())
    } else {
        (high.public(), low.public())
    };
    let tx = ledger.store.tx_begin_read();
    // Starting past the first account lands on the second one's entries
    let entries: Vec<_> = ledger
        .any()
        .receivable_account_upper_bound(&tx, &first_account)
        .collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0.account, second_account);
}

#[test]
fn latest_root_and_representative_walk() {
    let ledger = test_ledger();
    let key = Keypair::generate();
    let genesis_account = ledger.constants.genesis_account;
    assert_eq!(
        ledger.latest_root(&ledger.store.tx_begin_read(), &key.public()),
        key.public()
    );
    let send = genesis_send(
        &ledger,
        ledger.constants.genesis_hash(),
        GENESIS_AMOUNT,
        key.public(),
        100,
    );
    assert_eq!(process(&ledger, &send), BlockStatus::Progress);
    let tx = ledger.store.tx_begin_read();
    assert_eq!(ledger.latest_root(&tx, &genesis_account), send.hash());
    // Legacy sends carry no representative; the walk lands on the open
    assert_eq!(
        ledger.representative_block(&tx, &send.hash()),
        Some(ledger.constants.genesis_hash())
    );
}

#[test]
fn find_receive_by_send_hash() {
    let ledger = test_ledger();
    let key = Keypair::generate();
    let send = genesis_send(
        &ledger,
        ledger.constants.genesis_hash(),
        GENESIS_AMOUNT,
        key.public(),
        100,
    );
    assert_eq!(process(&ledger, &send), BlockStatus::Progress);
    let open = open_for(&ledger, &key, &send);
    assert_eq!(process(&ledger, &open), BlockStatus::Progress);
    {
        let tx = ledger.store.tx_begin_write(Writer::ConfirmationHeight);
        ledger.confirm(&tx, &open.hash());
        tx.commit();
    }
    let tx = ledger.store.tx_begin_read();
    let found = ledger
        .find_receive_block_by_send_hash(&tx, &key.public(), &send.hash())
        .expect("receive found");
    assert_eq!(found.hash(), open.hash());
}

// ── Work updates and pruning ────────────────────────────────────────────

#[test]
fn update_work_requires_higher_difficulty() {
    let ledger = test_ledger();
    let key = Keypair::generate();
    let send = genesis_send(
        &ledger,
        ledger.constants.genesis_hash(),
        GENESIS_AMOUNT,
        key.public(),
        100,
    );
    assert_eq!(process(&ledger, &send), BlockStatus::Progress);
    let root = send.root();
    let old_value = work_value(&root, send.work());
    // Find strictly better work
    let mut better = send.work().wrapping_add(1);
    while work_value(&root, better) <= old_value {
        better = better.wrapping_add(1);
    }
    assert!(!ledger.update_work(&send.hash(), send.work()));
    assert!(ledger.update_work(&send.hash(), better));
    let tx = ledger.store.tx_begin_read();
    assert_eq!(
        ledger.any().get_block(&tx, &send.hash()).unwrap().block.work(),
        better
    );
}

#[test]
fn pruning_walks_to_genesis() {
    let ledger = test_ledger();
    let key = Keypair::generate();
    let mut previous = ledger.constants.genesis_hash();
    let mut balance = GENESIS_AMOUNT;
    let mut sends = Vec::new();
    for amount in [10u128, 10, 10] {
        let send = genesis_send(&ledger, previous, balance, key.public(), amount);
        assert_eq!(process(&ledger, &send), BlockStatus::Progress);
        previous = send.hash();
        balance -= amount;
        sends.push(send);
    }
    {
        let tx = ledger.store.tx_begin_write(Writer::ConfirmationHeight);
        ledger.confirm(&tx, &sends[2].hash());
        tx.commit();
    }
    ledger.pruning.store(true, std::sync::atomic::Ordering::SeqCst);
    let tx = ledger.store.tx_begin_write(Writer::Pruning);
    // Prune everything below the frontier
    let pruned = ledger.pruning_action(&tx, &sends[1].hash(), 2);
    tx.commit();
    assert_eq!(pruned, 2);
    assert_eq!(ledger.pruned_count(), 2);
    let tx = ledger.store.tx_begin_read();
    for send in &sends[..2] {
        assert!(!ledger.confirmed().block_exists(&tx, &send.hash()));
        assert!(ledger.confirmed().block_exists_or_pruned(&tx, &send.hash()));
    }
    // The frontier and genesis stay
    assert!(ledger.confirmed().block_exists(&tx, &sends[2].hash()));
    assert!(ledger
        .confirmed()
        .block_exists(&tx, &ledger.constants.genesis_hash()));
    // Random sampling still produces a hash
    assert!(ledger.hash_root_random(&tx).is_some());
}

#[test]
fn weight_moves_on_representative_change() {
    let ledger = test_ledger();
    let rep = Keypair::generate();
    let genesis_account = ledger.constants.genesis_account;
    let change = builder::change()
        .previous(ledger.constants.genesis_hash())
        .representative(rep.public())
        .sign(genesis_key())
        .work_for(&ledger.constants.work)
        .build();
    assert_eq!(process(&ledger, &change), BlockStatus::Progress);
    assert_eq!(ledger.weight(&genesis_account), 0);
    assert_eq!(ledger.weight(&rep.public()), GENESIS_AMOUNT);
    // Cementing moves the weight from the overlay to the tables
    let tx = ledger.store.tx_begin_write(Writer::ConfirmationHeight);
    ledger.confirm(&tx, &change.hash());
    tx.commit();
    let tx = ledger.store.tx_begin_read();
    assert_eq!(ledger.weight(&rep.public()), GENESIS_AMOUNT);
    assert_eq!(ledger.weight_exact(&tx, &rep.public()), GENESIS_AMOUNT);
    assert_eq!(ledger.weight_exact(&tx, &genesis_account), 0);
}

#[test]
fn bootstrap_weights_apply_while_short() {
    let ledger = test_ledger();
    let rep = Keypair::generate();
    ledger
        .bootstrap_weights
        .lock()
        .unwrap()
        .insert(rep.public(), 12345);
    ledger
        .bootstrap_weight_max_blocks
        .store(1000, std::sync::atomic::Ordering::SeqCst);
    assert_eq!(ledger.weight(&rep.public()), 12345);
}
