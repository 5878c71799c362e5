//! Ascending-bootstrap integration tests: the request loop against a
//! loopback peer, priority feedback from block processing, reply
//! verification, and tag timeouts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use weave::block::{builder, Block};
use weave::config::NodeConfig;
use weave::constants::GENESIS_AMOUNT;
use weave::crypto::Keypair;
use weave::genesis::{LedgerConstants, DEV_GENESIS_KEY};
use weave::ledger::BlockStatus;
use weave::network::{AscPullAck, AscPullAckPayload, LoopbackChannel, Message};
use weave::node::{connect, Node};
use weave::stats::{StatDetail, StatType};

// ── Helpers ─────────────────────────────────────────────────────────────

fn assert_timely(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("condition not met within {timeout:?}");
}

fn dev_node() -> Arc<Node> {
    Node::new_temporary(NodeConfig::dev(), LedgerConstants::dev())
}

fn genesis_send(
    node: &Node,
    previous: weave::Hash,
    balance: u128,
    destination: weave::Account,
    amount: u128,
) -> Block {
    builder::send()
        .previous(previous)
        .destination(destination)
        .balance(balance - amount)
        .sign(&DEV_GENESIS_KEY)
        .work_for(&node.ledger.constants.work)
        .build()
}

/// Grow `node`'s ledger with `count` accounts, each funded and opened.
fn populate(node: &Node, count: usize) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut previous = node.ledger.constants.genesis_hash();
    let mut balance = GENESIS_AMOUNT;
    for _ in 0..count {
        let key = Keypair::generate();
        let send = genesis_send(node, previous, balance, key.public(), 1000);
        previous = send.hash();
        balance -= 1000;
        let open = builder::state()
            .account(key.public())
            .representative(key.public())
            .balance(1000)
            .link(send.hash())
            .sign(&key)
            .work_for(&node.ledger.constants.work)
            .build();
        assert_eq!(node.process(&send), BlockStatus::Progress);
        assert_eq!(node.process(&open), BlockStatus::Progress);
        blocks.push(send);
        blocks.push(open);
    }
    blocks
}

// ── End-to-end catch-up ─────────────────────────────────────────────────

#[test]
fn catches_up_from_peer() {
    let server = dev_node();
    let blocks = populate(&server, 4);
    let target = server.ledger.block_count();
    assert_eq!(target, 1 + blocks.len() as u64);

    let client = dev_node();
    connect(&client, &server);
    client.start();
    client.start_bootstrap();

    assert_timely(Duration::from_secs(15), || {
        client.ledger.block_count() >= target
    });
    // Every served block is now known to the client
    let tx = client.store.tx_begin_read();
    for block in &blocks {
        assert!(client.ledger.any().block_exists(&tx, &block.hash()));
    }
    drop(tx);
    assert!(client.stats.count(StatType::BootstrapAscending, StatDetail::Reply) > 0);
    assert_eq!(
        client
            .stats
            .count(StatType::BootstrapAscending, StatDetail::BadSender),
        0
    );
    client.stop();
}

// ── Priority feedback ───────────────────────────────────────────────────

#[test]
fn inspect_progress_rewards_accounts() {
    let node = dev_node();
    let key = Keypair::generate();
    let send = genesis_send(
        &node,
        node.ledger.constants.genesis_hash(),
        GENESIS_AMOUNT,
        key.public(),
        100,
    );
    assert_eq!(node.process(&send), BlockStatus::Progress);
    let tx = node.store.tx_begin_read();
    node.bootstrap.inspect(&tx, BlockStatus::Progress, &send);
    drop(tx);
    // Both the sender and the receiving account gained priority
    assert_eq!(node.bootstrap.priority_size(), 2);
    assert!(
        node.stats.count(
            StatType::BootstrapAscendingAccounts,
            StatDetail::Prioritize
        ) >= 2
    );
}

#[test]
fn inspect_gap_source_blocks_account() {
    let node = dev_node();
    let key = Keypair::generate();
    // An open whose source this node has never seen
    let missing_source = [42u8; 32];
    let open = builder::open()
        .source(missing_source)
        .representative(key.public())
        .account(key.public())
        .sign(&key)
        .work_for(&node.ledger.constants.work)
        .build();
    assert_eq!(node.process(&open), BlockStatus::GapSource);
    let tx = node.store.tx_begin_read();
    node.bootstrap.inspect(&tx, BlockStatus::GapSource, &open);
    drop(tx);
    assert_eq!(node.bootstrap.blocked_size(), 1);
    // The dependency is released by exactly the matching send; feedback
    // from an inserted send unblocks through `inspect`
    node.bootstrap.priority_up(&key.public());
    assert_eq!(node.bootstrap.priority_size(), 0);
}

#[test]
fn inspect_old_decays_priority() {
    let node = dev_node();
    let key = Keypair::generate();
    let send = genesis_send(
        &node,
        node.ledger.constants.genesis_hash(),
        GENESIS_AMOUNT,
        key.public(),
        100,
    );
    assert_eq!(node.process(&send), BlockStatus::Progress);
    let genesis_account = node.ledger.constants.genesis_account;
    node.bootstrap.priority_up(&genesis_account);
    node.bootstrap.priority_up(&genesis_account);
    let tx = node.store.tx_begin_read();
    node.bootstrap.inspect(&tx, BlockStatus::Old, &send);
    drop(tx);
    assert_eq!(node.bootstrap.account_stat(&genesis_account).old, 1);
    assert!(node.bootstrap.priority_size() <= 1);
}

// ── Reply verification ──────────────────────────────────────────────────

#[test]
fn bad_sender_reply_is_dropped() {
    let client = dev_node();
    // Swallow requests so tags stay pending until we answer by hand
    let sink = LoopbackChannel::new(99);
    client.network.add(sink.clone());
    client.start();
    client.start_bootstrap();

    // Wait for a pull request to land in the sink
    let mut request_id = None;
    assert_timely(Duration::from_secs(10), || {
        while let Some(message) = sink.take() {
            if let Message::AscPullReq(request) = message {
                request_id = Some(request.id);
                return true;
            }
        }
        false
    });
    // Answer with a block that matches neither the start nor a chain
    let bogus = builder::change().previous([9u8; 32]).build();
    client.bootstrap.process(&AscPullAck {
        id: request_id.expect("request captured"),
        payload: AscPullAckPayload::Blocks(vec![bogus]),
    });
    assert_eq!(
        client
            .stats
            .count(StatType::BootstrapAscending, StatDetail::BadSender),
        1
    );
    // Unknown ids are counted separately and otherwise ignored
    client.bootstrap.process(&AscPullAck {
        id: 0xdead_beef,
        payload: AscPullAckPayload::Blocks(vec![]),
    });
    assert_eq!(
        client
            .stats
            .count(StatType::BootstrapAscending, StatDetail::MissingTag),
        1
    );
    client.stop();
}

#[test]
fn empty_reply_decays_account() {
    let client = dev_node();
    let sink = LoopbackChannel::new(7);
    client.network.add(sink.clone());
    client.start();
    client.start_bootstrap();

    let mut request_id = None;
    assert_timely(Duration::from_secs(10), || {
        while let Some(message) = sink.take() {
            if let Message::AscPullReq(request) = message {
                request_id = Some(request.id);
                return true;
            }
        }
        false
    });
    client.bootstrap.process(&AscPullAck {
        id: request_id.expect("request captured"),
        payload: AscPullAckPayload::Blocks(vec![]),
    });
    assert!(client.stats.count(StatType::BootstrapAscending, StatDetail::Reply) >= 1);
    client.stop();
}

// ── Timeouts ────────────────────────────────────────────────────────────

#[test]
fn stale_tags_time_out() {
    let mut config = NodeConfig::dev();
    config.bootstrap.timeout_ms = 200;
    config.bootstrap.requests_max = 2;
    let client = Node::new_temporary(config, LedgerConstants::dev());
    // The sink never answers, so every tag must expire
    let sink = LoopbackChannel::new(5);
    client.network.add(sink.clone());
    client.start();
    client.start_bootstrap();

    assert_timely(Duration::from_secs(10), || {
        client
            .stats
            .count(StatType::BootstrapAscending, StatDetail::Timeout)
            >= 2
    });
    assert!(client.bootstrap.tags_size() <= 2);
    client.stop();
}
