//! Ascending bootstrap: account-prioritized pull-based catch-up.
//!
//! Worker threads pick prioritized accounts, pull their chains from peers
//! through tagged requests, and feed replies to the block processor.
//! Processing feedback adapts priorities: progress rewards an account,
//! a missing source gates it, stale replies decay it. A timeout worker
//! evicts tags whose replies never arrived.

pub mod account_sets;
pub mod server;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::block::Block;
use crate::config::BootstrapConfig;
use crate::ledger::{BlockStatus, Ledger};
use crate::network::{
    AscPullAck, AscPullAckPayload, AscPullReq, AscPullReqPayload, Channel, DropPolicy, HashType,
    Message, Network, TrafficType,
};
use crate::processor::{BlockProcessor, BlockSource};
use crate::stats::{StatDetail, StatType, Stats};
use crate::store::Transaction;
use crate::{is_zero, Account, Hash};

pub use account_sets::{AccountSets, AccountSetsConfig};
pub use server::BootstrapServer;

/// An outstanding pull request.
#[derive(Clone, Debug)]
pub struct AsyncTag {
    pub id: u64,
    pub start: Hash,
    pub start_type: HashType,
    pub time: Instant,
    pub account: Account,
}

/// Per-account request/stale counters kept for prioritization diagnostics.
#[derive(Clone, Copy, Debug, Default)]
pub struct AccountStat {
    pub old: u64,
    pub request: u64,
}

struct BootstrapState {
    accounts: AccountSets,
    tags: HashMap<u64, AsyncTag>,
    tag_order: VecDeque<u64>,
    account_stats: HashMap<Account, AccountStat>,
}

pub struct BootstrapAscending {
    config: BootstrapConfig,
    ledger: Arc<Ledger>,
    processor: Arc<BlockProcessor>,
    network: Arc<dyn Network>,
    stats: Arc<Stats>,
    state: Mutex<BootstrapState>,
    condition: Condvar,
    stopped: AtomicBool,
    threads: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl BootstrapAscending {
    pub fn new(
        config: BootstrapConfig,
        ledger: Arc<Ledger>,
        processor: Arc<BlockProcessor>,
        network: Arc<dyn Network>,
        stats: Arc<Stats>,
    ) -> Arc<Self> {
        let accounts = AccountSets::new(
            AccountSetsConfig {
                priorities_max: config.priorities_max,
                consideration_count: config.consideration_count,
            },
            stats.clone(),
        );
        Arc::new(BootstrapAscending {
            config,
            ledger,
            processor,
            network,
            stats,
            state: Mutex::new(BootstrapState {
                accounts,
                tags: HashMap::new(),
                tag_order: VecDeque::new(),
                account_stats: HashMap::new(),
            }),
            condition: Condvar::new(),
            stopped: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Subscribe to block-processor feedback; call once at wiring time.
    /// The observer holds a weak handle so processor and bootstrap do not
    /// keep each other alive.
    pub fn connect(self: &Arc<Self>, processor: &BlockProcessor) {
        let weak = Arc::downgrade(self);
        processor.block_processed.add(move |(status, context)| {
            if let Some(this) = weak.upgrade() {
                let tx = this.ledger.store.tx_begin_read();
                this.inspect(&tx, *status, &context.block);
            }
        });
    }

    pub fn start(self: &Arc<Self>) {
        let mut threads = self.threads.lock().expect("bootstrap threads lock");
        debug_assert!(threads.is_empty());
        for _ in 0..self.config.threads {
            let this = Arc::clone(self);
            threads.push(
                std::thread::Builder::new()
                    .name("ascending boot".into())
                    .spawn(move || this.run())
                    .expect("spawning bootstrap worker"),
            );
        }
        let this = Arc::clone(self);
        threads.push(
            std::thread::Builder::new()
                .name("ascending boot".into())
                .spawn(move || this.run_timeouts())
                .expect("spawning bootstrap timeout worker"),
        );
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.condition.notify_all();
        let mut threads = self.threads.lock().expect("bootstrap threads lock");
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
    }

    pub fn priority_size(&self) -> usize {
        self.state
            .lock()
            .expect("bootstrap lock poisoned")
            .accounts
            .priority_size()
    }

    pub fn blocked_size(&self) -> usize {
        self.state
            .lock()
            .expect("bootstrap lock poisoned")
            .accounts
            .blocked_size()
    }

    pub fn tags_size(&self) -> usize {
        self.state
            .lock()
            .expect("bootstrap lock poisoned")
            .tags
            .len()
    }

    pub fn priority_up(&self, account: &Account) {
        let mut state = self.state.lock().expect("bootstrap lock poisoned");
        state.accounts.priority_up(account);
    }

    pub fn priority_down(&self, account: &Account) {
        let mut state = self.state.lock().expect("bootstrap lock poisoned");
        state.accounts.priority_down(account);
    }

    pub fn account_stat(&self, account: &Account) -> AccountStat {
        self.state
            .lock()
            .expect("bootstrap lock poisoned")
            .account_stats
            .get(account)
            .copied()
            .unwrap_or_default()
    }

    /// Adapt account priorities from a block-processing outcome.
    pub fn inspect(&self, tx: &dyn Transaction, status: BlockStatus, block: &Block) {
        let hash = block.hash();
        match status {
            BlockStatus::Progress => {
                let Some(saved) = self.ledger.any().get_block(tx, &hash) else {
                    return;
                };
                let account = saved.account();
                let mut state = self.state.lock().expect("bootstrap lock poisoned");
                // Any inserted block clears the account's gate and raises it
                state.accounts.unblock(&account, None);
                state.accounts.priority_up(&account);
                if saved.is_send() {
                    if let Some(destination) = saved.destination() {
                        // The destination can now receive; unblock it against
                        // this send specifically
                        state.accounts.unblock(&destination, Some(hash));
                        state.accounts.priority_up(&destination);
                    }
                }
            }
            BlockStatus::GapSource => {
                let previous = block.previous();
                let account = if is_zero(&previous) {
                    block.account_field().unwrap_or([0u8; 32])
                } else {
                    self.ledger
                        .any()
                        .block_account(tx, &previous)
                        .unwrap_or([0u8; 32])
                };
                if is_zero(&account) {
                    return;
                }
                let source = block
                    .source_field()
                    .or_else(|| block.link_field())
                    .unwrap_or(crate::ZERO_HASH);
                let mut state = self.state.lock().expect("bootstrap lock poisoned");
                state.accounts.block(&account, source);
            }
            BlockStatus::Old => {
                let Some(account) = self.ledger.any().block_account(tx, &hash) else {
                    return;
                };
                let mut state = self.state.lock().expect("bootstrap lock poisoned");
                state.accounts.priority_dec(&account);
                state.account_stats.entry(account).or_default().old += 1;
            }
            _ => {
                // gap_previous and the rest carry no priority signal
            }
        }
    }

    /// Handle a pull reply. Replies with no matching tag are ignored.
    pub fn process(&self, ack: &AscPullAck) {
        let tag = {
            let mut state = self.state.lock().expect("bootstrap lock poisoned");
            match state.tags.remove(&ack.id) {
                Some(tag) => {
                    state.tag_order.retain(|id| *id != ack.id);
                    tag
                }
                None => {
                    self.stats
                        .inc(StatType::BootstrapAscending, StatDetail::MissingTag);
                    return;
                }
            }
        };
        self.condition.notify_all();
        match &ack.payload {
            AscPullAckPayload::Blocks(blocks) => self.process_blocks(blocks, &tag),
            AscPullAckPayload::AccountInfo(_) | AscPullAckPayload::Frontiers(_) => {}
        }
    }

    fn process_blocks(&self, blocks: &[Block], tag: &AsyncTag) {
        self.stats
            .inc(StatType::BootstrapAscending, StatDetail::Reply);
        if blocks.is_empty() {
            self.priority_down(&tag.account);
            return;
        }
        if !verify_chain(blocks, tag) {
            self.stats
                .inc(StatType::BootstrapAscending, StatDetail::BadSender);
            return;
        }
        self.stats.add(
            StatType::BootstrapAscending,
            StatDetail::Blocks,
            blocks.len() as u64,
        );
        for block in blocks {
            self.processor.add(block.clone(), BlockSource::Bootstrap);
        }
    }

    fn run(&self) {
        while !self.stopped.load(Ordering::SeqCst) {
            self.stats.inc(StatType::BootstrapAscending, StatDetail::Loop);
            self.request_one();
        }
    }

    fn request_one(&self) {
        // Soft backpressure: keep the processor below its watermark
        self.wait_blockprocessor();
        // Throttle in-flight requests
        self.wait_available_request();
        let Some(channel) = self.wait_available_channel() else {
            return;
        };
        let Some(account) = self.wait_available_account() else {
            return;
        };
        self.request(account, channel);
    }

    fn wait_blockprocessor(&self) {
        while !self.stopped.load(Ordering::SeqCst) && self.processor.half_full() {
            // The processor drains slowly; sleeping beats a condition here
            std::thread::sleep(Duration::from_millis(500));
        }
    }

    fn wait_available_request(&self) {
        let mut state = self.state.lock().expect("bootstrap lock poisoned");
        while !self.stopped.load(Ordering::SeqCst) && state.tags.len() >= self.config.requests_max {
            let (next, _) = self
                .condition
                .wait_timeout(state, Duration::from_millis(100))
                .expect("bootstrap lock poisoned");
            state = next;
        }
    }

    fn wait_available_channel(&self) -> Option<Arc<dyn Channel>> {
        while !self.stopped.load(Ordering::SeqCst) {
            let channels = self.network.random_channels(32);
            for channel in channels {
                if !channel.is_full(TrafficType::Bootstrap) {
                    return Some(channel);
                }
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        None
    }

    fn wait_available_account(&self) -> Option<Account> {
        while !self.stopped.load(Ordering::SeqCst) {
            {
                let mut state = self.state.lock().expect("bootstrap lock poisoned");
                if let Some(account) = state.accounts.random(&self.ledger) {
                    state.account_stats.entry(account).or_default().request += 1;
                    return Some(account);
                }
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        None
    }

    fn request(&self, account: Account, channel: Arc<dyn Channel>) {
        // Resume from the frontier when the account has local blocks
        let tx = self.ledger.store.tx_begin_read();
        let (start, start_type) = match self.ledger.any().get_account(&tx, &account) {
            Some(info) => (info.head, HashType::Block),
            None => (account, HashType::Account),
        };
        drop(tx);
        let tag = AsyncTag {
            id: rand::Rng::gen(&mut rand::thread_rng()),
            start,
            start_type,
            time: Instant::now(),
            account,
        };
        self.track(tag.clone());
        let request = AscPullReq {
            id: tag.id,
            payload: AscPullReqPayload::Blocks {
                start,
                start_type,
                count: self.config.pull_count,
            },
        };
        self.stats
            .inc(StatType::BootstrapAscending, StatDetail::Request);
        channel.send(
            &Message::AscPullReq(request),
            DropPolicy::NoLimiterDrop,
            TrafficType::Bootstrap,
        );
    }

    fn track(&self, tag: AsyncTag) {
        self.stats
            .inc(StatType::BootstrapAscending, StatDetail::Track);
        let mut state = self.state.lock().expect("bootstrap lock poisoned");
        state.tag_order.push_back(tag.id);
        state.tags.insert(tag.id, tag);
    }

    fn run_timeouts(&self) {
        while !self.stopped.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_secs(1));
            let timeout = Duration::from_millis(self.config.timeout_ms);
            {
                let mut state = self.state.lock().expect("bootstrap lock poisoned");
                while let Some(front) = state.tag_order.front().copied() {
                    let expired = state
                        .tags
                        .get(&front)
                        .map(|tag| tag.time.elapsed() > timeout)
                        .unwrap_or(true);
                    if !expired {
                        break;
                    }
                    state.tag_order.pop_front();
                    state.tags.remove(&front);
                    self.stats
                        .inc(StatType::BootstrapAscending, StatDetail::Timeout);
                }
            }
            self.condition.notify_all();
        }
    }
}

/// Verify a pull reply chains correctly from the requested start.
fn verify_chain(blocks: &[Block], tag: &AsyncTag) -> bool {
    let Some(first) = blocks.first() else {
        return false;
    };
    // The start must match by hash, or by account for open/state heads
    let head_matches =
        first.hash() == tag.start || first.account_field() == Some(tag.start);
    if !head_matches {
        return false;
    }
    let mut previous = first.hash();
    for block in &blocks[1..] {
        if block.previous() != previous {
            return false;
        }
        previous = block.hash();
    }
    true
}
