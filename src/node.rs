//! Node orchestrator tying together the ledger, block processor,
//! confirming set, elections, scheduler, and bootstrap.
//!
//! The `Node` owns all subsystems, wires their observers, and dispatches
//! inbound network messages. Transport is abstracted: peers are
//! [`Channel`]s registered with the node's channel registry, and
//! [`connect`] builds in-process channel pairs for tests and local
//! clusters.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::block::Block;
use crate::broadcast::BlockBroadcast;
use crate::config::NodeConfig;
use crate::confirming_set::ConfirmingSet;
use crate::crypto::Keypair;
use crate::elections::{ActiveElections, VoteProcessor};
use crate::genesis::LedgerConstants;
use crate::ledger::{BlockStatus, Ledger};
use crate::network::{
    Channel, ChannelId, DropPolicy, Message, Network, NetworkFilter, RepCrawler, TrafficType,
};
use crate::processor::{BlockProcessor, BlockSource};
use crate::reps::OnlineReps;
use crate::scheduler::Scheduler;
use crate::stats::Stats;
use crate::store::{Store, Writer};
use crate::vote::Vote;
use crate::{bootstrap, Hash};

/// Peer channels known to one node; floods reach every registered channel.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: Mutex<Vec<Arc<dyn Channel>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, channel: Arc<dyn Channel>) {
        self.channels
            .lock()
            .expect("channel registry lock poisoned")
            .push(channel);
    }

    pub fn len(&self) -> usize {
        self.channels
            .lock()
            .expect("channel registry lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Network for ChannelRegistry {
    fn flood_message(&self, message: &Message, drop_policy: DropPolicy) {
        let channels: Vec<_> = self
            .channels
            .lock()
            .expect("channel registry lock poisoned")
            .clone();
        for channel in channels {
            channel.send(message, drop_policy, TrafficType::Generic);
        }
    }

    fn random_channels(&self, count: usize) -> Vec<Arc<dyn Channel>> {
        let channels = self
            .channels
            .lock()
            .expect("channel registry lock poisoned");
        channels.iter().take(count).cloned().collect()
    }
}

/// The node.
pub struct Node {
    pub config: NodeConfig,
    pub store: Arc<Store>,
    pub ledger: Arc<Ledger>,
    pub stats: Arc<Stats>,
    pub processor: Arc<BlockProcessor>,
    pub confirming_set: Arc<ConfirmingSet>,
    pub active: Arc<ActiveElections>,
    pub scheduler: Arc<Scheduler>,
    pub vote_processor: Arc<VoteProcessor>,
    pub online_reps: Arc<OnlineReps>,
    pub rep_crawler: RepCrawler,
    pub bootstrap: Arc<bootstrap::BootstrapAscending>,
    pub bootstrap_server: bootstrap::BootstrapServer,
    pub broadcast: Arc<BlockBroadcast>,
    pub network: Arc<ChannelRegistry>,
    pub filter: Arc<NetworkFilter>,
    /// Representatives this node votes with on confirmation requests
    local_reps: Mutex<Vec<Keypair>>,
}

impl Node {
    /// Build a node over a temporary database; the usual entry point for
    /// tests.
    pub fn new_temporary(config: NodeConfig, constants: LedgerConstants) -> Arc<Self> {
        let store = Arc::new(Store::open_temporary().expect("temporary store"));
        Self::with_store(store, config, constants)
    }

    /// Build a node over the database at `path`.
    pub fn new(path: &Path, config: NodeConfig, constants: LedgerConstants) -> Arc<Self> {
        let store = Arc::new(Store::open(path).expect("opening node database"));
        Self::with_store(store, config, constants)
    }

    pub fn with_store(
        store: Arc<Store>,
        config: NodeConfig,
        constants: LedgerConstants,
    ) -> Arc<Self> {
        let stats = Arc::new(Stats::new());
        let network = Arc::new(ChannelRegistry::new());
        let filter = Arc::new(NetworkFilter::new(1024 * 1024));
        let ledger = Arc::new(Ledger::new(store.clone(), constants, stats.clone()));
        let processor = BlockProcessor::new(
            ledger.clone(),
            config.block_processor.clone(),
            stats.clone(),
        );
        let confirming_set = ConfirmingSet::new(
            ledger.clone(),
            std::time::Duration::from_millis(config.confirming_set.batch_time_ms),
        );
        let online_reps = Arc::new(OnlineReps::new(
            ledger.clone(),
            config.online_weight.minimum,
            config.online_weight.quorum_percent,
        ));
        let active = ActiveElections::new(
            config.elections.clone(),
            ledger.clone(),
            confirming_set.clone(),
            online_reps.clone(),
            network.clone(),
            filter.clone(),
            stats.clone(),
        );
        let scheduler = Scheduler::new(ledger.clone(), active.clone(), stats.clone());
        let vote_processor = VoteProcessor::new(active.clone(), online_reps.clone(), stats.clone());
        let bootstrap = bootstrap::BootstrapAscending::new(
            config.bootstrap.clone(),
            ledger.clone(),
            processor.clone(),
            network.clone(),
            stats.clone(),
        );
        let bootstrap_server = bootstrap::BootstrapServer::new(ledger.clone(), stats.clone());
        let broadcast = BlockBroadcast::new(network.clone(), stats.clone(), true);

        broadcast.connect(&processor);
        bootstrap.connect(&processor);

        // Election lifecycle reacts to processing outcomes
        {
            let active = active.clone();
            let scheduler = scheduler.clone();
            let ledger = ledger.clone();
            processor.block_processed.add(move |(status, context)| {
                match status {
                    BlockStatus::Progress => {
                        // Cached votes may already decide this block
                        active.trigger_inactive(&context.block);
                        let tx = ledger.store.tx_begin_read();
                        if let Some(account) =
                            ledger.any().block_account(&tx, &context.block.hash())
                        {
                            scheduler.activate(
                                &tx,
                                &account,
                                context.source == BlockSource::Local,
                            );
                        }
                    }
                    BlockStatus::Fork => {
                        // Contest the position: an election between the
                        // ledger's block and the incoming fork
                        let existing = {
                            let tx = ledger.store.tx_begin_read();
                            ledger.forked_block(&tx, &context.block)
                        };
                        if let Some(existing) = existing {
                            active.insert(
                                &existing.block,
                                crate::elections::ElectionBehavior::Normal,
                                false,
                            );
                        }
                        active.publish(&context.block);
                    }
                    BlockStatus::Old => {
                        // A republish with more work restarts the election
                        active.restart(&context.block);
                    }
                    _ => {}
                }
            });
        }

        // Cementation drives the next dependent election. Weak handles:
        // the elections engine owns the confirming set, so its observers
        // must not own the engine back.
        {
            let active = Arc::downgrade(&active);
            let scheduler = Arc::downgrade(&scheduler);
            let ledger = ledger.clone();
            confirming_set.cemented_observers.add(move |block| {
                if let Some(active) = active.upgrade() {
                    active.notify_cemented(block);
                }
                if let Some(scheduler) = scheduler.upgrade() {
                    let tx = ledger.store.tx_begin_read();
                    scheduler.activate(&tx, &block.account(), false);
                    if let Some(destination) = block.destination() {
                        scheduler.activate(&tx, &destination, false);
                    }
                }
            });
        }

        Arc::new(Node {
            config,
            store,
            ledger,
            stats,
            processor,
            confirming_set,
            active,
            scheduler,
            vote_processor,
            online_reps,
            rep_crawler: RepCrawler::new(),
            bootstrap,
            bootstrap_server,
            broadcast,
            network,
            filter,
            local_reps: Mutex::new(Vec::new()),
        })
    }

    pub fn start(self: &Arc<Self>) {
        self.processor.start();
        self.confirming_set.start();
        self.active.start();
        self.scheduler.start();
        self.vote_processor.start();
    }

    /// Start the catch-up workers; separate from `start` because a node
    /// with no peers would spin its request loop.
    pub fn start_bootstrap(self: &Arc<Self>) {
        self.bootstrap.start();
    }

    pub fn stop(&self) {
        self.bootstrap.stop();
        self.scheduler.stop();
        self.active.stop();
        self.vote_processor.stop();
        self.processor.stop();
        self.confirming_set.stop();
    }

    /// Apply a block directly to the ledger, without observers. Setup
    /// path for tests and local tools.
    pub fn process(&self, block: &Block) -> BlockStatus {
        let tx = self.store.tx_begin_write(Writer::BlockProcessor);
        let status = self.ledger.process(&tx, block);
        tx.commit();
        status
    }

    /// Queue a block as realtime traffic.
    pub fn process_active(&self, block: Block) {
        self.processor.add(block, BlockSource::Live);
    }

    /// Queue a block created on this node.
    pub fn process_local(&self, block: Block) {
        self.processor.add(block, BlockSource::Local);
    }

    /// Stored block lookup through the best-known view.
    pub fn block(&self, hash: &Hash) -> Option<crate::block::SavedBlock> {
        let tx = self.store.tx_begin_read();
        self.ledger.any().get_block(&tx, hash)
    }

    pub fn latest(&self, account: &crate::Account) -> Hash {
        let tx = self.store.tx_begin_read();
        self.ledger
            .any()
            .head(&tx, account)
            .unwrap_or(crate::ZERO_HASH)
    }

    pub fn balance(&self, account: &crate::Account) -> crate::types::Amount {
        let tx = self.store.tx_begin_read();
        self.ledger.any().account_balance(&tx, account).unwrap_or(0)
    }

    /// Register a representative key this node votes with when asked.
    pub fn insert_representative(&self, keypair: Keypair) {
        self.online_reps.observe(&keypair.public());
        self.local_reps
            .lock()
            .expect("local reps lock poisoned")
            .push(keypair);
    }

    /// Dispatch one inbound message from `from`.
    pub fn inbound(&self, message: Message, from: &Arc<dyn Channel>) {
        match message {
            Message::Publish(block) => {
                // Exact duplicates are dropped; a republish with different
                // work serializes differently and passes
                if let Some(bytes) =
                    crate::network::encode_message(&Message::Publish(block.clone()))
                {
                    let (_, existed) = self.filter.apply(&bytes);
                    if existed {
                        return;
                    }
                }
                self.process_active(block);
            }
            Message::ConfirmReq { roots } => {
                let hashes = {
                    let tx = self.store.tx_begin_read();
                    roots
                        .iter()
                        .filter_map(|root| self.ledger.any().successor_by_root(&tx, root))
                        .collect::<Vec<_>>()
                };
                if hashes.is_empty() {
                    return;
                }
                let reps = self.local_reps.lock().expect("local reps lock poisoned");
                for keypair in reps.iter() {
                    let vote =
                        Vote::new(keypair, crate::milliseconds_since_epoch(), hashes.clone());
                    self.stats.inc(
                        crate::stats::StatType::Vote,
                        crate::stats::StatDetail::GenerateVote,
                    );
                    from.send(
                        &Message::Vote(vote),
                        DropPolicy::NoLimiterDrop,
                        TrafficType::Generic,
                    );
                }
            }
            Message::Vote(vote) => {
                self.vote_processor.vote(vote, Some(from.id()));
            }
            Message::AscPullReq(request) => {
                let ack = {
                    let tx = self.store.tx_begin_read();
                    self.bootstrap_server.process(&tx, &request)
                };
                if let Some(ack) = ack {
                    from.send(
                        &Message::AscPullAck(ack),
                        DropPolicy::NoLimiterDrop,
                        TrafficType::Bootstrap,
                    );
                }
            }
            Message::AscPullAck(ack) => {
                self.bootstrap.process(&ack);
            }
        }
    }
}

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// In-process channel delivering straight into a peer node on the
/// caller's thread.
pub struct InprocChannel {
    id: ChannelId,
    target: Weak<Node>,
    reverse: Mutex<Option<Arc<InprocChannel>>>,
}

impl InprocChannel {
    fn new(target: &Arc<Node>) -> Arc<Self> {
        Arc::new(InprocChannel {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            target: Arc::downgrade(target),
            reverse: Mutex::new(None),
        })
    }
}

impl Channel for InprocChannel {
    fn send(&self, message: &Message, _drop_policy: DropPolicy, _traffic: TrafficType) {
        let Some(node) = self.target.upgrade() else {
            return;
        };
        let reverse = self
            .reverse
            .lock()
            .expect("inproc channel lock poisoned")
            .clone();
        if let Some(reverse) = reverse {
            let reverse: Arc<dyn Channel> = reverse;
            node.inbound(message.clone(), &reverse);
        }
    }

    fn is_full(&self, _traffic: TrafficType) -> bool {
        false
    }

    fn id(&self) -> ChannelId {
        self.id
    }
}

/// Wire two nodes with a bidirectional in-process channel pair, returning
/// (a's channel to b, b's channel to a).
pub fn connect(a: &Arc<Node>, b: &Arc<Node>) -> (Arc<InprocChannel>, Arc<InprocChannel>) {
    let a_to_b = InprocChannel::new(b);
    let b_to_a = InprocChannel::new(a);
    *a_to_b.reverse.lock().expect("inproc channel lock poisoned") = Some(b_to_a.clone());
    *b_to_a.reverse.lock().expect("inproc channel lock poisoned") = Some(a_to_b.clone());
    a.network.add(a_to_b.clone());
    b.network.add(b_to_a.clone());
    (a_to_b, b_to_a)
}
