//! Network boundary: wire message definitions and the traits the engine
//! uses to reach the transport.
//!
//! The actual socket layer is an external collaborator. The engine talks
//! to it through [`Channel`] (one peer) and [`Network`] (flooding and peer
//! selection); tests wire [`LoopbackChannel`]s directly between nodes.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::types::{Amount, QualifiedRoot};
use crate::vote::Vote;
use crate::{Account, Hash};

/// Identifies a peer channel within this process.
pub type ChannelId = u64;

/// Whether `start` names a block hash or an account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashType {
    Block,
    Account,
}

/// Targeted pull request of the ascending bootstrap protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AscPullReq {
    pub id: u64,
    pub payload: AscPullReqPayload,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AscPullReqPayload {
    /// Chain pull: up to `count` blocks starting at `start`, following
    /// successor links
    Blocks {
        start: Hash,
        start_type: HashType,
        count: u8,
    },
    /// Account metadata probe
    AccountInfo { target: Hash, target_type: HashType },
    /// Ordered account frontiers from `start`
    Frontiers { start: Account, count: u16 },
}

/// Reply matched to a pull request by `id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AscPullAck {
    pub id: u64,
    pub payload: AscPullAckPayload,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AscPullAckPayload {
    /// Ordered chain; the first block matches the requested start, each
    /// later block's previous is its predecessor's hash
    Blocks(Vec<Block>),
    AccountInfo(AccountInfoAck),
    Frontiers(Vec<(Account, Hash)>),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfoAck {
    pub account: Account,
    pub account_open: Hash,
    pub account_head: Hash,
    pub account_block_count: u64,
    pub account_conf_frontier: Hash,
    pub account_conf_height: u64,
}

/// Network protocol messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Gossip a block
    Publish(Block),
    /// Ask representatives to vote on contested roots
    ConfirmReq { roots: Vec<QualifiedRoot> },
    /// A representative's vote over a list of block hashes
    Vote(Vote),
    AscPullReq(AscPullReq),
    AscPullAck(AscPullAck),
}

/// Size-limited bincode config used for both serialization and
/// deserialization.
fn bincode_config() -> bincode::config::Configuration<
    bincode::config::LittleEndian,
    bincode::config::Fixint,
    bincode::config::Limit<{ 16 * 1024 * 1024 }>,
> {
    bincode::config::legacy().with_limit::<{ 16 * 1024 * 1024 }>()
}

/// Serialize a message with a u32 length prefix.
pub fn encode_message(message: &Message) -> Option<Vec<u8>> {
    let payload = bincode::serde::encode_to_vec(message, bincode_config()).ok()?;
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    Some(out)
}

/// Deserialize a message from bytes (after length prefix).
pub fn decode_message(data: &[u8]) -> Option<Message> {
    if data.len() < 4 {
        return None;
    }
    let len = u32::from_le_bytes(data[..4].try_into().ok()?) as usize;
    if data.len() < 4 + len {
        return None;
    }
    let (message, _) =
        bincode::serde::decode_from_slice(&data[4..4 + len], bincode_config()).ok()?;
    Some(message)
}

/// Backpressure hint attached to an outbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropPolicy {
    /// May be dropped under limiter pressure
    Limiter,
    /// Bypass the limiter, deliver if at all possible
    NoLimiterDrop,
}

/// Traffic class for per-channel bandwidth accounting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrafficType {
    Generic,
    Bootstrap,
}

/// One peer connection.
pub trait Channel: Send + Sync {
    fn send(&self, message: &Message, drop_policy: DropPolicy, traffic: TrafficType);
    /// Whether the channel is over its bandwidth cap for `traffic`.
    fn is_full(&self, traffic: TrafficType) -> bool;
    fn id(&self) -> ChannelId;
}

/// The peer set as the engine sees it.
pub trait Network: Send + Sync {
    fn flood_message(&self, message: &Message, drop_policy: DropPolicy);
    /// Sample peers for targeted requests.
    fn random_channels(&self, count: usize) -> Vec<Arc<dyn Channel>>;

    /// Normal gossip of a block.
    fn flood_block(&self, block: &Block, drop_policy: DropPolicy) {
        self.flood_message(&Message::Publish(block.clone()), drop_policy);
    }

    /// Aggressive initial flood for locally created blocks.
    fn flood_block_initial(&self, block: &Block) {
        self.flood_message(&Message::Publish(block.clone()), DropPolicy::NoLimiterDrop);
    }
}

/// A network with no peers; flooding is a no-op.
#[derive(Default)]
pub struct NullNetwork;

impl Network for NullNetwork {
    fn flood_message(&self, _message: &Message, _drop_policy: DropPolicy) {}

    fn random_channels(&self, _count: usize) -> Vec<Arc<dyn Channel>> {
        Vec::new()
    }
}

/// In-process channel collecting sent messages, for tests and loopback
/// wiring.
pub struct LoopbackChannel {
    id: ChannelId,
    queue: Mutex<VecDeque<Message>>,
}

impl LoopbackChannel {
    pub fn new(id: ChannelId) -> Arc<Self> {
        Arc::new(LoopbackChannel {
            id,
            queue: Mutex::new(VecDeque::new()),
        })
    }

    /// Take the oldest sent message, if any.
    pub fn take(&self) -> Option<Message> {
        self.queue.lock().expect("loopback lock poisoned").pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("loopback lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Channel for LoopbackChannel {
    fn send(&self, message: &Message, _drop_policy: DropPolicy, _traffic: TrafficType) {
        self.queue
            .lock()
            .expect("loopback lock poisoned")
            .push_back(message.clone());
    }

    fn is_full(&self, _traffic: TrafficType) -> bool {
        false
    }

    fn id(&self) -> ChannelId {
        self.id
    }
}

/// Duplicate-suppression filter over message serializations. Elections
/// clear entries when a candidate loses or an election drops so the
/// network may re-present the block.
pub struct NetworkFilter {
    digests: Mutex<HashSet<u128>>,
    capacity: usize,
}

impl NetworkFilter {
    pub fn new(capacity: usize) -> Self {
        NetworkFilter {
            digests: Mutex::new(HashSet::new()),
            capacity,
        }
    }

    /// Digest of a serialization.
    pub fn hash(bytes: &[u8]) -> u128 {
        let digest = crate::hash_concat(&[b"weave.filter", bytes]);
        u128::from_le_bytes(digest[..16].try_into().expect("digest shorter than 16 bytes"))
    }

    /// Record `bytes`; returns (digest, whether it was already present).
    pub fn apply(&self, bytes: &[u8]) -> (u128, bool) {
        let digest = Self::hash(bytes);
        let mut digests = self.digests.lock().expect("filter lock poisoned");
        if digests.len() >= self.capacity {
            digests.clear();
        }
        let existed = !digests.insert(digest);
        (digest, existed)
    }

    pub fn clear(&self, digest: u128) {
        self.digests
            .lock()
            .expect("filter lock poisoned")
            .remove(&digest);
    }

    /// Forget a block's publish serialization.
    pub fn clear_block(&self, block: &Block) {
        if let Some(bytes) = encode_message(&Message::Publish(block.clone())) {
            self.clear(Self::hash(&bytes));
        }
    }

    /// Whether a block's publish serialization is currently filtered.
    pub fn check_block(&self, block: &Block) -> bool {
        match encode_message(&Message::Publish(block.clone())) {
            Some(bytes) => {
                let digest = Self::hash(&bytes);
                self.digests
                    .lock()
                    .expect("filter lock poisoned")
                    .contains(&digest)
            }
            None => false,
        }
    }
}

/// Weight-bearing peers observed by the rep crawler. Tests seed this map
/// directly; production fills it from vote traffic.
#[derive(Default)]
pub struct RepCrawler {
    pub probable_reps: Mutex<Vec<(Account, Amount, ChannelId)>>,
}

impl RepCrawler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, representative: Account, weight: Amount, channel: ChannelId) {
        self.probable_reps
            .lock()
            .expect("rep crawler lock poisoned")
            .push((representative, weight, channel));
    }

    pub fn representative_count(&self) -> usize {
        self.probable_reps
            .lock()
            .expect("rep crawler lock poisoned")
            .len()
    }
}
