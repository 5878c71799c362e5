//! Gossip policy for newly accepted blocks, keyed on source.

use std::sync::Arc;

use crate::ledger::BlockStatus;
use crate::network::{DropPolicy, Network};
use crate::processor::{BlockContext, BlockProcessor, BlockSource};
use crate::stats::{StatDetail, StatType, Stats};

/// Flood policy applied after block acceptance: local blocks get an
/// aggressive initial flood, realtime blocks normal limited gossip, and
/// bootstrapped blocks are not rebroadcast at all.
pub struct BlockBroadcast {
    network: Arc<dyn Network>,
    stats: Arc<Stats>,
    enabled: bool,
}

impl BlockBroadcast {
    pub fn new(network: Arc<dyn Network>, stats: Arc<Stats>, enabled: bool) -> Arc<Self> {
        Arc::new(BlockBroadcast {
            network,
            stats,
            enabled,
        })
    }

    /// Subscribe to the processor's results.
    pub fn connect(self: &Arc<Self>, processor: &BlockProcessor) {
        if !self.enabled {
            return;
        }
        let this = Arc::clone(self);
        processor.block_processed.add(move |(status, context)| {
            if *status == BlockStatus::Progress {
                this.observe(context);
            }
        });
    }

    fn observe(&self, context: &BlockContext) {
        match context.source {
            BlockSource::Local => {
                // Block created on this node: aggressive initial flooding
                self.network.flood_block_initial(&context.block);
                self.stats.inc(StatType::Broadcast, StatDetail::Blocks);
            }
            BlockSource::Live | BlockSource::Election => {
                self.network
                    .flood_block(&context.block, DropPolicy::Limiter);
                self.stats.inc(StatType::Broadcast, StatDetail::Blocks);
            }
            BlockSource::Bootstrap | BlockSource::BootstrapLegacy => {
                // Don't rebroadcast blocks we are catching up on
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::builder;
    use crate::network::{Channel, LoopbackChannel, Message};
    use std::sync::Mutex;

    /// Network flooding into a single loopback channel.
    struct SingleChannelNetwork {
        channel: Arc<LoopbackChannel>,
        initial_floods: Mutex<u32>,
    }

    impl Network for SingleChannelNetwork {
        fn flood_message(&self, message: &Message, _drop_policy: DropPolicy) {
            self.channel.send(
                message,
                DropPolicy::Limiter,
                crate::network::TrafficType::Generic,
            );
        }

        fn flood_block_initial(&self, block: &crate::block::Block) {
            *self.initial_floods.lock().unwrap() += 1;
            self.flood_message(&Message::Publish(block.clone()), DropPolicy::NoLimiterDrop);
        }

        fn random_channels(&self, _count: usize) -> Vec<Arc<dyn Channel>> {
            vec![self.channel.clone()]
        }
    }

    #[test]
    fn source_policies() {
        let channel = LoopbackChannel::new(1);
        let network = Arc::new(SingleChannelNetwork {
            channel: channel.clone(),
            initial_floods: Mutex::new(0),
        });
        let broadcast = BlockBroadcast::new(network.clone(), Arc::new(Stats::new()), true);
        let block = builder::change().previous([1u8; 32]).build();

        let context = |source| BlockContext {
            block: block.clone(),
            source,
        };
        broadcast.observe(&context(BlockSource::Local));
        assert_eq!(*network.initial_floods.lock().unwrap(), 1);
        assert_eq!(channel.len(), 1);
        broadcast.observe(&context(BlockSource::Live));
        assert_eq!(channel.len(), 2);
        broadcast.observe(&context(BlockSource::Bootstrap));
        broadcast.observe(&context(BlockSource::BootstrapLegacy));
        assert_eq!(channel.len(), 2);
    }
}
