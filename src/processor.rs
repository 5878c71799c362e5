//! The block processor: queued admission of blocks into the ledger.
//!
//! Blocks from every source (live gossip, local submission, bootstrap,
//! election publishing) funnel through one bounded queue drained by a
//! dedicated worker, which applies batches under a single write
//! transaction and reports each outcome to observers.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::block::Block;
use crate::config::BlockProcessorConfig;
use crate::ledger::{BlockStatus, Ledger};
use crate::observer::ObserverSet;
use crate::stats::{StatDetail, StatType, Stats};
use crate::store::Writer;

/// Where a block entered the node; gossip and admission policy key on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockSource {
    /// Realtime network traffic
    Live,
    /// Created on this node
    Local,
    /// Ascending bootstrap
    Bootstrap,
    /// Legacy bulk-pull bootstrap
    BootstrapLegacy,
    /// Republished by an election
    Election,
}

/// A queued block with its provenance.
#[derive(Clone, Debug)]
pub struct BlockContext {
    pub block: Block,
    pub source: BlockSource,
}

struct ProcessorState {
    queue: VecDeque<BlockContext>,
    stopped: bool,
    /// Worker is applying a batch; flush waits for this too
    busy: bool,
}

pub struct BlockProcessor {
    ledger: Arc<Ledger>,
    config: BlockProcessorConfig,
    stats: Arc<Stats>,
    state: Mutex<ProcessorState>,
    condition: Condvar,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    /// Notified with every processing outcome, after the batch commits
    pub block_processed: ObserverSet<(BlockStatus, BlockContext)>,
}

impl BlockProcessor {
    pub fn new(ledger: Arc<Ledger>, config: BlockProcessorConfig, stats: Arc<Stats>) -> Arc<Self> {
        Arc::new(BlockProcessor {
            ledger,
            config,
            stats,
            state: Mutex::new(ProcessorState {
                queue: VecDeque::new(),
                stopped: false,
                busy: false,
            }),
            condition: Condvar::new(),
            thread: Mutex::new(None),
            block_processed: ObserverSet::new(),
        })
    }

    /// Queue a block. Non-local blocks are dropped when the queue is at
    /// bound; locally created blocks always enter.
    pub fn add(&self, block: Block, source: BlockSource) -> bool {
        let mut state = self.state.lock().expect("block processor lock poisoned");
        if state.queue.len() >= self.config.max_queue && source != BlockSource::Local {
            self.stats
                .inc(StatType::BlockProcessor, StatDetail::Overflow);
            return false;
        }
        state.queue.push_back(BlockContext { block, source });
        self.condition.notify_all();
        true
    }

    /// Soft backpressure signal for bootstrap.
    pub fn half_full(&self) -> bool {
        self.len() >= self.config.max_queue / 2
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .expect("block processor lock poisoned")
            .queue
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until every queued block has been applied and reported.
    pub fn flush(&self) {
        let mut state = self.state.lock().expect("block processor lock poisoned");
        while !state.stopped && (!state.queue.is_empty() || state.busy) {
            let (next, _) = self
                .condition
                .wait_timeout(state, std::time::Duration::from_millis(10))
                .expect("block processor lock poisoned");
            state = next;
        }
    }

    /// Apply a single block synchronously, bypassing the queue. Intended
    /// for tests and startup seeding.
    pub fn process_blocking(&self, block: &Block, source: BlockSource) -> BlockStatus {
        let tx = self.ledger.store.tx_begin_write(Writer::BlockProcessor);
        let status = self.ledger.process(&tx, block);
        tx.commit();
        drop(tx);
        self.count_result(status);
        self.block_processed.notify(&(
            status,
            BlockContext {
                block: block.clone(),
                source,
            },
        ));
        status
    }

    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("block processing".into())
            .spawn(move || this.run())
            .expect("spawning block processor");
        *self.thread.lock().expect("block processor thread lock") = Some(handle);
    }

    pub fn stop(&self) {
        {
            let mut state = self.state.lock().expect("block processor lock poisoned");
            state.stopped = true;
            self.condition.notify_all();
        }
        if let Some(handle) = self
            .thread
            .lock()
            .expect("block processor thread lock")
            .take()
        {
            let _ = handle.join();
        }
    }

    fn run(&self) {
        loop {
            let batch = {
                let mut state = self.state.lock().expect("block processor lock poisoned");
                while !state.stopped && state.queue.is_empty() {
                    state = self
                        .condition
                        .wait(state)
                        .expect("block processor lock poisoned");
                }
                if state.stopped {
                    return;
                }
                let take = state.queue.len().min(self.config.batch_max);
                let batch: Vec<BlockContext> = state.queue.drain(..take).collect();
                state.busy = true;
                batch
            };
            let mut results = Vec::with_capacity(batch.len());
            {
                let tx = self.ledger.store.tx_begin_write(Writer::BlockProcessor);
                for context in batch {
                    let status = self.ledger.process(&tx, &context.block);
                    self.count_result(status);
                    results.push((status, context));
                }
                tx.commit();
            }
            for result in &results {
                self.block_processed.notify(result);
            }
            let mut state = self.state.lock().expect("block processor lock poisoned");
            state.busy = false;
            self.condition.notify_all();
        }
    }

    fn count_result(&self, status: BlockStatus) {
        let detail = match status {
            BlockStatus::Progress => StatDetail::Progress,
            BlockStatus::Old => StatDetail::Old,
            BlockStatus::Fork => StatDetail::Fork,
            BlockStatus::GapPrevious => StatDetail::GapPrevious,
            BlockStatus::GapSource => StatDetail::GapSource,
            BlockStatus::BadSignature => StatDetail::BadSignature,
            BlockStatus::InsufficientWork => StatDetail::InsufficientWork,
            _ => StatDetail::Other,
        };
        self.stats.inc(StatType::BlockProcessor, detail);
    }
}
