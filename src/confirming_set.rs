//! Durable FIFO of block hashes queued for cementation.
//!
//! Hashes land in a `front` tree; a dedicated worker swaps `front` and
//! `back` and drains the back buffer through [`Ledger::confirm`] in
//! batched write transactions under the confirmation-height writer class.
//! Both trees live in the node database, so a crash between queueing and
//! cementation is resolved by re-running the drain at startup: `confirm`
//! is idempotent for already-cemented hashes.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::block::SavedBlock;
use crate::ledger::Ledger;
use crate::observer::ObserverSet;
use crate::store::Writer;
use crate::Hash;

struct SetState {
    front: sled::Tree,
    back: sled::Tree,
    dirty: bool,
    stopped: bool,
}

/// Set of blocks to be durably confirmed.
pub struct ConfirmingSet {
    ledger: Arc<Ledger>,
    batch_time: Duration,
    state: Mutex<SetState>,
    condition: Condvar,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    /// Called once the ledger has marked blocks as confirmed
    pub cemented_observers: ObserverSet<SavedBlock>,
    /// Called for queued hashes that were already cemented
    pub block_already_cemented_observers: ObserverSet<Hash>,
}

impl ConfirmingSet {
    pub fn new(ledger: Arc<Ledger>, batch_time: Duration) -> Arc<Self> {
        let front = ledger
            .store
            .open_tree("confirming_front")
            .expect("confirming set front tree");
        let back = ledger
            .store
            .open_tree("confirming_back")
            .expect("confirming set back tree");
        // Entries surviving a restart are drained immediately
        let dirty = !front.is_empty() || !back.is_empty();
        Arc::new(ConfirmingSet {
            ledger,
            batch_time,
            state: Mutex::new(SetState {
                front,
                back,
                dirty,
                stopped: false,
            }),
            condition: Condvar::new(),
            thread: Mutex::new(None),
            cemented_observers: ObserverSet::new(),
            block_already_cemented_observers: ObserverSet::new(),
        })
    }

    /// Queue a block for cementation and wake the worker.
    pub fn add(&self, hash: &Hash) {
        let mut state = self.state.lock().expect("confirming set lock poisoned");
        if let Err(e) = state.front.insert(hash, &[][..]) {
            tracing::error!("fatal storage error queueing confirmation: {e}");
            panic!("fatal storage error queueing confirmation: {e}");
        }
        state.dirty = true;
        self.condition.notify_all();
    }

    /// Whether `hash` is still queued in either buffer.
    pub fn exists(&self, hash: &Hash) -> bool {
        let state = self.state.lock().expect("confirming set lock poisoned");
        state.front.contains_key(hash).unwrap_or(false)
            || state.back.contains_key(hash).unwrap_or(false)
    }

    pub fn size(&self) -> usize {
        let state = self.state.lock().expect("confirming set lock poisoned");
        state.front.len() + state.back.len()
    }

    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("confirming set".into())
            .spawn(move || this.run())
            .expect("spawning confirming set worker");
        *self.thread.lock().expect("confirming set thread lock") = Some(handle);
    }

    pub fn stop(&self) {
        {
            let mut state = self.state.lock().expect("confirming set lock poisoned");
            state.stopped = true;
            self.condition.notify_all();
        }
        if let Some(handle) = self
            .thread
            .lock()
            .expect("confirming set thread lock")
            .take()
        {
            let _ = handle.join();
        }
    }

    fn run(&self) {
        loop {
            let back = {
                let mut state = self.state.lock().expect("confirming set lock poisoned");
                while !state.stopped && !state.dirty {
                    state = self
                        .condition
                        .wait(state)
                        .expect("confirming set lock poisoned");
                }
                if state.stopped {
                    return;
                }
                // Swap buffers; new additions accumulate in the fresh front
                let state = &mut *state;
                std::mem::swap(&mut state.front, &mut state.back);
                state.dirty = false;
                state.back.clone()
            };
            self.drain(&back);
        }
    }

    /// Cement every hash in `back`, batching by time under one write
    /// transaction each round, then drop the buffer.
    fn drain(&self, back: &sled::Tree) {
        let mut cemented: Vec<SavedBlock> = Vec::new();
        let mut already: Vec<Hash> = Vec::new();
        let mut iter = back.iter();
        let mut exhausted = false;
        while !exhausted && !self.stopped() {
            let tx = self
                .ledger
                .store
                .tx_begin_write(Writer::ConfirmationHeight);
            let deadline = Instant::now() + self.batch_time;
            loop {
                if Instant::now() >= deadline {
                    break;
                }
                match iter.next() {
                    Some(Ok((key, _))) => {
                        let hash: Hash = key.as_ref().try_into().expect("malformed queued hash");
                        let added = self.ledger.confirm(&tx, &hash);
                        if added.is_empty() {
                            already.push(hash);
                        } else {
                            cemented.extend(added);
                        }
                    }
                    Some(Err(e)) => {
                        tracing::error!("fatal storage error draining confirmations: {e}");
                        panic!("fatal storage error draining confirmations: {e}");
                    }
                    None => {
                        exhausted = true;
                        break;
                    }
                }
            }
            tx.commit();
        }
        for block in &cemented {
            self.cemented_observers.notify(block);
        }
        for hash in &already {
            self.block_already_cemented_observers.notify(hash);
        }
        if let Err(e) = back.clear() {
            tracing::error!("fatal storage error clearing confirmation buffer: {e}");
            panic!("fatal storage error clearing confirmation buffer: {e}");
        }
    }

    fn stopped(&self) -> bool {
        self.state
            .lock()
            .expect("confirming set lock poisoned")
            .stopped
    }
}

impl Drop for ConfirmingSet {
    fn drop(&mut self) {
        debug_assert!(self
            .thread
            .lock()
            .map(|guard| guard.is_none())
            .unwrap_or(true));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::LedgerConstants;
    use crate::stats::Stats;
    use crate::store::Store;

    fn test_ledger() -> Arc<Ledger> {
        let store = Arc::new(Store::open_temporary().expect("temporary store"));
        Arc::new(Ledger::new(
            store,
            LedgerConstants::dev(),
            Arc::new(Stats::new()),
        ))
    }

    #[test]
    fn add_and_exists() {
        let ledger = test_ledger();
        let set = ConfirmingSet::new(ledger, Duration::from_millis(500));
        let hash = [7u8; 32];
        assert!(!set.exists(&hash));
        set.add(&hash);
        assert!(set.exists(&hash));
        assert_eq!(set.size(), 1);
    }

    #[test]
    fn already_cemented_notifies() {
        let ledger = test_ledger();
        let genesis_hash = ledger.constants.genesis_hash();
        let set = ConfirmingSet::new(ledger, Duration::from_millis(100));
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            set.block_already_cemented_observers.add(move |hash| {
                seen.lock().unwrap().push(*hash);
            });
        }
        set.start();
        set.add(&genesis_hash);
        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().unwrap().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        set.stop();
        assert_eq!(*seen.lock().unwrap(), vec![genesis_hash]);
        assert_eq!(set.size(), 0);
    }
}
