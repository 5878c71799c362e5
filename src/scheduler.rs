//! Election activation driven by cementation progress and vacancy.
//!
//! For each account, the next block above the confirmation height becomes
//! an election candidate once its dependencies are cemented. Activations
//! queue here and a worker feeds them to the elections engine while
//! vacancy is positive; wallet-local activations bypass the vacancy gate.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::block::Block;
use crate::elections::{ActiveElections, ElectionBehavior};
use crate::ledger::Ledger;
use crate::stats::{StatDetail, StatType, Stats};
use crate::store::Transaction;
use crate::Account;

struct SchedulerState {
    queue: VecDeque<(Block, bool)>,
    stopped: bool,
}

pub struct Scheduler {
    ledger: Arc<Ledger>,
    active: Arc<ActiveElections>,
    stats: Arc<Stats>,
    state: Mutex<SchedulerState>,
    condition: Condvar,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(ledger: Arc<Ledger>, active: Arc<ActiveElections>, stats: Arc<Stats>) -> Arc<Self> {
        let scheduler = Arc::new(Scheduler {
            ledger,
            active,
            stats,
            state: Mutex::new(SchedulerState {
                queue: VecDeque::new(),
                stopped: false,
            }),
            condition: Condvar::new(),
            thread: Mutex::new(None),
        });
        // Fresh vacancy wakes the worker
        {
            let weak = Arc::downgrade(&scheduler);
            scheduler.active.set_vacancy_update(move || {
                if let Some(scheduler) = weak.upgrade() {
                    scheduler.notify();
                }
            });
        }
        scheduler
    }

    /// Queue the next unconfirmed block of `account` for election, if one
    /// exists and its dependencies are cemented.
    pub fn activate(&self, tx: &dyn Transaction, account: &Account, is_local: bool) -> bool {
        let Some(info) = self.ledger.any().get_account(tx, account) else {
            return false;
        };
        let conf_height = self
            .ledger
            .store
            .confirmation_height
            .get(tx, account)
            .map(|info| info.height)
            .unwrap_or(0);
        if info.block_count <= conf_height {
            return false;
        }
        let next_hash = if conf_height == 0 {
            info.open_block
        } else {
            let frontier = self
                .ledger
                .store
                .confirmation_height
                .get(tx, account)
                .map(|info| info.frontier)
                .unwrap_or(crate::ZERO_HASH);
            match self.ledger.any().successor_by_hash(tx, &frontier) {
                Some(successor) => successor,
                None => return false,
            }
        };
        let Some(block) = self.ledger.any().get_block(tx, &next_hash) else {
            return false;
        };
        if !self.ledger.dependents_confirmed(tx, &block) {
            return false;
        }
        if self.active.active(&block.block) {
            return false;
        }
        let mut state = self.state.lock().expect("scheduler lock poisoned");
        if state
            .queue
            .iter()
            .any(|(queued, _)| queued.hash() == next_hash)
        {
            return false;
        }
        state.queue.push_back((block.block, is_local));
        self.stats.inc(StatType::Election, StatDetail::Prioritize);
        self.condition.notify_all();
        true
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .expect("scheduler lock poisoned")
            .queue
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wake the worker, typically on a vacancy edge.
    pub fn notify(&self) {
        self.condition.notify_all();
    }

    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("election scheduler".into())
            .spawn(move || this.run())
            .expect("spawning election scheduler");
        *self.thread.lock().expect("scheduler thread lock") = Some(handle);
    }

    pub fn stop(&self) {
        {
            let mut state = self.state.lock().expect("scheduler lock poisoned");
            state.stopped = true;
            self.condition.notify_all();
        }
        if let Some(handle) = self.thread.lock().expect("scheduler thread lock").take() {
            let _ = handle.join();
        }
    }

    fn run(&self) {
        loop {
            let item = {
                let mut state = self.state.lock().expect("scheduler lock poisoned");
                loop {
                    if state.stopped {
                        return;
                    }
                    // Local activations bypass the vacancy gate
                    let front_is_local =
                        state.queue.front().map(|(_, local)| *local).unwrap_or(false);
                    if !state.queue.is_empty() && (self.active.vacancy() > 0 || front_is_local) {
                        break;
                    }
                    let (next, _) = self
                        .condition
                        .wait_timeout(state, std::time::Duration::from_millis(100))
                        .expect("scheduler lock poisoned");
                    state = next;
                }
                state.queue.pop_front()
            };
            if let Some((block, is_local)) = item {
                self.active
                    .insert(&block, ElectionBehavior::Normal, is_local);
            }
        }
    }
}
