//! Queued, signature-checked vote ingestion.
//!
//! Votes from the network land in a bounded queue; a dedicated worker
//! verifies signatures, marks representatives online, and hands the vote
//! to the elections engine.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::elections::ActiveElections;
use crate::network::ChannelId;
use crate::reps::OnlineReps;
use crate::stats::{StatDetail, StatType, Stats};
use crate::vote::{Vote, VoteCode};
use crate::Hash;

const MAX_QUEUE: usize = 65_536;

struct QueueState {
    queue: VecDeque<(Vote, Option<ChannelId>)>,
    stopped: bool,
    /// Whether the worker is between pop and apply; flush waits on this too
    busy: bool,
}

pub struct VoteProcessor {
    active: Arc<ActiveElections>,
    online_reps: Arc<OnlineReps>,
    stats: Arc<Stats>,
    state: Mutex<QueueState>,
    condition: Condvar,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl VoteProcessor {
    pub fn new(
        active: Arc<ActiveElections>,
        online_reps: Arc<OnlineReps>,
        stats: Arc<Stats>,
    ) -> Arc<Self> {
        Arc::new(VoteProcessor {
            active,
            online_reps,
            stats,
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                stopped: false,
                busy: false,
            }),
            condition: Condvar::new(),
            thread: Mutex::new(None),
        })
    }

    /// Enqueue a vote for asynchronous processing. Overflow drops the vote.
    pub fn vote(&self, vote: Vote, channel: Option<ChannelId>) {
        let mut state = self.state.lock().expect("vote processor lock poisoned");
        if state.queue.len() >= MAX_QUEUE {
            self.stats.inc(StatType::Vote, StatDetail::Overflow);
            return;
        }
        state.queue.push_back((vote, channel));
        self.condition.notify_all();
    }

    /// Verify and apply a vote on the caller's thread.
    pub fn vote_blocking(&self, vote: &Vote) -> std::collections::HashMap<Hash, VoteCode> {
        if !vote.verify() {
            self.stats.inc(StatType::Vote, StatDetail::VoteInvalid);
            return Default::default();
        }
        self.stats.inc(StatType::Vote, StatDetail::VoteProcessed);
        self.online_reps.observe(&vote.voter);
        self.active.vote(vote)
    }

    /// Wait until every queued vote has been applied.
    pub fn flush(&self) {
        let mut state = self.state.lock().expect("vote processor lock poisoned");
        while !state.stopped && (!state.queue.is_empty() || state.busy) {
            let (next, _) = self
                .condition
                .wait_timeout(state, std::time::Duration::from_millis(10))
                .expect("vote processor lock poisoned");
            state = next;
        }
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .expect("vote processor lock poisoned")
            .queue
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("vote processing".into())
            .spawn(move || this.run())
            .expect("spawning vote processor");
        *self.thread.lock().expect("vote processor thread lock") = Some(handle);
    }

    pub fn stop(&self) {
        {
            let mut state = self.state.lock().expect("vote processor lock poisoned");
            state.stopped = true;
            self.condition.notify_all();
        }
        if let Some(handle) = self
            .thread
            .lock()
            .expect("vote processor thread lock")
            .take()
        {
            let _ = handle.join();
        }
    }

    fn run(&self) {
        loop {
            let vote = {
                let mut state = self.state.lock().expect("vote processor lock poisoned");
                while !state.stopped && state.queue.is_empty() {
                    state = self
                        .condition
                        .wait(state)
                        .expect("vote processor lock poisoned");
                }
                if state.stopped {
                    return;
                }
                let item = state.queue.pop_front();
                state.busy = item.is_some();
                item
            };
            if let Some((vote, _channel)) = vote {
                self.vote_blocking(&vote);
            }
            let mut state = self.state.lock().expect("vote processor lock poisoned");
            state.busy = false;
            self.condition.notify_all();
        }
    }
}
