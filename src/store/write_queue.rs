//! Writer-class queue serializing storage write transactions.
//!
//! Writers enqueue under a coarse class token and are granted access in
//! FIFO order, bounding head-of-line blocking between the block processor,
//! the cementation worker, and maintenance writers.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Coarse writer class, identifying who holds the write head.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Writer {
    BlockProcessor,
    ConfirmationHeight,
    Pruning,
    OnlineWeight,
    Generic,
}

struct QueueState {
    /// Waiting and active tickets, front is the active writer
    queue: VecDeque<(u64, Writer)>,
    next_ticket: u64,
}

/// FIFO ticket queue for write access.
pub struct WriteQueue {
    state: Mutex<QueueState>,
    condition: Condvar,
}

impl Default for WriteQueue {
    fn default() -> Self {
        WriteQueue {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                next_ticket: 0,
            }),
            condition: Condvar::new(),
        }
    }
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue under `writer` and block until at the head of the queue.
    pub fn wait(&self, writer: Writer) -> WriteGuard<'_> {
        let mut state = self.state.lock().expect("write queue lock poisoned");
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.queue.push_back((ticket, writer));
        while state.queue.front().map(|(t, _)| *t) != Some(ticket) {
            state = self
                .condition
                .wait(state)
                .expect("write queue lock poisoned");
        }
        WriteGuard {
            queue: self,
            ticket,
        }
    }

    /// Whether any queued or active writer has the given class.
    pub fn contains(&self, writer: Writer) -> bool {
        let state = self.state.lock().expect("write queue lock poisoned");
        state.queue.iter().any(|(_, w)| *w == writer)
    }

    /// Queued plus active writers.
    pub fn len(&self) -> usize {
        let state = self.state.lock().expect("write queue lock poisoned");
        state.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, ticket: u64) {
        let mut state = self.state.lock().expect("write queue lock poisoned");
        debug_assert_eq!(state.queue.front().map(|(t, _)| *t), Some(ticket));
        state.queue.retain(|(t, _)| *t != ticket);
        self.condition.notify_all();
    }
}

/// Held write access; releases the ticket on drop.
pub struct WriteGuard<'a> {
    queue: &'a WriteQueue,
    ticket: u64,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.queue.release(self.ticket);
    }
}
