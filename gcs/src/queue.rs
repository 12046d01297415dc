//! Bounded handoff from the delivery worker to `recv`.

use crate::action::Action;
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

struct QueueState {
    items: VecDeque<Action>,
    closed: bool,
}

pub struct RecvQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl RecvQueue {
    /// Starts closed; [`RecvQueue::reopen`] arms it when the connection
    /// opens, so `recv` on a never-opened connection reports end-of-stream
    /// instead of blocking.
    pub fn new(capacity: usize) -> Self {
        RecvQueue {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: true,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Blocks while the queue is full. The flow controller pauses the group
    /// well before that, so blocking here is the last resort against an
    /// applier that stopped entirely.
    pub fn push(&self, action: Action) -> Result<()> {
        let mut state = self.state.lock();
        while state.items.len() >= self.capacity && !state.closed {
            self.not_full.wait(&mut state);
        }
        if state.closed {
            return Err(Error::Closed);
        }
        state.items.push_back(action);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocks while empty. After close the remaining items drain in order,
    /// then every call reports end-of-stream.
    pub fn pop(&self) -> Result<Action> {
        let mut state = self.state.lock();
        loop {
            if let Some(action) = state.items.pop_front() {
                self.not_full.notify_one();
                return Ok(action);
            }
            if state.closed {
                return Err(Error::Closed);
            }
            self.not_empty.wait(&mut state);
        }
    }

    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Re-arms the queue for a fresh open, discarding anything left from the
    /// previous session.
    pub fn reopen(&self) {
        let mut state = self.state.lock();
        state.items.clear();
        state.closed = false;
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }
}
