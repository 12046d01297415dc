//! Matching delivered actions against outstanding local send requests.
//!
//! Each blocking `repl` (and state transfer request) registers a waiter
//! keyed by its action id. The delivery worker completes the waiter when the
//! node's own action comes back in the ordered stream; the request call then
//! returns the delivery's seqnos instead of the action going through the
//! receive queue.

use crate::error::Error;
use gcs_proto::types::{ActionId, Seqno};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;

/// Result of a completed blocking replication call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplTicket {
    pub size: usize,
    pub global_seqno: Seqno,
    pub local_seqno: Seqno,
}

/// Result of a completed state transfer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransfer {
    /// Index of the selected donor in the current configuration.
    pub donor_idx: u32,
    /// Order position of the request. The requester must not apply its own
    /// request and resumes applying at `local_seqno + 1` once the transfer
    /// completes.
    pub local_seqno: Seqno,
}

/// What a waiter is completed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Ordered {
        global: Seqno,
        local: Seqno,
    },
    Donor {
        donor_idx: u32,
        global: Seqno,
        local: Seqno,
    },
}

enum WaitState {
    Pending,
    Done(Completion),
    Failed(Error),
}

pub struct Waiter {
    state: Mutex<WaitState>,
    cond: Condvar,
}

impl Waiter {
    fn new() -> Self {
        Waiter {
            state: Mutex::new(WaitState::Pending),
            cond: Condvar::new(),
        }
    }

    /// Blocks until the delivery worker settles this request.
    pub fn wait(&self) -> Result<Completion, Error> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                WaitState::Pending => self.cond.wait(&mut state),
                WaitState::Done(completion) => return Ok(*completion),
                WaitState::Failed(err) => return Err(err.clone()),
            }
        }
    }

    fn settle(&self, outcome: Result<Completion, Error>) {
        let mut state = self.state.lock();
        if matches!(*state, WaitState::Pending) {
            *state = match outcome {
                Ok(completion) => WaitState::Done(completion),
                Err(err) => WaitState::Failed(err),
            };
            self.cond.notify_all();
        }
    }
}

/// The outstanding-send table.
#[derive(Default)]
pub struct SendTable {
    inner: Mutex<HashMap<ActionId, Arc<Waiter>>>,
}

impl SendTable {
    pub fn new() -> Self {
        SendTable::default()
    }

    pub fn register(&self, id: ActionId) -> Arc<Waiter> {
        let waiter = Arc::new(Waiter::new());
        self.inner.lock().insert(id, Arc::clone(&waiter));
        waiter
    }

    /// Removes a request that never made it onto the wire.
    pub fn unregister(&self, id: ActionId) {
        self.inner.lock().remove(&id);
    }

    /// Completes the waiter for `id`, if any. Returns whether one existed;
    /// `false` means the action was a plain `send` and belongs in the
    /// receive queue.
    pub fn complete(&self, id: ActionId, completion: Completion) -> bool {
        match self.inner.lock().remove(&id) {
            Some(waiter) => {
                waiter.settle(Ok(completion));
                true
            }
            None => false,
        }
    }

    pub fn fail(&self, id: ActionId, err: Error) -> bool {
        match self.inner.lock().remove(&id) {
            Some(waiter) => {
                waiter.settle(Err(err));
                true
            }
            None => false,
        }
    }

    /// Fails every outstanding request, e.g. on loss of the primary
    /// component or on close.
    pub fn fail_all(&self, err: Error) {
        for (_, waiter) in self.inner.lock().drain() {
            waiter.settle(Err(err.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}
