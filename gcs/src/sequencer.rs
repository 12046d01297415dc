//! Global and local sequence number assignment.

use gcs_proto::types::{ActionType, Seqno};

/// Advanced by the delivery worker only. The global counter follows the
/// totally ordered stream and is therefore identical on every node; the
/// local counter is this node's gapless delivery position.
pub struct Sequencer {
    global: Seqno,
    local: Seqno,
}

impl Sequencer {
    pub fn new() -> Self {
        Sequencer {
            global: Seqno::NIL,
            local: Seqno::NIL,
        }
    }

    /// Aligns the global counter with a configuration's quorum seqno.
    pub fn set_global(&mut self, seqno: Seqno) {
        self.global = seqno;
    }

    /// Assigns seqnos to a delivered action. Ordered kinds advance the
    /// global counter only inside a primary configuration; everything
    /// delivered to the application advances the local counter.
    pub fn assign(&mut self, action_type: ActionType, in_primary: bool) -> (Seqno, Seqno) {
        let global = if action_type.is_ordered() && in_primary {
            self.global = self.global.next();
            self.global
        } else {
            Seqno::ILL
        };
        self.local = self.local.next();
        (global, self.local)
    }

    /// Advances only the local counter, for library actions with no global
    /// position (CONF, JOIN, SYNC).
    pub fn next_local(&mut self) -> Seqno {
        self.local = self.local.next();
        self.local
    }

    pub fn global(&self) -> Seqno {
        self.global
    }

    pub fn local(&self) -> Seqno {
        self.local
    }
}
