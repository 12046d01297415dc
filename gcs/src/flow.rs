//! Flow control between the group and a slow local applier.
//!
//! The lag is the number of ordered actions this node has delivered but the
//! application has not yet reported applied. Crossing the high watermark
//! pauses the group with a FLOW broadcast, dropping to the low watermark
//! resumes it. Delivered FLOW actions maintain a per-member pause set; the
//! `wait` predicate reads it without blocking.

use gcs_proto::types::{MemberId, Seqno};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Result of the `wait` predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    /// No member is paused; proceed.
    Ok,
    /// A slow queue exists somewhere in the group; defer submissions.
    Defer,
}

pub struct FlowControl {
    low: i64,
    high: i64,
    /// Highest global seqno delivered toward the application.
    delivered: AtomicI64,
    /// Highest global seqno the application reported applied.
    applied: AtomicI64,
    self_paused: AtomicBool,
    paused: Mutex<HashSet<MemberId>>,
    my_id: Mutex<Option<MemberId>>,
}

impl FlowControl {
    pub fn new(low: usize, high: usize) -> Self {
        FlowControl {
            low: low as i64,
            high: high as i64,
            delivered: AtomicI64::new(Seqno::NIL.0),
            applied: AtomicI64::new(Seqno::NIL.0),
            self_paused: AtomicBool::new(false),
            paused: Mutex::new(HashSet::new()),
            my_id: Mutex::new(None),
        }
    }

    pub fn set_member_id(&self, id: MemberId) {
        *self.my_id.lock() = Some(id);
    }

    /// Clears all state for a fresh open.
    pub fn reset(&self) {
        self.delivered.store(Seqno::NIL.0, Ordering::Relaxed);
        self.applied.store(Seqno::NIL.0, Ordering::Relaxed);
        self.self_paused.store(false, Ordering::Relaxed);
        self.paused.lock().clear();
        *self.my_id.lock() = None;
    }

    fn lag(&self) -> i64 {
        self.delivered.load(Ordering::Relaxed) - self.applied.load(Ordering::Relaxed)
    }

    /// Records an ordered delivery. Returns `true` when the node just went
    /// over the high watermark and must broadcast a pause.
    pub fn note_delivered(&self, global: Seqno) -> bool {
        if !global.is_legal() {
            return false;
        }
        self.delivered.fetch_max(global.0, Ordering::Relaxed);
        if self.lag() >= self.high && !self.self_paused.swap(true, Ordering::Relaxed) {
            self.mark_self(true);
            return true;
        }
        false
    }

    /// Records applier progress. Returns `true` when the node just dropped
    /// to the low watermark and must broadcast a resume.
    pub fn note_applied(&self, seqno: Seqno) -> bool {
        self.applied.fetch_max(seqno.0, Ordering::Relaxed);
        if self.lag() <= self.low
            && self.self_paused.load(Ordering::Relaxed)
            && self.self_paused.swap(false, Ordering::Relaxed)
        {
            self.mark_self(false);
            return true;
        }
        false
    }

    fn mark_self(&self, pause: bool) {
        let my_id = self.my_id.lock();
        if let Some(id) = my_id.as_ref() {
            let mut paused = self.paused.lock();
            if pause {
                paused.insert(id.clone());
            } else {
                paused.remove(id);
            }
        }
    }

    /// Applies a delivered FLOW action.
    pub fn on_flow(&self, member: &MemberId, pause: bool) {
        let mut paused = self.paused.lock();
        if pause {
            paused.insert(member.clone());
        } else {
            paused.remove(member);
        }
    }

    /// Resets the pause set at a configuration change. FLOW messages are not
    /// idempotent across views, so each node re-derives its own status from
    /// scratch; returns `true` when this node is still paused and must
    /// re-announce.
    pub fn reset_members(&self) -> bool {
        self.paused.lock().clear();
        if self.self_paused.load(Ordering::Relaxed) {
            self.mark_self(true);
            true
        } else {
            false
        }
    }

    pub fn status(&self) -> FlowStatus {
        if self.paused.lock().is_empty() {
            FlowStatus::Ok
        } else {
            FlowStatus::Defer
        }
    }

    pub fn last_applied(&self) -> Seqno {
        Seqno(self.applied.load(Ordering::Relaxed))
    }

    pub fn paused_members(&self) -> usize {
        self.paused.lock().len()
    }
}
