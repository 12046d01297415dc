//! Per-sender reassembly of inbound frames into whole actions.
//!
//! The backend delivers one sender's frames in send order within the total
//! order, so each sender has at most one action in flight and reassembly is
//! a straight append. Anything out of sequence means the sender aborted the
//! action (a failed send, a crash) and the partial is dropped.

use gcs_proto::MAX_ACTION_SIZE;
use gcs_proto::types::{ActionId, ActionType, MemberId};
use gcs_proto::wire::Frame;
use std::collections::HashMap;
use tracing::warn;

pub struct Partial {
    pub action_id: ActionId,
    pub action_type: ActionType,
    pub total_size: u64,
    pub frag_count: u32,
    pub next_index: u32,
    pub buf: Vec<u8>,
}

/// A whole action handed downstream by the defragmenter.
pub struct Assembled {
    pub action_id: ActionId,
    pub action_type: ActionType,
    pub payload: Vec<u8>,
}

#[derive(Default)]
pub struct Defrag {
    partial: HashMap<MemberId, Partial>,
}

impl Defrag {
    pub fn new() -> Self {
        Defrag::default()
    }

    /// Feeds one frame; returns the whole action once its last fragment is
    /// in. Frames that break the per-sender sequence drop the current
    /// partial and, when they open a new action, start it.
    pub fn feed(&mut self, sender: &MemberId, frame: Frame) -> Option<Assembled> {
        if frame.total_size > MAX_ACTION_SIZE as u64 {
            // Bounds reassembly memory per sender; a conforming sender
            // rejects such actions before fragmenting.
            warn!(%sender, total_size = frame.total_size, "action over size limit, dropping");
            self.partial.remove(sender);
            return None;
        }
        if frame.is_whole() {
            if self.partial.remove(sender).is_some() {
                warn!(%sender, action_id = %frame.action_id, "partial action aborted by new action");
            }
            if frame.payload.len() as u64 != frame.total_size {
                warn!(%sender, "whole frame size mismatch, dropping");
                return None;
            }
            return Some(Assembled {
                action_id: frame.action_id,
                action_type: frame.action_type,
                payload: frame.payload,
            });
        }

        match self.partial.get_mut(sender) {
            Some(partial) if partial.action_id == frame.action_id => {
                if frame.frag_index != partial.next_index
                    || frame.frag_count != partial.frag_count
                    || frame.total_size != partial.total_size
                    || partial.buf.len() + frame.payload.len() > partial.total_size as usize
                {
                    warn!(%sender, action_id = %frame.action_id, "fragment sequence broken, dropping partial");
                    self.partial.remove(sender);
                    return None;
                }
                partial.buf.extend_from_slice(&frame.payload);
                partial.next_index += 1;
                if partial.next_index == partial.frag_count {
                    let partial = self.partial.remove(sender).unwrap();
                    if partial.buf.len() as u64 != partial.total_size {
                        warn!(%sender, "assembled size mismatch, dropping");
                        return None;
                    }
                    return Some(Assembled {
                        action_id: partial.action_id,
                        action_type: partial.action_type,
                        payload: partial.buf,
                    });
                }
                None
            }
            _ => {
                if self.partial.remove(sender).is_some() {
                    warn!(%sender, "partial action superseded, dropping");
                }
                if frame.frag_index != 0 {
                    warn!(%sender, action_id = %frame.action_id, frag_index = frame.frag_index,
                          "mid-action fragment without a start, dropping");
                    return None;
                }
                self.partial.insert(
                    sender.clone(),
                    Partial {
                        action_id: frame.action_id,
                        action_type: frame.action_type,
                        total_size: frame.total_size,
                        frag_count: frame.frag_count,
                        next_index: 1,
                        buf: frame.payload,
                    },
                );
                None
            }
        }
    }

    /// Drops every partial, returning `(sender, action_id)` of each so the
    /// caller can fail its own aborted replication requests. Reassembly
    /// never crosses a view boundary.
    pub fn drop_all(&mut self) -> Vec<(MemberId, ActionId)> {
        self.partial
            .drain()
            .map(|(sender, partial)| (sender, partial.action_id))
            .collect()
    }
}
