//! Outbound fragmentation.

use crate::error::{Error, Result};
use gcs_proto::MAX_ACTION_SIZE;
use gcs_proto::types::{ActionId, ActionType};
use gcs_proto::wire::{FRAME_OVERHEAD, Frame};

/// Smallest packet size that leaves room for one payload byte.
pub const MIN_PKT_SIZE: usize = FRAME_OVERHEAD + 1;

/// Splits an action into encoded frames, each no larger than `pkt_size`.
///
/// A zero-length action still produces one frame so receivers observe it.
/// The frames must be handed to the backend back-to-back under the sender
/// lock; the backend's total order then keeps them contiguous per sender.
pub fn fragment(
    action_id: ActionId,
    action_type: ActionType,
    payload: &[u8],
    pkt_size: usize,
) -> Result<Vec<Vec<u8>>> {
    if pkt_size < MIN_PKT_SIZE {
        return Err(Error::BadPacketSize(pkt_size));
    }
    if payload.len() > MAX_ACTION_SIZE {
        return Err(Error::PayloadTooLarge(payload.len()));
    }
    let budget = pkt_size - FRAME_OVERHEAD;
    let frag_count = payload.len().div_ceil(budget).max(1);
    let frag_count = u32::try_from(frag_count)
        .map_err(|_| Error::BadPacketSize(pkt_size))?;

    let mut frames = Vec::with_capacity(frag_count as usize);
    let mut chunks = payload.chunks(budget);
    for frag_index in 0..frag_count {
        let chunk = chunks.next().unwrap_or(&[]);
        let frame = Frame {
            action_id,
            frag_index,
            frag_count,
            action_type,
            total_size: payload.len() as u64,
            payload: chunk.to_vec(),
        };
        frames.push(frame.to_bytes()?);
    }
    Ok(frames)
}
