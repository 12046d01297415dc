use gcs_proto::types::{ActionType, Seqno};
use std::time::SystemTime;

/// A delivered unit of replicated information.
///
/// The payload buffer is owned by the application from the moment `recv`
/// returns it; dropping the action is the release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub action_type: ActionType,
    /// Group-wide position. [`Seqno::ILL`] for non-ordered kinds and for
    /// ordered kinds delivered outside a primary configuration.
    pub global_seqno: Seqno,
    /// Per-node gapless position over everything this node delivers.
    pub local_seqno: Seqno,
    /// Index of the sending member in the configuration the action was
    /// delivered in. Library-synthesized actions carry this node's index.
    pub sender_idx: u32,
    pub payload: Vec<u8>,
    /// Local receive time, when self-timestamping is enabled.
    pub timestamp: Option<SystemTime>,
}

impl Action {
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}
