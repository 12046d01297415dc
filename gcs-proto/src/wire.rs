//! Frames and control payloads.
//!
//! Everything the backend carries for this library is a [`Frame`]: a small
//! header followed by a slice of the action payload. Whole control actions
//! (flow, service, join, sync) always fit a single frame; application
//! actions are split across as many frames as the packet size requires.

use crate::codec::{ProtoError, WireDecode, WireEncode, decode, encode};
use crate::types::{ActionId, ActionType, GroupUuid, Seqno, ViewId};
use std::io::{Read, Write};

/// Worst-case encoded size of a frame minus its payload bytes.
///
/// Header fields at their widest: action id (9), fragment index (5),
/// fragment count (5), type code (2), total size (9), payload bin marker
/// (5). The fragmenter subtracts this from the packet size to obtain the
/// per-frame payload budget.
pub const FRAME_OVERHEAD: usize = 35;

/// One transport message: a fragment of an action.
///
/// `frag_index` runs from 0 to `frag_count - 1`; `total_size` repeats the
/// whole action's size in every frame so a receiver can reserve the buffer
/// up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub action_id: ActionId,
    pub frag_index: u32,
    pub frag_count: u32,
    pub action_type: ActionType,
    pub total_size: u64,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtoError> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtoError> {
        decode(bytes)
    }

    /// True when this frame carries the whole action by itself.
    pub fn is_whole(&self) -> bool {
        self.frag_count == 1
    }
}

impl WireEncode for Frame {
    fn encode_to<W: Write>(&self, writer: &mut W) -> Result<(), ProtoError> {
        self.action_id.encode_to(writer)?;
        self.frag_index.encode_to(writer)?;
        self.frag_count.encode_to(writer)?;
        self.action_type.code().encode_to(writer)?;
        self.total_size.encode_to(writer)?;
        self.payload.encode_to(writer)
    }
}

impl WireDecode for Frame {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, ProtoError> {
        let action_id = ActionId::decode_from(reader)?;
        let frag_index = u32::decode_from(reader)?;
        let frag_count = u32::decode_from(reader)?;
        let action_type = ActionType::from_code(u8::decode_from(reader)?);
        let total_size = u64::decode_from(reader)?;
        let payload = Vec::<u8>::decode_from(reader)?;
        if frag_count == 0 {
            return Err(ProtoError::Decode("frame with zero fragment count".into()));
        }
        if frag_index >= frag_count {
            return Err(ProtoError::Decode(format!(
                "fragment index {} out of range (count {})",
                frag_index, frag_count
            )));
        }
        Ok(Frame {
            action_id,
            frag_index,
            frag_count,
            action_type,
            total_size,
            payload,
        })
    }
}

/// Payload of a FLOW action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowMsg {
    /// `true` pauses the group, `false` resumes it.
    pub pause: bool,
}

impl WireEncode for FlowMsg {
    fn encode_to<W: Write>(&self, writer: &mut W) -> Result<(), ProtoError> {
        self.pause.encode_to(writer)
    }
}

impl WireDecode for FlowMsg {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, ProtoError> {
        Ok(FlowMsg {
            pause: bool::decode_from(reader)?,
        })
    }
}

const SERVICE_STATE_EXCHANGE: u8 = 0;
const SERVICE_LAST_APPLIED: u8 = 1;

/// Payload of a SERVICE action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceMsg {
    /// A member's known history position, announced at a view change. The
    /// set of these messages, identical on every node by total order, is the
    /// input of the configuration quorum. `conf_id` is the highest primary
    /// configuration the member has seen, so the group continues the id
    /// sequence rather than each member counting on its own.
    StateExchange {
        view_id: ViewId,
        uuid: GroupUuid,
        seqno: Seqno,
        conf_id: i64,
    },
    /// A member's applied-seqno report, input of the commit cut.
    LastApplied { seqno: Seqno },
}

impl WireEncode for ServiceMsg {
    fn encode_to<W: Write>(&self, writer: &mut W) -> Result<(), ProtoError> {
        match self {
            ServiceMsg::StateExchange {
                view_id,
                uuid,
                seqno,
                conf_id,
            } => {
                SERVICE_STATE_EXCHANGE.encode_to(writer)?;
                view_id.encode_to(writer)?;
                uuid.encode_to(writer)?;
                seqno.encode_to(writer)?;
                conf_id.encode_to(writer)
            }
            ServiceMsg::LastApplied { seqno } => {
                SERVICE_LAST_APPLIED.encode_to(writer)?;
                seqno.encode_to(writer)
            }
        }
    }
}

impl WireDecode for ServiceMsg {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, ProtoError> {
        match u8::decode_from(reader)? {
            SERVICE_STATE_EXCHANGE => Ok(ServiceMsg::StateExchange {
                view_id: ViewId::decode_from(reader)?,
                uuid: GroupUuid::decode_from(reader)?,
                seqno: Seqno::decode_from(reader)?,
                conf_id: i64::decode_from(reader)?,
            }),
            SERVICE_LAST_APPLIED => Ok(ServiceMsg::LastApplied {
                seqno: Seqno::decode_from(reader)?,
            }),
            tag => Err(ProtoError::Decode(format!("unknown service tag {}", tag))),
        }
    }
}
