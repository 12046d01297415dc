//! The configuration payload delivered to applications in CONF actions.
//!
//! Unlike the frame traffic this layout is fixed and position-based, so an
//! application can read it without a MessagePack decoder: little-endian
//! header fields followed by `memb_num` NUL-terminated member identifiers of
//! at most [`MAX_MEMBER_ID_LEN`] bytes each, terminator included.

use crate::codec::ProtoError;
use crate::types::{GroupUuid, MemberId, Seqno};
use crate::MAX_MEMBER_ID_LEN;

/// Header + member list of a configuration view.
///
/// `conf_id == -1` denotes a non-primary component: no ordering is possible
/// and ordered actions delivered under it carry an illegal global seqno.
/// `st_required` tells the receiving node it has a history gap against
/// `seqno` and must request state transfer before acting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfPayload {
    pub seqno: Seqno,
    pub conf_id: i64,
    pub group_uuid: GroupUuid,
    pub st_required: bool,
    pub my_idx: u32,
    pub members: Vec<MemberId>,
}

impl ConfPayload {
    /// `conf_id` of every non-primary configuration.
    pub const NON_PRIMARY: i64 = -1;

    pub fn is_primary(&self) -> bool {
        self.conf_id != Self::NON_PRIMARY
    }

    pub fn memb_num(&self) -> u32 {
        self.members.len() as u32
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtoError> {
        let mut buf = Vec::with_capacity(41 + self.members.len() * MAX_MEMBER_ID_LEN);
        buf.extend_from_slice(&self.seqno.0.to_le_bytes());
        buf.extend_from_slice(&self.conf_id.to_le_bytes());
        buf.extend_from_slice(self.group_uuid.as_bytes());
        buf.push(self.st_required as u8);
        buf.extend_from_slice(&self.memb_num().to_le_bytes());
        buf.extend_from_slice(&self.my_idx.to_le_bytes());
        for member in &self.members {
            let bytes = member.as_bytes();
            if bytes.len() + 1 > MAX_MEMBER_ID_LEN {
                return Err(ProtoError::Encode(format!(
                    "member id '{}' exceeds {} bytes",
                    member,
                    MAX_MEMBER_ID_LEN - 1
                )));
            }
            if bytes.contains(&0) {
                return Err(ProtoError::Encode("member id contains NUL".into()));
            }
            buf.extend_from_slice(bytes);
            buf.push(0);
        }
        Ok(buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtoError> {
        let mut pos = 0usize;
        let seqno = Seqno(read_i64(bytes, &mut pos)?);
        let conf_id = read_i64(bytes, &mut pos)?;
        let uuid_bytes: [u8; 16] = bytes
            .get(pos..pos + 16)
            .ok_or_else(short)?
            .try_into()
            .map_err(|_| short())?;
        pos += 16;
        let st_required = *bytes.get(pos).ok_or_else(short)? != 0;
        pos += 1;
        let memb_num = read_u32(bytes, &mut pos)?;
        let my_idx = read_u32(bytes, &mut pos)?;
        let mut members = Vec::with_capacity(memb_num as usize);
        for _ in 0..memb_num {
            let rest = bytes.get(pos..).ok_or_else(short)?;
            let nul = rest
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| ProtoError::Decode("unterminated member id".into()))?;
            if nul + 1 > MAX_MEMBER_ID_LEN {
                return Err(ProtoError::Decode("member id too long".into()));
            }
            let member = std::str::from_utf8(&rest[..nul])
                .map_err(|e| ProtoError::Decode(e.to_string()))?;
            members.push(member.to_owned());
            pos += nul + 1;
        }
        if pos != bytes.len() {
            return Err(ProtoError::Decode("trailing bytes after member list".into()));
        }
        if my_idx >= memb_num && memb_num > 0 {
            return Err(ProtoError::Decode("my_idx out of range".into()));
        }
        Ok(ConfPayload {
            seqno,
            conf_id,
            group_uuid: GroupUuid(uuid_bytes),
            st_required,
            my_idx,
            members,
        })
    }
}

fn short() -> ProtoError {
    ProtoError::Decode("configuration payload truncated".into())
}

fn read_i64(bytes: &[u8], pos: &mut usize) -> Result<i64, ProtoError> {
    let arr: [u8; 8] = bytes
        .get(*pos..*pos + 8)
        .ok_or_else(short)?
        .try_into()
        .map_err(|_| short())?;
    *pos += 8;
    Ok(i64::from_le_bytes(arr))
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> Result<u32, ProtoError> {
    let arr: [u8; 4] = bytes
        .get(*pos..*pos + 4)
        .ok_or_else(short)?
        .try_into()
        .map_err(|_| short())?;
    *pos += 4;
    Ok(u32::from_le_bytes(arr))
}
