//! Sequence numbers, identifiers and action types shared across the wire.

use crate::codec::{ProtoError, WireDecode, WireEncode};
use std::io::{Read, Write};

macro_rules! wire_newtype {
    ($name:ident, $inner:ty, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub $inner);

        impl From<$inner> for $name {
            fn from(val: $inner) -> Self {
                $name(val)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl WireEncode for $name {
            fn encode_to<W: Write>(&self, writer: &mut W) -> Result<(), ProtoError> {
                self.0.encode_to(writer)
            }
        }

        impl WireDecode for $name {
            fn decode_from<R: Read>(reader: &mut R) -> Result<Self, ProtoError> {
                Ok($name(<$inner>::decode_from(reader)?))
            }
        }
    };
}

wire_newtype!(
    ActionId,
    u64,
    "Sender-local identifier of an action, monotonic per node."
);

impl ActionId {
    pub const FIRST: ActionId = ActionId(1);

    pub fn next(self) -> Self {
        ActionId(self.0 + 1)
    }
}

wire_newtype!(
    ViewId,
    u64,
    "Backend-assigned identifier of a membership view, monotonic per group."
);

/// Identifier a backend assigns to a group member. Opaque to the library;
/// bounded by [`crate::MAX_MEMBER_ID_LEN`] on the wire.
pub type MemberId = String;

/// A sequence number in the replicated history.
///
/// Signed so that the sentinels are representable: [`Seqno::ILL`] marks a
/// value that carries no information (never serialized as a position),
/// [`Seqno::NIL`] an empty history. Real positions start at
/// [`Seqno::FIRST`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Seqno(pub i64);

impl Seqno {
    /// Undefined / not applicable.
    pub const ILL: Seqno = Seqno(-1);
    /// Empty history.
    pub const NIL: Seqno = Seqno(0);
    /// First position of a history line.
    pub const FIRST: Seqno = Seqno(1);

    pub fn next(self) -> Self {
        Seqno(self.0 + 1)
    }

    /// True for any value that names a real position or the empty history.
    pub fn is_legal(self) -> bool {
        self.0 >= 0
    }
}

impl Default for Seqno {
    fn default() -> Self {
        Seqno::NIL
    }
}

impl From<i64> for Seqno {
    fn from(val: i64) -> Self {
        Seqno(val)
    }
}

impl std::fmt::Display for Seqno {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Seqno::ILL => write!(f, "-1 (ill)"),
            s => write!(f, "{}", s.0),
        }
    }
}

impl WireEncode for Seqno {
    fn encode_to<W: Write>(&self, writer: &mut W) -> Result<(), ProtoError> {
        self.0.encode_to(writer)
    }
}

impl WireDecode for Seqno {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, ProtoError> {
        Ok(Seqno(i64::decode_from(reader)?))
    }
}

/// Identifier of a history line. Two nodes agree on `(uuid, seqno)` iff they
/// share history up to `seqno`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct GroupUuid(pub [u8; 16]);

impl GroupUuid {
    /// The uuid of a node with no history.
    pub const NIL: GroupUuid = GroupUuid([0; 16]);

    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl std::fmt::Debug for GroupUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GroupUuid(")?;
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

impl std::fmt::Display for GroupUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl WireEncode for GroupUuid {
    fn encode_to<W: Write>(&self, writer: &mut W) -> Result<(), ProtoError> {
        self.0.as_slice().encode_to(writer)
    }
}

impl WireDecode for GroupUuid {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, ProtoError> {
        let bytes = Vec::<u8>::decode_from(reader)?;
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| ProtoError::Decode("group uuid must be 16 bytes".into()))?;
        Ok(GroupUuid(arr))
    }
}

/// The kind of an action as seen by the application and on the wire.
///
/// Applications may submit `Tordered`, `CommitCut` and `StateReq`; the
/// remaining kinds are generated by the library. `Tordered`, `CommitCut` and
/// `StateReq` are the *ordered* kinds: delivered in a primary configuration
/// they receive a global sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    /// Totally ordered application payload.
    Tordered,
    /// Group-wide commit cut: the payload is the lowest seqno every member
    /// has applied, enabling log truncation downstream.
    CommitCut,
    /// State transfer request from a joiner.
    StateReq,
    /// Configuration change, synthesized at each view boundary.
    Conf,
    /// State transfer completion report.
    Join,
    /// A member caught up with the group.
    Sync,
    /// Flow control pause/resume.
    Flow,
    /// Internal service traffic (state exchange, applied-seqno reports).
    Service,
    /// Fatal transport condition surfaced in-stream.
    Error,
    /// Unrecognized wire code.
    Unknown,
}

impl ActionType {
    pub fn code(self) -> u8 {
        match self {
            ActionType::Tordered => 0,
            ActionType::CommitCut => 1,
            ActionType::StateReq => 2,
            ActionType::Conf => 3,
            ActionType::Join => 4,
            ActionType::Sync => 5,
            ActionType::Flow => 6,
            ActionType::Service => 7,
            ActionType::Error => 8,
            ActionType::Unknown => 255,
        }
    }

    pub fn from_code(code: u8) -> ActionType {
        match code {
            0 => ActionType::Tordered,
            1 => ActionType::CommitCut,
            2 => ActionType::StateReq,
            3 => ActionType::Conf,
            4 => ActionType::Join,
            5 => ActionType::Sync,
            6 => ActionType::Flow,
            7 => ActionType::Service,
            8 => ActionType::Error,
            _ => ActionType::Unknown,
        }
    }

    /// True for the kinds that receive a global seqno when delivered in a
    /// primary configuration. State requests are serialized in-stream like
    /// ordered traffic but consume only a local position: the requester
    /// resumes applying from that local seqno, and the global history is
    /// unaffected by transfer negotiation.
    pub fn is_ordered(self) -> bool {
        matches!(self, ActionType::Tordered | ActionType::CommitCut)
    }

    /// True for the kinds an application may pass to `send`/`repl`.
    pub fn is_app_sendable(self) -> bool {
        matches!(
            self,
            ActionType::Tordered | ActionType::CommitCut | ActionType::StateReq
        )
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ActionType::Tordered => "TORDERED",
            ActionType::CommitCut => "COMMIT_CUT",
            ActionType::StateReq => "STATE_REQ",
            ActionType::Conf => "CONF",
            ActionType::Join => "JOIN",
            ActionType::Sync => "SYNC",
            ActionType::Flow => "FLOW",
            ActionType::Service => "SERVICE",
            ActionType::Error => "ERROR",
            ActionType::Unknown => "UNKNOWN",
        };
        write!(f, "{}", name)
    }
}
