//! # GCS Proto
//!
//! Wire protocol for the GCS group communication client library.
//!
//! A GCS *action* is an arbitrarily large unit of replicated information.
//! Actions are carried over the group backend as one or more *frames*, each
//! bounded by the configured packet size. This crate defines the frame
//! layout, the control payloads exchanged between nodes (state exchange,
//! flow control, applied-seqno reports), the configuration payload handed to
//! applications, and the sequence-number and identifier types shared by both
//! sides of the wire.
//!
//! Encoding is MessagePack, written field-by-field through the [`codec`]
//! module so the per-frame overhead stays small and predictable.

pub mod codec;
pub mod conf;
pub mod fnv;
pub mod types;
pub mod wire;

pub use codec::{ProtoError, WireDecode, WireEncode, decode, encode};
pub use conf::ConfPayload;
pub use types::{ActionId, ActionType, GroupUuid, MemberId, Seqno, ViewId};
pub use wire::{Frame, FlowMsg, ServiceMsg, FRAME_OVERHEAD};

/// Default packet size for fragmenting actions into frames, in bytes.
///
/// Chosen close to a multiple of a common 1500-byte MTU; configurable per
/// connection.
pub const DEFAULT_PKT_SIZE: usize = 64500;

/// Maximum length of a member identifier on the wire, including the NUL
/// terminator of the configuration payload encoding.
pub const MAX_MEMBER_ID_LEN: usize = 40;

/// Maximum size of a single action (64 MiB). Senders reject larger payloads
/// up front; receivers drop frames claiming more, which bounds reassembly
/// memory per sender.
pub const MAX_ACTION_SIZE: usize = 64 * 1024 * 1024;
