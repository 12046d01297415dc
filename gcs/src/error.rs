use gcs_proto::ProtoError;
use gcs_proto::types::ActionType;
use thiserror::Error;

/// Errors surfaced by the connection API.
///
/// `Clone` so a single failure can complete many blocked callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// No suitable state transfer donor right now; retry later.
    #[error("no donor available")]
    NoDonor,
    /// The call is not valid while the connection is open.
    #[error("connection is open")]
    Busy,
    /// The call is not valid in the current lifecycle state.
    #[error("wrong connection state: {0}")]
    WrongState(&'static str),
    /// Malformed backend URL.
    #[error("bad backend url: {0}")]
    BadUrl(String),
    /// The URL names a transport this build does not provide.
    #[error("unsupported backend: {0}")]
    UnsupportedBackend(String),
    /// Transport failure.
    #[error("backend error: {0}")]
    Backend(String),
    /// The action was lost to a configuration change before it was ordered.
    /// The caller may re-submit after the next primary configuration.
    #[error("action not ordered: configuration changed")]
    NotOrdered,
    /// Ordered traffic requires a primary configuration.
    #[error("not in a primary configuration")]
    NotPrimary,
    /// Action larger than [`gcs_proto::MAX_ACTION_SIZE`].
    #[error("payload of {0} bytes exceeds the action size limit")]
    PayloadTooLarge(usize),
    /// Packet size too small to carry a frame header.
    #[error("invalid packet size {0}")]
    BadPacketSize(usize),
    /// The action type cannot be submitted by an application.
    #[error("action type {0} is not application-sendable")]
    BadType(ActionType),
    #[error(transparent)]
    Proto(#[from] ProtoError),
    /// The connection is closed. For `recv` this is end-of-stream; all other
    /// calls report it idempotently.
    #[error("connection closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, Error>;
