//! Backend adapter: a uniform face over virtually synchronous transports.
//!
//! The contract a transport must satisfy: within a primary component all
//! members deliver the same messages in the same total order, and across
//! configuration changes a view event bounds which messages belong to which
//! view. Transports are selected by URL (`type://address`) and tagged as
//! enum variants; only the in-process [`dummy`] loopback ships with the
//! library, the real transports plug in externally.

pub mod dummy;

use crate::error::{Error, Result};
use gcs_proto::types::{MemberId, ViewId};

/// Recognized transport schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Dummy,
    Spread,
    Gcomm,
}

/// A parsed `type://address` backend URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendUrl {
    pub scheme: BackendType,
    pub address: String,
}

impl BackendUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let (scheme, address) = url
            .split_once("://")
            .ok_or_else(|| Error::BadUrl(format!("'{}': missing '://'", url)))?;
        let scheme = match scheme {
            "dummy" => BackendType::Dummy,
            "spread" => BackendType::Spread,
            "gcomm" => BackendType::Gcomm,
            other => return Err(Error::BadUrl(format!("unknown scheme '{}'", other))),
        };
        Ok(BackendUrl {
            scheme,
            address: address.to_owned(),
        })
    }
}

/// A membership change reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewEvent {
    pub view_id: ViewId,
    /// Member identifiers in the transport's canonical order.
    pub members: Vec<MemberId>,
    /// Whether this component can order traffic.
    pub is_primary: bool,
}

/// One event out of the transport's delivery stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Message { sender: MemberId, payload: Vec<u8> },
    View(ViewEvent),
    /// The transport will produce nothing further.
    Closed,
}

/// Blocking receive side of a joined channel, owned by the delivery worker.
pub struct EventStream(std::sync::mpsc::Receiver<BackendEvent>);

impl EventStream {
    pub(crate) fn new(rx: std::sync::mpsc::Receiver<BackendEvent>) -> Self {
        EventStream(rx)
    }

    /// Blocks for the next event; yields [`BackendEvent::Closed`] forever
    /// once the transport is gone.
    pub fn recv(&mut self) -> BackendEvent {
        self.0.recv().unwrap_or(BackendEvent::Closed)
    }
}

/// A connected transport instance.
pub enum Backend {
    Dummy(dummy::DummyBackend),
}

impl Backend {
    /// Instantiates the transport named by the URL.
    pub fn connect(url: &BackendUrl) -> Result<Backend> {
        match url.scheme {
            BackendType::Dummy => Ok(Backend::Dummy(dummy::DummyBackend::connect(&url.address))),
            BackendType::Spread => Err(Error::UnsupportedBackend("spread".into())),
            BackendType::Gcomm => Err(Error::UnsupportedBackend("gcomm".into())),
        }
    }

    /// Joins a channel; the returned stream carries this member's view of
    /// the group from the first view event on.
    pub fn join(&self, channel: &str) -> Result<EventStream> {
        match self {
            Backend::Dummy(b) => b.join(channel),
        }
    }

    /// Submits one message to the group. Within-sender order is preserved by
    /// the transport.
    pub fn send_message(&self, bytes: &[u8]) -> Result<usize> {
        match self {
            Backend::Dummy(b) => b.send_message(bytes),
        }
    }

    /// Leaves the channel. Idempotent.
    pub fn close(&self) {
        match self {
            Backend::Dummy(b) => b.close(),
        }
    }

    /// The identifier the transport assigned to this member, available after
    /// [`Backend::join`].
    pub fn member_id(&self) -> Option<MemberId> {
        match self {
            Backend::Dummy(b) => b.member_id(),
        }
    }
}
