//! # GCS
//!
//! A group communication client: joins a named channel on a virtually
//! synchronous backend and exposes a stream of *actions*, arbitrarily
//! large and totally ordered units of replicated information, plus the
//! membership and state-transfer coordination needed to run a replicated
//! state machine on top.
//!
//! ## Guarantees
//!
//! - Ordered actions carry group-wide monotonic global seqnos, identical on
//!   every node.
//! - Every delivery on a node (through [`Connection::recv`] and
//!   [`Connection::repl`] completions combined) carries a gapless local
//!   seqno.
//! - Fragments of one action never interleave with other traffic from the
//!   same sender; configuration changes are delivered in-stream, at the
//!   exact boundary between two views.
//!
//! ## Example
//!
//! ```no_run
//! use gcs::{ActionType, Connection, Options};
//!
//! let conn = Connection::create("dummy://", Options::default())?;
//! conn.open("my_cluster")?;
//! let ticket = conn.repl(b"payload".to_vec(), ActionType::Tordered)?;
//! assert!(ticket.global_seqno.is_legal());
//! conn.close()?;
//! # Ok::<(), gcs::Error>(())
//! ```

pub mod action;
pub mod backend;
pub mod conn;
pub mod defrag;
pub mod error;
pub mod flow;
pub mod frag;
pub mod node;
pub mod queue;
pub mod repl;
pub mod sequencer;

pub use action::Action;
pub use conn::{Connection, Options, Stats};
pub use error::{Error, Result};
pub use flow::FlowStatus;
pub use node::NodeState;
pub use repl::{ReplTicket, StateTransfer};

pub use gcs_proto::conf::ConfPayload;
pub use gcs_proto::types::{ActionType, GroupUuid, Seqno};
