//! In-process loopback transport.
//!
//! A process-global registry maps URL addresses to networks; a network keys
//! groups by channel name. Every message is fanned out to all members of a
//! group under one lock, which is what makes the delivery order total. View
//! events are enqueued under the same lock, so no message straddles a view
//! boundary.
//!
//! The module also exposes test instrumentation: a group can be forced
//! non-primary and a member can be made to crash after a number of frames,
//! which is how the view-change suites exercise partial actions.

use super::{BackendEvent, EventStream, ViewEvent};
use crate::error::{Error, Result};
use gcs_proto::types::{MemberId, ViewId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, OnceLock};
use tracing::debug;

static NETWORKS: OnceLock<Mutex<HashMap<String, Arc<Network>>>> = OnceLock::new();

fn network(address: &str) -> Arc<Network> {
    let registry = NETWORKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = registry.lock();
    Arc::clone(map.entry(address.to_owned()).or_insert_with(|| {
        Arc::new(Network {
            groups: Mutex::new(HashMap::new()),
        })
    }))
}

struct Network {
    groups: Mutex<HashMap<String, Group>>,
}

struct Member {
    id: MemberId,
    tx: mpsc::Sender<BackendEvent>,
}

#[derive(Default)]
struct Group {
    members: Vec<Member>,
    view_id: u64,
    next_member: u64,
    non_primary: bool,
    /// member id -> frames still allowed before a forced crash.
    crash_after: HashMap<MemberId, u64>,
}

impl Group {
    fn broadcast(&self, event: BackendEvent) {
        for member in &self.members {
            // A member whose receiver is gone is about to leave; ignore.
            let _ = member.tx.send(event.clone());
        }
    }

    fn announce_view(&mut self) {
        self.view_id += 1;
        let view = ViewEvent {
            view_id: ViewId(self.view_id),
            members: self.members.iter().map(|m| m.id.clone()).collect(),
            is_primary: !self.non_primary && !self.members.is_empty(),
        };
        self.broadcast(BackendEvent::View(view));
    }

    fn remove(&mut self, member_id: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m.id != member_id);
        self.crash_after.remove(member_id);
        before != self.members.len()
    }
}

/// One endpoint on the loopback network.
pub struct DummyBackend {
    network: Arc<Network>,
    membership: Mutex<Option<(String, MemberId)>>,
}

impl DummyBackend {
    pub(crate) fn connect(address: &str) -> DummyBackend {
        DummyBackend {
            network: network(address),
            membership: Mutex::new(None),
        }
    }

    pub(crate) fn join(&self, channel: &str) -> Result<EventStream> {
        let mut membership = self.membership.lock();
        if membership.is_some() {
            return Err(Error::Backend("already joined".into()));
        }
        let (tx, rx) = mpsc::channel();
        let mut groups = self.network.groups.lock();
        let group = groups.entry(channel.to_owned()).or_default();
        let id = format!("node{}", group.next_member);
        group.next_member += 1;
        group.members.push(Member {
            id: id.clone(),
            tx,
        });
        group.announce_view();
        debug!(channel, member = %id, "joined loopback group");
        *membership = Some((channel.to_owned(), id));
        Ok(EventStream::new(rx))
    }

    pub(crate) fn send_message(&self, bytes: &[u8]) -> Result<usize> {
        let membership = self.membership.lock();
        let (channel, id) = membership
            .as_ref()
            .ok_or_else(|| Error::Backend("not joined".into()))?;
        let mut groups = self.network.groups.lock();
        let group = groups
            .get_mut(channel)
            .ok_or_else(|| Error::Backend("group gone".into()))?;

        let crash_now = match group.crash_after.get_mut(id) {
            Some(left) if *left == 0 => true,
            Some(left) => {
                *left -= 1;
                false
            }
            None => false,
        };
        if crash_now {
            group.remove(id);
            group.announce_view();
            return Err(Error::Backend("member crashed".into()));
        }

        if !group.members.iter().any(|m| m.id == *id) {
            return Err(Error::Backend("not a member".into()));
        }
        group.broadcast(BackendEvent::Message {
            sender: id.clone(),
            payload: bytes.to_vec(),
        });
        Ok(bytes.len())
    }

    pub(crate) fn close(&self) {
        let mut membership = self.membership.lock();
        let Some((channel, id)) = membership.take() else {
            return;
        };
        let mut groups = self.network.groups.lock();
        let now_empty = match groups.get_mut(&channel) {
            Some(group) => {
                if group.remove(&id) {
                    if group.members.is_empty() {
                        true
                    } else {
                        group.announce_view();
                        false
                    }
                } else {
                    false
                }
            }
            None => false,
        };
        if now_empty {
            groups.remove(&channel);
        }
    }

    pub(crate) fn member_id(&self) -> Option<MemberId> {
        self.membership.lock().as_ref().map(|(_, id)| id.clone())
    }
}

/// Test control: marks the component (non-)primary and re-announces the
/// view, so members observe the change as a configuration event.
pub fn set_non_primary(address: &str, channel: &str, non_primary: bool) {
    let network = network(address);
    let mut groups = network.groups.lock();
    if let Some(group) = groups.get_mut(channel) {
        group.non_primary = non_primary;
        group.announce_view();
    }
}

/// Test control: lets `frames` more frames from `member` through, then fails
/// its next send and removes it from the group.
pub fn crash_after_frames(address: &str, channel: &str, member: &str, frames: u64) {
    let network = network(address);
    let mut groups = network.groups.lock();
    if let Some(group) = groups.get_mut(channel) {
        group.crash_after.insert(member.to_owned(), frames);
    }
}

/// Test control: removes `member` immediately, as if its host died.
pub fn kick(address: &str, channel: &str, member: &str) {
    let network = network(address);
    let mut groups = network.groups.lock();
    if let Some(group) = groups.get_mut(channel)
        && group.remove(member)
    {
        group.announce_view();
    }
}
