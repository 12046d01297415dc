//! The node state machine.
//!
//! Owned by the delivery worker: every mutation here is driven by the
//! totally ordered event stream, so all nodes walk through identical
//! transitions. The worker applies the returned [`Effect`]s (queue pushes,
//! waiter completions, library broadcasts) outside this module.

use crate::action::Action;
use crate::backend::ViewEvent;
use crate::defrag::Defrag;
use crate::error::Error;
use crate::repl::Completion;
use crate::sequencer::Sequencer;
use gcs_proto::conf::ConfPayload;
use gcs_proto::fnv::fnv1a_128;
use gcs_proto::types::{ActionId, ActionType, GroupUuid, MemberId, Seqno, ViewId};
use gcs_proto::wire::{FlowMsg, Frame, ServiceMsg};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Lifecycle of a node within its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Not connected to a channel.
    Closed,
    /// Channel joined, first configuration not yet processed.
    Open,
    /// Member of a component that cannot order traffic.
    NonPrimary,
    /// Member of a primary component with a history gap; must request state
    /// transfer.
    Joiner,
    /// Serving a state transfer to a joiner.
    Donor,
    /// Full member of a primary component.
    Joined,
    /// Full member that has caught up with the group.
    Synced,
}

/// Instructions from the state machine to the delivery worker.
pub enum Effect {
    /// Enqueue for the application.
    Deliver(Action),
    /// Our own action came back: complete its waiter, or enqueue the action
    /// if no waiter was registered (a plain `send`).
    SelfDeliver {
        id: ActionId,
        completion: Completion,
        action: Action,
    },
    /// Fail one outstanding request.
    Fail { id: ActionId, error: Error },
    /// Fail every outstanding request.
    FailAll(Error),
    /// Broadcast a library-generated action through the normal send path.
    Broadcast { ty: ActionType, payload: Vec<u8> },
    /// Apply a delivered FLOW action.
    Flow { member: MemberId, pause: bool },
    /// A configuration was delivered: reset the flow-control pause set.
    FlowReset,
    /// The configuration the node now operates under, for the handle's
    /// `conf()` accessor. The first one after open is surfaced only here;
    /// later ones are additionally delivered in-stream.
    ConfInfo(ConfPayload),
}

struct MemberInfo {
    /// Whether the member possesses full history (eligible as a donor).
    joined: bool,
    /// Last applied seqno the member reported.
    applied: Seqno,
}

#[derive(Clone, Copy)]
struct MemberPosition {
    uuid: GroupUuid,
    seqno: Seqno,
    conf_id: i64,
}

struct Exchange {
    view: ViewEvent,
    /// History positions announced so far, by member.
    states: HashMap<MemberId, MemberPosition>,
    /// Non-control actions delivered before the exchange completed; replayed
    /// after the configuration, so CONF sits at the exact view boundary.
    buffered: Vec<(MemberId, ActionId, ActionType, Vec<u8>)>,
}

pub struct NodeCore {
    my_id: MemberId,
    state: NodeState,
    seq: Sequencer,
    defrag: Defrag,
    /// History position announced in state exchanges. Frozen for a joiner
    /// until its transfer completes.
    hist_uuid: GroupUuid,
    hist_seqno: Seqno,
    // Current configuration.
    conf_id: i64,
    group_uuid: GroupUuid,
    members: Vec<MemberId>,
    my_idx: u32,
    st_required: bool,
    last_prim_conf_id: i64,
    member_info: HashMap<MemberId, MemberInfo>,
    /// The transfer in progress, requester first. One at a time.
    st_pair: Option<(MemberId, MemberId)>,
    /// Highest commit cut this node broadcast as representative.
    commit_cut_sent: Seqno,
    exchange: Option<Exchange>,
    timestamping: bool,
    /// Whether the configuration that completed `open` has been produced.
    /// That first one is consumed by `open` itself and takes no local
    /// seqno; the application's stream starts right after it.
    first_conf_done: bool,
}

impl NodeCore {
    pub fn new(my_id: MemberId, seed: (GroupUuid, Seqno), timestamping: bool) -> Self {
        NodeCore {
            my_id,
            state: NodeState::Open,
            seq: Sequencer::new(),
            defrag: Defrag::new(),
            hist_uuid: seed.0,
            hist_seqno: seed.1,
            conf_id: ConfPayload::NON_PRIMARY,
            group_uuid: seed.0,
            members: Vec::new(),
            my_idx: 0,
            st_required: false,
            last_prim_conf_id: 0,
            member_info: HashMap::new(),
            st_pair: None,
            commit_cut_sent: Seqno::NIL,
            exchange: None,
            timestamping,
            first_conf_done: false,
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn local_seqno(&self) -> Seqno {
        self.seq.local()
    }

    pub fn global_seqno(&self) -> Seqno {
        self.seq.global()
    }

    pub fn conf_id(&self) -> i64 {
        self.conf_id
    }

    pub fn group_uuid(&self) -> GroupUuid {
        self.group_uuid
    }

    fn in_primary(&self) -> bool {
        self.conf_id != ConfPayload::NON_PRIMARY
    }

    fn member_index(&self, member: &MemberId) -> Option<u32> {
        self.members.iter().position(|m| m == member).map(|i| i as u32)
    }

    fn make_action(
        &self,
        action_type: ActionType,
        global_seqno: Seqno,
        local_seqno: Seqno,
        sender_idx: u32,
        payload: Vec<u8>,
    ) -> Action {
        Action {
            action_type,
            global_seqno,
            local_seqno,
            sender_idx,
            payload,
            timestamp: self.timestamping.then(SystemTime::now),
        }
    }

    /// Transport view change: abort reassembly, fail what was lost, start a
    /// state exchange (primary) or deliver the configuration outright
    /// (non-primary).
    pub fn handle_view(&mut self, view: ViewEvent, effects: &mut Vec<Effect>) {
        info!(view_id = %view.view_id, members = view.members.len(),
              primary = view.is_primary, "view change");

        if let Some(old) = self.exchange.take() {
            debug!(view_id = %old.view.view_id, "state exchange aborted by new view");
            for (sender, id, _, _) in old.buffered {
                if sender == self.my_id {
                    effects.push(Effect::Fail {
                        id,
                        error: Error::NotOrdered,
                    });
                }
            }
        }
        for (sender, id) in self.defrag.drop_all() {
            if sender == self.my_id {
                effects.push(Effect::Fail {
                    id,
                    error: Error::NotOrdered,
                });
            }
        }

        if view.is_primary {
            effects.push(Effect::Broadcast {
                ty: ActionType::Service,
                payload: encode_service(&ServiceMsg::StateExchange {
                    view_id: view.view_id,
                    uuid: self.hist_uuid,
                    seqno: self.hist_seqno,
                    conf_id: self.last_prim_conf_id,
                }),
            });
            self.exchange = Some(Exchange {
                view,
                states: HashMap::new(),
                buffered: Vec::new(),
            });
        } else {
            self.finalize_non_primary(view, effects);
        }
    }

    /// Transport frame: reassemble, then dispatch the whole action.
    pub fn handle_frame(&mut self, sender: MemberId, frame: Frame, effects: &mut Vec<Effect>) {
        if let Some(whole) = self.defrag.feed(&sender, frame) {
            self.dispatch(sender, whole.action_id, whole.action_type, whole.payload, effects);
        }
    }

    /// The transport is gone for good. When the shutdown was not requested
    /// through `close`, the failure is surfaced in-stream as an ERROR action
    /// before the queue ends.
    pub fn handle_stream_closed(&mut self, expected: bool, effects: &mut Vec<Effect>) {
        self.state = NodeState::Closed;
        self.exchange = None;
        effects.push(Effect::FailAll(Error::Closed));
        if !expected {
            let local = self.seq.next_local();
            let action =
                self.make_action(ActionType::Error, Seqno::ILL, local, self.my_idx, Vec::new());
            effects.push(Effect::Deliver(action));
        }
    }

    fn dispatch(
        &mut self,
        sender: MemberId,
        id: ActionId,
        ty: ActionType,
        payload: Vec<u8>,
        effects: &mut Vec<Effect>,
    ) {
        match ty {
            ActionType::Service => {
                match gcs_proto::decode::<ServiceMsg>(&payload) {
                    Ok(ServiceMsg::StateExchange {
                        view_id,
                        uuid,
                        seqno,
                        conf_id,
                    }) => self.on_state_exchange(
                        sender,
                        view_id,
                        MemberPosition {
                            uuid,
                            seqno,
                            conf_id,
                        },
                        effects,
                    ),
                    Ok(ServiceMsg::LastApplied { seqno }) => {
                        self.on_last_applied(sender, seqno, effects)
                    }
                    Err(err) => warn!(%sender, %err, "undecodable service action"),
                }
                return;
            }
            ActionType::Flow => {
                match gcs_proto::decode::<FlowMsg>(&payload) {
                    Ok(msg) => effects.push(Effect::Flow {
                        member: sender,
                        pause: msg.pause,
                    }),
                    Err(err) => warn!(%sender, %err, "undecodable flow action"),
                }
                return;
            }
            _ => {}
        }

        if let Some(exchange) = &mut self.exchange {
            exchange.buffered.push((sender, id, ty, payload));
            return;
        }

        match ty {
            ActionType::Tordered | ActionType::CommitCut => {
                self.on_ordered(sender, id, ty, payload, effects)
            }
            ActionType::StateReq => self.on_state_req(sender, id, payload, effects),
            ActionType::Join => self.on_join(sender, payload, effects),
            ActionType::Sync => self.on_sync(sender, payload),
            ActionType::Conf | ActionType::Error | ActionType::Unknown => {
                warn!(%sender, %ty, "unexpected action type on the wire, dropping")
            }
            ActionType::Service | ActionType::Flow => unreachable!("handled above"),
        }
    }

    fn on_ordered(
        &mut self,
        sender: MemberId,
        id: ActionId,
        ty: ActionType,
        payload: Vec<u8>,
        effects: &mut Vec<Effect>,
    ) {
        let Some(sender_idx) = self.member_index(&sender) else {
            warn!(%sender, "action from a member not in the configuration, dropping");
            return;
        };
        let (global, local) = self.seq.assign(ty, self.in_primary());
        if global.is_legal() && !self.st_required {
            self.hist_uuid = self.group_uuid;
            self.hist_seqno = global;
        }
        if ty == ActionType::CommitCut
            && let Ok(cut) = gcs_proto::decode::<i64>(&payload)
        {
            debug!(cut, "commit cut delivered");
        }
        let action = self.make_action(ty, global, local, sender_idx, payload);
        if sender == self.my_id {
            effects.push(Effect::SelfDeliver {
                id,
                completion: Completion::Ordered { global, local },
                action,
            });
        } else {
            effects.push(Effect::Deliver(action));
        }
    }

    fn on_state_req(
        &mut self,
        sender: MemberId,
        id: ActionId,
        payload: Vec<u8>,
        effects: &mut Vec<Effect>,
    ) {
        if !self.in_primary() {
            if sender == self.my_id {
                effects.push(Effect::Fail {
                    id,
                    error: Error::NotPrimary,
                });
            }
            return;
        }
        let Some(requester_idx) = self.member_index(&sender) else {
            warn!(%sender, "state request from outside the configuration");
            return;
        };

        let donor = if self.st_pair.is_some() {
            // A transfer is already running; the group has no spare donor.
            None
        } else {
            self.members.iter().enumerate().find(|(_, m)| {
                **m != sender
                    && self
                        .member_info
                        .get(*m)
                        .is_some_and(|info| info.joined)
            })
        };

        let Some((donor_idx, donor_id)) = donor.map(|(i, m)| (i as u32, m.clone())) else {
            debug!(requester = %sender, "no donor available");
            // Consumes no seqno on any node, so the requester can retry
            // without leaving a gap anywhere.
            if sender == self.my_id {
                effects.push(Effect::Fail {
                    id,
                    error: Error::NoDonor,
                });
            }
            return;
        };

        // Serialized in-stream but globally unnumbered: the requester skips
        // exactly this local position, the group history is untouched.
        let global = Seqno::ILL;
        let local = self.seq.next_local();
        info!(requester = %sender, donor = %donor_id, %local, "state transfer scheduled");
        self.st_pair = Some((sender.clone(), donor_id.clone()));
        if donor_id == self.my_id {
            self.state = NodeState::Donor;
        }

        let action = self.make_action(ActionType::StateReq, global, local, requester_idx, payload);
        if sender == self.my_id {
            // The requester must skip its own request: the seqnos travel back
            // through the blocked call, nothing reaches its receive queue.
            effects.push(Effect::SelfDeliver {
                id,
                completion: Completion::Donor {
                    donor_idx,
                    global,
                    local,
                },
                action,
            });
        } else {
            effects.push(Effect::Deliver(action));
        }
    }

    fn on_join(&mut self, sender: MemberId, payload: Vec<u8>, effects: &mut Vec<Effect>) {
        let Some(sender_idx) = self.member_index(&sender) else {
            warn!(%sender, "join from outside the configuration");
            return;
        };
        let status = match gcs_proto::decode::<i64>(&payload) {
            Ok(status) => Seqno(status),
            Err(err) => {
                warn!(%sender, %err, "undecodable join action");
                return;
            }
        };

        if let Some((joiner, donor)) = self.st_pair.clone()
            && (sender == donor || sender == joiner)
        {
            self.st_pair = None;
            if status.0 >= 0 {
                info!(%joiner, %donor, %status, "state transfer complete");
                if let Some(info) = self.member_info.get_mut(&joiner) {
                    info.joined = true;
                }
                if joiner == self.my_id {
                    self.state = NodeState::Joined;
                    self.st_required = false;
                    self.hist_uuid = self.group_uuid;
                    self.hist_seqno = self.seq.global();
                    effects.push(Effect::Broadcast {
                        ty: ActionType::Sync,
                        payload: Vec::new(),
                    });
                }
                if donor == self.my_id {
                    self.state = NodeState::Joined;
                    effects.push(Effect::Broadcast {
                        ty: ActionType::Sync,
                        payload: Vec::new(),
                    });
                }
            } else {
                warn!(%joiner, %donor, %status, "state transfer failed");
                if donor == self.my_id {
                    self.state = NodeState::Joined;
                }
            }
        } else {
            debug!(%sender, %status, "join without a matching transfer");
        }

        let local = self.seq.next_local();
        let action = self.make_action(ActionType::Join, Seqno::ILL, local, sender_idx, payload);
        effects.push(Effect::Deliver(action));
    }

    /// SYNC is group-state bookkeeping, consumed like FLOW: it drives the
    /// JOINED to SYNCED transition and never reaches the application.
    fn on_sync(&mut self, sender: MemberId, _payload: Vec<u8>) {
        if self.member_index(&sender).is_none() {
            warn!(%sender, "sync from outside the configuration");
            return;
        }
        if sender == self.my_id && self.state == NodeState::Joined {
            self.state = NodeState::Synced;
            info!("node synced");
        }
    }

    fn on_state_exchange(
        &mut self,
        sender: MemberId,
        view_id: ViewId,
        position: MemberPosition,
        effects: &mut Vec<Effect>,
    ) {
        let complete = {
            let Some(exchange) = &mut self.exchange else {
                debug!(%sender, %view_id, "stale state exchange message");
                return;
            };
            if exchange.view.view_id != view_id {
                debug!(%sender, %view_id, "state exchange for a different view");
                return;
            }
            exchange.states.insert(sender, position);
            exchange.states.len() == exchange.view.members.len()
        };
        if complete {
            self.finalize_exchange(effects);
        }
    }

    fn on_last_applied(&mut self, sender: MemberId, seqno: Seqno, effects: &mut Vec<Effect>) {
        if let Some(info) = self.member_info.get_mut(&sender) {
            if seqno > info.applied {
                info.applied = seqno;
            }
        } else {
            return;
        }
        // The representative turns the group-wide minimum into a commit cut.
        if self.members.first() != Some(&self.my_id) || !self.in_primary() {
            return;
        }
        let min = self
            .members
            .iter()
            .filter_map(|m| self.member_info.get(m))
            .map(|info| info.applied)
            .min()
            .unwrap_or(Seqno::NIL);
        if min >= Seqno::FIRST && min > self.commit_cut_sent {
            self.commit_cut_sent = min;
            effects.push(Effect::Broadcast {
                ty: ActionType::CommitCut,
                payload: encode_i64(min.0),
            });
        }
    }

    /// All members' positions are in; every node computes the same
    /// configuration from the same ordered input.
    fn finalize_exchange(&mut self, effects: &mut Vec<Effect>) {
        let exchange = self.exchange.take().expect("exchange in progress");
        let members = exchange.view.members.clone();

        let mut tally: SmallVec<[(GroupUuid, u32); 4]> = SmallVec::new();
        for position in exchange.states.values() {
            if position.uuid.is_nil() {
                continue;
            }
            match tally.iter_mut().find(|(u, _)| *u == position.uuid) {
                Some((_, count)) => *count += 1,
                None => tally.push((position.uuid, 1)),
            }
        }

        let (group_uuid, group_seqno) = if let Some((uuid, _)) = tally
            .iter()
            .max_by_key(|(u, count)| (*count, std::cmp::Reverse(*u)))
        {
            let seqno = exchange
                .states
                .values()
                .filter(|p| p.uuid == *uuid)
                .map(|p| p.seqno)
                .max()
                .unwrap_or(Seqno::NIL);
            (*uuid, seqno)
        } else {
            // Every member is fresh: derive a new history line, identically
            // on all nodes, from the membership and the view id.
            (derive_uuid(&members, exchange.view.view_id), Seqno::NIL)
        };

        // Continue the group's conf id sequence from the highest any member
        // has seen, so newcomers agree with veterans.
        self.last_prim_conf_id = exchange
            .states
            .values()
            .map(|p| p.conf_id)
            .max()
            .unwrap_or(self.last_prim_conf_id)
            + 1;
        self.conf_id = self.last_prim_conf_id;
        self.group_uuid = group_uuid;
        self.my_idx = members
            .iter()
            .position(|m| *m == self.my_id)
            .expect("own id in view") as u32;

        let mut member_info = HashMap::new();
        for member in &members {
            let position = exchange.states.get(member).copied().unwrap_or(MemberPosition {
                uuid: GroupUuid::NIL,
                seqno: Seqno::NIL,
                conf_id: 0,
            });
            let gap = history_gap(position.uuid, position.seqno, group_uuid, group_seqno);
            let applied = self
                .member_info
                .get(member)
                .map_or(Seqno::NIL, |info| info.applied);
            member_info.insert(
                member.clone(),
                MemberInfo {
                    joined: !gap,
                    applied,
                },
            );
        }
        self.member_info = member_info;
        self.members = members;
        self.st_pair = None;

        self.st_required = history_gap(self.hist_uuid, self.hist_seqno, group_uuid, group_seqno);
        self.seq.set_global(group_seqno);
        if self.st_required {
            self.state = NodeState::Joiner;
        } else {
            self.hist_uuid = group_uuid;
            self.hist_seqno = group_seqno;
            self.state = NodeState::Joined;
            effects.push(Effect::Broadcast {
                ty: ActionType::Sync,
                payload: Vec::new(),
            });
        }
        info!(conf_id = self.conf_id, uuid = %group_uuid, seqno = %group_seqno,
              members = self.members.len(), st_required = self.st_required,
              "primary configuration");

        self.deliver_conf(group_seqno, effects);

        for (sender, id, ty, payload) in exchange.buffered {
            self.dispatch(sender, id, ty, payload, effects);
        }
    }

    fn finalize_non_primary(&mut self, view: ViewEvent, effects: &mut Vec<Effect>) {
        self.conf_id = ConfPayload::NON_PRIMARY;
        self.my_idx = view
            .members
            .iter()
            .position(|m| *m == self.my_id)
            .unwrap_or(0) as u32;
        self.members = view.members;
        self.member_info.clear();
        self.st_pair = None;
        self.st_required = false;
        self.state = NodeState::NonPrimary;
        info!(members = self.members.len(), "non-primary configuration");

        effects.push(Effect::FailAll(Error::NotOrdered));
        self.deliver_conf(self.hist_seqno, effects);
    }

    fn deliver_conf(&mut self, conf_seqno: Seqno, effects: &mut Vec<Effect>) {
        let payload = ConfPayload {
            seqno: conf_seqno,
            conf_id: self.conf_id,
            group_uuid: self.group_uuid,
            st_required: self.st_required,
            my_idx: self.my_idx,
            members: self.members.clone(),
        };
        effects.push(Effect::ConfInfo(payload.clone()));
        effects.push(Effect::FlowReset);
        if !self.first_conf_done {
            // The configuration that completes `open` is reported through
            // the open call, not the stream.
            self.first_conf_done = true;
            return;
        }
        let local = self.seq.next_local();
        match payload.to_bytes() {
            Ok(bytes) => {
                let action =
                    self.make_action(ActionType::Conf, Seqno::ILL, local, self.my_idx, bytes);
                effects.push(Effect::Deliver(action));
            }
            Err(err) => warn!(%err, "configuration payload undeliverable"),
        }
    }
}

/// Whether a member at `(uuid, seqno)` is missing history against the
/// group position. A group with no history yet has nothing to transfer, so
/// a uuid mismatch alone is no gap: the member simply adopts the line.
fn history_gap(uuid: GroupUuid, seqno: Seqno, group_uuid: GroupUuid, group_seqno: Seqno) -> bool {
    if uuid != group_uuid {
        group_seqno > Seqno::NIL
    } else {
        seqno < group_seqno
    }
}

fn derive_uuid(members: &[MemberId], view_id: ViewId) -> GroupUuid {
    let mut input = Vec::new();
    let mut sorted: Vec<&MemberId> = members.iter().collect();
    sorted.sort();
    for member in sorted {
        input.extend_from_slice(member.as_bytes());
        input.push(b':');
    }
    input.extend_from_slice(&view_id.0.to_le_bytes());
    GroupUuid(fnv1a_128(&input).to_be_bytes())
}

fn encode_service(msg: &ServiceMsg) -> Vec<u8> {
    gcs_proto::encode(msg).expect("service messages always encode")
}

fn encode_i64(value: i64) -> Vec<u8> {
    gcs_proto::encode(&value).expect("integers always encode")
}
