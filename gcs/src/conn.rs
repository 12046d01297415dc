//! The connection handle and its delivery worker.

use crate::action::Action;
use crate::backend::{Backend, BackendEvent, BackendUrl, EventStream};
use crate::error::{Error, Result};
use crate::flow::{FlowControl, FlowStatus};
use crate::frag::{MIN_PKT_SIZE, fragment};
use crate::node::{Effect, NodeCore, NodeState};
use crate::queue::RecvQueue;
use crate::repl::{Completion, ReplTicket, SendTable, StateTransfer};
use gcs_proto::conf::ConfPayload;
use gcs_proto::types::{ActionId, ActionType, GroupUuid, Seqno};
use gcs_proto::wire::{FlowMsg, Frame, ServiceMsg};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// Connection tunables. Defaults suit a database applier; everything is
/// overridable before `create`.
#[derive(Debug, Clone)]
pub struct Options {
    pub pkt_size: usize,
    pub recv_q_len: usize,
    pub fc_low: usize,
    pub fc_high: usize,
    pub self_timestamping: bool,
    pub debug: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            pkt_size: gcs_proto::DEFAULT_PKT_SIZE,
            recv_q_len: 1024,
            fc_low: 32,
            fc_high: 256,
            self_timestamping: false,
            debug: false,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Options::default()
    }

    pub fn set_pkt_size(&mut self, pkt_size: usize) -> &mut Self {
        self.pkt_size = pkt_size;
        self
    }

    pub fn set_recv_q_len(&mut self, len: usize) -> &mut Self {
        self.recv_q_len = len;
        self
    }

    pub fn set_fc_limits(&mut self, low: usize, high: usize) -> &mut Self {
        self.fc_low = low;
        self.fc_high = high;
        self
    }

    pub fn set_self_timestamping(&mut self, on: bool) -> &mut Self {
        self.self_timestamping = on;
        self
    }

    pub fn set_debug(&mut self, on: bool) -> &mut Self {
        self.debug = on;
        self
    }
}

/// A point-in-time view of the connection.
#[derive(Debug, Clone, Copy)]
pub struct Stats {
    pub state: NodeState,
    pub recv_queue_len: usize,
    pub repl_outstanding: usize,
    pub delivered_actions: u64,
    pub delivered_bytes: u64,
    pub paused_members: usize,
    pub last_applied: Seqno,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy)]
struct Snapshot {
    state: NodeState,
    local_seqno: Seqno,
    global_seqno: Seqno,
    conf_id: i64,
}

struct Shared {
    backend: Backend,
    /// Keeps one action's frames contiguous in the total order.
    send_lock: Mutex<()>,
    next_action_id: AtomicU64,
    table: SendTable,
    queue: RecvQueue,
    flow: FlowControl,
    pkt_size: AtomicUsize,
    /// Set by `close` so the worker can tell a requested shutdown from a
    /// transport failure.
    closing: AtomicBool,
    snapshot: Mutex<Snapshot>,
    snapshot_changed: Condvar,
    last_conf: Mutex<Option<ConfPayload>>,
    delivered_actions: AtomicU64,
    delivered_bytes: AtomicU64,
    debug: bool,
}

impl Shared {
    fn snapshot(&self) -> Snapshot {
        *self.snapshot.lock()
    }

    fn publish(&self, core: &NodeCore) {
        let mut snapshot = self.snapshot.lock();
        snapshot.state = core.state();
        snapshot.local_seqno = core.local_seqno();
        snapshot.global_seqno = core.global_seqno();
        snapshot.conf_id = core.conf_id();
        self.snapshot_changed.notify_all();
    }

    fn alloc_action_id(&self) -> ActionId {
        ActionId(self.next_action_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Fragments and submits one action to the backend.
    fn send_action(&self, id: ActionId, ty: ActionType, payload: &[u8]) -> Result<()> {
        let frames = fragment(id, ty, payload, self.pkt_size.load(Ordering::Relaxed))?;
        let _guard = self.send_lock.lock();
        for frame in &frames {
            self.backend.send_message(frame)?;
        }
        Ok(())
    }

    /// Library-generated broadcast; failures degrade to a warning because
    /// the worker has nobody to report them to.
    fn broadcast(&self, ty: ActionType, payload: &[u8]) {
        let id = self.alloc_action_id();
        if let Err(err) = self.send_action(id, ty, payload) {
            warn!(%ty, %err, "library broadcast failed");
        }
    }

    fn broadcast_flow(&self, pause: bool) {
        let payload = gcs_proto::encode(&FlowMsg { pause }).expect("flow message encodes");
        self.broadcast(ActionType::Flow, &payload);
    }
}

/// A GCS connection: join a channel on a group communication backend and
/// replicate totally ordered actions over it.
///
/// The handle is shared freely across threads. Buffers move into the
/// library on [`Connection::send`]/[`Connection::repl`] and out of it on
/// [`Connection::recv`]; dropping a received [`Action`] releases it.
pub struct Connection {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
    seeds: Mutex<(GroupUuid, Seqno)>,
    timestamping: bool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Parses `type://address` and instantiates the transport. The
    /// connection starts closed; nothing happens until [`Connection::open`].
    pub fn create(url: &str, opts: Options) -> Result<Connection> {
        if opts.pkt_size < MIN_PKT_SIZE {
            return Err(Error::BadPacketSize(opts.pkt_size));
        }
        let url = BackendUrl::parse(url)?;
        let backend = Backend::connect(&url)?;
        let shared = Arc::new(Shared {
            backend,
            send_lock: Mutex::new(()),
            next_action_id: AtomicU64::new(ActionId::FIRST.0),
            table: SendTable::new(),
            queue: RecvQueue::new(opts.recv_q_len),
            flow: FlowControl::new(opts.fc_low, opts.fc_high),
            pkt_size: AtomicUsize::new(opts.pkt_size),
            closing: AtomicBool::new(false),
            snapshot: Mutex::new(Snapshot {
                state: NodeState::Closed,
                local_seqno: Seqno::NIL,
                global_seqno: Seqno::NIL,
                conf_id: gcs_proto::conf::ConfPayload::NON_PRIMARY,
            }),
            snapshot_changed: Condvar::new(),
            last_conf: Mutex::new(None),
            delivered_actions: AtomicU64::new(0),
            delivered_bytes: AtomicU64::new(0),
            debug: opts.debug,
        });
        Ok(Connection {
            shared,
            lifecycle: Mutex::new(Lifecycle::Created),
            seeds: Mutex::new((GroupUuid::NIL, Seqno::NIL)),
            timestamping: opts.self_timestamping,
            worker: Mutex::new(None),
        })
    }

    /// Seeds the node's history position, e.g. from a recovered local
    /// state. Valid only while the connection is closed.
    pub fn init(&self, seqno: Seqno, uuid: GroupUuid) -> Result<()> {
        let lifecycle = self.lifecycle.lock();
        if *lifecycle == Lifecycle::Open {
            return Err(Error::Busy);
        }
        if !seqno.is_legal() {
            return Err(Error::WrongState("seed seqno must be legal"));
        }
        *self.seeds.lock() = (uuid, seqno);
        Ok(())
    }

    /// Joins `channel` and blocks until the first configuration has been
    /// processed. Idempotent while open.
    pub fn open(&self, channel: &str) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if *lifecycle == Lifecycle::Open {
            return Ok(());
        }
        let stream = self.shared.backend.join(channel)?;
        let my_id = self
            .shared
            .backend
            .member_id()
            .ok_or_else(|| Error::Backend("no member id after join".into()))?;

        self.shared.closing.store(false, Ordering::Relaxed);
        self.shared.queue.reopen();
        self.shared.flow.reset();
        *self.shared.last_conf.lock() = None;
        self.shared.flow.set_member_id(my_id.clone());
        {
            let mut snapshot = self.shared.snapshot.lock();
            snapshot.state = NodeState::Open;
            snapshot.local_seqno = Seqno::NIL;
            snapshot.global_seqno = Seqno::NIL;
        }

        let seeds = *self.seeds.lock();
        let core = NodeCore::new(my_id, seeds, self.timestamping);
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("gcs-delivery".into())
            .spawn(move || delivery_worker(shared, core, stream))
            .map_err(|e| Error::Backend(e.to_string()))?;
        *self.worker.lock() = Some(handle);
        *lifecycle = Lifecycle::Open;
        drop(lifecycle);

        // The worker flips the state away from Open at the first CONF.
        let mut snapshot = self.shared.snapshot.lock();
        while snapshot.state == NodeState::Open {
            self.shared.snapshot_changed.wait(&mut snapshot);
        }
        Ok(())
    }

    /// Leaves the channel: cancels outstanding replication requests, drains
    /// the receive stream and joins the worker. Idempotent.
    pub fn close(&self) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle != Lifecycle::Open {
                return Ok(());
            }
            *lifecycle = Lifecycle::Closed;
        }
        self.shared.closing.store(true, Ordering::Relaxed);
        self.shared.backend.close();
        self.shared.queue.close();
        self.shared.table.fail_all(Error::Closed);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        let mut snapshot = self.shared.snapshot.lock();
        snapshot.state = NodeState::Closed;
        self.shared.snapshot_changed.notify_all();
        Ok(())
    }

    /// Submits an action without waiting for its delivery. It will come back
    /// through [`Connection::recv`] in total order like any remote action.
    pub fn send(&self, payload: Vec<u8>, ty: ActionType) -> Result<usize> {
        self.ensure_sendable(ty)?;
        let id = self.shared.alloc_action_id();
        self.shared.send_action(id, ty, &payload)?;
        Ok(payload.len())
    }

    /// Replicates an action: blocks until the group delivers it back and
    /// returns its assigned seqnos. The action does not additionally appear
    /// in this node's [`Connection::recv`] stream.
    pub fn repl(&self, payload: Vec<u8>, ty: ActionType) -> Result<ReplTicket> {
        let completion = self.submit_and_wait(ty, &payload)?;
        let (global_seqno, local_seqno) = match completion {
            Completion::Ordered { global, local } => (global, local),
            Completion::Donor { global, local, .. } => (global, local),
        };
        Ok(ReplTicket {
            size: payload.len(),
            global_seqno,
            local_seqno,
        })
    }

    /// Blocks for the next delivered action. Returns [`Error::Closed`] at
    /// end-of-stream.
    pub fn recv(&self) -> Result<Action> {
        self.shared.queue.pop()
    }

    /// Non-blocking flow-control predicate: [`FlowStatus::Defer`] while any
    /// member's applier lags. Cooperative; the library does not enforce it.
    pub fn wait(&self) -> Result<FlowStatus> {
        if self.shared.snapshot().state == NodeState::Closed {
            return Err(Error::Closed);
        }
        Ok(self.shared.flow.status())
    }

    /// Broadcasts a state transfer request and blocks until the group orders
    /// it. On success the requester's own request is *not* delivered through
    /// [`Connection::recv`]; the application resumes applying at
    /// `local_seqno + 1` once the donor's transfer lands.
    pub fn request_state_transfer(&self, request: Vec<u8>) -> Result<StateTransfer> {
        match self.submit_and_wait(ActionType::StateReq, &request)? {
            Completion::Donor {
                donor_idx, local, ..
            } => Ok(StateTransfer {
                donor_idx,
                local_seqno: local,
            }),
            Completion::Ordered { .. } => Err(Error::WrongState("unexpected completion")),
        }
    }

    /// Reports the end of a state transfer this node served (or received):
    /// `status` is the seqno the state was transferred up to, negative on
    /// failure.
    pub fn join(&self, status: Seqno) -> Result<()> {
        match self.shared.snapshot().state {
            NodeState::Closed => return Err(Error::Closed),
            NodeState::Open | NodeState::NonPrimary => return Err(Error::NotPrimary),
            _ => {}
        }
        let payload = gcs_proto::encode(&status.0)?;
        let id = self.shared.alloc_action_id();
        self.shared.send_action(id, ActionType::Join, &payload)
    }

    /// The last local seqno this node delivered. An observer that later sees
    /// this position has seen every effect visible before the call.
    pub fn caused(&self) -> Result<Seqno> {
        let snapshot = self.shared.snapshot();
        if snapshot.state == NodeState::Closed {
            return Err(Error::Closed);
        }
        Ok(snapshot.local_seqno)
    }

    /// Reports applier progress, feeding flow control and the group commit
    /// cut.
    pub fn set_last_applied(&self, seqno: Seqno) -> Result<()> {
        if self.shared.snapshot().state == NodeState::Closed {
            return Err(Error::Closed);
        }
        if self.shared.flow.note_applied(seqno) {
            self.shared.broadcast_flow(false);
        }
        let report = gcs_proto::encode(&ServiceMsg::LastApplied { seqno })?;
        let id = self.shared.alloc_action_id();
        self.shared.send_action(id, ActionType::Service, &report)
    }

    /// Changes the fragmentation target for subsequent sends.
    pub fn set_pkt_size(&self, pkt_size: usize) -> Result<()> {
        if pkt_size < MIN_PKT_SIZE {
            return Err(Error::BadPacketSize(pkt_size));
        }
        self.shared.pkt_size.store(pkt_size, Ordering::Relaxed);
        Ok(())
    }

    /// The node's position in its group state machine.
    pub fn state(&self) -> NodeState {
        self.shared.snapshot().state
    }

    /// The configuration the node currently operates under. The first one
    /// after [`Connection::open`] is reported only here; every later change
    /// is additionally delivered in-stream as a CONF action.
    pub fn conf(&self) -> Option<ConfPayload> {
        self.shared.last_conf.lock().clone()
    }

    pub fn stats(&self) -> Stats {
        let snapshot = self.shared.snapshot();
        Stats {
            state: snapshot.state,
            recv_queue_len: self.shared.queue.len(),
            repl_outstanding: self.shared.table.len(),
            delivered_actions: self.shared.delivered_actions.load(Ordering::Relaxed),
            delivered_bytes: self.shared.delivered_bytes.load(Ordering::Relaxed),
            paused_members: self.shared.flow.paused_members(),
            last_applied: self.shared.flow.last_applied(),
        }
    }

    fn ensure_sendable(&self, ty: ActionType) -> Result<()> {
        if !ty.is_app_sendable() {
            return Err(Error::BadType(ty));
        }
        match self.shared.snapshot().state {
            NodeState::Closed => Err(Error::Closed),
            NodeState::Open | NodeState::NonPrimary => Err(Error::NotPrimary),
            _ => Ok(()),
        }
    }

    fn submit_and_wait(&self, ty: ActionType, payload: &[u8]) -> Result<Completion> {
        self.ensure_sendable(ty)?;
        let id = self.shared.alloc_action_id();
        let waiter = self.shared.table.register(id);
        if let Err(err) = self.shared.send_action(id, ty, payload) {
            self.shared.table.unregister(id);
            return Err(err);
        }
        waiter.wait()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn delivery_worker(shared: Arc<Shared>, mut core: NodeCore, mut stream: EventStream) {
    let mut effects = Vec::new();
    loop {
        let event = stream.recv();
        if shared.debug {
            debug!(?event, "delivery event");
        }
        let done = matches!(event, BackendEvent::Closed);
        match event {
            BackendEvent::View(view) => core.handle_view(view, &mut effects),
            BackendEvent::Message { sender, payload } => match Frame::from_bytes(&payload) {
                Ok(frame) => core.handle_frame(sender, frame, &mut effects),
                Err(err) => warn!(%sender, %err, "undecodable frame, dropping"),
            },
            BackendEvent::Closed => {
                let expected = shared.closing.load(Ordering::Relaxed);
                core.handle_stream_closed(expected, &mut effects);
            }
        }
        // Bookkeeping first, then the snapshot, then anything that unblocks
        // a caller: whoever wakes up must already see this event's state.
        apply_bookkeeping(&shared, &mut effects);
        shared.publish(&core);
        apply_signaling(&shared, &mut effects);
        if done {
            shared.queue.close();
            break;
        }
    }
}

fn apply_bookkeeping(shared: &Arc<Shared>, effects: &mut Vec<Effect>) {
    effects.retain_mut(|effect| match effect {
        Effect::ConfInfo(conf) => {
            *shared.last_conf.lock() = Some(conf.clone());
            false
        }
        Effect::Flow { member, pause } => {
            shared.flow.on_flow(member, *pause);
            false
        }
        Effect::FlowReset => {
            if shared.flow.reset_members() {
                shared.broadcast_flow(true);
            }
            false
        }
        _ => true,
    });
}

fn apply_signaling(shared: &Arc<Shared>, effects: &mut Vec<Effect>) {
    for effect in effects.drain(..) {
        match effect {
            Effect::Deliver(action) => deliver(shared, action),
            Effect::SelfDeliver {
                id,
                completion,
                action,
            } => {
                // The repl completion is a delivery too: the caller's
                // applier owns it from here, so it counts toward lag.
                if shared.flow.note_delivered(action.global_seqno) {
                    shared.broadcast_flow(true);
                }
                if !shared.table.complete(id, completion) {
                    // No waiter: the action came from a plain `send` and the
                    // application expects it in the stream.
                    deliver(shared, action);
                }
            }
            Effect::Fail { id, error } => {
                shared.table.fail(id, error);
            }
            Effect::FailAll(error) => shared.table.fail_all(error),
            Effect::Broadcast { ty, payload } => shared.broadcast(ty, &payload),
            Effect::ConfInfo(_) | Effect::Flow { .. } | Effect::FlowReset => {
                unreachable!("consumed by apply_bookkeeping")
            }
        }
    }
}

fn deliver(shared: &Arc<Shared>, action: Action) {
    if shared.flow.note_delivered(action.global_seqno) {
        shared.broadcast_flow(true);
    }
    shared
        .delivered_actions
        .fetch_add(1, Ordering::Relaxed);
    shared
        .delivered_bytes
        .fetch_add(action.size() as u64, Ordering::Relaxed);
    if shared.queue.push(action).is_err() {
        debug!("receive queue closed, dropping delivery");
    }
}
