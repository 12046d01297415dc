use gcs::backend::dummy;
use gcs::{ActionType, ConfPayload, Connection, Error, NodeState, Options, Seqno};
use std::time::{Duration, Instant};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn recv_conf(conn: &Connection) -> ConfPayload {
    loop {
        let action = conn.recv().unwrap();
        if action.action_type == ActionType::Conf {
            return ConfPayload::from_bytes(&action.payload).unwrap();
        }
    }
}

/// A member dies mid-action: its fragments are dropped on the survivors,
/// the survivors see a two-member configuration, and the dead member's
/// replication call fails.
#[test]
fn test_member_crash_mid_action() {
    init_tracing();
    let a = Connection::create("dummy://", Options::default()).unwrap();
    a.open("vc_crash").unwrap();
    let b = Connection::create("dummy://", Options::default()).unwrap();
    b.open("vc_crash").unwrap();
    let c = Connection::create("dummy://", Options::default()).unwrap();
    c.open("vc_crash").unwrap();

    // Drain the join configurations, then settle the group with one ordered
    // round so every worker has finished its join-time housekeeping.
    assert_eq!(recv_conf(&a).memb_num(), 2);
    assert_eq!(recv_conf(&a).memb_num(), 3);
    assert_eq!(recv_conf(&b).memb_num(), 3);
    let settle = a.repl(b"settle".to_vec(), ActionType::Tordered).unwrap();
    assert_eq!(settle.global_seqno, Seqno(1));
    assert_eq!(b.recv().unwrap().payload, b"settle");
    assert_eq!(c.recv().unwrap().payload, b"settle");

    // B will manage two frames of its large action, then die.
    b.set_pkt_size(50).unwrap();
    dummy::crash_after_frames("", "vc_crash", "node1", 2);
    let result = b.repl(vec![0x5A; 200], ActionType::Tordered);
    assert!(result.is_err(), "crashed mid-send, got {:?}", result);

    // Survivors observe the shrunken configuration; the partial action from
    // B never surfaces.
    for survivor in [&a, &c] {
        let conf = recv_conf(survivor);
        assert_eq!(conf.memb_num(), 2);
        assert!(conf.is_primary());
        assert!(!conf.members.contains(&"node1".to_owned()));
    }

    // The group still orders traffic for the survivors.
    let ticket = a.repl(b"after".to_vec(), ActionType::Tordered).unwrap();
    assert_eq!(ticket.global_seqno, Seqno(2));
    let action = c.recv().unwrap();
    assert_eq!(action.action_type, ActionType::Tordered);
    assert_eq!(action.payload, b"after");
    assert_eq!(action.global_seqno, Seqno(2));

    // The dead member's stream ends with an in-band error.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match b.recv() {
            Ok(action) if action.action_type == ActionType::Error => break,
            Ok(_) => {}
            Err(Error::Closed) => break,
            Err(other) => panic!("unexpected error {:?}", other),
        }
        assert!(Instant::now() < deadline, "no error surfaced on b");
    }

    a.close().unwrap();
    c.close().unwrap();
    b.close().unwrap();
}

/// Losing the primary component fails ordered submissions and delivers a
/// `conf_id = -1` configuration; regaining it resumes ordering.
#[test]
fn test_non_primary_round_trip() {
    init_tracing();
    let a = Connection::create("dummy://", Options::default()).unwrap();
    a.open("vc_nonprim").unwrap();
    let b = Connection::create("dummy://", Options::default()).unwrap();
    b.open("vc_nonprim").unwrap();
    assert_eq!(recv_conf(&a).memb_num(), 2);

    let ticket = a.repl(b"one".to_vec(), ActionType::Tordered).unwrap();
    assert_eq!(ticket.global_seqno, Seqno(1));
    assert_eq!(b.recv().unwrap().payload, b"one");

    dummy::set_non_primary("", "vc_nonprim", true);
    for conn in [&a, &b] {
        let conf = recv_conf(conn);
        assert!(!conf.is_primary());
        assert_eq!(conf.conf_id, ConfPayload::NON_PRIMARY);
        assert_eq!(conf.memb_num(), 2);
    }
    assert_eq!(a.state(), NodeState::NonPrimary);
    assert_eq!(
        a.repl(b"lost".to_vec(), ActionType::Tordered),
        Err(Error::NotPrimary)
    );

    dummy::set_non_primary("", "vc_nonprim", false);
    for conn in [&a, &b] {
        let conf = recv_conf(conn);
        assert!(conf.is_primary());
        // History survived the partition.
        assert_eq!(conf.seqno, Seqno(1));
    }
    let ticket = a.repl(b"two".to_vec(), ActionType::Tordered).unwrap();
    assert_eq!(ticket.global_seqno, Seqno(2));
    assert_eq!(b.recv().unwrap().payload, b"two");

    a.close().unwrap();
    b.close().unwrap();
}

/// A kicked member's handle degrades to closed; the survivor continues.
#[test]
fn test_kicked_member_sees_end_of_stream() {
    init_tracing();
    let a = Connection::create("dummy://", Options::default()).unwrap();
    a.open("vc_kick").unwrap();
    let b = Connection::create("dummy://", Options::default()).unwrap();
    b.open("vc_kick").unwrap();
    assert_eq!(recv_conf(&a).memb_num(), 2);

    dummy::kick("", "vc_kick", "node1");

    let conf = recv_conf(&a);
    assert_eq!(conf.memb_num(), 1);

    // B's stream ends (possibly after an in-band ERROR) and its calls
    // degrade.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match b.recv() {
            Err(Error::Closed) => break,
            Ok(_) => {}
            Err(other) => panic!("unexpected error {:?}", other),
        }
        assert!(Instant::now() < deadline, "b never reached end-of-stream");
    }
    assert_eq!(b.caused(), Err(Error::Closed));

    a.repl(b"alone".to_vec(), ActionType::Tordered).unwrap();
    a.close().unwrap();
    b.close().unwrap();
}

/// Departed members' unfinished actions never cross a view boundary: only
/// whole actions ever surface on the survivor.
#[test]
fn test_partial_never_crosses_view() {
    init_tracing();
    let a = Connection::create("dummy://", Options::default()).unwrap();
    a.open("vc_partial").unwrap();
    let b = Connection::create("dummy://", Options::default()).unwrap();
    b.open("vc_partial").unwrap();
    assert_eq!(recv_conf(&a).memb_num(), 2);

    // Settle so B's join-time broadcasts are out before the crash rule.
    let settle = b.repl(b"settle".to_vec(), ActionType::Tordered).unwrap();
    assert_eq!(settle.global_seqno, Seqno(1));
    assert_eq!(a.recv().unwrap().payload, b"settle");

    b.set_pkt_size(50).unwrap();
    dummy::crash_after_frames("", "vc_partial", "node1", 1);
    assert!(b.repl(vec![0xEE; 100], ActionType::Tordered).is_err());

    let conf = recv_conf(&a);
    assert_eq!(conf.memb_num(), 1);

    // Nothing of the partial ever surfaces; ordering continues.
    let ticket = a.repl(b"whole".to_vec(), ActionType::Tordered).unwrap();
    assert_eq!(ticket.global_seqno, Seqno(2));
    assert_eq!(a.stats().recv_queue_len, 0);

    a.close().unwrap();
    b.close().unwrap();
}
