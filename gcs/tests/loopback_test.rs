use gcs::{ActionType, Connection, Error, GroupUuid, NodeState, Options, Seqno};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn test_replicate_one() {
    init_tracing();
    let conn = Connection::create("dummy://", Options::default()).unwrap();
    conn.open("loopback_one").unwrap();

    let ticket = conn.repl(b"hello".to_vec(), ActionType::Tordered).unwrap();
    assert_eq!(ticket.size, 5);
    assert_eq!(ticket.global_seqno, Seqno(1));
    assert_eq!(ticket.local_seqno, Seqno(1));

    // No more actions: the stream is empty until something else happens.
    assert_eq!(conn.stats().recv_queue_len, 0);
    conn.close().unwrap();
}

#[test]
fn test_send_comes_back_through_recv() {
    init_tracing();
    let conn = Connection::create("dummy://", Options::default()).unwrap();
    conn.open("loopback_send").unwrap();

    let n = conn.send(b"fire and forget".to_vec(), ActionType::Tordered).unwrap();
    assert_eq!(n, 15);

    let action = conn.recv().unwrap();
    assert_eq!(action.action_type, ActionType::Tordered);
    assert_eq!(action.payload, b"fire and forget");
    assert_eq!(action.global_seqno, Seqno(1));
    assert_eq!(action.local_seqno, Seqno(1));
    conn.close().unwrap();
}

#[test]
fn test_caused_tracks_deliveries() {
    init_tracing();
    let conn = Connection::create("dummy://", Options::default()).unwrap();
    conn.open("loopback_caused").unwrap();
    assert_eq!(conn.caused().unwrap(), Seqno::NIL);

    conn.repl(b"a".to_vec(), ActionType::Tordered).unwrap();
    assert_eq!(conn.caused().unwrap(), Seqno(1));
    conn.repl(b"b".to_vec(), ActionType::Tordered).unwrap();
    assert_eq!(conn.caused().unwrap(), Seqno(2));
    conn.close().unwrap();
}

#[test]
fn test_first_conf_through_open() {
    init_tracing();
    let conn = Connection::create("dummy://", Options::default()).unwrap();
    assert!(conn.conf().is_none());
    conn.open("loopback_conf").unwrap();

    let conf = conn.conf().unwrap();
    assert!(conf.is_primary());
    assert_eq!(conf.memb_num(), 1);
    assert_eq!(conf.my_idx, 0);
    assert!(!conf.st_required);
    assert!(!conf.group_uuid.is_nil());
    assert_eq!(conf.seqno, Seqno::NIL);
    conn.close().unwrap();
}

#[test]
fn test_node_reaches_synced() {
    init_tracing();
    let conn = Connection::create("dummy://", Options::default()).unwrap();
    conn.open("loopback_synced").unwrap();
    // The sync broadcast is in flight at open-return; settle it with an
    // ordered round-trip.
    conn.repl(b"x".to_vec(), ActionType::Tordered).unwrap();
    assert_eq!(conn.state(), NodeState::Synced);
    conn.close().unwrap();
    assert_eq!(conn.state(), NodeState::Closed);
}

#[test]
fn test_init_while_open_is_busy() {
    init_tracing();
    let conn = Connection::create("dummy://", Options::default()).unwrap();
    conn.init(Seqno(7), GroupUuid([1; 16])).unwrap();
    conn.open("loopback_busy").unwrap();
    assert_eq!(conn.init(Seqno(8), GroupUuid([1; 16])), Err(Error::Busy));
    conn.close().unwrap();
    // Legal again after close.
    conn.init(Seqno(9), GroupUuid([1; 16])).unwrap();
}

#[test]
fn test_close_idempotent_and_recv_end_of_stream() {
    init_tracing();
    let conn = Connection::create("dummy://", Options::default()).unwrap();
    conn.open("loopback_close").unwrap();
    conn.send(b"last".to_vec(), ActionType::Tordered).unwrap();
    let action = conn.recv().unwrap();
    assert_eq!(action.payload, b"last");

    conn.close().unwrap();
    conn.close().unwrap();
    assert_eq!(conn.recv(), Err(Error::Closed));
    assert_eq!(conn.recv(), Err(Error::Closed));
    assert_eq!(conn.caused(), Err(Error::Closed));
    assert_eq!(conn.wait(), Err(Error::Closed));
}

#[test]
fn test_close_cancels_blocked_recv() {
    init_tracing();
    let conn = std::sync::Arc::new(
        Connection::create("dummy://", Options::default()).unwrap(),
    );
    conn.open("loopback_blocked").unwrap();

    let receiver = {
        let conn = std::sync::Arc::clone(&conn);
        std::thread::spawn(move || conn.recv())
    };
    std::thread::sleep(std::time::Duration::from_millis(50));
    conn.close().unwrap();
    assert_eq!(receiver.join().unwrap(), Err(Error::Closed));
}

#[test]
fn test_send_before_open_fails() {
    init_tracing();
    let conn = Connection::create("dummy://", Options::default()).unwrap();
    assert_eq!(
        conn.send(b"x".to_vec(), ActionType::Tordered),
        Err(Error::Closed)
    );
    assert_eq!(conn.recv(), Err(Error::Closed));
}

#[test]
fn test_library_types_not_sendable() {
    init_tracing();
    let conn = Connection::create("dummy://", Options::default()).unwrap();
    conn.open("loopback_types").unwrap();
    for ty in [
        ActionType::Conf,
        ActionType::Join,
        ActionType::Sync,
        ActionType::Flow,
        ActionType::Service,
        ActionType::Error,
        ActionType::Unknown,
    ] {
        assert_eq!(conn.send(Vec::new(), ty), Err(Error::BadType(ty)));
    }
    conn.close().unwrap();
}

#[test]
fn test_bad_urls() {
    assert!(matches!(
        Connection::create("noscheme", Options::default()),
        Err(Error::BadUrl(_))
    ));
    assert!(matches!(
        Connection::create("smoke://x", Options::default()),
        Err(Error::BadUrl(_))
    ));
    assert!(matches!(
        Connection::create("spread://4803@localhost", Options::default()),
        Err(Error::UnsupportedBackend(_))
    ));
    assert!(matches!(
        Connection::create("gcomm://10.0.0.1", Options::default()),
        Err(Error::UnsupportedBackend(_))
    ));
}

#[test]
fn test_self_timestamping() {
    init_tracing();
    let mut opts = Options::default();
    opts.set_self_timestamping(true);
    let conn = Connection::create("dummy://", opts).unwrap();
    conn.open("loopback_ts").unwrap();
    conn.send(b"stamped".to_vec(), ActionType::Tordered).unwrap();
    let action = conn.recv().unwrap();
    assert!(action.timestamp.is_some());
    conn.close().unwrap();

    let conn = Connection::create("dummy://", Options::default()).unwrap();
    conn.open("loopback_no_ts").unwrap();
    conn.send(b"bare".to_vec(), ActionType::Tordered).unwrap();
    assert!(conn.recv().unwrap().timestamp.is_none());
    conn.close().unwrap();
}

#[test]
fn test_stats_counters() {
    init_tracing();
    let conn = Connection::create("dummy://", Options::default()).unwrap();
    conn.open("loopback_stats").unwrap();
    conn.send(b"12345".to_vec(), ActionType::Tordered).unwrap();
    let action = conn.recv().unwrap();
    assert_eq!(action.size(), 5);

    let stats = conn.stats();
    assert_eq!(stats.state, NodeState::Synced);
    assert_eq!(stats.recv_queue_len, 0);
    assert_eq!(stats.repl_outstanding, 0);
    assert!(stats.delivered_actions >= 1);
    assert!(stats.delivered_bytes >= 5);
    conn.close().unwrap();
}
