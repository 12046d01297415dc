use gcs::action::Action;
use gcs::error::Error;
use gcs::queue::RecvQueue;
use gcs_proto::types::{ActionType, Seqno};
use std::sync::Arc;
use std::time::Duration;

fn action(n: i64) -> Action {
    Action {
        action_type: ActionType::Tordered,
        global_seqno: Seqno(n),
        local_seqno: Seqno(n),
        sender_idx: 0,
        payload: vec![n as u8],
        timestamp: None,
    }
}

#[test]
fn test_fifo_order() {
    let queue = RecvQueue::new(8);
    queue.reopen();
    for n in 1..=5 {
        queue.push(action(n)).unwrap();
    }
    for n in 1..=5 {
        assert_eq!(queue.pop().unwrap().local_seqno, Seqno(n));
    }
}

#[test]
fn test_starts_closed_until_reopened() {
    let queue = RecvQueue::new(8);
    assert_eq!(queue.pop(), Err(Error::Closed));
    assert_eq!(queue.push(action(1)), Err(Error::Closed));
    queue.reopen();
    queue.push(action(1)).unwrap();
    assert_eq!(queue.pop().unwrap().local_seqno, Seqno(1));
}

#[test]
fn test_pop_blocks_until_push() {
    let queue = Arc::new(RecvQueue::new(8));
    queue.reopen();
    let popper = {
        let queue = Arc::clone(&queue);
        std::thread::spawn(move || queue.pop())
    };
    std::thread::sleep(Duration::from_millis(50));
    queue.push(action(42)).unwrap();
    assert_eq!(popper.join().unwrap().unwrap().local_seqno, Seqno(42));
}

#[test]
fn test_push_blocks_at_capacity() {
    let queue = Arc::new(RecvQueue::new(2));
    queue.reopen();
    queue.push(action(1)).unwrap();
    queue.push(action(2)).unwrap();

    let pusher = {
        let queue = Arc::clone(&queue);
        std::thread::spawn(move || queue.push(action(3)))
    };
    std::thread::sleep(Duration::from_millis(50));
    assert!(!pusher.is_finished(), "push should block while full");

    assert_eq!(queue.pop().unwrap().local_seqno, Seqno(1));
    pusher.join().unwrap().unwrap();
    assert_eq!(queue.len(), 2);
}

#[test]
fn test_close_drains_then_ends() {
    let queue = RecvQueue::new(8);
    queue.reopen();
    queue.push(action(1)).unwrap();
    queue.push(action(2)).unwrap();
    queue.close();

    assert_eq!(queue.pop().unwrap().local_seqno, Seqno(1));
    assert_eq!(queue.pop().unwrap().local_seqno, Seqno(2));
    assert_eq!(queue.pop(), Err(Error::Closed));
    assert_eq!(queue.push(action(3)), Err(Error::Closed));
}

#[test]
fn test_close_wakes_blocked_threads() {
    let queue = Arc::new(RecvQueue::new(1));
    queue.reopen();
    queue.push(action(1)).unwrap();

    let pusher = {
        let queue = Arc::clone(&queue);
        std::thread::spawn(move || queue.push(action(2)))
    };
    let popper = {
        let queue = Arc::clone(&queue);
        std::thread::spawn(move || {
            // Drain the one item, then block on the empty queue.
            let first = queue.pop();
            let second = queue.pop();
            (first, second)
        })
    };
    std::thread::sleep(Duration::from_millis(50));
    queue.close();

    let push_result = pusher.join().unwrap();
    assert!(matches!(push_result, Ok(()) | Err(Error::Closed)));
    let (first, second) = popper.join().unwrap();
    assert!(first.is_ok());
    // The second pop either got the racing push or the end of the stream.
    if let Err(err) = second {
        assert_eq!(err, Error::Closed);
    }
}
