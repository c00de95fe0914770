use bridge::{BridgeError, command_channel};
use schema::Command;
use std::thread;
use std::time::{Duration, Instant};

fn start(id: &str) -> Command {
    Command::start(id, format!("rtsp://cameras/{id}")).unwrap()
}

/// Test queue backpressure
///
/// Tests:
/// - N sends fit in a queue of capacity N
/// - The N+1th send waits the bounded time and fails with QueueFull
/// - Draining one slot makes room again
#[test]
fn test_full_queue_rejects_after_bounded_wait() {
    let capacity = 3;
    let (tx, rx) = command_channel(capacity);
    let wait = Duration::from_millis(20);

    for i in 0..capacity {
        tx.send(start(&format!("cam{i}")), wait)
            .unwrap_or_else(|e| panic!("send {i} should fit: {e}"));
    }
    assert_eq!(tx.len(), capacity);

    let begun = Instant::now();
    let result = tx.send(start("overflow"), wait);
    assert_eq!(result, Err(BridgeError::QueueFull), "Queue at capacity must reject");
    assert!(
        begun.elapsed() >= wait,
        "Rejection should only happen after the bounded wait"
    );

    assert!(rx.try_recv().is_some());
    assert!(
        tx.send(start("overflow"), wait).is_ok(),
        "A freed slot should accept the retried command"
    );
}

/// Test FIFO ordering for a single producer
#[test]
fn test_commands_arrive_in_dispatch_order() {
    let (tx, rx) = command_channel(16);
    let wait = Duration::from_millis(10);

    tx.send(start("cam1"), wait).unwrap();
    tx.send(Command::stop("cam1").unwrap(), wait).unwrap();
    tx.send(start("cam1"), wait).unwrap();

    assert_eq!(rx.try_recv(), Some(start("cam1")));
    assert_eq!(rx.try_recv(), Some(Command::stop("cam1").unwrap()));
    assert_eq!(rx.try_recv(), Some(start("cam1")));
    assert_eq!(rx.try_recv(), None);
}

/// Test that shutdown is never starved by a full queue
#[test]
fn test_shutdown_bypasses_capacity() {
    let (tx, rx) = command_channel(1);
    tx.send(start("cam1"), Duration::ZERO).unwrap();

    tx.request_shutdown();

    assert!(
        rx.shutdown_requested(),
        "Shutdown flag must be visible even though the queue is full"
    );
    assert_eq!(rx.try_recv(), Some(start("cam1")));
    assert_eq!(rx.try_recv(), None, "No wake-up message fits a full queue");
}

/// Test that a blocked consumer is woken by a shutdown request
#[test]
fn test_shutdown_wakes_blocked_consumer() {
    let (tx, rx) = command_channel(4);

    let consumer = thread::spawn(move || {
        let received = rx.recv_timeout(Duration::from_secs(5));
        (received, rx.shutdown_requested())
    });

    thread::sleep(Duration::from_millis(20));
    tx.request_shutdown();

    let (received, flagged) = consumer.join().unwrap();
    assert_eq!(received, Some(Command::Shutdown));
    assert!(flagged);
}

/// Test multiple producers feeding one consumer
#[test]
fn test_concurrent_producers() {
    let (tx, rx) = command_channel(64);
    let producers: Vec<_> = (0..4)
        .map(|p| {
            let tx = tx.clone();
            thread::spawn(move || {
                for i in 0..10 {
                    tx.send(start(&format!("p{p}-cam{i}")), Duration::from_secs(1))
                        .unwrap();
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }

    let received: Vec<_> = std::iter::from_fn(|| rx.try_recv()).collect();
    assert_eq!(received.len(), 40);

    // Per-producer order is preserved
    for p in 0..4 {
        let ids: Vec<_> = received
            .iter()
            .filter_map(|c| c.stream_id())
            .filter(|id| id.as_str().starts_with(&format!("p{p}-")))
            .map(|id| id.to_string())
            .collect();
        let expected: Vec<_> = (0..10).map(|i| format!("p{p}-cam{i}")).collect();
        assert_eq!(ids, expected);
    }
}

/// Test that sending to a worker that went away is reported, not hidden
#[test]
fn test_send_after_consumer_dropped() {
    let (tx, rx) = command_channel(4);
    drop(rx);

    assert_eq!(
        tx.send(start("cam1"), Duration::from_millis(5)),
        Err(BridgeError::Disconnected)
    );
}
