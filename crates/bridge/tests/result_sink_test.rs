use bridge::result_channel;
use schema::{DetectionEvent, EventKind, StreamId};
use std::thread;
use std::time::Duration;

fn event(id: &str, seq: usize) -> DetectionEvent {
    DetectionEvent::error(StreamId::new(id).unwrap(), format!("seq {seq}"))
}

/// Test overflow policy
///
/// Tests:
/// - Publishing into a full channel never blocks
/// - The newest event is the one dropped; older unread events survive
/// - Every drop is counted
#[test]
fn test_full_channel_drops_newest_and_counts() {
    let (sink, stream) = result_channel(2);

    assert!(sink.publish(event("cam1", 0)));
    assert!(sink.publish(event("cam1", 1)));
    assert!(!sink.publish(event("cam1", 2)), "Third event must be dropped");
    assert!(!sink.publish(event("cam1", 3)), "Fourth event must be dropped");

    assert_eq!(sink.dropped(), 2);

    let kept: Vec<_> = stream
        .try_iter()
        .map(|e| e.message.unwrap_or_default())
        .collect();
    assert_eq!(kept, vec!["seq 0".to_string(), "seq 1".to_string()]);
}

/// Test that drop accounting is shared by every worker's clone
#[test]
fn test_dropped_count_shared_between_clones() {
    let (sink, _stream) = result_channel(1);
    let other = sink.clone();

    assert!(sink.publish(event("cam1", 0)));
    assert!(!other.publish(event("cam2", 0)));
    assert!(!sink.publish(event("cam1", 1)));

    assert_eq!(sink.dropped(), 2);
    assert_eq!(other.dropped(), 2);
}

/// Test concurrent producers with a live consumer
#[test]
fn test_concurrent_publishers_deliver_everything() {
    let (sink, stream) = result_channel(1024);

    let handles: Vec<_> = (0..4)
        .map(|w| {
            let sink = sink.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    sink.publish(event(&format!("worker{w}"), i));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut received = 0;
    while stream.recv_timeout(Duration::from_millis(50)).is_some() {
        received += 1;
    }
    assert_eq!(received, 200);
    assert_eq!(sink.dropped(), 0);
}

/// Test end-of-stream once every producer is gone
#[test]
fn test_stream_ends_when_sinks_dropped() {
    let (sink, stream) = result_channel(4);
    sink.publish(DetectionEvent::stream_closed(StreamId::new("cam1").unwrap()));
    drop(sink);

    let last = stream.recv().expect("queued event is still delivered");
    assert_eq!(last.kind, EventKind::StreamClosed);
    assert!(stream.recv().is_none());
}
