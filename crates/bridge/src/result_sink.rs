use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use opentelemetry::{KeyValue, global, metrics::Counter};
use schema::DetectionEvent;
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

/// Create the shared result channel.
pub fn result_channel(capacity: usize) -> (ResultSink, ResultStream) {
    let (tx, rx) = bounded(capacity.max(1));
    let meter = global::meter("bridge");
    let published_counter = meter
        .u64_counter("results_published_total")
        .with_description("Detection events accepted by the result channel")
        .build();
    let dropped_counter = meter
        .u64_counter("results_dropped_total")
        .with_description("Detection events dropped because the result channel was full")
        .build();

    (
        ResultSink {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            published_counter,
            dropped_counter,
        },
        ResultStream { rx },
    )
}

/// Producer side, cloned into every worker.
#[derive(Clone)]
pub struct ResultSink {
    tx: Sender<DetectionEvent>,
    dropped: Arc<AtomicU64>,
    published_counter: Counter<u64>,
    dropped_counter: Counter<u64>,
}

impl ResultSink {
    /// Publish without blocking. When the channel is full the new event is
    /// discarded and counted; older unread events are kept.
    ///
    /// Returns whether the event was enqueued.
    pub fn publish(&self, event: DetectionEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => {
                self.published_counter.add(1, &[]);
                true
            }
            Err(TrySendError::Full(event)) => {
                let dropped = self.record_drop("full");
                tracing::debug!(
                    stream_id = %event.stream_id,
                    kind = ?event.kind,
                    dropped,
                    "Result channel full, dropping newest event"
                );
                false
            }
            Err(TrySendError::Disconnected(event)) => {
                let dropped = self.record_drop("disconnected");
                tracing::trace!(
                    stream_id = %event.stream_id,
                    dropped,
                    "No result consumer left, dropping event"
                );
                false
            }
        }
    }

    /// Total events dropped by every clone of this sink.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record_drop(&self, reason: &'static str) -> u64 {
        self.dropped_counter
            .add(1, &[KeyValue::new("reason", reason)]);
        self.dropped.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Consumer side. Clones share one queue: each event is received once.
#[derive(Clone)]
pub struct ResultStream {
    rx: Receiver<DetectionEvent>,
}

impl ResultStream {
    /// Block until an event arrives; `None` once every sink is gone and the
    /// queue is empty.
    pub fn recv(&self) -> Option<DetectionEvent> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<DetectionEvent> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<DetectionEvent> {
        self.rx.try_recv().ok()
    }

    /// Drain whatever is currently queued without blocking.
    pub fn try_iter(&self) -> impl Iterator<Item = DetectionEvent> + '_ {
        self.rx.try_iter()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
