use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};

const METER_NAME: &str = "supervisor";

#[derive(Clone)]
pub(crate) struct DispatchMetrics {
    pub dispatched: Counter<u64>,
    pub rejected: Counter<u64>,
}

impl DispatchMetrics {
    pub fn init() -> Self {
        let meter = global::meter(METER_NAME);
        Self {
            dispatched: meter
                .u64_counter("supervisor_commands_dispatched_total")
                .with_description("Commands enqueued on a worker")
                .build(),
            rejected: meter
                .u64_counter("supervisor_commands_rejected_total")
                .with_description("Commands refused (queue full or worker gone)")
                .build(),
        }
    }
}

/// Per-worker instruments. Every measurement carries the worker's
/// `worker_id` and `accelerator` attributes.
pub(crate) struct WorkerMetrics {
    attributes: [KeyValue; 2],
    frames: Counter<u64>,
    detections: Counter<u64>,
    inference_errors: Counter<u64>,
    reconnect_failures: Counter<u64>,
    inference_duration: Histogram<f64>,
}

impl WorkerMetrics {
    pub fn init(worker_id: usize, accelerator: String) -> Self {
        let meter = global::meter(METER_NAME);
        let latency_buckets = [
            0.001, 0.002, 0.005, 0.01, 0.015, 0.02, 0.03, 0.05, 0.075, 0.1, 0.15, 0.2, 0.5, 1.0,
        ];
        Self {
            attributes: [
                KeyValue::new("worker_id", worker_id as i64),
                KeyValue::new("accelerator", accelerator),
            ],
            frames: meter
                .u64_counter("worker_frames_total")
                .with_description("Frames read and passed to the detector")
                .build(),
            detections: meter
                .u64_counter("worker_detections_total")
                .with_description("Detections published after filtering")
                .build(),
            inference_errors: meter
                .u64_counter("worker_inference_errors_total")
                .with_description("Frames skipped because inference failed")
                .build(),
            reconnect_failures: meter
                .u64_counter("worker_reconnect_failures_total")
                .with_description("Failed connection attempts across all streams")
                .build(),
            inference_duration: meter
                .f64_histogram("worker_inference_duration_seconds")
                .with_description("Time spent in the detector per frame")
                .with_unit("s")
                .with_boundaries(latency_buckets.to_vec())
                .build(),
        }
    }

    pub fn frame(&self, detections: usize, seconds: f64) {
        self.frames.add(1, &self.attributes);
        self.detections.add(detections as u64, &self.attributes);
        self.inference_duration.record(seconds, &self.attributes);
    }

    pub fn inference_error(&self) {
        self.inference_errors.add(1, &self.attributes);
    }

    pub fn reconnect_failure(&self) {
        self.reconnect_failures.add(1, &self.attributes);
    }
}
