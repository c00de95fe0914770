use crate::errors::SupervisorError;
use anyhow::{Context, Result};
use capture::{Backoff, SessionPolicy};
use common::{Environment, env_or, env_string};
use inference::{Accelerator, PostFilter, parse_accelerators};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub environment: Environment,
    pub worker_count: usize,
    /// Assigned to workers round-robin: worker `i` gets `accelerators[i % len]`.
    pub accelerators: Vec<Accelerator>,
    pub command_queue_capacity: usize,
    pub result_queue_capacity: usize,
    /// How long `dispatch` waits for room before failing with `QueueFull`.
    pub dispatch_timeout: Duration,
    pub frame_timeout: Duration,
    pub stale_threshold: Duration,
    pub reconnect_backoff: Backoff,
    /// Longest an idle worker blocks on its command queue.
    pub idle_poll: Duration,
    pub startup_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub confidence_threshold: f32,
    pub max_detections: usize,
    pub otel_endpoint: Option<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            worker_count: 2,
            accelerators: vec![Accelerator::Gpu(0)],
            command_queue_capacity: 200,
            result_queue_capacity: 1000,
            dispatch_timeout: Duration::from_millis(100),
            frame_timeout: Duration::from_millis(500),
            stale_threshold: Duration::from_secs(5),
            reconnect_backoff: Backoff::default(),
            idle_poll: Duration::from_millis(10),
            startup_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
            confidence_threshold: inference::postprocessing::DEFAULT_CONFIDENCE_THRESHOLD,
            max_detections: inference::postprocessing::DEFAULT_MAX_DETECTIONS,
            otel_endpoint: None,
        }
    }
}

fn env_millis(key: &str, default: Duration) -> Duration {
    Duration::from_millis(env_or(key, default.as_millis() as u64))
}

impl SupervisorConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let accelerators = match env_string("ACCELERATORS") {
            Some(list) => parse_accelerators(&list).context("Invalid ACCELERATORS")?,
            None => defaults.accelerators,
        };

        let reconnect_backoff = Backoff::new(
            env_millis("RECONNECT_BASE_MS", defaults.reconnect_backoff.base),
            env_millis("RECONNECT_MAX_MS", defaults.reconnect_backoff.max),
        );

        Ok(Self {
            environment: Environment::from_env(),
            worker_count: env_or("WORKER_COUNT", defaults.worker_count),
            accelerators,
            command_queue_capacity: env_or(
                "COMMAND_QUEUE_CAPACITY",
                defaults.command_queue_capacity,
            ),
            result_queue_capacity: env_or("RESULT_QUEUE_CAPACITY", defaults.result_queue_capacity),
            dispatch_timeout: env_millis("DISPATCH_TIMEOUT_MS", defaults.dispatch_timeout),
            frame_timeout: env_millis("FRAME_TIMEOUT_MS", defaults.frame_timeout),
            stale_threshold: env_millis("STALE_THRESHOLD_MS", defaults.stale_threshold),
            reconnect_backoff,
            idle_poll: env_millis("IDLE_POLL_MS", defaults.idle_poll),
            startup_timeout: env_millis("STARTUP_TIMEOUT_MS", defaults.startup_timeout),
            shutdown_timeout: env_millis("SHUTDOWN_TIMEOUT_MS", defaults.shutdown_timeout),
            confidence_threshold: Some(env_or(
                "CONFIDENCE_THRESHOLD",
                defaults.confidence_threshold,
            ))
            .filter(|t| t.is_finite())
            .unwrap_or(defaults.confidence_threshold),
            max_detections: env_or("MAX_DETECTIONS", defaults.max_detections),
            otel_endpoint: env_string("OTEL_EXPORTER_OTLP_ENDPOINT"),
        })
    }

    pub fn validate(&self) -> Result<(), SupervisorError> {
        if self.worker_count == 0 {
            return Err(SupervisorError::InvalidConfig(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.accelerators.is_empty() {
            return Err(SupervisorError::InvalidConfig(
                "at least one accelerator is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Accelerator of `worker_id`. Falls back to CPU only for an empty list,
    /// which `validate` rejects.
    pub fn accelerator_for(&self, worker_id: usize) -> Accelerator {
        if self.accelerators.is_empty() {
            return Accelerator::Cpu;
        }
        self.accelerators[worker_id % self.accelerators.len()]
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            frame_timeout: self.frame_timeout,
            stale_threshold: self.stale_threshold,
            backoff: self.reconnect_backoff,
        }
    }

    pub fn post_filter(&self) -> PostFilter {
        PostFilter::new(self.confidence_threshold, self.max_detections)
    }
}
