use inference::ModelLoadError;
use schema::StreamId;
use std::io;
use thiserror::Error;

/// Why a command could not be handed to its worker. Returned to the caller
/// of [`crate::Supervisor::dispatch`]; nothing is retried internally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("command queue of worker {worker_id} is full (stream {stream_id})")]
    QueueFull {
        worker_id: usize,
        stream_id: StreamId,
    },

    #[error("worker {worker_id} owning stream {stream_id} is no longer running")]
    UnknownTarget {
        worker_id: usize,
        stream_id: StreamId,
    },
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn worker {worker_id}: {source}")]
    Spawn {
        worker_id: usize,
        #[source]
        source: io::Error,
    },

    #[error("worker {worker_id} failed to load its model: {source}")]
    ModelLoadFailed {
        worker_id: usize,
        #[source]
        source: ModelLoadError,
    },

    #[error("workers {workers:?} did not report ready in time")]
    StartupTimeout { workers: Vec<usize> },

    #[error("workers {workers:?} exited before reporting ready")]
    WorkerLost { workers: Vec<usize> },

    #[error("workers {workers:?} did not stop within the shutdown timeout")]
    ShutdownTimeout { workers: Vec<usize> },
}
