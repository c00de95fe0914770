//! Multi-stream detection supervisor.
//!
//! A [`Supervisor`] owns a fixed pool of workers. Every stream id is routed by
//! a stable hash to one worker, which owns the stream's session for its whole
//! life, reads its frames, runs the detector, and publishes
//! [`schema::DetectionEvent`]s on the shared result channel.

pub mod config;
pub mod errors;
mod metrics;
pub mod router;
pub mod supervisor;
pub mod worker;

pub use config::SupervisorConfig;
pub use errors::{DispatchError, SupervisorError};
pub use router::{CommandRouter, route};
pub use supervisor::Supervisor;
pub use worker::{Worker, WorkerSettings, WorkerState, WorkerStatus};
