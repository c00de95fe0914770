//! Channels between the supervisor and its workers.
//!
//! - [`command_channel`]: one bounded FIFO per worker, with an out-of-band
//!   shutdown flag that capacity can never block.
//! - [`result_channel`]: the shared, bounded outbound channel of
//!   [`schema::DetectionEvent`]s. Publishing never blocks; overflow drops the
//!   newest event and counts it.

pub mod command_channel;
pub mod errors;
pub mod result_sink;

pub use command_channel::{CommandReceiver, CommandSender, command_channel};
pub use errors::BridgeError;
pub use result_sink::{ResultSink, ResultStream, result_channel};
