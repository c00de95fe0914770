//! Value types shared by the supervisor, its workers, and callers: stream
//! identifiers, commands, and the detection events published on the result
//! channel, together with their JSON literal shapes.

pub mod command;
pub mod errors;
pub mod event;
pub mod stream_id;

pub use command::Command;
pub use errors::SchemaError;
pub use event::{Detection, DetectionEvent, EventKind};
pub use stream_id::StreamId;
