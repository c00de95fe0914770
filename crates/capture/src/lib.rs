pub mod backoff;
pub mod frame;
pub mod session;
pub mod source;
pub mod synthetic;

pub use backoff::Backoff;
pub use frame::Frame;
pub use session::{SessionOutcome, SessionPolicy, StaleReason, StreamSession, StreamState};
pub use source::{FrameStream, ReadError, SourceConnector, SourceError};
pub use synthetic::SyntheticConnector;
