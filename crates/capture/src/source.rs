use crate::frame::Frame;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("failed to connect to {uri}: {reason}")]
    Connect { uri: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("frame read timed out")]
    Timeout,

    #[error("end of stream")]
    Eof,

    #[error("frame read failed: {0}")]
    Failed(String),
}

/// Opens connections to video sources. Shared by every worker.
pub trait SourceConnector: Send + Sync {
    fn open(&self, source_uri: &str) -> Result<Box<dyn FrameStream>, SourceError>;
}

/// An open connection, owned by the session that opened it.
pub trait FrameStream {
    /// Read the next frame, returning `ReadError::Timeout` if none arrives
    /// within `timeout`. Implementations must honor the bound.
    fn read_frame(&mut self, timeout: Duration) -> Result<Frame, ReadError>;

    /// Release the underlying connection. Called once, before drop.
    fn close(&mut self) {}
}
