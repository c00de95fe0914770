use crate::{errors::SchemaError, stream_id::StreamId};
use serde::{Deserialize, Serialize};

/// Instruction addressed to the worker that owns a stream.
///
/// JSON shape: `{"type": "START"|"STOP"|"SHUTDOWN", "stream_id": ..., "source_uri": ...}`.
/// The legacy key `rtsp` is accepted in place of `source_uri`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireCommand", into = "WireCommand")]
pub enum Command {
    Start {
        stream_id: StreamId,
        source_uri: String,
    },
    Stop {
        stream_id: StreamId,
    },
    Shutdown,
}

impl Command {
    pub fn start(
        stream_id: impl Into<String>,
        source_uri: impl Into<String>,
    ) -> Result<Self, SchemaError> {
        let stream_id = StreamId::new(stream_id)?;
        let source_uri = source_uri.into();
        if source_uri.is_empty() {
            return Err(SchemaError::EmptySourceUri);
        }
        Ok(Command::Start {
            stream_id,
            source_uri,
        })
    }

    pub fn stop(stream_id: impl Into<String>) -> Result<Self, SchemaError> {
        Ok(Command::Stop {
            stream_id: StreamId::new(stream_id)?,
        })
    }

    pub fn from_json(line: &str) -> Result<Self, SchemaError> {
        Ok(serde_json::from_str(line)?)
    }

    pub fn to_json(&self) -> Result<String, SchemaError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Target stream, or `None` for `Shutdown`.
    pub fn stream_id(&self) -> Option<&StreamId> {
        match self {
            Command::Start { stream_id, .. } | Command::Stop { stream_id } => Some(stream_id),
            Command::Shutdown => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Command::Start { .. } => "START",
            Command::Stop { .. } => "STOP",
            Command::Shutdown => "SHUTDOWN",
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
enum WireCommand {
    Start {
        stream_id: String,
        #[serde(alias = "rtsp")]
        source_uri: String,
    },
    Stop {
        stream_id: String,
    },
    Shutdown,
}

impl TryFrom<WireCommand> for Command {
    type Error = SchemaError;

    fn try_from(wire: WireCommand) -> Result<Self, Self::Error> {
        match wire {
            WireCommand::Start {
                stream_id,
                source_uri,
            } => Command::start(stream_id, source_uri),
            WireCommand::Stop { stream_id } => Command::stop(stream_id),
            WireCommand::Shutdown => Ok(Command::Shutdown),
        }
    }
}

impl From<Command> for WireCommand {
    fn from(command: Command) -> Self {
        match command {
            Command::Start {
                stream_id,
                source_uri,
            } => WireCommand::Start {
                stream_id: stream_id.into(),
                source_uri,
            },
            Command::Stop { stream_id } => WireCommand::Stop {
                stream_id: stream_id.into(),
            },
            Command::Shutdown => WireCommand::Shutdown,
        }
    }
}
