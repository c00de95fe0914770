use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Command queue full")]
    QueueFull,

    #[error("Channel disconnected")]
    Disconnected,
}
