use crate::errors::BridgeError;
use crossbeam_channel::{
    Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError, bounded,
};
use schema::Command;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

/// Create the bounded command queue of a single worker.
///
/// A capacity of zero is raised to one so that `send` never degenerates into a
/// rendezvous with the consumer.
pub fn command_channel(capacity: usize) -> (CommandSender, CommandReceiver) {
    let (tx, rx) = bounded(capacity.max(1));
    let shutdown = Arc::new(AtomicBool::new(false));
    (
        CommandSender {
            tx,
            shutdown: Arc::clone(&shutdown),
        },
        CommandReceiver { rx, shutdown },
    )
}

/// Producer side. Cloneable: any number of callers may dispatch concurrently.
#[derive(Clone)]
pub struct CommandSender {
    tx: Sender<Command>,
    shutdown: Arc<AtomicBool>,
}

impl CommandSender {
    /// Enqueue `command`, waiting at most `wait` for room.
    pub fn send(&self, command: Command, wait: Duration) -> Result<(), BridgeError> {
        self.tx.send_timeout(command, wait).map_err(|e| match e {
            SendTimeoutError::Timeout(_) => BridgeError::QueueFull,
            SendTimeoutError::Disconnected(_) => BridgeError::Disconnected,
        })
    }

    /// Ask the consumer to drain and exit.
    ///
    /// The flag is raised regardless of queue occupancy; the trailing
    /// `Shutdown` message only serves to wake a consumer blocked in
    /// `recv_timeout` and is skipped when the queue is full.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.tx.try_send(Command::Shutdown);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(usize::MAX)
    }
}

/// Consumer side, owned by exactly one worker.
pub struct CommandReceiver {
    rx: Receiver<Command>,
    shutdown: Arc<AtomicBool>,
}

impl CommandReceiver {
    /// Take the next queued command without blocking.
    pub fn try_recv(&self) -> Option<Command> {
        match self.rx.try_recv() {
            Ok(command) => Some(command),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.mark_orphaned();
                None
            }
        }
    }

    /// Block up to `timeout` for the next command.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Command> {
        match self.rx.recv_timeout(timeout) {
            Ok(command) => Some(command),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                self.mark_orphaned();
                None
            }
        }
    }

    /// Number of commands currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// True once shutdown was requested or every sender has been dropped.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn mark_orphaned(&self) {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            tracing::warn!("Command channel has no senders left, treating as shutdown");
        }
    }
}
