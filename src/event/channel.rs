//! # Event Channel
//!
//! Transport between platform callback threads and the scripting thread.
//!
//! The write end ([`CommandSender`]) is `Send + Clone` and never blocks, so
//! it can be handed to whatever thread the platform SDK calls back on. The
//! read end ([`CommandReceiver`]) belongs to the dispatcher. Awaiting it
//! parks the scripting thread's dispatch task until a command is queued;
//! the tokio runtime is the readiness loop, so there is no polling.
//!
//! Commands move through the channel whole. A send that cannot complete
//! means the read end is gone, which is treated as a broken control
//! channel: it is logged at error level and reported, never retried.

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, error};

use super::command::Command;

#[derive(Error, Debug, PartialEq)]
pub enum ChannelError {
    #[error("Failed to write command {kind}: channel closed")]
    Closed { kind: String },
}

pub type ChannelResult<T> = Result<T, ChannelError>;

/// Opens a connected pair of channel ends.
pub fn open() -> (CommandSender, CommandReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    debug!("event channel opened");
    (CommandSender { sender }, CommandReceiver { receiver })
}

#[derive(Debug, Clone)]
pub struct CommandSender {
    sender: mpsc::UnboundedSender<Command>,
}

impl CommandSender {
    /// Queues a command for the dispatcher. Callable from any thread.
    pub fn send(&self, command: Command) -> ChannelResult<()> {
        let kind = command.kind();
        debug!("Sending command: {}", kind);
        self.sender.send(command).map_err(|_| {
            error!("Failed to write command {}: read end closed", kind);
            ChannelError::Closed {
                kind: kind.to_string(),
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[derive(Debug)]
pub struct CommandReceiver {
    receiver: mpsc::UnboundedReceiver<Command>,
}

impl CommandReceiver {
    /// Waits for the next command. Returns `None` once every sender is gone
    /// and the queue is drained.
    pub async fn recv(&mut self) -> Option<Command> {
        self.receiver.recv().await
    }

    /// Takes the next queued command without waiting.
    pub fn try_recv(&mut self) -> Option<Command> {
        match self.receiver.try_recv() {
            Ok(command) => Some(command),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Stops accepting new commands. Commands already queued can still be
    /// received.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[tokio::test]
    async fn test_fifo_across_threads() {
        let (sender, mut receiver) = open();

        let producer = thread::spawn(move || {
            for i in 0..50 {
                sender.send(Command::message(format!("{{\"n\":{}}}", i))).unwrap();
            }
        });
        producer.join().unwrap();

        for i in 0..50 {
            let command = receiver.recv().await.unwrap();
            assert_eq!(command, Command::message(format!("{{\"n\":{}}}", i)));
        }
        // producer dropped its sender
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let (sender, receiver) = open();
        drop(receiver);

        assert!(sender.is_closed());
        let result = sender.send(Command::registration(Some("id"), None));
        assert_eq!(
            result,
            Err(ChannelError::Closed {
                kind: "RegistrationResult".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_close_drains_queued() {
        let (sender, mut receiver) = open();
        sender.send(Command::message("1")).unwrap();
        receiver.close();

        assert!(sender.send(Command::message("2")).is_err());
        assert_eq!(receiver.len(), 1);
        assert_eq!(receiver.try_recv(), Some(Command::message("1")));
        assert_eq!(receiver.try_recv(), None);
    }
}
