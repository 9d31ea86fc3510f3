//! # Platform push SDK seam
//!
//! [`PushPlatform`] is what the extension drives on the scripting thread:
//! start it with the configured sender id, ask it to register, stop it at
//! shutdown. The platform answers asynchronously, on threads of its
//! choosing, through the [`PlatformEvents`] sink it was started with.

pub mod loopback;

use thiserror::Error;
use tracing::debug;

use crate::event::{channel::ChannelResult, Command, CommandSender};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlatformError {
    #[error("Platform failed to start: {message}")]
    StartFailed { message: String },
    #[error("Platform registration request failed: {message}")]
    RegisterFailed { message: String },
    #[error("Platform failed to stop: {message}")]
    StopFailed { message: String },
    #[error("Platform is not started")]
    NotStarted,
}

pub type PlatformResult<T> = Result<T, PlatformError>;

#[cfg_attr(test, mockall::automock)]
pub trait PushPlatform {
    /// Initializes the push SDK. Results are reported through `events`.
    fn start(&mut self, events: PlatformEvents, sender_id: &str) -> PlatformResult<()>;

    /// Requests a registration id. The outcome arrives later through
    /// [`PlatformEvents::on_registration`].
    fn register(&mut self) -> PlatformResult<()>;

    fn stop(&mut self) -> PlatformResult<()>;
}

/// Inbound notifications from the platform. Cheap to clone and safe to
/// use from any thread; never blocks.
#[derive(Debug, Clone)]
pub struct PlatformEvents {
    sender: CommandSender,
}

impl PlatformEvents {
    pub fn new(sender: CommandSender) -> Self {
        Self { sender }
    }

    /// Registration finished. Exactly one of the arguments is normally set.
    pub fn on_registration(
        &self,
        registration_id: Option<&str>,
        error: Option<&str>,
    ) -> ChannelResult<()> {
        debug!(
            "platform registration result: id={:?} error={:?}",
            registration_id, error
        );
        self.sender
            .send(Command::registration(registration_id, error))
    }

    /// A push message arrived, encoded as JSON text.
    pub fn on_message(&self, json: &str) -> ChannelResult<()> {
        self.sender.send(Command::message(json))
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
