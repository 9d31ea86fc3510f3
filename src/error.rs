use thiserror::Error;

use crate::config::ConfigError;
use crate::event::channel::ChannelError;
use crate::platform::PlatformError;
use crate::script::ScriptError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type InternalResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}
