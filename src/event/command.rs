//! # Command Envelope
//!
//! A `Command` is the unit moved through the event channel. The platform
//! side allocates its payloads; ownership moves with the command to the
//! dispatcher, which drops them once the matching handler returns.

/// Kind tag of a [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum CommandKind {
    RegistrationResult,
    MessageResult,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Outcome of a platform registration request.
    RegistrationResult {
        status: i32,
        /// Registration id assigned by the push service, on success.
        registration_id: Option<String>,
        /// Error text reported by the platform, on failure.
        error: Option<String>,
    },
    /// A push message delivered by the platform, as JSON text.
    MessageResult { status: i32, payload: String },
}

impl Command {
    pub fn registration(registration_id: Option<&str>, error: Option<&str>) -> Self {
        Command::RegistrationResult {
            status: 0,
            registration_id: registration_id.map(str::to_string),
            error: error.map(str::to_string),
        }
    }

    pub fn message(payload: impl Into<String>) -> Self {
        Command::MessageResult {
            status: 0,
            payload: payload.into(),
        }
    }

    pub fn with_status(mut self, code: i32) -> Self {
        match &mut self {
            Command::RegistrationResult { status, .. } | Command::MessageResult { status, .. } => {
                *status = code
            }
        }
        self
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::RegistrationResult { .. } => CommandKind::RegistrationResult,
            Command::MessageResult { .. } => CommandKind::MessageResult,
        }
    }

    pub fn status(&self) -> i32 {
        match self {
            Command::RegistrationResult { status, .. } | Command::MessageResult { status, .. } => {
                *status
            }
        }
    }
}
