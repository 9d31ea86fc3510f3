//! Scripting runtime seam: values, handles and the runtime trait the push
//! bridge calls into, plus an in-process runtime backed by Rust closures.

pub mod json;
pub mod native;
pub mod runtime;
pub mod value;

use thiserror::Error;

pub use runtime::{CallbackRef, ContextId, InstanceHandle, ScriptRuntime};
pub use value::ScriptValue;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("Error running script callback: {message}")]
    Runtime { message: String },
    #[error("No script instance is active in context {context}")]
    NoInstance { context: u64 },
    #[error("Unknown callback reference: {callback}")]
    UnknownCallback { callback: u64 },
    #[error("Script instance has been deleted")]
    InstanceDeleted,
    #[error("Scripting context has been destroyed")]
    ContextGone,
    #[error("Callback {callback} is already running")]
    Reentrant { callback: u64 },
}

impl ScriptError {
    pub fn runtime<S: Into<String>>(message: S) -> Self {
        ScriptError::Runtime {
            message: message.into(),
        }
    }
}

pub type ScriptResult<T> = Result<T, ScriptError>;
