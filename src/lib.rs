pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod extension;
pub mod platform;
pub mod registry;
pub mod script;

// Re-exports
pub use error::*;
pub use extension::{PushExtension, PushModule};
