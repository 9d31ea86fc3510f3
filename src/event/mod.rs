//! # Cross-thread Event Delivery
//!
//! Push events arrive on whatever thread the platform SDK chooses. Script
//! callbacks may only run on the scripting thread. This module carries
//! events between the two.
//!
//! ## Event Flow
//!
//! ```text
//! ┌──────────────┐     ┌───────────────┐     ┌────────────┐     ┌──────────┐
//! │ Platform SDK │────▶│ CommandSender │────▶│ Dispatcher │────▶│ Callback │
//! └──────────────┘     └───────────────┘     └────────────┘     └──────────┘
//!   any thread           non-blocking          scripting thread
//! ```
//!
//! 1. The platform reports a registration result or a message through
//!    [`crate::platform::PlatformEvents`], which wraps it in a [`Command`].
//! 2. The command is moved into the channel. The producer never waits.
//! 3. The dispatcher wakes on the scripting thread, takes exactly one
//!    command and runs the matching handler, then drops the command.
//!
//! Commands are delivered in the order they were sent.

pub mod channel;
pub mod command;

pub use channel::{ChannelError, CommandReceiver, CommandSender};
pub use command::{Command, CommandKind};
