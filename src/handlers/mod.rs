//! Command Handlers module
//!
//! Handlers orchestrate the atomic write path: event store, projection,
//! outbox, and idempotency in one transaction per command.

mod authorize_handler;
mod commands;
mod void_handler;

pub use authorize_handler::AuthorizeHandler;
pub use commands::{AuthorizeCommand, AuthorizeOutcome, VoidCommand};
pub use void_handler::VoidHandler;
