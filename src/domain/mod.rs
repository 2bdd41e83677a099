//! Domain module
//!
//! Events, statuses, queue payloads, and event metadata for the
//! authorization request aggregate.

pub mod events;
pub mod messages;
pub mod metadata;
pub mod status;

pub use events::{AuthDecision, AuthEvent, AGGREGATE_TYPE_AUTH_REQUEST};
pub use messages::{
    AuthRequestQueuedMessage, VoidRequestQueuedMessage, MESSAGE_TYPE_AUTH_REQUEST_QUEUED,
    MESSAGE_TYPE_VOID_REQUEST_QUEUED,
};
pub use metadata::EventMetadata;
pub use status::{AuthStatus, UnknownStatus};
