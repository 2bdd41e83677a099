//! Read Model module
//!
//! The synchronously maintained `auth_request_state` projection and its
//! repository.

pub mod projection;
mod state;

pub use projection::ProjectionError;
pub use state::{AuthRequestState, AuthStateRepository};
