//! API module
//!
//! HTTP surface of the authorization pipeline.

pub mod routes;

pub use routes::{create_router, ApiState};
