//! Domain Events
//!
//! Event definitions for the authorization request aggregate.
//! Events are immutable facts; current state is a projection of them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Aggregate type stored alongside every authorization event
pub const AGGREGATE_TYPE_AUTH_REQUEST: &str = "auth_request";

/// Authorization lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuthEvent {
    /// Seed event written by the API when a request is accepted
    AuthRequestCreated {
        auth_request_id: Uuid,
        restaurant_id: Uuid,
        payment_token: String,
        amount_minor_units: i64,
        currency: String,
        #[serde(default)]
        metadata: HashMap<String, String>,
        created_at: DateTime<Utc>,
    },

    /// A worker began an authorization attempt
    AuthAttemptStarted {
        auth_request_id: Uuid,
        worker_id: String,
        started_at: DateTime<Utc>,
    },

    /// The processor produced an outcome (authorized or denied)
    AuthResponseReceived {
        auth_request_id: Uuid,
        decision: AuthDecision,
        received_at: DateTime<Utc>,
    },

    /// An attempt failed; `retryable = false` is terminal
    AuthAttemptFailed {
        auth_request_id: Uuid,
        reason: String,
        retryable: bool,
        failed_at: DateTime<Utc>,
    },

    /// Client asked for the request to be voided
    AuthVoidRequested {
        auth_request_id: Uuid,
        reason: String,
        requested_at: DateTime<Utc>,
    },

    /// A void arrived before any outcome; the request is retired without one
    AuthRequestExpired {
        auth_request_id: Uuid,
        expired_at: DateTime<Utc>,
    },
}

impl AuthEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            AuthEvent::AuthRequestCreated { .. } => "AuthRequestCreated",
            AuthEvent::AuthAttemptStarted { .. } => "AuthAttemptStarted",
            AuthEvent::AuthResponseReceived { .. } => "AuthResponseReceived",
            AuthEvent::AuthAttemptFailed { .. } => "AuthAttemptFailed",
            AuthEvent::AuthVoidRequested { .. } => "AuthVoidRequested",
            AuthEvent::AuthRequestExpired { .. } => "AuthRequestExpired",
        }
    }

    /// Get the authorization request ID this event relates to
    pub fn auth_request_id(&self) -> Uuid {
        match self {
            AuthEvent::AuthRequestCreated { auth_request_id, .. } => *auth_request_id,
            AuthEvent::AuthAttemptStarted { auth_request_id, .. } => *auth_request_id,
            AuthEvent::AuthResponseReceived { auth_request_id, .. } => *auth_request_id,
            AuthEvent::AuthAttemptFailed { auth_request_id, .. } => *auth_request_id,
            AuthEvent::AuthVoidRequested { auth_request_id, .. } => *auth_request_id,
            AuthEvent::AuthRequestExpired { auth_request_id, .. } => *auth_request_id,
        }
    }
}

/// Processor outcome carried by `AuthResponseReceived`.
///
/// Declines are outcomes, not failures: a denied card still completes the
/// authorization request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthDecision {
    Authorized {
        processor_name: String,
        processor_auth_id: String,
        authorization_code: String,
        authorized_amount_minor_units: i64,
        currency: String,
    },
    Denied {
        processor_name: String,
        denial_code: String,
        denial_reason: String,
    },
}
