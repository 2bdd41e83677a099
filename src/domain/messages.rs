//! Queue message payloads
//!
//! Messages staged in the outbox and delivered over the bus. Encoded as JSON
//! bytes; the outbox row's `message_type` column selects the decoder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outbox message type for queued authorization requests
pub const MESSAGE_TYPE_AUTH_REQUEST_QUEUED: &str = "auth_request_queued";

/// Outbox message type for queued void requests
pub const MESSAGE_TYPE_VOID_REQUEST_QUEUED: &str = "void_request_queued";

/// Payload routed to the FIFO auth-requests queue.
///
/// `restaurant_id` is the FIFO group key; the outbox row's aggregate ID is
/// the deduplication key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequestQueuedMessage {
    pub auth_request_id: Uuid,
    pub restaurant_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Payload routed to the standard void-requests queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoidRequestQueuedMessage {
    pub auth_request_id: Uuid,
    pub restaurant_id: Uuid,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl AuthRequestQueuedMessage {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("queued message serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl VoidRequestQueuedMessage {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("queued message serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
