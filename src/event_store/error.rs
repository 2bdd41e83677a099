//! Event store errors

use uuid::Uuid;

/// Errors from the event store
#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    /// Another writer appended to the same aggregate first. The caller must
    /// retry its whole unit of work (events + projection + outbox).
    #[error("Sequence conflict on aggregate {aggregate_id} at sequence {sequence_number}")]
    SequenceConflict {
        aggregate_id: Uuid,
        sequence_number: i64,
    },

    #[error("Event serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl EventStoreError {
    /// Whether retrying the unit of work can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, EventStoreError::SequenceConflict { .. })
    }
}
