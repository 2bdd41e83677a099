//! Event Metadata
//!
//! Correlation and causation identifiers stored with every event for audit
//! and request tracing.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata attached to stored events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Correlation ID tying events back to the originating request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,

    /// ID of the event or message that caused this one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<Uuid>,

    /// Worker that produced the event, when applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

impl EventMetadata {
    /// Create empty metadata
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Attach a causation ID
    pub fn with_causation_id(mut self, causation_id: Uuid) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    /// Attach the producing worker's ID
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    /// Generate a correlation ID if not present
    pub fn ensure_correlation_id(&mut self) -> Uuid {
        *self.correlation_id.get_or_insert_with(Uuid::new_v4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_builder() {
        let correlation_id = Uuid::new_v4();
        let causation_id = Uuid::new_v4();

        let metadata = EventMetadata::new()
            .with_correlation_id(correlation_id)
            .with_causation_id(causation_id)
            .with_worker_id("worker-1");

        assert_eq!(metadata.correlation_id, Some(correlation_id));
        assert_eq!(metadata.causation_id, Some(causation_id));
        assert_eq!(metadata.worker_id.as_deref(), Some("worker-1"));
    }

    #[test]
    fn test_ensure_correlation_id() {
        let mut metadata = EventMetadata::new();
        assert!(metadata.correlation_id.is_none());

        let id = metadata.ensure_correlation_id();
        assert_eq!(metadata.correlation_id, Some(id));

        // Calling again returns the same ID
        assert_eq!(metadata.ensure_correlation_id(), id);
    }

    #[test]
    fn test_empty_fields_not_serialized() {
        let metadata = EventMetadata::new();
        let json = serde_json::to_string(&metadata).unwrap();
        assert_eq!(json, "{}");
    }
}
