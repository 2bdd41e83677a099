//! Message bus abstraction
//!
//! The pipeline talks to an SQS-shaped bus: FIFO queues with per-group
//! ordering and deduplication, standard queues without either, and
//! visibility timeouts that re-deliver undeleted messages. `Bus` is the seam
//! where a hosted queue adapter plugs in; [`MemoryBus`] provides the same
//! semantics in-process for the single-binary deployment and the tests.

mod memory;

use std::time::Duration;

use async_trait::async_trait;

pub use memory::MemoryBus;

/// A message received from a queue
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// Opaque payload bytes
    pub body: Vec<u8>,
    /// Handle for deleting this delivery
    pub receipt: String,
    /// How many times the message has been delivered, this one included
    pub receive_count: u32,
}

/// Bus errors
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    #[error("Invalid receipt handle: {0}")]
    InvalidReceipt(String),

    #[error("Bus transport error: {0}")]
    Transport(String),
}

/// Queue operations used by the dispatcher and the worker.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Send to a standard (unordered) queue
    async fn send(&self, queue: &str, body: Vec<u8>) -> Result<(), BusError>;

    /// Send to a FIFO queue with a deduplication ID and an ordering group
    async fn send_fifo(
        &self,
        queue: &str,
        body: Vec<u8>,
        dedup_id: &str,
        group_id: &str,
    ) -> Result<(), BusError>;

    /// Receive at most one message, making it invisible to other consumers
    /// for `visibility`. Returns `None` when nothing is deliverable.
    async fn receive(
        &self,
        queue: &str,
        visibility: Duration,
    ) -> Result<Option<BusMessage>, BusError>;

    /// Delete a delivered message. Omitting the delete lets the visibility
    /// timeout return the message to the queue.
    async fn delete(&self, queue: &str, receipt: &str) -> Result<(), BusError>;
}
