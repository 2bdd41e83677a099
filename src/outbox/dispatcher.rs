//! Outbox Dispatcher
//!
//! Polls the outbox and forwards staged messages to the bus.
//! `auth_request_queued` rows go to the FIFO auth-requests queue keyed by
//! restaurant; `void_request_queued` rows go to the standard void queue.
//! Within one restaurant group a failed publish skips the group's remaining
//! rows for the iteration so bus-side ordering is preserved; other groups
//! keep making progress.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::watch;
use uuid::Uuid;

use crate::bus::{Bus, BusError};
use crate::domain::{
    AuthRequestQueuedMessage, MESSAGE_TYPE_AUTH_REQUEST_QUEUED, MESSAGE_TYPE_VOID_REQUEST_QUEUED,
};

use super::{fetch_unprocessed, mark_processed, OutboxError, OutboxRow};

/// Dispatcher settings
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub auth_requests_queue: String,
    pub void_requests_queue: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            batch_size: 100,
            auth_requests_queue: "auth-requests".to_string(),
            void_requests_queue: "void-requests".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum DispatchError {
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Undecodable payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Continuous outbox-to-bus forwarding loop
pub struct OutboxDispatcher {
    pool: PgPool,
    bus: Arc<dyn Bus>,
    config: DispatcherConfig,
}

impl OutboxDispatcher {
    pub fn new(pool: PgPool, bus: Arc<dyn Bus>, config: DispatcherConfig) -> Self {
        Self { pool, bus, config }
    }

    /// Run until the shutdown signal flips. The in-flight batch always
    /// finishes before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "outbox dispatcher started"
        );

        let mut tick = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.process_batch().await {
                        tracing::error!(error = %e, "outbox batch failed");
                        // Back off so a broken database doesn't spin the loop
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("outbox dispatcher stopped");
    }

    /// Process one batch. Returns the number of rows marked processed.
    pub async fn process_batch(&self) -> Result<usize, OutboxError> {
        let mut tx = self.pool.begin().await?;
        let rows = fetch_unprocessed(&mut tx, self.config.batch_size).await?;

        if rows.is_empty() {
            tx.commit().await?;
            return Ok(0);
        }

        tracing::debug!(count = rows.len(), "processing outbox batch");

        // Restaurant groups with a failed publish this iteration; their
        // later rows must wait so the queue sees them in created_at order.
        let mut blocked_groups: HashSet<Uuid> = HashSet::new();
        let mut processed = 0usize;

        for row in &rows {
            let group = Self::group_of(row);

            if let Some(group_id) = group {
                if blocked_groups.contains(&group_id) {
                    tracing::debug!(
                        outbox_id = row.id,
                        restaurant_id = %group_id,
                        "skipping row behind failed publish in same group"
                    );
                    continue;
                }
            }

            match self.publish(row).await {
                Ok(()) => {
                    mark_processed(&mut tx, row.id).await?;
                    processed += 1;
                }
                Err(e) => {
                    tracing::error!(
                        outbox_id = row.id,
                        message_type = %row.message_type,
                        aggregate_id = %row.aggregate_id,
                        error = %e,
                        "failed to publish outbox message"
                    );
                    // Row stays unprocessed and retries next tick.
                    if let Some(group_id) = group {
                        blocked_groups.insert(group_id);
                    }
                }
            }
        }

        tx.commit().await?;

        if processed > 0 {
            tracing::info!(processed, "outbox batch processed");
        }
        Ok(processed)
    }

    /// Ordering group of a row: the payload's restaurant for FIFO-bound
    /// messages, none for standard-queue messages.
    fn group_of(row: &OutboxRow) -> Option<Uuid> {
        if row.message_type != MESSAGE_TYPE_AUTH_REQUEST_QUEUED {
            return None;
        }
        AuthRequestQueuedMessage::decode(&row.payload)
            .ok()
            .map(|m| m.restaurant_id)
    }

    async fn publish(&self, row: &OutboxRow) -> Result<(), DispatchError> {
        match row.message_type.as_str() {
            MESSAGE_TYPE_AUTH_REQUEST_QUEUED => {
                let message = AuthRequestQueuedMessage::decode(&row.payload)?;
                self.bus
                    .send_fifo(
                        &self.config.auth_requests_queue,
                        row.payload.clone(),
                        &row.aggregate_id.to_string(),
                        &message.restaurant_id.to_string(),
                    )
                    .await?;
                Ok(())
            }
            MESSAGE_TYPE_VOID_REQUEST_QUEUED => {
                self.bus
                    .send(&self.config.void_requests_queue, row.payload.clone())
                    .await?;
                Ok(())
            }
            other => {
                // Logged and left unprocessed, never dropped.
                tracing::warn!(outbox_id = row.id, message_type = other, "unknown message type");
                Err(DispatchError::UnknownMessageType(other.to_string()))
            }
        }
    }
}
