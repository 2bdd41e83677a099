//! Transactional Outbox
//!
//! Messages staged in the same transaction as the events they derive from,
//! then forwarded to the bus by the dispatcher. At-least-once delivery
//! without distributed transactions.

mod dispatcher;

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

pub use dispatcher::{DispatcherConfig, OutboxDispatcher};

/// Outbox errors
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// An unprocessed outbox row
#[derive(Debug, Clone)]
pub struct OutboxRow {
    pub id: i64,
    pub aggregate_id: Uuid,
    pub message_type: String,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Stage a message within the caller's transaction.
pub async fn enqueue(
    tx: &mut Transaction<'_, Postgres>,
    aggregate_id: Uuid,
    message_type: &str,
    payload: &[u8],
) -> Result<(), OutboxError> {
    sqlx::query(
        r#"
        INSERT INTO outbox (aggregate_id, message_type, payload, created_at)
        VALUES ($1, $2, $3, NOW())
        "#,
    )
    .bind(aggregate_id)
    .bind(message_type)
    .bind(payload)
    .execute(&mut **tx)
    .await?;

    tracing::debug!(
        aggregate_id = %aggregate_id,
        message_type,
        "outbox message staged"
    );
    Ok(())
}

/// Fetch up to `limit` unprocessed rows in `created_at` order.
///
/// `FOR UPDATE SKIP LOCKED` lets concurrent dispatchers grab disjoint
/// batches; a row stays locked until the batch transaction ends.
pub async fn fetch_unprocessed(
    tx: &mut Transaction<'_, Postgres>,
    limit: i64,
) -> Result<Vec<OutboxRow>, OutboxError> {
    let rows: Vec<(i64, Uuid, String, Vec<u8>, DateTime<Utc>)> = sqlx::query_as(
        r#"
        SELECT id, aggregate_id, message_type, payload, created_at
        FROM outbox
        WHERE processed_at IS NULL
        ORDER BY created_at
        LIMIT $1
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(limit)
    .fetch_all(&mut **tx)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, aggregate_id, message_type, payload, created_at)| OutboxRow {
            id,
            aggregate_id,
            message_type,
            payload,
            created_at,
        })
        .collect())
}

/// Stamp a row as processed within the batch transaction.
pub async fn mark_processed(
    tx: &mut Transaction<'_, Postgres>,
    id: i64,
) -> Result<(), OutboxError> {
    sqlx::query("UPDATE outbox SET processed_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}
