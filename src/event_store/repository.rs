//! Event Store Repository
//!
//! Append-only ledger of authorization events with dense per-aggregate
//! sequence numbers. Appends run inside a caller-supplied transaction so the
//! projection and outbox writes commit atomically with the event.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::{AuthEvent, EventMetadata, AGGREGATE_TYPE_AUTH_REQUEST};

use super::EventStoreError;

/// Stored event read back from the ledger
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub sequence_number: i64,
    pub metadata: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Decode the payload back into a domain event
    pub fn to_event(&self) -> Result<AuthEvent, EventStoreError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Event store over the `payment_events` table
#[derive(Debug, Clone)]
pub struct EventStore {
    pool: PgPool,
}

impl EventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one event within the caller's transaction.
    ///
    /// Assigns `MAX(sequence_number) + 1` in the transaction snapshot and
    /// returns the assigned sequence. The unique index on
    /// `(aggregate_id, sequence_number)` is the concurrency guard: a
    /// concurrent appender surfaces as `SequenceConflict` and the caller
    /// retries its whole unit of work.
    pub async fn append(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &AuthEvent,
        metadata: &EventMetadata,
    ) -> Result<i64, EventStoreError> {
        let aggregate_id = event.auth_request_id();
        let sequence_number = Self::next_sequence(tx, aggregate_id).await?;

        let payload = serde_json::to_value(event)?;
        let metadata_json = serde_json::to_value(metadata)?;
        let event_id = Uuid::new_v4();

        let result = sqlx::query(
            r#"
            INSERT INTO payment_events (
                event_id, aggregate_id, aggregate_type,
                event_type, payload, sequence_number, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event_id)
        .bind(aggregate_id)
        .bind(AGGREGATE_TYPE_AUTH_REQUEST)
        .bind(event.event_type())
        .bind(&payload)
        .bind(sequence_number)
        .bind(&metadata_json)
        .execute(&mut **tx)
        .await;

        match result {
            Ok(_) => {
                tracing::debug!(
                    event_id = %event_id,
                    aggregate_id = %aggregate_id,
                    event_type = event.event_type(),
                    sequence = sequence_number,
                    "event appended"
                );
                Ok(sequence_number)
            }
            Err(e) if is_unique_violation(&e) => Err(EventStoreError::SequenceConflict {
                aggregate_id,
                sequence_number,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Next sequence number for an aggregate within the current transaction
    async fn next_sequence(
        tx: &mut Transaction<'_, Postgres>,
        aggregate_id: Uuid,
    ) -> Result<i64, EventStoreError> {
        let next: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(MAX(sequence_number), 0) + 1
            FROM payment_events
            WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(next)
    }

    /// Read an aggregate's events ordered by sequence number.
    ///
    /// Audit and recovery path only; the hot path reads the projection.
    pub async fn read_events(
        &self,
        aggregate_id: Uuid,
        from_sequence: Option<i64>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows: Vec<(
            Uuid,
            Uuid,
            String,
            String,
            serde_json::Value,
            i64,
            serde_json::Value,
            DateTime<Utc>,
        )> = sqlx::query_as(
            r#"
            SELECT event_id, aggregate_id, aggregate_type, event_type,
                   payload, sequence_number, metadata, occurred_at
            FROM payment_events
            WHERE aggregate_id = $1 AND sequence_number > $2
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(aggregate_id)
        .bind(from_sequence.unwrap_or(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(
                    event_id,
                    aggregate_id,
                    aggregate_type,
                    event_type,
                    payload,
                    sequence_number,
                    metadata,
                    occurred_at,
                )| StoredEvent {
                    event_id,
                    aggregate_id,
                    aggregate_type,
                    event_type,
                    payload,
                    sequence_number,
                    metadata,
                    occurred_at,
                },
            )
            .collect())
    }

    /// Whether a void was recorded for the aggregate without any processor
    /// outcome. The worker uses this to expire a queued request instead of
    /// authorizing it.
    pub async fn has_pending_void(&self, aggregate_id: Uuid) -> Result<bool, EventStoreError> {
        let pending: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM payment_events
                WHERE aggregate_id = $1 AND event_type = 'AuthVoidRequested'
            )
            AND NOT EXISTS (
                SELECT 1 FROM payment_events
                WHERE aggregate_id = $1 AND event_type = 'AuthResponseReceived'
            )
            "#,
        )
        .bind(aggregate_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(pending)
    }
}

/// Postgres unique violation (SQLSTATE 23505)
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}
