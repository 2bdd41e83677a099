//! Distributed processing locks
//!
//! PostgreSQL-backed advisory locks on `auth_request_id`, acquired by
//! conditional insert with a TTL. The lock only prevents two workers from
//! burning processor quota on the same aggregate; exactly-once event
//! application rests on the `(aggregate_id, sequence_number)` unique key,
//! not on the lock.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::watch;
use uuid::Uuid;

/// Lock errors
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Lock acquisition, release, and expiry sweep
#[derive(Debug, Clone)]
pub struct LockManager {
    pool: PgPool,
}

impl LockManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Try to acquire the lock for an auth request. Returns whether the
    /// caller now holds it.
    pub async fn acquire(
        &self,
        auth_request_id: Uuid,
        worker_id: &str,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let acquired: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO auth_processing_locks (auth_request_id, worker_id, expires_at)
            VALUES ($1, $2, NOW() + $3 * INTERVAL '1 second')
            ON CONFLICT (auth_request_id) DO NOTHING
            RETURNING auth_request_id
            "#,
        )
        .bind(auth_request_id)
        .bind(worker_id)
        .bind(ttl.as_secs() as i64)
        .fetch_optional(&self.pool)
        .await?;

        if acquired.is_some() {
            tracing::info!(
                auth_request_id = %auth_request_id,
                worker_id,
                ttl_seconds = ttl.as_secs(),
                "lock acquired"
            );
            return Ok(true);
        }

        // Contended; report who holds it for diagnosis.
        let holder: Option<(String, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT worker_id, expires_at
            FROM auth_processing_locks
            WHERE auth_request_id = $1
            "#,
        )
        .bind(auth_request_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((held_by, expires_at)) = holder {
            tracing::debug!(
                auth_request_id = %auth_request_id,
                worker_id,
                held_by = %held_by,
                expires_at = %expires_at,
                "lock already held"
            );
        }

        Ok(false)
    }

    /// Release a lock. Only the holder's row is deleted, so an expired lock
    /// reclaimed by another worker is never released out from under it.
    pub async fn release(&self, auth_request_id: Uuid, worker_id: &str) -> Result<(), LockError> {
        let rows = sqlx::query(
            r#"
            DELETE FROM auth_processing_locks
            WHERE auth_request_id = $1 AND worker_id = $2
            "#,
        )
        .bind(auth_request_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows > 0 {
            tracing::info!(auth_request_id = %auth_request_id, worker_id, "lock released");
        } else {
            tracing::warn!(
                auth_request_id = %auth_request_id,
                worker_id,
                "lock not found on release"
            );
        }

        Ok(())
    }

    /// Delete locks past their TTL. Handles workers that crashed without
    /// releasing.
    pub async fn cleanup_expired(&self) -> Result<u64, LockError> {
        let rows = sqlx::query("DELETE FROM auth_processing_locks WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows > 0 {
            tracing::info!(count = rows, "expired locks cleaned");
        }

        Ok(rows)
    }
}

/// Periodic sweep of expired locks
pub struct LockJanitor {
    locks: LockManager,
    interval: Duration,
}

impl LockJanitor {
    pub fn new(locks: LockManager, interval: Duration) -> Self {
        Self { locks, interval }
    }

    /// Run until the shutdown signal flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_seconds = self.interval.as_secs(),
            "lock janitor started"
        );

        let mut tick = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.locks.cleanup_expired().await {
                        tracing::error!(error = %e, "lock cleanup failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("lock janitor stopped");
    }
}
