//! Authorize Handler
//!
//! Ingests an authorization request: one transaction writes the seed event,
//! the PENDING read-model row, the outbox message, and the idempotency
//! mapping; then the handler short-polls the read model so fast outcomes
//! return synchronously.

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::{
    AuthEvent, AuthRequestQueuedMessage, EventMetadata, MESSAGE_TYPE_AUTH_REQUEST_QUEUED,
};
use crate::error::AppError;
use crate::event_store::EventStore;
use crate::outbox;
use crate::read_model::{projection, AuthRequestState, AuthStateRepository};

use super::{AuthorizeCommand, AuthorizeOutcome};

const MAX_UOW_RETRIES: u32 = 3;

enum CreateResult {
    Created(Uuid),
    /// Another request with the same idempotency key won the race
    Replayed(Uuid),
}

/// Handler for authorization requests
pub struct AuthorizeHandler {
    pool: PgPool,
    event_store: EventStore,
    state: AuthStateRepository,
    poll_budget: Duration,
    poll_interval: Duration,
}

impl AuthorizeHandler {
    pub fn new(pool: PgPool, poll_budget: Duration, poll_interval: Duration) -> Self {
        Self {
            event_store: EventStore::new(pool.clone()),
            state: AuthStateRepository::new(pool.clone()),
            pool,
            poll_budget,
            poll_interval,
        }
    }

    /// Execute the authorize command
    pub async fn execute(
        &self,
        command: AuthorizeCommand,
        mut metadata: EventMetadata,
    ) -> Result<AuthorizeOutcome, AppError> {
        command.validate()?;
        metadata.ensure_correlation_id();

        // Replay path: the key already maps to an aggregate. Nothing is
        // written; the caller gets that aggregate's current state.
        if let Some(existing_id) = self.lookup_idempotency(&command).await? {
            tracing::info!(
                auth_request_id = %existing_id,
                idempotency_key = %command.idempotency_key,
                "idempotent replay"
            );
            return self.poll_for_completion(existing_id).await;
        }

        let mut attempt = 0;
        let auth_request_id = loop {
            match self.try_create(&command, &metadata).await {
                Ok(CreateResult::Created(id)) => break id,
                Ok(CreateResult::Replayed(id)) => {
                    // Lost the insert race; verify the winner carried the
                    // same payload before replaying it.
                    self.verify_request_hash(&command).await?;
                    break id;
                }
                Err(AppError::EventStore(e)) if e.is_retryable() && attempt < MAX_UOW_RETRIES => {
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        "sequence conflict on create, retrying unit of work"
                    );
                    tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                }
                Err(e) => return Err(e),
            }
        };

        self.poll_for_completion(auth_request_id).await
    }

    async fn lookup_idempotency(
        &self,
        command: &AuthorizeCommand,
    ) -> Result<Option<Uuid>, AppError> {
        let row: Option<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT auth_request_id, request_hash
            FROM auth_idempotency_keys
            WHERE restaurant_id = $1 AND idempotency_key = $2
            "#,
        )
        .bind(command.restaurant_id)
        .bind(&command.idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((auth_request_id, request_hash)) => {
                if request_hash != command.request_hash() {
                    return Err(AppError::IdempotencyConflict);
                }
                Ok(Some(auth_request_id))
            }
            None => Ok(None),
        }
    }

    async fn verify_request_hash(&self, command: &AuthorizeCommand) -> Result<(), AppError> {
        match self.lookup_idempotency(command).await? {
            Some(_) => Ok(()),
            // The winning row vanished between the conflict and the re-read;
            // only a wiped table can cause this.
            None => Err(AppError::Internal(
                "idempotency row missing after insert conflict".to_string(),
            )),
        }
    }

    /// One attempt at the atomic create transaction.
    async fn try_create(
        &self,
        command: &AuthorizeCommand,
        metadata: &EventMetadata,
    ) -> Result<CreateResult, AppError> {
        let auth_request_id = Uuid::new_v4();
        let now = Utc::now();

        let event = AuthEvent::AuthRequestCreated {
            auth_request_id,
            restaurant_id: command.restaurant_id,
            payment_token: command.payment_token.clone(),
            amount_minor_units: command.amount_minor_units,
            currency: command.currency.clone(),
            metadata: command.metadata.clone(),
            created_at: now,
        };

        let queued = AuthRequestQueuedMessage {
            auth_request_id,
            restaurant_id: command.restaurant_id,
            created_at: now,
        };

        let mut tx = self.pool.begin().await?;

        let sequence = self.event_store.append(&mut tx, &event, metadata).await?;
        projection::apply(&mut tx, &event, sequence).await?;
        outbox::enqueue(
            &mut tx,
            auth_request_id,
            MESSAGE_TYPE_AUTH_REQUEST_QUEUED,
            &queued.encode(),
        )
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO auth_idempotency_keys
                (restaurant_id, idempotency_key, auth_request_id, request_hash)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (restaurant_id, idempotency_key) DO NOTHING
            "#,
        )
        .bind(command.restaurant_id)
        .bind(&command.idempotency_key)
        .bind(auth_request_id)
        .bind(command.request_hash())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            // A concurrent create with the same key committed first. Abort
            // our writes and replay the winner.
            tx.rollback().await?;
            let winner: Uuid = sqlx::query_scalar(
                r#"
                SELECT auth_request_id FROM auth_idempotency_keys
                WHERE restaurant_id = $1 AND idempotency_key = $2
                "#,
            )
            .bind(command.restaurant_id)
            .bind(&command.idempotency_key)
            .fetch_one(&self.pool)
            .await?;
            return Ok(CreateResult::Replayed(winner));
        }

        tx.commit().await?;

        tracing::info!(
            auth_request_id = %auth_request_id,
            restaurant_id = %command.restaurant_id,
            amount_minor_units = command.amount_minor_units,
            currency = %command.currency,
            "authorization request accepted"
        );

        Ok(CreateResult::Created(auth_request_id))
    }

    /// Short-poll the read model until a terminal status or the fast-path
    /// budget lapses. The backing work is never cancelled on timeout.
    async fn poll_for_completion(
        &self,
        auth_request_id: Uuid,
    ) -> Result<AuthorizeOutcome, AppError> {
        let deadline = Instant::now() + self.poll_budget;

        loop {
            let state = self.fetch_state(auth_request_id).await?;

            if state.status.is_terminal() {
                return Ok(AuthorizeOutcome::Completed(state));
            }

            if Instant::now() >= deadline {
                return Ok(AuthorizeOutcome::InProgress(state));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn fetch_state(&self, auth_request_id: Uuid) -> Result<AuthRequestState, AppError> {
        self.state
            .get(auth_request_id)
            .await?
            .ok_or(AppError::NotFound)
    }
}
