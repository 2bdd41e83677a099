//! Void Handler
//!
//! Records a client void in one transaction: event append, projection
//! (PENDING expires, AUTHORIZED voids, PROCESSING records the void for the
//! worker to expire before its next attempt), and the outbox message for
//! the void queue.

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{
    AuthEvent, EventMetadata, VoidRequestQueuedMessage, MESSAGE_TYPE_VOID_REQUEST_QUEUED,
};
use crate::error::AppError;
use crate::event_store::EventStore;
use crate::outbox;
use crate::read_model::{projection, AuthRequestState, AuthStateRepository};

use super::VoidCommand;

const MAX_UOW_RETRIES: u32 = 3;

/// Handler for void requests
pub struct VoidHandler {
    pool: PgPool,
    event_store: EventStore,
    state: AuthStateRepository,
}

impl VoidHandler {
    pub fn new(pool: PgPool) -> Self {
        Self {
            event_store: EventStore::new(pool.clone()),
            state: AuthStateRepository::new(pool.clone()),
            pool,
        }
    }

    /// Execute the void command, returning the updated state.
    pub async fn execute(
        &self,
        command: VoidCommand,
        mut metadata: EventMetadata,
    ) -> Result<AuthRequestState, AppError> {
        metadata.ensure_correlation_id();

        let mut attempt = 0;
        loop {
            match self.try_void(&command, &metadata).await {
                Ok(()) => break,
                Err(AppError::EventStore(e)) if e.is_retryable() && attempt < MAX_UOW_RETRIES => {
                    attempt += 1;
                    tracing::warn!(
                        auth_request_id = %command.auth_request_id,
                        attempt,
                        "sequence conflict on void, retrying unit of work"
                    );
                    tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                }
                Err(e) => return Err(e),
            }
        }

        self.state
            .get_owned(command.auth_request_id, command.restaurant_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    async fn try_void(
        &self,
        command: &VoidCommand,
        metadata: &EventMetadata,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        // Ownership check under a row lock; a mismatched restaurant is
        // indistinguishable from an absent request.
        let owner: Option<Uuid> = sqlx::query_scalar(
            "SELECT restaurant_id FROM auth_request_state WHERE auth_request_id = $1 FOR UPDATE",
        )
        .bind(command.auth_request_id)
        .fetch_optional(&mut *tx)
        .await?;

        match owner {
            Some(restaurant_id) if restaurant_id == command.restaurant_id => {}
            _ => return Err(AppError::NotFound),
        }

        let now = Utc::now();
        let event = AuthEvent::AuthVoidRequested {
            auth_request_id: command.auth_request_id,
            reason: command.reason.clone(),
            requested_at: now,
        };

        let sequence = self.event_store.append(&mut tx, &event, metadata).await?;
        projection::apply(&mut tx, &event, sequence).await?;

        let queued = VoidRequestQueuedMessage {
            auth_request_id: command.auth_request_id,
            restaurant_id: command.restaurant_id,
            reason: command.reason.clone(),
            created_at: now,
        };
        outbox::enqueue(
            &mut tx,
            command.auth_request_id,
            MESSAGE_TYPE_VOID_REQUEST_QUEUED,
            &queued.encode(),
        )
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

        tx.commit().await?;

        tracing::info!(
            auth_request_id = %command.auth_request_id,
            restaurant_id = %command.restaurant_id,
            reason = %command.reason,
            "void recorded"
        );

        Ok(())
    }
}
