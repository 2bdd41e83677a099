//! Auth Processor Worker
//!
//! Consumes the auth-requests queue and drives each request to an outcome:
//! lock the aggregate, validate its state, decrypt the payment token, call
//! the configured processor, and apply the outcome event atomically with the
//! read-model update. Redelivered messages for terminal aggregates are
//! deleted without side effects; the read model is the deduplication
//! surface.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::watch;
use uuid::Uuid;

use crate::bus::{Bus, BusError, BusMessage};
use crate::domain::{AuthDecision, AuthEvent, AuthRequestQueuedMessage, EventMetadata};
use crate::event_store::{EventStore, EventStoreError};
use crate::locks::{LockError, LockManager};
use crate::processors::{ProcessorDecision, ProcessorRegistry};
use crate::read_model::{projection, AuthStateRepository, ProjectionError};
use crate::restaurants::RestaurantConfigRepository;
use crate::token::TokenClient;

/// Service name sent to the token service on decrypt calls
const REQUESTING_SERVICE: &str = "auth-processor-worker";

const MAX_APPLY_RETRIES: u32 = 3;

/// Worker settings
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub worker_id: String,
    pub queue: String,
    pub visibility_timeout: Duration,
    pub lock_ttl: Duration,
    pub max_retries: u32,
    pub processor_timeout: Duration,
    /// Sleep between polls when the queue is empty
    pub idle_sleep: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            worker_id: "worker-1".to_string(),
            queue: "auth-requests".to_string(),
            visibility_timeout: Duration::from_secs(30),
            lock_ttl: Duration::from_secs(30),
            max_retries: 5,
            processor_timeout: Duration::from_secs(10),
            idle_sleep: Duration::from_millis(100),
        }
    }
}

/// How a message was disposed of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingResult {
    /// Outcome event applied (authorized, denied, or terminal failure)
    Completed,
    /// The aggregate was already terminal; idempotent redelivery
    AlreadyTerminal,
    /// A void preceded the outcome; the request was expired instead of run
    Expired,
    /// Retryable failure recorded; the message returns via visibility timeout
    RetryableFailure,
    /// Terminal failure recorded; status is FAILED
    TerminalFailure,
    /// Another worker holds the lock; the message returns untouched
    LockContended,
    /// No state row exists for the message's aggregate
    UnknownAggregate,
}

impl ProcessingResult {
    /// Whether the bus message should be deleted
    pub fn delete_message(&self) -> bool {
        !matches!(
            self,
            ProcessingResult::RetryableFailure | ProcessingResult::LockContended
        )
    }
}

/// Worker errors. Any of these leaves the message for redelivery.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    EventStore(#[from] EventStoreError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Queue-driven authorization worker
pub struct Worker {
    pool: PgPool,
    bus: Arc<dyn Bus>,
    token_client: Arc<dyn TokenClient>,
    registry: Arc<ProcessorRegistry>,
    locks: LockManager,
    event_store: EventStore,
    state: AuthStateRepository,
    restaurants: RestaurantConfigRepository,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        pool: PgPool,
        bus: Arc<dyn Bus>,
        token_client: Arc<dyn TokenClient>,
        registry: Arc<ProcessorRegistry>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            locks: LockManager::new(pool.clone()),
            event_store: EventStore::new(pool.clone()),
            state: AuthStateRepository::new(pool.clone()),
            restaurants: RestaurantConfigRepository::new(pool.clone()),
            pool,
            bus,
            token_client,
            registry,
            settings,
        }
    }

    /// Consume until the shutdown signal flips. The in-flight message always
    /// finishes (and its lock is released) before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            worker_id = %self.settings.worker_id,
            queue = %self.settings.queue,
            "worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                received = self.bus.receive(&self.settings.queue, self.settings.visibility_timeout) => {
                    match received {
                        Ok(Some(message)) => self.handle_message(message).await,
                        Ok(None) => tokio::time::sleep(self.settings.idle_sleep).await,
                        Err(e) => {
                            tracing::error!(error = %e, "bus receive failed");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }

        tracing::info!(worker_id = %self.settings.worker_id, "worker stopped");
    }

    /// Process one delivery end to end, including the delete decision.
    pub async fn handle_message(&self, message: BusMessage) {
        let queued = match AuthRequestQueuedMessage::decode(&message.body) {
            Ok(queued) => queued,
            Err(e) => {
                // An undecodable message can never succeed; keeping it would
                // starve its FIFO group forever.
                tracing::error!(error = %e, "undecodable auth request message, deleting");
                self.delete(&message.receipt).await;
                return;
            }
        };

        tracing::info!(
            auth_request_id = %queued.auth_request_id,
            restaurant_id = %queued.restaurant_id,
            receive_count = message.receive_count,
            "handling auth request"
        );

        match self.process(&queued, message.receive_count).await {
            Ok(result) => {
                tracing::info!(
                    auth_request_id = %queued.auth_request_id,
                    result = ?result,
                    "auth request processed"
                );
                if result.delete_message() {
                    self.delete(&message.receipt).await;
                }
            }
            Err(e) => {
                // Infrastructure failure: leave the message for redelivery.
                tracing::error!(
                    auth_request_id = %queued.auth_request_id,
                    error = %e,
                    "message handling error, leaving for redelivery"
                );
            }
        }
    }

    async fn delete(&self, receipt: &str) {
        if let Err(e) = self.bus.delete(&self.settings.queue, receipt).await {
            tracing::warn!(error = %e, "failed to delete bus message");
        }
    }

    /// The processing ladder for one auth request.
    pub async fn process(
        &self,
        message: &AuthRequestQueuedMessage,
        receive_count: u32,
    ) -> Result<ProcessingResult, WorkerError> {
        let auth_request_id = message.auth_request_id;

        if !self
            .locks
            .acquire(auth_request_id, &self.settings.worker_id, self.settings.lock_ttl)
            .await?
        {
            return Ok(ProcessingResult::LockContended);
        }

        let outcome = self.process_locked(auth_request_id, receive_count).await;

        // Release on every path; an expired lock another worker reclaimed is
        // left alone by the holder check.
        if let Err(e) = self
            .locks
            .release(auth_request_id, &self.settings.worker_id)
            .await
        {
            tracing::error!(
                auth_request_id = %auth_request_id,
                error = %e,
                "lock release failed"
            );
        }

        outcome
    }

    async fn process_locked(
        &self,
        auth_request_id: Uuid,
        receive_count: u32,
    ) -> Result<ProcessingResult, WorkerError> {
        let Some(state) = self.state.get(auth_request_id).await? else {
            tracing::warn!(
                auth_request_id = %auth_request_id,
                "message references unknown aggregate"
            );
            return Ok(ProcessingResult::UnknownAggregate);
        };

        if state.status.is_terminal() {
            tracing::info!(
                auth_request_id = %auth_request_id,
                status = %state.status,
                "aggregate already terminal, nothing to do"
            );
            return Ok(ProcessingResult::AlreadyTerminal);
        }

        // A void recorded before any outcome expires the request instead of
        // running it. Covers both PENDING and PROCESSING: a void can land
        // after a retryable attempt left the row PROCESSING.
        if self.event_store.has_pending_void(auth_request_id).await? {
            self.apply_event(AuthEvent::AuthRequestExpired {
                auth_request_id,
                expired_at: Utc::now(),
            })
            .await?;
            return Ok(ProcessingResult::Expired);
        }

        self.apply_event(AuthEvent::AuthAttemptStarted {
            auth_request_id,
            worker_id: self.settings.worker_id.clone(),
            started_at: Utc::now(),
        })
        .await?;

        let Some(config) = self.restaurants.get_active(state.restaurant_id).await? else {
            return self
                .record_failure(
                    auth_request_id,
                    receive_count,
                    false,
                    "no active payment config for restaurant",
                )
                .await;
        };

        let processor = match self
            .registry
            .create(&config.processor_name, &config.processor_config)
        {
            Ok(processor) => processor,
            Err(e) => {
                return self
                    .record_failure(auth_request_id, receive_count, false, &e.to_string())
                    .await;
            }
        };

        let card = match self
            .token_client
            .decrypt(&state.payment_token, state.restaurant_id, REQUESTING_SERVICE)
            .await
        {
            Ok(card) => card,
            Err(e) => {
                return self
                    .record_failure(
                        auth_request_id,
                        receive_count,
                        e.is_retryable(),
                        &format!("token service: {e}"),
                    )
                    .await;
            }
        };

        let authorize = processor.authorize(&card, state.amount_minor_units, &state.currency);
        let decision = match tokio::time::timeout(self.settings.processor_timeout, authorize).await
        {
            Err(_) => {
                return self
                    .record_failure(auth_request_id, receive_count, true, "processor call timed out")
                    .await;
            }
            Ok(Err(e)) => {
                return self
                    .record_failure(auth_request_id, receive_count, e.is_retryable(), &e.to_string())
                    .await;
            }
            Ok(Ok(decision)) => decision,
        };

        let decision = match decision {
            ProcessorDecision::Authorized {
                processor_auth_id,
                authorization_code,
                authorized_amount_minor_units,
                currency,
                ..
            } => AuthDecision::Authorized {
                processor_name: processor.name().to_string(),
                processor_auth_id,
                authorization_code,
                authorized_amount_minor_units,
                currency,
            },
            ProcessorDecision::Denied {
                denial_code,
                denial_reason,
                ..
            } => AuthDecision::Denied {
                processor_name: processor.name().to_string(),
                denial_code,
                denial_reason,
            },
        };

        self.apply_event(AuthEvent::AuthResponseReceived {
            auth_request_id,
            decision,
            received_at: Utc::now(),
        })
        .await?;

        Ok(ProcessingResult::Completed)
    }

    /// Record an attempt failure. A delivery count past `max_retries`
    /// forces terminal classification regardless of the error class.
    async fn record_failure(
        &self,
        auth_request_id: Uuid,
        receive_count: u32,
        retryable: bool,
        reason: &str,
    ) -> Result<ProcessingResult, WorkerError> {
        let retryable = retryable && receive_count <= self.settings.max_retries;

        tracing::warn!(
            auth_request_id = %auth_request_id,
            retryable,
            receive_count,
            reason,
            "authorization attempt failed"
        );

        self.apply_event(AuthEvent::AuthAttemptFailed {
            auth_request_id,
            reason: reason.to_string(),
            retryable,
            failed_at: Utc::now(),
        })
        .await?;

        if retryable {
            Ok(ProcessingResult::RetryableFailure)
        } else {
            Ok(ProcessingResult::TerminalFailure)
        }
    }

    /// Append one event and project it in a single transaction, retrying on
    /// sequence conflicts (a client void can race the locked worker).
    async fn apply_event(&self, event: AuthEvent) -> Result<i64, WorkerError> {
        let metadata = EventMetadata::new().with_worker_id(self.settings.worker_id.clone());

        let mut attempt = 0;
        loop {
            let mut tx = self.pool.begin().await?;
            match self.event_store.append(&mut tx, &event, &metadata).await {
                Ok(sequence) => {
                    projection::apply(&mut tx, &event, sequence).await?;
                    tx.commit().await?;
                    return Ok(sequence);
                }
                Err(e) if e.is_retryable() && attempt < MAX_APPLY_RETRIES => {
                    drop(tx);
                    attempt += 1;
                    tracing::warn!(
                        auth_request_id = %event.auth_request_id(),
                        event_type = event.event_type(),
                        attempt,
                        "sequence conflict, retrying event apply"
                    );
                    tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
