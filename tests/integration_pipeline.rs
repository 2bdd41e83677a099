//! End-to-end pipeline tests: API handler -> outbox -> dispatcher -> bus ->
//! worker -> read model.
//!
//! Tests share the database, so they serialize on a file-level lock and
//! drain any leftover outbox rows before dispatching.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use payment_auth::bus::{Bus, MemoryBus};
use payment_auth::domain::{AuthRequestQueuedMessage, AuthStatus, EventMetadata};
use payment_auth::handlers::{AuthorizeCommand, AuthorizeHandler, AuthorizeOutcome, VoidCommand, VoidHandler};
use payment_auth::outbox::{DispatcherConfig, OutboxDispatcher};
use payment_auth::processors::{Processor, ProcessorDecision, ProcessorError, ProcessorRegistry};
use payment_auth::read_model::AuthStateRepository;
use payment_auth::token::{CardData, TokenClient};
use payment_auth::worker::{ProcessingResult, Worker, WorkerSettings};
use payment_auth::AppError;

mod common;

static PIPELINE_LOCK: Mutex<()> = Mutex::const_new(());

const AUTH_QUEUE: &str = "auth-requests";
const VOID_QUEUE: &str = "void-requests";

/// Mark any leftover unprocessed outbox rows from earlier tests so this
/// test's dispatcher only sees its own.
async fn drain_outbox(pool: &PgPool) {
    sqlx::query("UPDATE outbox SET processed_at = NOW() WHERE processed_at IS NULL")
        .execute(pool)
        .await
        .expect("Failed to drain outbox");
}

struct Pipeline {
    bus: Arc<MemoryBus>,
    dispatcher: OutboxDispatcher,
    worker: Worker,
    state: AuthStateRepository,
    visibility_timeout: Duration,
}

fn build_pipeline(
    pool: PgPool,
    registry: Arc<ProcessorRegistry>,
    tokens: Arc<dyn TokenClient>,
    visibility_timeout: Duration,
) -> Pipeline {
    let bus = Arc::new(MemoryBus::new());
    bus.create_fifo_queue(AUTH_QUEUE);
    bus.create_queue(VOID_QUEUE);

    let dispatcher = OutboxDispatcher::new(
        pool.clone(),
        bus.clone(),
        DispatcherConfig::default(),
    );

    let worker = Worker::new(
        pool.clone(),
        bus.clone(),
        tokens,
        registry,
        WorkerSettings {
            worker_id: format!("worker-test-{}", Uuid::new_v4()),
            visibility_timeout,
            ..WorkerSettings::default()
        },
    );

    Pipeline {
        state: AuthStateRepository::new(pool),
        bus,
        dispatcher,
        worker,
        visibility_timeout,
    }
}

fn authorize_handler(pool: &PgPool) -> AuthorizeHandler {
    // Zero poll budget: the create returns immediately and the worker is
    // driven by hand.
    AuthorizeHandler::new(pool.clone(), Duration::ZERO, Duration::from_millis(10))
}

async fn authorize(pool: &PgPool, restaurant_id: Uuid, payment_token: &str) -> Uuid {
    let command = AuthorizeCommand::new(
        payment_token.to_string(),
        restaurant_id,
        1050,
        "USD".to_string(),
        format!("idem-{}", Uuid::new_v4()),
    );

    let outcome = authorize_handler(pool)
        .execute(command, EventMetadata::new())
        .await
        .expect("authorize failed");

    outcome.state().auth_request_id
}

/// Run one dispatcher batch and one worker step.
async fn pump_one(pipeline: &Pipeline) {
    pipeline
        .dispatcher
        .process_batch()
        .await
        .expect("dispatch failed");

    let message = pipeline
        .bus
        .receive(AUTH_QUEUE, pipeline.visibility_timeout)
        .await
        .expect("receive failed")
        .expect("expected a queued auth request");

    pipeline.worker.handle_message(message).await;
}

#[tokio::test]
async fn test_happy_path_authorizes_within_three_events() {
    let _guard = PIPELINE_LOCK.lock().await;
    let pool = common::setup_test_db().await;
    drain_outbox(&pool).await;

    let restaurant_id = common::seed_restaurant(&pool, "mock", serde_json::json!({})).await;
    let tokens = Arc::new(common::StubTokenClient::new());
    tokens.insert("pt_happy", "4242424242424242");

    let pipeline = build_pipeline(
        pool.clone(),
        Arc::new(ProcessorRegistry::with_defaults()),
        tokens,
        Duration::from_secs(30),
    );

    let auth_request_id = authorize(&pool, restaurant_id, "pt_happy").await;
    pump_one(&pipeline).await;

    let state = pipeline
        .state
        .get(auth_request_id)
        .await
        .unwrap()
        .expect("state row missing");

    assert_eq!(state.status, AuthStatus::Authorized);
    assert_eq!(state.authorized_amount_minor_units, Some(1050));
    assert_eq!(state.processor_name.as_deref(), Some("mock"));
    assert!(state.processor_auth_id.unwrap().starts_with("mock_ch_"));
    assert!(state.authorization_code.unwrap().starts_with("AUTH-"));
    assert!(state.completed_at.is_some());

    // Created, AttemptStarted, ResponseReceived: dense sequence 1..3
    assert_eq!(common::event_sequences(&pool, auth_request_id).await, vec![1, 2, 3]);
    assert_eq!(state.last_event_sequence, 3);
    assert_eq!(
        common::count_events(&pool, auth_request_id, "AuthResponseReceived").await,
        1
    );

    // Outcome applied, message deleted
    assert_eq!(pipeline.bus.depth(AUTH_QUEUE), 0);
}

#[tokio::test]
async fn test_decline_records_denial_fields() {
    let _guard = PIPELINE_LOCK.lock().await;
    let pool = common::setup_test_db().await;
    drain_outbox(&pool).await;

    let restaurant_id = common::seed_restaurant(&pool, "mock", serde_json::json!({})).await;
    let tokens = Arc::new(common::StubTokenClient::new());
    tokens.insert("pt_nsf", "4000000000009995");

    let pipeline = build_pipeline(
        pool.clone(),
        Arc::new(ProcessorRegistry::with_defaults()),
        tokens,
        Duration::from_secs(30),
    );

    let auth_request_id = authorize(&pool, restaurant_id, "pt_nsf").await;
    pump_one(&pipeline).await;

    let state = pipeline.state.get(auth_request_id).await.unwrap().unwrap();
    assert_eq!(state.status, AuthStatus::Denied);
    assert_eq!(state.denial_code.as_deref(), Some("insufficient_funds"));
    assert_eq!(state.denial_reason.as_deref(), Some("Not enough funds"));
    assert!(state.completed_at.is_some());
    assert_eq!(pipeline.bus.depth(AUTH_QUEUE), 0);
}

#[tokio::test]
async fn test_void_before_processing_expires_without_invoking_processor() {
    let _guard = PIPELINE_LOCK.lock().await;
    let pool = common::setup_test_db().await;
    drain_outbox(&pool).await;

    let restaurant_id = common::seed_restaurant(&pool, "mock", serde_json::json!({})).await;
    let tokens = Arc::new(common::StubTokenClient::new());
    tokens.insert("pt_void", "4242424242424242");

    let pipeline = build_pipeline(
        pool.clone(),
        Arc::new(ProcessorRegistry::with_defaults()),
        tokens,
        Duration::from_secs(30),
    );

    let auth_request_id = authorize(&pool, restaurant_id, "pt_void").await;

    // Void lands before any worker picks the message up
    let voided = VoidHandler::new(pool.clone())
        .execute(
            VoidCommand::new(auth_request_id, restaurant_id, "customer cancelled".to_string()),
            EventMetadata::new(),
        )
        .await
        .unwrap();
    assert_eq!(voided.status, AuthStatus::Expired);
    assert!(voided.completed_at.is_some());

    // The queued message is drained against the terminal state
    pump_one(&pipeline).await;

    let state = pipeline.state.get(auth_request_id).await.unwrap().unwrap();
    assert_eq!(state.status, AuthStatus::Expired);
    assert_eq!(
        common::count_events(&pool, auth_request_id, "AuthAttemptStarted").await,
        0
    );
    assert_eq!(
        common::count_events(&pool, auth_request_id, "AuthResponseReceived").await,
        0
    );
    assert_eq!(pipeline.bus.depth(AUTH_QUEUE), 0);
}

/// Fails the first call, authorizes afterwards.
#[derive(Debug)]
struct FlakyProcessor {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Processor for FlakyProcessor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn authorize(
        &self,
        _card: &CardData,
        amount_minor_units: i64,
        currency: &str,
    ) -> Result<ProcessorDecision, ProcessorError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(ProcessorError::Retryable("transient upstream error".to_string()));
        }

        Ok(ProcessorDecision::Authorized {
            processor_auth_id: "ch_1".to_string(),
            authorization_code: "AUTH-12345".to_string(),
            authorized_amount_minor_units: amount_minor_units,
            currency: currency.to_string(),
            metadata: Default::default(),
        })
    }
}

#[tokio::test]
async fn test_retryable_failure_then_success_on_redelivery() {
    let _guard = PIPELINE_LOCK.lock().await;
    let pool = common::setup_test_db().await;
    drain_outbox(&pool).await;

    let restaurant_id = common::seed_restaurant(&pool, "mock", serde_json::json!({})).await;
    let tokens = Arc::new(common::StubTokenClient::new());
    tokens.insert("pt_flaky", "4242424242424242");

    let calls = Arc::new(AtomicU32::new(0));
    let mut registry = ProcessorRegistry::new();
    let ctor_calls = calls.clone();
    registry.register("mock", move |_config| {
        Ok(Box::new(FlakyProcessor {
            calls: ctor_calls.clone(),
        }))
    });

    let pipeline = build_pipeline(
        pool.clone(),
        Arc::new(registry),
        tokens,
        Duration::from_millis(100),
    );

    let auth_request_id = authorize(&pool, restaurant_id, "pt_flaky").await;

    // First delivery: retryable failure, message stays on the queue
    pump_one(&pipeline).await;

    let state = pipeline.state.get(auth_request_id).await.unwrap().unwrap();
    assert_eq!(state.status, AuthStatus::Processing);
    let sequence_after_failure = state.last_event_sequence;
    assert_eq!(pipeline.bus.depth(AUTH_QUEUE), 1);
    assert_eq!(
        common::count_events(&pool, auth_request_id, "AuthAttemptFailed").await,
        1
    );

    // Visibility timeout lapses and the bus re-delivers
    tokio::time::sleep(Duration::from_millis(150)).await;
    let redelivered = pipeline
        .bus
        .receive(AUTH_QUEUE, Duration::from_secs(30))
        .await
        .unwrap()
        .expect("expected redelivery");
    assert_eq!(redelivered.receive_count, 2);
    pipeline.worker.handle_message(redelivered).await;

    let state = pipeline.state.get(auth_request_id).await.unwrap().unwrap();
    assert_eq!(state.status, AuthStatus::Authorized);
    assert_eq!(state.processor_auth_id.as_deref(), Some("ch_1"));
    assert!(state.last_event_sequence > sequence_after_failure);
    assert_eq!(
        common::count_events(&pool, auth_request_id, "AuthResponseReceived").await,
        1
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(pipeline.bus.depth(AUTH_QUEUE), 0);
}

#[tokio::test]
async fn test_redelivery_after_terminal_leaves_tables_unchanged() {
    let _guard = PIPELINE_LOCK.lock().await;
    let pool = common::setup_test_db().await;
    drain_outbox(&pool).await;

    let restaurant_id = common::seed_restaurant(&pool, "mock", serde_json::json!({})).await;
    let tokens = Arc::new(common::StubTokenClient::new());
    tokens.insert("pt_redeliver", "4242424242424242");

    let pipeline = build_pipeline(
        pool.clone(),
        Arc::new(ProcessorRegistry::with_defaults()),
        tokens,
        Duration::from_secs(30),
    );

    let auth_request_id = authorize(&pool, restaurant_id, "pt_redeliver").await;
    pump_one(&pipeline).await;

    let before = pipeline.state.get(auth_request_id).await.unwrap().unwrap();
    assert_eq!(before.status, AuthStatus::Authorized);
    let events_before = common::event_sequences(&pool, auth_request_id).await;

    // Simulate the bus handing the same message back
    let duplicate = AuthRequestQueuedMessage {
        auth_request_id,
        restaurant_id,
        created_at: before.created_at,
    };
    let result = pipeline.worker.process(&duplicate, 2).await.unwrap();
    assert_eq!(result, ProcessingResult::AlreadyTerminal);

    let after = pipeline.state.get(auth_request_id).await.unwrap().unwrap();
    assert_eq!(after.last_event_sequence, before.last_event_sequence);
    assert_eq!(after.updated_at, before.updated_at);
    assert_eq!(
        common::event_sequences(&pool, auth_request_id).await,
        events_before
    );
}

#[tokio::test]
async fn test_idempotent_replay_creates_single_aggregate() {
    let _guard = PIPELINE_LOCK.lock().await;
    let pool = common::setup_test_db().await;
    drain_outbox(&pool).await;

    let restaurant_id = common::seed_restaurant(&pool, "mock", serde_json::json!({})).await;
    let idempotency_key = format!("idem-{}", Uuid::new_v4());

    let command = AuthorizeCommand::new(
        "pt_idem".to_string(),
        restaurant_id,
        1050,
        "USD".to_string(),
        idempotency_key.clone(),
    );

    let handler = authorize_handler(&pool);
    let first = handler
        .execute(command.clone(), EventMetadata::new())
        .await
        .unwrap();
    let second = handler
        .execute(command.clone(), EventMetadata::new())
        .await
        .unwrap();

    let first_id = first.state().auth_request_id;
    assert_eq!(first_id, second.state().auth_request_id);
    assert!(matches!(second, AuthorizeOutcome::InProgress(_)));

    // Exactly one seed event and one outbox row exist for the aggregate
    assert_eq!(
        common::count_events(&pool, first_id, "AuthRequestCreated").await,
        1
    );
    let outbox_rows: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM outbox WHERE aggregate_id = $1")
            .bind(first_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(outbox_rows, 1);

    // Same key with a different payload is a conflict
    let mut altered = command;
    altered.amount_minor_units = 9999;
    let err = handler
        .execute(altered, EventMetadata::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::IdempotencyConflict));
}

#[tokio::test]
async fn test_missing_restaurant_config_fails_terminally() {
    let _guard = PIPELINE_LOCK.lock().await;
    let pool = common::setup_test_db().await;
    drain_outbox(&pool).await;

    // No config row seeded for this restaurant
    let restaurant_id = Uuid::new_v4();
    let tokens = Arc::new(common::StubTokenClient::new());
    tokens.insert("pt_orphan", "4242424242424242");

    let pipeline = build_pipeline(
        pool.clone(),
        Arc::new(ProcessorRegistry::with_defaults()),
        tokens,
        Duration::from_secs(30),
    );

    let auth_request_id = authorize(&pool, restaurant_id, "pt_orphan").await;
    pump_one(&pipeline).await;

    let state = pipeline.state.get(auth_request_id).await.unwrap().unwrap();
    assert_eq!(state.status, AuthStatus::Failed);
    assert!(state.completed_at.is_some());
    assert_eq!(pipeline.bus.depth(AUTH_QUEUE), 0);

    // A failed request is not voidable; the projection rejects the
    // transition and nothing is written.
    let err = VoidHandler::new(pool.clone())
        .execute(
            VoidCommand::new(auth_request_id, restaurant_id, "too late".to_string()),
            EventMetadata::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Projection(_)));
    let state = pipeline.state.get(auth_request_id).await.unwrap().unwrap();
    assert_eq!(state.status, AuthStatus::Failed);
}

#[tokio::test]
async fn test_void_during_processing_expires_on_redelivery() {
    let _guard = PIPELINE_LOCK.lock().await;
    let pool = common::setup_test_db().await;
    drain_outbox(&pool).await;

    let restaurant_id = common::seed_restaurant(&pool, "mock", serde_json::json!({})).await;
    let tokens = Arc::new(common::StubTokenClient::new());
    // Card the mock always fails retryably, so the row parks in PROCESSING
    tokens.insert("pt_mid_void", "4000000000000119");

    let pipeline = build_pipeline(
        pool.clone(),
        Arc::new(ProcessorRegistry::with_defaults()),
        tokens,
        Duration::from_millis(100),
    );

    let auth_request_id = authorize(&pool, restaurant_id, "pt_mid_void").await;

    // First delivery: retryable failure leaves PROCESSING, message re-queued
    pump_one(&pipeline).await;
    let state = pipeline.state.get(auth_request_id).await.unwrap().unwrap();
    assert_eq!(state.status, AuthStatus::Processing);
    assert_eq!(pipeline.bus.depth(AUTH_QUEUE), 1);

    // The void lands mid-flight: recorded, state stays PROCESSING
    let voided = VoidHandler::new(pool.clone())
        .execute(
            VoidCommand::new(auth_request_id, restaurant_id, "customer cancelled".to_string()),
            EventMetadata::new(),
        )
        .await
        .unwrap();
    assert_eq!(voided.status, AuthStatus::Processing);

    // Redelivery honors the recorded void: expired, never re-attempted
    tokio::time::sleep(Duration::from_millis(150)).await;
    let redelivered = pipeline
        .bus
        .receive(AUTH_QUEUE, Duration::from_secs(30))
        .await
        .unwrap()
        .expect("expected redelivery");
    assert_eq!(redelivered.receive_count, 2);
    pipeline.worker.handle_message(redelivered).await;

    let state = pipeline.state.get(auth_request_id).await.unwrap().unwrap();
    assert_eq!(state.status, AuthStatus::Expired);
    assert!(state.completed_at.is_some());

    // Created, Started, Failed(retryable), VoidRequested, Expired
    assert_eq!(
        common::event_sequences(&pool, auth_request_id).await,
        vec![1, 2, 3, 4, 5]
    );
    assert_eq!(
        common::count_events(&pool, auth_request_id, "AuthRequestExpired").await,
        1
    );
    assert_eq!(
        common::count_events(&pool, auth_request_id, "AuthResponseReceived").await,
        0
    );
    assert_eq!(pipeline.bus.depth(AUTH_QUEUE), 0);
}

#[tokio::test]
async fn test_worker_expires_pending_request_with_recorded_void() {
    let _guard = PIPELINE_LOCK.lock().await;
    let pool = common::setup_test_db().await;
    drain_outbox(&pool).await;

    let restaurant_id = common::seed_restaurant(&pool, "mock", serde_json::json!({})).await;
    let tokens = Arc::new(common::StubTokenClient::new());
    tokens.insert("pt_ghost_void", "4242424242424242");

    let pipeline = build_pipeline(
        pool.clone(),
        Arc::new(ProcessorRegistry::with_defaults()),
        tokens,
        Duration::from_secs(30),
    );

    let auth_request_id = authorize(&pool, restaurant_id, "pt_ghost_void").await;

    // Record a void event without its projection, the shape another writer
    // produces when it defers the state change.
    let store = payment_auth::event_store::EventStore::new(pool.clone());
    let mut tx = pool.begin().await.unwrap();
    store
        .append(
            &mut tx,
            &payment_auth::domain::AuthEvent::AuthVoidRequested {
                auth_request_id,
                reason: "out-of-band void".to_string(),
                requested_at: chrono::Utc::now(),
            },
            &EventMetadata::new(),
        )
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let state = pipeline.state.get(auth_request_id).await.unwrap().unwrap();
    assert_eq!(state.status, AuthStatus::Pending);

    // The worker drains the queued request by expiring it, never touching
    // the processor.
    let queued = AuthRequestQueuedMessage {
        auth_request_id,
        restaurant_id,
        created_at: state.created_at,
    };
    let result = pipeline.worker.process(&queued, 1).await.unwrap();
    assert_eq!(result, ProcessingResult::Expired);

    let state = pipeline.state.get(auth_request_id).await.unwrap().unwrap();
    assert_eq!(state.status, AuthStatus::Expired);
    assert!(state.completed_at.is_some());
    assert_eq!(
        common::count_events(&pool, auth_request_id, "AuthRequestExpired").await,
        1
    );
    assert_eq!(
        common::count_events(&pool, auth_request_id, "AuthAttemptStarted").await,
        0
    );
}
