//! payment_auth - Payment Authorization Pipeline
//!
//! Runs the full pipeline in one process: the authorization API, the outbox
//! dispatcher, the auth processor worker, and the lock janitor, all over a
//! shared database pool and bus handle.

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use payment_auth::api::{self, ApiState};
use payment_auth::bus::MemoryBus;
use payment_auth::locks::{LockJanitor, LockManager};
use payment_auth::outbox::{DispatcherConfig, OutboxDispatcher};
use payment_auth::processors::ProcessorRegistry;
use payment_auth::token::HttpTokenClient;
use payment_auth::worker::{Worker, WorkerSettings};
use payment_auth::{db, Config};

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "payment_auth=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!("Starting payment_auth");
    tracing::info!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    // Queues. The in-memory bus backs the single-process deployment; a
    // hosted queue adapter would be constructed here instead.
    let bus = Arc::new(MemoryBus::new());
    bus.create_fifo_queue(&config.auth_requests_queue);
    bus.create_queue(&config.void_requests_queue);

    let registry = Arc::new(ProcessorRegistry::with_defaults());
    let token_client = Arc::new(HttpTokenClient::new(
        config.token_service_base_url.clone(),
        config.token_service_auth_token.clone(),
        config.token_service_timeout(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Outbox dispatcher
    let dispatcher = OutboxDispatcher::new(
        pool.clone(),
        bus.clone(),
        DispatcherConfig {
            poll_interval: config.outbox_poll_interval(),
            batch_size: config.outbox_batch_size,
            auth_requests_queue: config.auth_requests_queue.clone(),
            void_requests_queue: config.void_requests_queue.clone(),
        },
    );
    let dispatcher_rx = shutdown_rx.clone();
    let dispatcher_task = tokio::spawn(async move { dispatcher.run(dispatcher_rx).await });

    // Worker
    let worker = Worker::new(
        pool.clone(),
        bus.clone(),
        token_client,
        registry,
        WorkerSettings {
            worker_id: config.worker_id.clone(),
            queue: config.auth_requests_queue.clone(),
            visibility_timeout: config.visibility_timeout(),
            lock_ttl: config.lock_ttl(),
            max_retries: config.max_retries,
            processor_timeout: config.processor_timeout(),
            ..WorkerSettings::default()
        },
    );
    let worker_rx = shutdown_rx.clone();
    let worker_task = tokio::spawn(async move { worker.run(worker_rx).await });

    // Lock janitor
    let janitor = LockJanitor::new(LockManager::new(pool.clone()), config.janitor_interval());
    let janitor_rx = shutdown_rx.clone();
    let janitor_task = tokio::spawn(async move { janitor.run(janitor_rx).await });

    // HTTP API
    let state = ApiState::new(pool.clone(), config.max_poll_duration(), config.poll_interval());
    let app = api::create_router()
        .with_state(state)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop background tasks: signal, then wait for in-flight work.
    tracing::info!("Server shutting down...");
    shutdown_tx.send(true)?;
    let _ = tokio::join!(dispatcher_task, worker_task, janitor_task);

    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
