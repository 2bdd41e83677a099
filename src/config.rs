//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// FIFO queue name for auth requests
    pub auth_requests_queue: String,

    /// Standard queue name for void requests
    pub void_requests_queue: String,

    /// Outbox dispatcher polling interval in milliseconds
    pub outbox_interval_ms: u64,

    /// Outbox dispatcher batch size
    pub outbox_batch_size: i64,

    /// Fast-path budget for the authorize short-poll, milliseconds
    pub max_poll_duration_ms: u64,

    /// Short-poll interval, milliseconds
    pub poll_interval_ms: u64,

    /// Unique worker identifier
    pub worker_id: String,

    /// Bus message visibility timeout, seconds
    pub visibility_timeout_s: u64,

    /// Distributed lock TTL, seconds
    pub lock_ttl_s: u64,

    /// Lock janitor sweep interval, seconds
    pub janitor_interval_s: u64,

    /// Delivery count after which failures become terminal
    pub max_retries: u32,

    /// Token service base URL
    pub token_service_base_url: String,

    /// Token service auth token for X-Service-Auth
    pub token_service_auth_token: String,

    /// Token service request timeout, seconds
    pub token_service_timeout_s: u64,

    /// Processor call timeout, seconds
    pub processor_timeout_s: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        Ok(Self {
            database_url,
            database_max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_env("PORT", 3000)?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            auth_requests_queue: env::var("AUTH_REQUESTS_QUEUE")
                .unwrap_or_else(|_| "auth-requests".to_string()),
            void_requests_queue: env::var("VOID_REQUESTS_QUEUE")
                .unwrap_or_else(|_| "void-requests".to_string()),
            outbox_interval_ms: parse_env("OUTBOX_INTERVAL_MS", 100)?,
            outbox_batch_size: parse_env("OUTBOX_BATCH_SIZE", 100)?,
            max_poll_duration_ms: parse_env("MAX_POLL_DURATION_MS", 5000)?,
            poll_interval_ms: parse_env("POLL_INTERVAL_MS", 100)?,
            worker_id: env::var("WORKER_ID").unwrap_or_else(|_| "worker-1".to_string()),
            visibility_timeout_s: parse_env("VISIBILITY_TIMEOUT_S", 30)?,
            lock_ttl_s: parse_env("LOCK_TTL_S", 30)?,
            janitor_interval_s: parse_env("JANITOR_INTERVAL_S", 30)?,
            max_retries: parse_env("MAX_RETRIES", 5)?,
            token_service_base_url: env::var("TOKEN_SERVICE_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            token_service_auth_token: env::var("TOKEN_SERVICE_AUTH_TOKEN")
                .unwrap_or_else(|_| "dev-auth-token".to_string()),
            token_service_timeout_s: parse_env("TOKEN_SERVICE_TIMEOUT_S", 5)?,
            processor_timeout_s: parse_env("PROCESSOR_TIMEOUT_S", 10)?,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn outbox_poll_interval(&self) -> Duration {
        Duration::from_millis(self.outbox_interval_ms)
    }

    pub fn max_poll_duration(&self) -> Duration {
        Duration::from_millis(self.max_poll_duration_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_s)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_s)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_s)
    }

    pub fn token_service_timeout(&self) -> Duration {
        Duration::from_secs(self.token_service_timeout_s)
    }

    pub fn processor_timeout(&self) -> Duration {
        Duration::from_secs(self.processor_timeout_s)
    }
}

/// Parse an optional environment variable with a default
fn parse_env<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value.parse().map_err(|_| ConfigError::InvalidValue(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
