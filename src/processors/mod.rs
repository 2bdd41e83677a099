//! Payment processors
//!
//! Every processor integration implements [`Processor`]: a single authorize
//! operation returning either a decision (authorized or denied) or a failure
//! classified as retryable or terminal. Card declines are decisions, not
//! failures. Concrete processors are instantiated through the
//! [`ProcessorRegistry`] from per-restaurant configuration.

mod mock;
mod registry;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::token::CardData;

pub use mock::MockProcessor;
pub use registry::{ProcessorRegistry, RegistryError};

/// Outcome of a processor authorize call
#[derive(Debug, Clone)]
pub enum ProcessorDecision {
    Authorized {
        processor_auth_id: String,
        authorization_code: String,
        authorized_amount_minor_units: i64,
        currency: String,
        metadata: HashMap<String, String>,
    },
    Denied {
        denial_code: String,
        denial_reason: String,
        metadata: HashMap<String, String>,
    },
}

/// Processor failures, split by whether a retry can succeed
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// Transient: 5xx, rate limits, timeouts, network failures
    #[error("Retryable processor failure: {0}")]
    Retryable(String),

    /// Permanent: invalid configuration, rejected credentials, malformed
    /// requests
    #[error("Terminal processor failure: {0}")]
    Terminal(String),
}

impl ProcessorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProcessorError::Retryable(_))
    }
}

/// A payment processor integration.
#[async_trait]
pub trait Processor: Send + Sync + std::fmt::Debug {
    /// Registry name of this processor
    fn name(&self) -> &str;

    /// Place an authorization-only hold for `amount_minor_units` in
    /// `currency` against the decrypted card.
    async fn authorize(
        &self,
        card: &CardData,
        amount_minor_units: i64,
        currency: &str,
    ) -> Result<ProcessorDecision, ProcessorError>;
}
