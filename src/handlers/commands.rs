//! Command definitions
//!
//! Commands represent client intentions entering the pipeline. Validation
//! lives here so every ingress path enforces the same rules.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::AppError;
use crate::read_model::AuthRequestState;

/// Command to create an authorization request
#[derive(Debug, Clone)]
pub struct AuthorizeCommand {
    pub payment_token: String,
    pub restaurant_id: Uuid,
    pub amount_minor_units: i64,
    pub currency: String,
    pub idempotency_key: String,
    pub metadata: HashMap<String, String>,
}

impl AuthorizeCommand {
    pub fn new(
        payment_token: String,
        restaurant_id: Uuid,
        amount_minor_units: i64,
        currency: String,
        idempotency_key: String,
    ) -> Self {
        Self {
            payment_token,
            restaurant_id,
            amount_minor_units,
            currency,
            idempotency_key,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Input validation per the API contract
    pub fn validate(&self) -> Result<(), AppError> {
        if self.payment_token.is_empty() {
            return Err(AppError::InvalidRequest(
                "payment_token must not be empty".to_string(),
            ));
        }

        if self.amount_minor_units < 1 {
            return Err(AppError::InvalidRequest(
                "amount_minor_units must be at least 1".to_string(),
            ));
        }

        if self.currency.len() != 3 || !self.currency.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(AppError::InvalidRequest(
                "currency must be three uppercase letters".to_string(),
            ));
        }

        if self.idempotency_key.is_empty() {
            return Err(AppError::InvalidRequest(
                "idempotency_key must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// SHA-256 over the canonical request fields, used to detect an
    /// idempotency key reused with a different payload.
    pub fn request_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.payment_token.as_bytes());
        hasher.update(b"|");
        hasher.update(self.restaurant_id.as_bytes());
        hasher.update(b"|");
        hasher.update(self.amount_minor_units.to_le_bytes());
        hasher.update(b"|");
        hasher.update(self.currency.as_bytes());

        // Metadata participates in key order so the hash is stable.
        let mut keys: Vec<&String> = self.metadata.keys().collect();
        keys.sort();
        for key in keys {
            hasher.update(b"|");
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(self.metadata[key].as_bytes());
        }

        hex::encode(hasher.finalize())
    }
}

/// Command to void an authorization request
#[derive(Debug, Clone)]
pub struct VoidCommand {
    pub auth_request_id: Uuid,
    pub restaurant_id: Uuid,
    pub reason: String,
}

impl VoidCommand {
    pub fn new(auth_request_id: Uuid, restaurant_id: Uuid, reason: String) -> Self {
        Self {
            auth_request_id,
            restaurant_id,
            reason,
        }
    }
}

/// Result of executing an authorize command
#[derive(Debug)]
pub enum AuthorizeOutcome {
    /// A terminal status was observed within the fast-path budget
    Completed(AuthRequestState),
    /// Still pending or processing when the budget lapsed
    InProgress(AuthRequestState),
}

impl AuthorizeOutcome {
    pub fn state(&self) -> &AuthRequestState {
        match self {
            AuthorizeOutcome::Completed(state) => state,
            AuthorizeOutcome::InProgress(state) => state,
        }
    }
}
