//! Payment Token Service client
//!
//! The token service is an external collaborator with one relevant
//! operation: decrypting a payment token into card data for the processor
//! call. Its failure modes split into terminal (the token will never
//! decrypt) and retryable (the service is temporarily unavailable).

mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use client::HttpTokenClient;

/// Decrypted payment card data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardData {
    pub card_number: String,
    pub exp_month: u32,
    pub exp_year: u32,
    pub cvv: String,
    pub cardholder_name: String,
    #[serde(default)]
    pub billing_zip: Option<String>,
}

impl CardData {
    /// Last four digits, the only part of the PAN that may be logged
    pub fn last4(&self) -> &str {
        let len = self.card_number.len();
        &self.card_number[len.saturating_sub(4)..]
    }
}

/// Token service errors
#[derive(Debug, thiserror::Error)]
pub enum TokenClientError {
    #[error("Payment token not found")]
    NotFound,

    #[error("Payment token expired")]
    Expired,

    #[error("Access to payment token forbidden")]
    Forbidden,

    /// 5xx, timeout, or network failure; the attempt should be retried
    #[error("Token service unavailable: {0}")]
    Unavailable(String),
}

impl TokenClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TokenClientError::Unavailable(_))
    }
}

/// Decrypt operation against the token service.
#[async_trait]
pub trait TokenClient: Send + Sync {
    async fn decrypt(
        &self,
        payment_token: &str,
        restaurant_id: Uuid,
        requesting_service: &str,
    ) -> Result<CardData, TokenClientError>;
}
