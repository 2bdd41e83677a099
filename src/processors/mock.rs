//! Mock processor
//!
//! Simulates a card processor for tests and development environments.
//! Behavior is driven by Stripe-style test card numbers; unknown cards
//! follow the configured `default_response`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;

use crate::token::CardData;

use super::{Processor, ProcessorDecision, ProcessorError};

/// Card that always authorizes
pub const CARD_SUCCESS: &str = "4242424242424242";
/// Card declined for insufficient funds
pub const CARD_INSUFFICIENT_FUNDS: &str = "4000000000009995";
/// Card declined generically
pub const CARD_GENERIC_DECLINE: &str = "4000000000000002";
/// Card declined as expired
pub const CARD_EXPIRED: &str = "4000000000000069";
/// Card that simulates a transient processor failure
pub const CARD_PROCESSING_ERROR: &str = "4000000000000119";

/// Mock processor configuration (from `restaurant_payment_configs`)
#[derive(Debug, Clone, Deserialize)]
pub struct MockConfig {
    /// Behavior for card numbers outside the test table:
    /// "authorized" or "denied"
    #[serde(default = "default_response")]
    pub default_response: String,

    /// Simulated network latency per call
    #[serde(default)]
    pub latency_ms: u64,
}

fn default_response() -> String {
    "authorized".to_string()
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            default_response: default_response(),
            latency_ms: 0,
        }
    }
}

/// Mock [`Processor`] implementation
#[derive(Debug)]
pub struct MockProcessor {
    config: MockConfig,
}

impl MockProcessor {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// Build from a restaurant's `processor_config` JSON
    pub fn from_config(config: &serde_json::Value) -> Result<Self, String> {
        let config: MockConfig = if config.is_null() {
            MockConfig::default()
        } else {
            serde_json::from_value(config.clone()).map_err(|e| e.to_string())?
        };

        if config.default_response != "authorized" && config.default_response != "denied" {
            return Err(format!(
                "default_response must be 'authorized' or 'denied', got '{}'",
                config.default_response
            ));
        }

        Ok(Self::new(config))
    }

    fn authorized(amount_minor_units: i64, currency: &str) -> ProcessorDecision {
        let mut rng = rand::thread_rng();
        let suffix: [u8; 8] = rng.gen();
        ProcessorDecision::Authorized {
            processor_auth_id: format!("mock_ch_{}", hex::encode(suffix)),
            authorization_code: format!("AUTH-{:05}", rng.gen_range(0..100_000)),
            authorized_amount_minor_units: amount_minor_units,
            currency: currency.to_string(),
            metadata: HashMap::from([("simulated".to_string(), "true".to_string())]),
        }
    }

    fn denied(code: &str, reason: &str) -> ProcessorDecision {
        ProcessorDecision::Denied {
            denial_code: code.to_string(),
            denial_reason: reason.to_string(),
            metadata: HashMap::from([("simulated".to_string(), "true".to_string())]),
        }
    }
}

#[async_trait]
impl Processor for MockProcessor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn authorize(
        &self,
        card: &CardData,
        amount_minor_units: i64,
        currency: &str,
    ) -> Result<ProcessorDecision, ProcessorError> {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }

        let decision = match card.card_number.as_str() {
            CARD_SUCCESS => Self::authorized(amount_minor_units, currency),
            CARD_INSUFFICIENT_FUNDS => Self::denied("insufficient_funds", "Not enough funds"),
            CARD_GENERIC_DECLINE => Self::denied("generic_decline", "Your card was declined"),
            CARD_EXPIRED => Self::denied("expired_card", "Your card has expired"),
            CARD_PROCESSING_ERROR => {
                return Err(ProcessorError::Retryable(
                    "simulated processing error".to_string(),
                ))
            }
            _ => {
                if self.config.default_response == "denied" {
                    Self::denied("generic_decline", "Your card was declined")
                } else {
                    Self::authorized(amount_minor_units, currency)
                }
            }
        };

        tracing::debug!(
            card_last4 = card.last4(),
            amount_minor_units,
            currency,
            "mock authorization evaluated"
        );
        Ok(decision)
    }
}
