//! Common test utilities
#![allow(dead_code)] // not every suite uses every helper

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use payment_auth::token::{CardData, TokenClient, TokenClientError};

/// Connect to the test database. Tests isolate by unique restaurant and
/// aggregate IDs rather than truncation, so suites can run concurrently.
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB")
}

/// Seed an active restaurant payment config and return its ID.
pub async fn seed_restaurant(
    pool: &PgPool,
    processor_name: &str,
    processor_config: serde_json::Value,
) -> Uuid {
    let restaurant_id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO restaurant_payment_configs
            (restaurant_id, processor_name, processor_config, is_active)
        VALUES ($1, $2, $3, TRUE)
        "#,
    )
    .bind(restaurant_id)
    .bind(processor_name)
    .bind(&processor_config)
    .execute(pool)
    .await
    .expect("Failed to seed restaurant config");

    restaurant_id
}

/// Token client stub mapping payment tokens to card numbers.
#[derive(Default)]
pub struct StubTokenClient {
    cards: Mutex<HashMap<String, String>>,
}

impl StubTokenClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token that decrypts to the given card number.
    pub fn insert(&self, payment_token: &str, card_number: &str) {
        self.cards
            .lock()
            .unwrap()
            .insert(payment_token.to_string(), card_number.to_string());
    }
}

#[async_trait]
impl TokenClient for StubTokenClient {
    async fn decrypt(
        &self,
        payment_token: &str,
        _restaurant_id: Uuid,
        _requesting_service: &str,
    ) -> Result<CardData, TokenClientError> {
        let card_number = self
            .cards
            .lock()
            .unwrap()
            .get(payment_token)
            .cloned()
            .ok_or(TokenClientError::NotFound)?;

        Ok(CardData {
            card_number,
            exp_month: 12,
            exp_year: 2030,
            cvv: "123".to_string(),
            cardholder_name: "Test User".to_string(),
            billing_zip: Some("12345".to_string()),
        })
    }
}

/// Count events of a given type for an aggregate.
pub async fn count_events(pool: &PgPool, aggregate_id: Uuid, event_type: &str) -> i64 {
    sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM payment_events
        WHERE aggregate_id = $1 AND event_type = $2
        "#,
    )
    .bind(aggregate_id)
    .bind(event_type)
    .fetch_one(pool)
    .await
    .expect("Failed to count events")
}

/// Sequence numbers of an aggregate's events, ascending.
pub async fn event_sequences(pool: &PgPool, aggregate_id: Uuid) -> Vec<i64> {
    sqlx::query_scalar(
        r#"
        SELECT sequence_number FROM payment_events
        WHERE aggregate_id = $1
        ORDER BY sequence_number
        "#,
    )
    .bind(aggregate_id)
    .fetch_all(pool)
    .await
    .expect("Failed to fetch sequences")
}
