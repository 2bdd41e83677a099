//! Restaurant payment configuration
//!
//! Maps a restaurant to its payment processor and processor-specific
//! settings. The worker reads this before every authorization attempt.

use sqlx::PgPool;
use uuid::Uuid;

/// An active row from `restaurant_payment_configs`
#[derive(Debug, Clone)]
pub struct RestaurantPaymentConfig {
    pub restaurant_id: Uuid,
    pub processor_name: String,
    pub processor_config: serde_json::Value,
}

/// Repository over `restaurant_payment_configs`
#[derive(Debug, Clone)]
pub struct RestaurantConfigRepository {
    pool: PgPool,
}

impl RestaurantConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch a restaurant's active processor configuration. Inactive rows
    /// are treated as absent; without one, authorization cannot proceed.
    pub async fn get_active(
        &self,
        restaurant_id: Uuid,
    ) -> Result<Option<RestaurantPaymentConfig>, sqlx::Error> {
        let row: Option<(Uuid, String, serde_json::Value)> = sqlx::query_as(
            r#"
            SELECT restaurant_id, processor_name, processor_config
            FROM restaurant_payment_configs
            WHERE restaurant_id = $1 AND is_active = TRUE
            "#,
        )
        .bind(restaurant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(restaurant_id, processor_name, processor_config)| RestaurantPaymentConfig {
                restaurant_id,
                processor_name,
                processor_config,
            },
        ))
    }
}
