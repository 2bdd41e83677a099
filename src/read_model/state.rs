//! Read-model state
//!
//! The `auth_request_state` row maintained synchronously with every event
//! append. Reads and the worker consult this table, never the event ledger.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::domain::AuthStatus;

use super::ProjectionError;

/// Current state of an authorization request
#[derive(Debug, Clone)]
pub struct AuthRequestState {
    pub auth_request_id: Uuid,
    pub restaurant_id: Uuid,
    pub payment_token: String,
    pub status: AuthStatus,
    pub amount_minor_units: i64,
    pub currency: String,
    pub metadata: serde_json::Value,
    pub processor_auth_id: Option<String>,
    pub processor_name: Option<String>,
    pub authorized_amount_minor_units: Option<i64>,
    pub authorization_code: Option<String>,
    pub denial_code: Option<String>,
    pub denial_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_event_sequence: i64,
}

impl<'r> sqlx::FromRow<'r, PgRow> for AuthRequestState {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        let status: AuthStatus = status.parse().map_err(|e| sqlx::Error::ColumnDecode {
            index: "status".to_string(),
            source: Box::new(e),
        })?;

        Ok(Self {
            auth_request_id: row.try_get("auth_request_id")?,
            restaurant_id: row.try_get("restaurant_id")?,
            payment_token: row.try_get("payment_token")?,
            status,
            amount_minor_units: row.try_get("amount_minor_units")?,
            currency: row.try_get("currency")?,
            metadata: row.try_get("metadata")?,
            processor_auth_id: row.try_get("processor_auth_id")?,
            processor_name: row.try_get("processor_name")?,
            authorized_amount_minor_units: row.try_get("authorized_amount_minor_units")?,
            authorization_code: row.try_get("authorization_code")?,
            denial_code: row.try_get("denial_code")?,
            denial_reason: row.try_get("denial_reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
            last_event_sequence: row.try_get("last_event_sequence")?,
        })
    }
}

const STATE_COLUMNS: &str = r#"
    auth_request_id, restaurant_id, payment_token, status,
    amount_minor_units, currency, metadata,
    processor_auth_id, processor_name, authorized_amount_minor_units,
    authorization_code, denial_code, denial_reason,
    created_at, updated_at, completed_at, last_event_sequence
"#;

/// Repository over `auth_request_state`
#[derive(Debug, Clone)]
pub struct AuthStateRepository {
    pool: PgPool,
}

impl AuthStateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch a request's current state
    pub async fn get(
        &self,
        auth_request_id: Uuid,
    ) -> Result<Option<AuthRequestState>, ProjectionError> {
        let state = sqlx::query_as::<_, AuthRequestState>(&format!(
            "SELECT {STATE_COLUMNS} FROM auth_request_state WHERE auth_request_id = $1"
        ))
        .bind(auth_request_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(state)
    }

    /// Fetch a request's state, treating a restaurant mismatch identically
    /// to an absent row so callers cannot enumerate foreign requests.
    pub async fn get_owned(
        &self,
        auth_request_id: Uuid,
        restaurant_id: Uuid,
    ) -> Result<Option<AuthRequestState>, ProjectionError> {
        let state = self.get(auth_request_id).await?;
        Ok(state.filter(|s| s.restaurant_id == restaurant_id))
    }
}
