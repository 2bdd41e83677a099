//! API Routes
//!
//! HTTP endpoint definitions for the authorization pipeline.

use std::collections::HashMap;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{AuthStatus, EventMetadata};
use crate::error::AppError;
use crate::handlers::{
    AuthorizeCommand, AuthorizeHandler, AuthorizeOutcome, VoidCommand, VoidHandler,
};
use crate::read_model::{AuthRequestState, AuthStateRepository};

// =========================================================================
// Router state
// =========================================================================

/// Shared state for the API routes
#[derive(Clone)]
pub struct ApiState {
    pub pool: PgPool,
    pub poll_budget: Duration,
    pub poll_interval: Duration,
}

impl ApiState {
    pub fn new(pool: PgPool, poll_budget: Duration, poll_interval: Duration) -> Self {
        Self {
            pool,
            poll_budget,
            poll_interval,
        }
    }
}

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct AuthorizeRequest {
    pub payment_token: String,
    pub restaurant_id: String,
    pub amount_minor_units: i64,
    pub currency: String,
    pub idempotency_key: String,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorizationResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processor_auth_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processor_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorized_amount_minor_units: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denial_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denial_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl AuthorizationResult {
    /// Processor result payload; present only once the processor has spoken.
    fn from_state(state: &AuthRequestState) -> Option<Self> {
        if !matches!(state.status, AuthStatus::Authorized | AuthStatus::Denied) {
            return None;
        }

        Some(Self {
            processor_auth_id: state.processor_auth_id.clone(),
            processor_name: state.processor_name.clone(),
            authorized_amount_minor_units: state.authorized_amount_minor_units,
            authorization_code: state.authorization_code.clone(),
            currency: Some(state.currency.clone()),
            denial_code: state.denial_code.clone(),
            denial_reason: state.denial_reason.clone(),
            completed_at: state.completed_at,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    pub auth_request_id: Uuid,
    pub status: AuthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AuthorizationResult>,
    pub status_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetAuthStatusResponse {
    pub auth_request_id: Uuid,
    pub status: AuthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AuthorizationResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GetAuthStatusResponse {
    fn from_state(state: &AuthRequestState) -> Self {
        Self {
            auth_request_id: state.auth_request_id,
            status: state.status,
            result: AuthorizationResult::from_state(state),
            created_at: state.created_at,
            updated_at: state.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub restaurant_id: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct VoidRequest {
    pub restaurant_id: String,
    pub reason: String,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<ApiState> {
    Router::new()
        .route("/v1/authorize", post(post_authorize))
        .route("/v1/authorize/:auth_request_id/status", get(get_status))
        .route("/v1/authorize/:auth_request_id/void", post(post_void))
        .route("/health", get(health_check))
}

fn parse_uuid(value: &str, field: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(value)
        .map_err(|_| AppError::InvalidRequest(format!("{field} must be a valid UUID")))
}

/// Correlation ID from the request-id layer, when present
fn correlation_from_headers(headers: &HeaderMap) -> EventMetadata {
    let metadata = EventMetadata::new();
    match headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
    {
        Some(id) => metadata.with_correlation_id(id),
        None => metadata,
    }
}

fn status_url(auth_request_id: Uuid, restaurant_id: Uuid) -> String {
    format!("/v1/authorize/{auth_request_id}/status?restaurant_id={restaurant_id}")
}

// =========================================================================
// POST /v1/authorize
// =========================================================================

/// Create an authorization request.
///
/// 200 when a terminal outcome lands within the fast-path budget, 202 with a
/// status URL otherwise.
async fn post_authorize(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<AuthorizeRequest>,
) -> Result<(StatusCode, Json<AuthorizeResponse>), AppError> {
    let restaurant_id = parse_uuid(&request.restaurant_id, "restaurant_id")?;
    let metadata = correlation_from_headers(&headers);

    let command = AuthorizeCommand::new(
        request.payment_token,
        restaurant_id,
        request.amount_minor_units,
        request.currency,
        request.idempotency_key,
    )
    .with_metadata(request.metadata.unwrap_or_default());

    let handler = AuthorizeHandler::new(state.pool, state.poll_budget, state.poll_interval);
    let outcome = handler.execute(command, metadata).await?;

    let (code, request_state) = match &outcome {
        AuthorizeOutcome::Completed(s) => (StatusCode::OK, s),
        AuthorizeOutcome::InProgress(s) => (StatusCode::ACCEPTED, s),
    };

    Ok((
        code,
        Json(AuthorizeResponse {
            auth_request_id: request_state.auth_request_id,
            status: request_state.status,
            result: AuthorizationResult::from_state(request_state),
            status_url: status_url(request_state.auth_request_id, restaurant_id),
        }),
    ))
}

// =========================================================================
// GET /v1/authorize/:auth_request_id/status
// =========================================================================

/// Get the current status of an authorization request.
///
/// A restaurant mismatch returns the same 404 as an absent request so
/// callers cannot enumerate foreign aggregates.
async fn get_status(
    State(state): State<ApiState>,
    Path(auth_request_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<GetAuthStatusResponse>, AppError> {
    let auth_request_id = parse_uuid(&auth_request_id, "auth_request_id")?;
    let restaurant_id = parse_uuid(&query.restaurant_id, "restaurant_id")?;

    let repo = AuthStateRepository::new(state.pool);
    let request_state = repo
        .get_owned(auth_request_id, restaurant_id)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(Json(GetAuthStatusResponse::from_state(&request_state)))
}

// =========================================================================
// POST /v1/authorize/:auth_request_id/void
// =========================================================================

/// Void an authorization request, returning its updated state.
async fn post_void(
    State(state): State<ApiState>,
    Path(auth_request_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<VoidRequest>,
) -> Result<Json<GetAuthStatusResponse>, AppError> {
    let auth_request_id = parse_uuid(&auth_request_id, "auth_request_id")?;
    let restaurant_id = parse_uuid(&request.restaurant_id, "restaurant_id")?;
    let metadata = correlation_from_headers(&headers);

    let handler = VoidHandler::new(state.pool);
    let command = VoidCommand::new(auth_request_id, restaurant_id, request.reason);
    let request_state = handler.execute(command, metadata).await?;

    Ok(Json(GetAuthStatusResponse::from_state(&request_state)))
}

// =========================================================================
// GET /health
// =========================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Health check with a database connectivity probe
async fn health_check(
    State(state): State<ApiState>,
) -> Result<Json<HealthResponse>, StatusCode> {
    match crate::db::verify_connection(&state.pool).await {
        Ok(()) => Ok(Json(HealthResponse { status: "healthy" })),
        Err(e) => {
            tracing::error!(error = %e, "health check failed");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
