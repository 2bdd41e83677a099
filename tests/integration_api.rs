//! API Integration Tests
//!
//! Drives the axum router directly with `oneshot`. No dispatcher or worker
//! runs here, so freshly created requests stay PENDING.

use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use serde_json::{json, Value};
use tower::util::ServiceExt;
use uuid::Uuid;

use payment_auth::api::{self, ApiState};

mod common;

async fn test_app() -> (axum::Router, sqlx::PgPool) {
    let pool = common::setup_test_db().await;
    let state = ApiState::new(pool.clone(), Duration::ZERO, Duration::from_millis(10));
    (api::create_router().with_state(state), pool)
}

fn authorize_body(restaurant_id: Uuid, idempotency_key: &str) -> Value {
    json!({
        "payment_token": "pt_api_test",
        "restaurant_id": restaurant_id,
        "amount_minor_units": 1050,
        "currency": "USD",
        "idempotency_key": idempotency_key,
        "metadata": { "order_id": "order-123" }
    })
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(body).unwrap()))
        .unwrap()
}

async fn response_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_authorize_returns_202_and_status_url() {
    let (app, _pool) = test_app().await;
    let restaurant_id = Uuid::new_v4();

    let response = app
        .clone()
        .oneshot(post_json(
            "/v1/authorize",
            &authorize_body(restaurant_id, &format!("idem-{}", Uuid::new_v4())),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = response_json(response).await;
    assert_eq!(body["status"], "PENDING");
    assert!(body["result"].is_null());

    let auth_request_id = body["auth_request_id"].as_str().unwrap();
    let status_url = body["status_url"].as_str().unwrap();
    assert!(status_url.contains(auth_request_id));
    assert!(status_url.contains(&restaurant_id.to_string()));

    // The handle resolves against the status endpoint
    let response = app
        .oneshot(
            Request::builder()
                .uri(status_url)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["status"], "PENDING");
    assert_eq!(body["auth_request_id"].as_str().unwrap(), auth_request_id);
}

#[tokio::test]
async fn test_authorize_validation_failures_return_400() {
    let (app, _pool) = test_app().await;
    let restaurant_id = Uuid::new_v4();

    let cases: Vec<Value> = vec![
        {
            let mut body = authorize_body(restaurant_id, "idem-a");
            body["amount_minor_units"] = json!(0);
            body
        },
        {
            let mut body = authorize_body(restaurant_id, "idem-b");
            body["amount_minor_units"] = json!(-100);
            body
        },
        {
            let mut body = authorize_body(restaurant_id, "idem-c");
            body["currency"] = json!("usd");
            body
        },
        {
            let mut body = authorize_body(restaurant_id, "idem-d");
            body["payment_token"] = json!("");
            body
        },
        {
            let mut body = authorize_body(restaurant_id, "idem-e");
            body["idempotency_key"] = json!("");
            body
        },
        {
            let mut body = authorize_body(restaurant_id, "idem-f");
            body["restaurant_id"] = json!("not-a-uuid");
            body
        },
    ];

    for body in cases {
        let response = app
            .clone()
            .oneshot(post_json("/v1/authorize", &body))
            .await
            .unwrap();
        assert_eq!(
            response.status(),
            StatusCode::BAD_REQUEST,
            "body should be rejected: {body}"
        );
        let error = response_json(response).await;
        assert_eq!(error["error_code"], "invalid_request");
    }
}

#[tokio::test]
async fn test_idempotent_retry_returns_same_request() {
    let (app, _pool) = test_app().await;
    let restaurant_id = Uuid::new_v4();
    let body = authorize_body(restaurant_id, &format!("idem-{}", Uuid::new_v4()));

    let first = app
        .clone()
        .oneshot(post_json("/v1/authorize", &body))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    let first_body = response_json(first).await;

    let second = app
        .clone()
        .oneshot(post_json("/v1/authorize", &body))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::ACCEPTED);
    let second_body = response_json(second).await;

    assert_eq!(first_body["auth_request_id"], second_body["auth_request_id"]);

    // Same key, different payload: conflict
    let mut altered = body;
    altered["amount_minor_units"] = json!(9999);
    let conflict = app
        .oneshot(post_json("/v1/authorize", &altered))
        .await
        .unwrap();
    assert_eq!(conflict.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_status_hides_foreign_requests() {
    let (app, _pool) = test_app().await;
    let restaurant_id = Uuid::new_v4();

    let created = app
        .clone()
        .oneshot(post_json(
            "/v1/authorize",
            &authorize_body(restaurant_id, &format!("idem-{}", Uuid::new_v4())),
        ))
        .await
        .unwrap();
    let created_body = response_json(created).await;
    let auth_request_id = created_body["auth_request_id"].as_str().unwrap();

    // Another restaurant gets the same 404 as a missing request
    let foreign = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/v1/authorize/{auth_request_id}/status?restaurant_id={}",
                    Uuid::new_v4()
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(foreign.status(), StatusCode::NOT_FOUND);

    let missing = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/v1/authorize/{}/status?restaurant_id={restaurant_id}",
                    Uuid::new_v4()
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    // Malformed UUIDs are 400, not 404
    let malformed = app
        .oneshot(
            Request::builder()
                .uri("/v1/authorize/not-a-uuid/status?restaurant_id=also-not-a-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_void_pending_request_expires_it() {
    let (app, _pool) = test_app().await;
    let restaurant_id = Uuid::new_v4();

    let created = app
        .clone()
        .oneshot(post_json(
            "/v1/authorize",
            &authorize_body(restaurant_id, &format!("idem-{}", Uuid::new_v4())),
        ))
        .await
        .unwrap();
    let created_body = response_json(created).await;
    let auth_request_id = created_body["auth_request_id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/v1/authorize/{auth_request_id}/void"),
            &json!({ "restaurant_id": restaurant_id, "reason": "customer cancelled" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["status"], "EXPIRED");

    // Voiding someone else's request is a 404
    let foreign = app
        .oneshot(post_json(
            &format!("/v1/authorize/{auth_request_id}/void"),
            &json!({ "restaurant_id": Uuid::new_v4(), "reason": "nope" }),
        ))
        .await
        .unwrap();
    assert_eq!(foreign.status(), StatusCode::NOT_FOUND);
}
