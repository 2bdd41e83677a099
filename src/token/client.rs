//! HTTP client for the token service decrypt endpoint

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CardData, TokenClient, TokenClientError};

#[derive(Debug, Serialize)]
struct DecryptRequest<'a> {
    payment_token: &'a str,
    restaurant_id: Uuid,
    requesting_service: &'a str,
}

#[derive(Debug, Deserialize)]
struct DecryptResponse {
    payment_data: CardData,
}

/// Client for `POST {base}/internal/v1/decrypt`
pub struct HttpTokenClient {
    base_url: String,
    service_auth_token: String,
    http: reqwest::Client,
}

impl HttpTokenClient {
    pub fn new(
        base_url: impl Into<String>,
        service_auth_token: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_auth_token: service_auth_token.into(),
            http,
        }
    }
}

#[async_trait]
impl TokenClient for HttpTokenClient {
    async fn decrypt(
        &self,
        payment_token: &str,
        restaurant_id: Uuid,
        requesting_service: &str,
    ) -> Result<CardData, TokenClientError> {
        let correlation_id = Uuid::new_v4();
        let url = format!("{}/internal/v1/decrypt", self.base_url);

        tracing::info!(
            restaurant_id = %restaurant_id,
            requesting_service,
            correlation_id = %correlation_id,
            "token decrypt request"
        );

        let response = self
            .http
            .post(&url)
            .header("X-Service-Auth", &self.service_auth_token)
            .header("X-Request-ID", correlation_id.to_string())
            .json(&DecryptRequest {
                payment_token,
                restaurant_id,
                requesting_service,
            })
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, correlation_id = %correlation_id, "token service request failed");
                TokenClientError::Unavailable(e.to_string())
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                tracing::warn!(correlation_id = %correlation_id, "payment token not found");
                Err(TokenClientError::NotFound)
            }
            StatusCode::GONE => {
                tracing::warn!(correlation_id = %correlation_id, "payment token expired");
                Err(TokenClientError::Expired)
            }
            StatusCode::FORBIDDEN => {
                tracing::warn!(
                    restaurant_id = %restaurant_id,
                    correlation_id = %correlation_id,
                    "payment token access forbidden"
                );
                Err(TokenClientError::Forbidden)
            }
            status if status.is_server_error() => {
                tracing::error!(
                    status = status.as_u16(),
                    correlation_id = %correlation_id,
                    "token service error"
                );
                Err(TokenClientError::Unavailable(format!(
                    "token service returned {status}"
                )))
            }
            status if !status.is_success() => Err(TokenClientError::Unavailable(format!(
                "unexpected token service status {status}"
            ))),
            _ => {
                let body: DecryptResponse = response
                    .json()
                    .await
                    .map_err(|e| TokenClientError::Unavailable(e.to_string()))?;

                tracing::info!(
                    correlation_id = %correlation_id,
                    card_last4 = body.payment_data.last4(),
                    "token decrypt succeeded"
                );
                Ok(body.payment_data)
            }
        }
    }
}
