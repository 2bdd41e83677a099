//! Read Model Projection
//!
//! Projects events into `auth_request_state` inside the same transaction as
//! the event append, so `last_event_sequence` always equals the sequence of
//! the just-appended event. Preconditions are enforced with guarded updates;
//! a zero-row update means the caller attempted an invalid transition.

use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::domain::{AuthDecision, AuthEvent, AuthStatus};

/// Projection errors
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// The event's precondition on the current status does not hold.
    /// This is a logic error in the caller, not a transient condition.
    #[error("Invalid transition: {event_type} cannot be applied to request {auth_request_id}")]
    InvalidTransition {
        event_type: &'static str,
        auth_request_id: Uuid,
    },

    #[error("No state row for request {0}")]
    MissingRow(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Apply one event to the read model at the given sequence number.
pub async fn apply(
    tx: &mut Transaction<'_, Postgres>,
    event: &AuthEvent,
    sequence_number: i64,
) -> Result<(), ProjectionError> {
    match event {
        AuthEvent::AuthRequestCreated {
            auth_request_id,
            restaurant_id,
            payment_token,
            amount_minor_units,
            currency,
            metadata,
            created_at,
        } => {
            let metadata_json =
                serde_json::to_value(metadata).unwrap_or(serde_json::Value::Null);
            sqlx::query(
                r#"
                INSERT INTO auth_request_state (
                    auth_request_id, restaurant_id, payment_token, status,
                    amount_minor_units, currency, metadata,
                    created_at, updated_at, last_event_sequence
                )
                VALUES ($1, $2, $3, 'PENDING', $4, $5, $6, $7, $7, $8)
                "#,
            )
            .bind(auth_request_id)
            .bind(restaurant_id)
            .bind(payment_token)
            .bind(amount_minor_units)
            .bind(currency)
            .bind(&metadata_json)
            .bind(created_at)
            .bind(sequence_number)
            .execute(&mut **tx)
            .await?;

            tracing::info!(
                auth_request_id = %auth_request_id,
                restaurant_id = %restaurant_id,
                status = "PENDING",
                "read model row created"
            );
            Ok(())
        }

        AuthEvent::AuthAttemptStarted { auth_request_id, .. } => {
            let rows = sqlx::query(
                r#"
                UPDATE auth_request_state
                SET status = 'PROCESSING', updated_at = NOW(), last_event_sequence = $2
                WHERE auth_request_id = $1 AND status IN ('PENDING', 'PROCESSING')
                "#,
            )
            .bind(auth_request_id)
            .bind(sequence_number)
            .execute(&mut **tx)
            .await?
            .rows_affected();

            guard(rows, event, *auth_request_id, AuthStatus::Processing)
        }

        AuthEvent::AuthResponseReceived {
            auth_request_id,
            decision,
            ..
        } => match decision {
            AuthDecision::Authorized {
                processor_name,
                processor_auth_id,
                authorization_code,
                authorized_amount_minor_units,
                ..
            } => {
                let rows = sqlx::query(
                    r#"
                    UPDATE auth_request_state
                    SET status = 'AUTHORIZED',
                        processor_auth_id = $2,
                        processor_name = $3,
                        authorized_amount_minor_units = $4,
                        authorization_code = $5,
                        completed_at = NOW(),
                        updated_at = NOW(),
                        last_event_sequence = $6
                    WHERE auth_request_id = $1 AND status = 'PROCESSING'
                    "#,
                )
                .bind(auth_request_id)
                .bind(processor_auth_id)
                .bind(processor_name)
                .bind(authorized_amount_minor_units)
                .bind(authorization_code)
                .bind(sequence_number)
                .execute(&mut **tx)
                .await?
                .rows_affected();

                guard(rows, event, *auth_request_id, AuthStatus::Authorized)
            }
            AuthDecision::Denied {
                processor_name,
                denial_code,
                denial_reason,
            } => {
                let rows = sqlx::query(
                    r#"
                    UPDATE auth_request_state
                    SET status = 'DENIED',
                        processor_name = $2,
                        denial_code = $3,
                        denial_reason = $4,
                        completed_at = NOW(),
                        updated_at = NOW(),
                        last_event_sequence = $5
                    WHERE auth_request_id = $1 AND status = 'PROCESSING'
                    "#,
                )
                .bind(auth_request_id)
                .bind(processor_name)
                .bind(denial_code)
                .bind(denial_reason)
                .bind(sequence_number)
                .execute(&mut **tx)
                .await?
                .rows_affected();

                guard(rows, event, *auth_request_id, AuthStatus::Denied)
            }
        },

        AuthEvent::AuthAttemptFailed {
            auth_request_id,
            retryable,
            ..
        } => {
            let rows = if *retryable {
                // Status stays PROCESSING; only the sequence advances.
                sqlx::query(
                    r#"
                    UPDATE auth_request_state
                    SET updated_at = NOW(), last_event_sequence = $2
                    WHERE auth_request_id = $1 AND status = 'PROCESSING'
                    "#,
                )
                .bind(auth_request_id)
                .bind(sequence_number)
                .execute(&mut **tx)
                .await?
                .rows_affected()
            } else {
                sqlx::query(
                    r#"
                    UPDATE auth_request_state
                    SET status = 'FAILED', completed_at = NOW(), updated_at = NOW(),
                        last_event_sequence = $2
                    WHERE auth_request_id = $1 AND status = 'PROCESSING'
                    "#,
                )
                .bind(auth_request_id)
                .bind(sequence_number)
                .execute(&mut **tx)
                .await?
                .rows_affected()
            };

            let projected = if *retryable {
                AuthStatus::Processing
            } else {
                AuthStatus::Failed
            };
            guard(rows, event, *auth_request_id, projected)
        }

        AuthEvent::AuthVoidRequested { auth_request_id, .. } => {
            apply_void(tx, *auth_request_id, sequence_number).await
        }

        AuthEvent::AuthRequestExpired { auth_request_id, .. } => {
            // PENDING or PROCESSING: a void can be recorded after a
            // retryable attempt left the row PROCESSING, and the worker
            // expires it on the next delivery.
            let rows = sqlx::query(
                r#"
                UPDATE auth_request_state
                SET status = 'EXPIRED', completed_at = NOW(), updated_at = NOW(),
                    last_event_sequence = $2
                WHERE auth_request_id = $1 AND status IN ('PENDING', 'PROCESSING')
                "#,
            )
            .bind(auth_request_id)
            .bind(sequence_number)
            .execute(&mut **tx)
            .await?
            .rows_affected();

            guard(rows, event, *auth_request_id, AuthStatus::Expired)
        }
    }
}

/// Void projection branches on the current status: PENDING expires the
/// request, AUTHORIZED voids it, PROCESSING records the void for the worker
/// to expire before its next attempt. An outcome already in flight when the
/// void commits wins the race.
async fn apply_void(
    tx: &mut Transaction<'_, Postgres>,
    auth_request_id: Uuid,
    sequence_number: i64,
) -> Result<(), ProjectionError> {
    let status: Option<String> = sqlx::query_scalar(
        "SELECT status FROM auth_request_state WHERE auth_request_id = $1 FOR UPDATE",
    )
    .bind(auth_request_id)
    .fetch_optional(&mut **tx)
    .await?;

    let status: AuthStatus = status
        .ok_or(ProjectionError::MissingRow(auth_request_id))?
        .parse()
        .map_err(|_| ProjectionError::InvalidTransition {
            event_type: "AuthVoidRequested",
            auth_request_id,
        })?;

    let new_status = match status {
        AuthStatus::Pending => Some(AuthStatus::Expired),
        AuthStatus::Authorized => Some(AuthStatus::Voided),
        AuthStatus::Processing => None,
        _ => {
            return Err(ProjectionError::InvalidTransition {
                event_type: "AuthVoidRequested",
                auth_request_id,
            })
        }
    };

    match new_status {
        Some(new_status) => {
            sqlx::query(
                r#"
                UPDATE auth_request_state
                SET status = $2, completed_at = COALESCE(completed_at, NOW()),
                    updated_at = NOW(), last_event_sequence = $3
                WHERE auth_request_id = $1
                "#,
            )
            .bind(auth_request_id)
            .bind(new_status.as_str())
            .bind(sequence_number)
            .execute(&mut **tx)
            .await?;

            tracing::info!(
                auth_request_id = %auth_request_id,
                status = %new_status,
                "void applied"
            );
        }
        None => {
            sqlx::query(
                r#"
                UPDATE auth_request_state
                SET updated_at = NOW(), last_event_sequence = $2
                WHERE auth_request_id = $1
                "#,
            )
            .bind(auth_request_id)
            .bind(sequence_number)
            .execute(&mut **tx)
            .await?;

            tracing::info!(
                auth_request_id = %auth_request_id,
                "void recorded while processing; worker expires it on next delivery"
            );
        }
    }

    Ok(())
}

fn guard(
    rows_affected: u64,
    event: &AuthEvent,
    auth_request_id: Uuid,
    new_status: AuthStatus,
) -> Result<(), ProjectionError> {
    if rows_affected == 0 {
        return Err(ProjectionError::InvalidTransition {
            event_type: event.event_type(),
            auth_request_id,
        });
    }

    tracing::info!(
        auth_request_id = %auth_request_id,
        status = %new_status,
        event_type = event.event_type(),
        "read model updated"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_message_names_the_event() {
        let err = ProjectionError::InvalidTransition {
            event_type: "AuthResponseReceived",
            auth_request_id: Uuid::nil(),
        };
        assert!(err.to_string().contains("AuthResponseReceived"));
    }
}
