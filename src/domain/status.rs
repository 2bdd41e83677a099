//! Authorization status
//!
//! Lifecycle states of the read model. Stored in the database as the
//! SCREAMING_SNAKE strings returned by `Display`.

use serde::{Deserialize, Serialize};

/// Read-model status of an authorization request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthStatus {
    Pending,
    Processing,
    Authorized,
    Denied,
    Failed,
    Expired,
    Voided,
}

impl AuthStatus {
    /// Terminal statuses admit no further outcome-producing events
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuthStatus::Authorized
                | AuthStatus::Denied
                | AuthStatus::Failed
                | AuthStatus::Expired
                | AuthStatus::Voided
        )
    }

    /// String form stored in `auth_request_state.status`
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthStatus::Pending => "PENDING",
            AuthStatus::Processing => "PROCESSING",
            AuthStatus::Authorized => "AUTHORIZED",
            AuthStatus::Denied => "DENIED",
            AuthStatus::Failed => "FAILED",
            AuthStatus::Expired => "EXPIRED",
            AuthStatus::Voided => "VOIDED",
        }
    }
}

impl std::fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuthStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(AuthStatus::Pending),
            "PROCESSING" => Ok(AuthStatus::Processing),
            "AUTHORIZED" => Ok(AuthStatus::Authorized),
            "DENIED" => Ok(AuthStatus::Denied),
            "FAILED" => Ok(AuthStatus::Failed),
            "EXPIRED" => Ok(AuthStatus::Expired),
            "VOIDED" => Ok(AuthStatus::Voided),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Status string in the database did not match any known state
#[derive(Debug, Clone, thiserror::Error)]
#[error("Unknown authorization status: {0}")]
pub struct UnknownStatus(pub String);
