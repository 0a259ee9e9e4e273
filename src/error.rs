use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use sqlx::Error as SqlxError;
use std::time::Duration;
use thiserror::Error as ThisError;

use crate::vault::LeaseKind;

#[derive(Debug, ThisError)]
pub enum RotorError {
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] SqlxError),

    #[error("Vault responded with {status}: {}", .errors.join("; "))]
    VaultStatus {
        status: StatusCode,
        errors: Vec<String>,
    },

    #[error("Vault response is missing `{0}`")]
    MalformedVaultResponse(&'static str),

    #[error("No auth token; log in first")]
    MissingAuthToken,

    #[error("Invalid {kind} lease: {reason}")]
    InvalidLease { kind: LeaseKind, reason: String },

    #[error("{kind} lease expired before it could be renewed")]
    LeaseExpired { kind: LeaseKind },

    #[error("{0} lease watcher stopped without reporting")]
    WatcherStopped(LeaseKind),

    #[error("Database did not answer a ping within {timeout:?}: {last_error}")]
    ConnectDeadline {
        timeout: Duration,
        last_error: String,
    },

    #[error("Database connection is closed")]
    ConnectionClosed,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Renew cycle failed without reporting a cause")]
    CycleFailed,

    #[error("Lease watcher failed: {0}")]
    Watcher(#[source] Box<RotorError>),

    #[error("Re-authentication failed: {0}")]
    ReAuthentication(#[source] Box<RotorError>),

    #[error("Database reconnect failed: {0}")]
    Reconnect(#[source] Box<RotorError>),
}

impl From<figment::Error> for RotorError {
    fn from(e: figment::Error) -> Self {
        RotorError::Config(Box::new(e))
    }
}

/// Whether an error is worth another attempt against the same endpoint.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for RotorError {
    fn is_retryable(&self) -> bool {
        match self {
            RotorError::Reqwest(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            RotorError::VaultStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            RotorError::Io(_) => true,
            _ => false,
        }
    }
}

impl IntoResponse for RotorError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, message) = match self {
            RotorError::ConnectionClosed
            | RotorError::ConnectDeadline { .. }
            | RotorError::DatabaseError(_)
            | RotorError::Io(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "DATABASE_UNAVAILABLE",
                "The database connection is not available.",
            ),
            RotorError::Cancelled => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SHUTTING_DOWN",
                "The service is shutting down.",
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal server error occurred.",
            ),
        };
        let body = ApiErrorBody {
            code: code.to_string(),
            message: message.to_string(),
        };
        (status, Json(ApiErrorResponse { error: body })).into_response()
    }
}

/// Standardized API error response body
#[derive(Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vault_server_errors_are_retryable() {
        let err = RotorError::VaultStatus {
            status: StatusCode::SERVICE_UNAVAILABLE,
            errors: vec!["sealed".to_string()],
        };
        assert!(err.is_retryable());

        let throttled = RotorError::VaultStatus {
            status: StatusCode::TOO_MANY_REQUESTS,
            errors: vec![],
        };
        assert!(throttled.is_retryable());
    }

    #[test]
    fn vault_client_errors_are_terminal() {
        let err = RotorError::VaultStatus {
            status: StatusCode::BAD_REQUEST,
            errors: vec!["lease not found".to_string()],
        };
        assert!(!err.is_retryable());
        assert!(!RotorError::LeaseExpired { kind: LeaseKind::AuthToken }.is_retryable());
    }

    #[test]
    fn vault_status_message_joins_errors() {
        let err = RotorError::VaultStatus {
            status: StatusCode::FORBIDDEN,
            errors: vec!["permission denied".to_string(), "bad token".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Vault responded with 403 Forbidden: permission denied; bad token"
        );
    }
}
