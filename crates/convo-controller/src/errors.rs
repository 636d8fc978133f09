//! Conference control plane error types.
//!
//! Errors map to HTTP status codes via the `IntoResponse` impl. Messages
//! returned to clients are generic; the underlying cause is logged
//! server-side. Business outcomes (`FULL`, `NOT_ALLOWED`) are not errors and
//! never appear here, see [`crate::registrar::JoinOutcome`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Control plane error type.
///
/// Maps to HTTP status codes:
/// - `Validation`: 400 Bad Request
/// - `Unauthenticated`: 401 Unauthorized
/// - `Superseded`: 409 Conflict
/// - `Internal`: 500 Internal Server Error
/// - `Dependency`, `Storage`: 503 Service Unavailable
/// - `DeadlineExceeded`: 504 Gateway Timeout
#[derive(Debug, Error)]
pub enum ConvoError {
    /// Request shape is invalid (missing fields, bad ids, batch out of bounds).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Caller identity is missing or malformed.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// An external collaborator (media server, membership) failed or timed out.
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// The state store refused the mutation.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A concurrent media-server disconnect removed the reservation before
    /// the join committed.
    #[error("Join superseded by a concurrent event")]
    Superseded,

    /// The caller-supplied deadline elapsed before the call completed.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// Internal error.
    #[error("Internal error")]
    Internal,
}

impl ConvoError {
    /// Returns the HTTP status code for this error (for metrics recording).
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            ConvoError::Validation(_) => 400,
            ConvoError::Unauthenticated(_) => 401,
            ConvoError::Superseded => 409,
            ConvoError::Internal => 500,
            ConvoError::Dependency(_) | ConvoError::Storage(_) => 503,
            ConvoError::DeadlineExceeded => 504,
        }
    }

    /// Bounded label value used for metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            ConvoError::Validation(_) => "validation",
            ConvoError::Unauthenticated(_) => "unauthenticated",
            ConvoError::Dependency(_) => "dependency",
            ConvoError::Storage(_) => "storage",
            ConvoError::Superseded => "superseded",
            ConvoError::DeadlineExceeded => "deadline",
            ConvoError::Internal => "internal",
        }
    }
}

/// Connection token verification errors.
///
/// Only relevant to leave, where they are logged and swallowed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    /// Token is not `payload.tag` with decodable parts.
    #[error("Malformed token")]
    Malformed,

    /// HMAC verification failed.
    #[error("Invalid token signature")]
    InvalidSignature,

    /// Token was minted with a format version this build does not understand.
    #[error("Unsupported token version: {0}")]
    UnsupportedVersion(u8),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for ConvoError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ConvoError::Validation(reason) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                reason.clone(),
            ),
            ConvoError::Unauthenticated(reason) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", reason.clone())
            }
            ConvoError::Dependency(reason) => {
                tracing::warn!(target: "convo.errors", reason = %reason, "Dependency unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "DEPENDENCY_UNAVAILABLE",
                    "A required service is temporarily unavailable".to_string(),
                )
            }
            ConvoError::Storage(reason) => {
                tracing::error!(target: "convo.store", reason = %reason, "Store rejected mutation");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "STORAGE_UNAVAILABLE",
                    "Conference state is temporarily unavailable".to_string(),
                )
            }
            ConvoError::Superseded => (
                StatusCode::CONFLICT,
                "JOIN_SUPERSEDED",
                "Join was interrupted, please retry".to_string(),
            ),
            ConvoError::DeadlineExceeded => (
                StatusCode::GATEWAY_TIMEOUT,
                "DEADLINE_EXCEEDED",
                "Request deadline exceeded".to_string(),
            ),
            ConvoError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}
