//! Caller identity middleware for the conference API.
//!
//! The fronting gateway authenticates clients and forwards the caller's
//! participant id in `x-caller-id` (unpadded base64url). This middleware
//! parses it, along with the optional `x-request-timeout-ms` deadline, and
//! stores a [`CallerContext`] in request extensions for handlers.

use crate::errors::ConvoError;
use axum::{extract::Request, middleware::Next, response::IntoResponse};
use common::types::ParticipantId;
use std::time::Duration;
use tracing::instrument;

/// Header carrying the authenticated caller's participant id.
pub const CALLER_ID_HEADER: &str = "x-caller-id";

/// Header carrying the caller's deadline in milliseconds.
pub const REQUEST_TIMEOUT_HEADER: &str = "x-request-timeout-ms";

/// Authenticated caller and deadline, injected by [`require_caller`].
#[derive(Debug, Clone)]
pub struct CallerContext {
    pub participant: ParticipantId,
    pub requested_timeout: Option<Duration>,
}

/// Reject requests without a valid caller identity.
///
/// - Returns 401 if `x-caller-id` is missing or not a valid participant id
/// - An unparsable `x-request-timeout-ms` is ignored
#[instrument(skip_all, name = "convo.middleware.caller")]
pub async fn require_caller(mut req: Request, next: Next) -> Result<impl IntoResponse, ConvoError> {
    let raw = req
        .headers()
        .get(CALLER_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "convo.middleware.caller", "Missing caller id header");
            ConvoError::Unauthenticated("Missing caller identity".to_string())
        })?;

    let participant = ParticipantId::from_base64url(raw).map_err(|e| {
        tracing::debug!(target: "convo.middleware.caller", error = %e, "Malformed caller id header");
        ConvoError::Unauthenticated("Malformed caller identity".to_string())
    })?;

    let requested_timeout = req
        .headers()
        .get(REQUEST_TIMEOUT_HEADER)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis);

    req.extensions_mut().insert(CallerContext {
        participant,
        requested_timeout,
    });

    Ok(next.run(req).await)
}
