//! Conference API handlers.
//!
//! Bodies are parsed by hand so malformed JSON maps to a 400 with the
//! standard error envelope instead of axum's default 422.

use crate::errors::ConvoError;
use crate::middleware::CallerContext;
use crate::models::{
    Ack, BatchGetStateRequest, BatchGetStateResponse, JoinRequest, JoinResponse, LeaveRequest,
};
use crate::observability::metrics;
use crate::routes::AppState;
use axum::{body::Bytes, extract::State, Extension, Json};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::instrument;

pub(crate) fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ConvoError> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(target: "convo.handlers", error = %e, "Invalid request body");
        ConvoError::Validation("Invalid request body".to_string())
    })
}

/// Handler for POST /api/v1/conference/batch-get-state
#[instrument(
    skip_all,
    name = "convo.conference.batch_get_state",
    fields(method = "POST", endpoint = "/api/v1/conference/batch-get-state")
)]
pub async fn batch_get_state(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<BatchGetStateResponse>, ConvoError> {
    let request: BatchGetStateRequest = parse_body(&body)?;
    let response = state.service.batched_get_convo_state(&request).await?;
    Ok(Json(response))
}

/// Handler for POST /api/v1/conference/join
///
/// FULL and NOT_ALLOWED are successful responses; only failures to reach
/// a decision map to error statuses.
#[instrument(
    skip_all,
    name = "convo.conference.join",
    fields(method = "POST", endpoint = "/api/v1/conference/join")
)]
pub async fn join(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerContext>,
    body: Bytes,
) -> Result<Json<JoinResponse>, ConvoError> {
    let request: JoinRequest = parse_body(&body)?;
    let response = state
        .service
        .join_convo_conference(&caller.participant, request, caller.requested_timeout)
        .await?;
    Ok(Json(response))
}

/// Handler for POST /api/v1/conference/leave
///
/// Always acknowledges an authenticated caller, even for a body that does
/// not parse.
#[instrument(
    skip_all,
    name = "convo.conference.leave",
    fields(method = "POST", endpoint = "/api/v1/conference/leave")
)]
pub async fn leave(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerContext>,
    body: Bytes,
) -> Json<Ack> {
    match parse_body::<LeaveRequest>(&body) {
        Ok(request) => Json(
            state
                .service
                .on_leave_convo_conference(&caller.participant, &request)
                .await,
        ),
        Err(_) => {
            metrics::record_leave("invalid_request");
            Json(Ack::default())
        }
    }
}
