//! Internal endpoint for media server connection reports.

use crate::errors::ConvoError;
use crate::handlers::conference::parse_body;
use crate::models::{Ack, MediaEventRequest};
use crate::routes::AppState;
use axum::{body::Bytes, extract::State, Json};
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /internal/v1/media-events
///
/// Stale and unknown events are acknowledged and dropped; only a malformed
/// report is an error.
#[instrument(
    skip_all,
    name = "convo.media_events.apply",
    fields(method = "POST", endpoint = "/internal/v1/media-events")
)]
pub async fn apply_media_event(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Ack>, ConvoError> {
    let request: MediaEventRequest = parse_body(&body)?;
    let ack = state.service.apply_media_server_event(&request).await?;
    Ok(Json(ack))
}
