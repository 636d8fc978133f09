//! RPC-facing facade over the registrar and the state store.
//!
//! Validates request shape, applies the caller's deadline, and maps
//! registrar results onto the three RPC results. Holds no state of its own.

use crate::errors::ConvoError;
use crate::models::{
    Ack, BatchGetStateRequest, BatchGetStateResponse, JoinRequest, JoinResponse, LeaveRequest,
    MediaEventRequest, Validate, API_VERSION,
};
use crate::observability::metrics;
use crate::registrar::ConferenceRegistrar;
use crate::store::ConvoStateStore;
use common::types::ParticipantId;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, instrument, warn};

pub struct ControlPlaneService {
    store: Arc<ConvoStateStore>,
    registrar: Arc<ConferenceRegistrar>,
    request_timeout: Duration,
}

impl ControlPlaneService {
    /// `request_timeout` caps every call, including caller-supplied deadlines.
    #[must_use]
    pub fn new(
        store: Arc<ConvoStateStore>,
        registrar: Arc<ConferenceRegistrar>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registrar,
            request_timeout,
        }
    }

    /// Read the state of 1 to 20 conversations.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a bad version or batch size.
    #[instrument(skip_all, name = "convo.service.batch_get", fields(count = request.conversation_ids.len()))]
    pub async fn batched_get_convo_state(
        &self,
        request: &BatchGetStateRequest,
    ) -> Result<BatchGetStateResponse, ConvoError> {
        request.validate()?;
        metrics::record_batch_get();

        let states = self.store.batch_get(&request.conversation_ids).await;
        Ok(BatchGetStateResponse {
            version: API_VERSION,
            states,
        })
    }

    /// Join the caller to a conversation's conference.
    ///
    /// The join runs on its own task: if the caller goes away or the
    /// deadline passes, the join still finishes or rolls back on its own.
    ///
    /// # Errors
    ///
    /// `Validation`, `DeadlineExceeded`, `Internal` if the timeout cannot be
    /// turned into a deadline, or any error from [`ConferenceRegistrar::join`].
    #[instrument(skip_all, name = "convo.service.join", fields(conversation_id = %request.conversation_id))]
    pub async fn join_convo_conference(
        &self,
        caller: &ParticipantId,
        request: JoinRequest,
        requested_timeout: Option<Duration>,
    ) -> Result<JoinResponse, ConvoError> {
        request.validate()?;

        let timeout = self.effective_timeout(requested_timeout);
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            error!(target: "convo.service", timeout_secs = timeout.as_secs(), "Request timeout out of range");
            return Err(ConvoError::Internal);
        };
        let registrar = Arc::clone(&self.registrar);
        let caller = caller.clone();
        let conversation_id = request.conversation_id;

        let join = tokio::spawn(async move {
            registrar
                .join(&conversation_id, &caller, Some(deadline))
                .await
        });

        match tokio::time::timeout_at(deadline, join).await {
            Ok(Ok(result)) => result.map(|outcome| JoinResponse {
                version: API_VERSION,
                outcome,
            }),
            Ok(Err(e)) => {
                error!(target: "convo.service", error = %e, "Join task failed");
                Err(ConvoError::Internal)
            }
            Err(_) => {
                warn!(target: "convo.service", "Join deadline exceeded, join continues in background");
                Err(ConvoError::DeadlineExceeded)
            }
        }
    }

    /// Best-effort leave. Always acknowledges, whatever happened.
    #[instrument(skip_all, name = "convo.service.leave")]
    pub async fn on_leave_convo_conference(
        &self,
        caller: &ParticipantId,
        request: &LeaveRequest,
    ) -> Ack {
        if let Err(e) = request.validate() {
            debug!(target: "convo.service", error = %e, "Ignoring malformed leave");
            metrics::record_leave("invalid_request");
            return Ack::default();
        }

        let outcome = self
            .registrar
            .leave(&request.conversation_id, caller, &request.token)
            .await;
        debug!(target: "convo.service", outcome = outcome.label(), "Leave processed");
        Ack::default()
    }

    /// Apply a media-server report.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a bad version or sequence. Stale and
    /// unknown events are acknowledged.
    #[instrument(skip_all, name = "convo.service.media_event", fields(conversation_id = %request.conversation_id))]
    pub async fn apply_media_server_event(
        &self,
        request: &MediaEventRequest,
    ) -> Result<Ack, ConvoError> {
        request.validate()?;
        self.registrar
            .apply_media_event(
                &request.conversation_id,
                &request.participant_id,
                request.kind,
                request.epoch,
                request.sequence,
            )
            .await;
        Ok(Ack::default())
    }

    fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        requested.map_or(self.request_timeout, |t| t.min(self.request_timeout))
    }
}
