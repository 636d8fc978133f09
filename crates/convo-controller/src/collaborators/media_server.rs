//! Media-server reservation client.
//!
//! A successful join reserves a slot on the media server and hands the
//! returned [`ConnectionInfo`] to the caller. Connection info is transient
//! and fetched again on every join, including idempotent re-joins.
//!
//! `POST {base}/v1/reservations` with `{conversation_id, participant_id, epoch, sequence}`
//! returns `{endpoint, credential, expires_at}`. The media server echoes the
//! epoch and sequence in its later CONNECTED/DISCONNECTED events.

use crate::errors::ConvoError;
use chrono::{DateTime, Utc};
use common::types::{ConversationId, ParticipantId};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{error, instrument, warn};

/// Client-side ceiling for reservation requests. The registrar applies its
/// own, usually tighter, bound around each call.
const MEDIA_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Media-server address and credentials for one join.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub endpoint: String,
    pub credential: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("endpoint", &self.endpoint)
            .field("credential", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Reserves media-server capacity for a participant.
#[async_trait::async_trait]
pub trait MediaServerClient: Send + Sync {
    /// Reserve a slot for `participant` at `sequence` in conference
    /// incarnation `epoch`.
    async fn reserve(
        &self,
        conversation_id: &ConversationId,
        participant: &ParticipantId,
        epoch: u64,
        sequence: u64,
    ) -> Result<ConnectionInfo, ConvoError>;
}

#[derive(Serialize)]
struct ReservationRequest<'a> {
    conversation_id: &'a ConversationId,
    participant_id: &'a ParticipantId,
    epoch: u64,
    sequence: u64,
}

/// HTTP client for the media-server reservation API.
#[derive(Clone)]
pub struct HttpMediaServerClient {
    client: Client,
    base_url: String,
}

impl HttpMediaServerClient {
    /// Create a new media-server client.
    ///
    /// # Errors
    ///
    /// Returns `ConvoError::Internal` if the HTTP client cannot be built.
    pub fn new(base_url: String) -> Result<Self, ConvoError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(MEDIA_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| {
                error!(target: "convo.collaborators.media", error = %e, "Failed to build HTTP client");
                ConvoError::Internal
            })?;

        Ok(Self { client, base_url })
    }
}

#[async_trait::async_trait]
impl MediaServerClient for HttpMediaServerClient {
    #[instrument(skip_all, name = "convo.media.reserve", fields(conversation_id = %conversation_id, epoch = epoch, sequence = sequence))]
    async fn reserve(
        &self,
        conversation_id: &ConversationId,
        participant: &ParticipantId,
        epoch: u64,
        sequence: u64,
    ) -> Result<ConnectionInfo, ConvoError> {
        let url = format!("{}/v1/reservations", self.base_url);
        let body = ReservationRequest {
            conversation_id,
            participant_id: participant,
            epoch,
            sequence,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(target: "convo.collaborators.media", error = %e, "Reservation request failed");
                ConvoError::Dependency("media server unreachable".to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(target: "convo.collaborators.media", status = %status, "Media server rejected reservation");
            return Err(ConvoError::Dependency(format!(
                "media server returned {status}"
            )));
        }

        response.json().await.map_err(|e| {
            warn!(target: "convo.collaborators.media", error = %e, "Failed to parse reservation response");
            ConvoError::Dependency("media server returned an invalid reservation".to_string())
        })
    }
}

/// Mock media server for tests.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    /// Mock media server.
    ///
    /// Succeeds by default; can fail a number of calls, fail forever, or
    /// sleep before answering.
    pub struct MockMediaServer {
        delay: Duration,
        always_fail: bool,
        failures_remaining: AtomicUsize,
        call_count: AtomicUsize,
        last_epoch: AtomicU64,
        last_sequence: AtomicU64,
    }

    impl Default for MockMediaServer {
        fn default() -> Self {
            Self::succeeding()
        }
    }

    impl MockMediaServer {
        #[must_use]
        pub fn succeeding() -> Self {
            Self {
                delay: Duration::ZERO,
                always_fail: false,
                failures_remaining: AtomicUsize::new(0),
                call_count: AtomicUsize::new(0),
                last_epoch: AtomicU64::new(0),
                last_sequence: AtomicU64::new(0),
            }
        }

        /// Every reservation fails.
        #[must_use]
        pub fn failing() -> Self {
            Self {
                always_fail: true,
                ..Self::succeeding()
            }
        }

        /// The next `count` reservations fail, later ones succeed.
        #[must_use]
        pub fn failing_times(count: usize) -> Self {
            Self {
                failures_remaining: AtomicUsize::new(count),
                ..Self::succeeding()
            }
        }

        /// Sleep for `delay` before answering.
        #[must_use]
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        #[must_use]
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        /// Epoch passed to the most recent reservation.
        #[must_use]
        pub fn last_epoch(&self) -> u64 {
            self.last_epoch.load(Ordering::SeqCst)
        }

        /// Sequence passed to the most recent reservation.
        #[must_use]
        pub fn last_sequence(&self) -> u64 {
            self.last_sequence.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl MediaServerClient for MockMediaServer {
        async fn reserve(
            &self,
            _conversation_id: &ConversationId,
            _participant: &ParticipantId,
            epoch: u64,
            sequence: u64,
        ) -> Result<ConnectionInfo, ConvoError> {
            let count = self.call_count.fetch_add(1, Ordering::SeqCst);
            self.last_epoch.store(epoch, Ordering::SeqCst);
            self.last_sequence.store(sequence, Ordering::SeqCst);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let scripted_failure = self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if self.always_fail || scripted_failure {
                return Err(ConvoError::Dependency("mock media failure".to_string()));
            }

            Ok(ConnectionInfo {
                endpoint: "wss://media.test:4433".to_string(),
                credential: format!("cred-{count}"),
                expires_at: Utc::now() + chrono::Duration::minutes(5),
            })
        }
    }
}
