//! Fan-out of conference state changes to other participants.
//!
//! Delivery is best effort. The registrar spawns each publish so the
//! originating RPC never waits on it, and failures are only logged and
//! counted.

use crate::errors::ConvoError;
use crate::store::ConvoVideoState;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, instrument, warn};

/// Default timeout for notification webhook calls in seconds.
const NOTIFICATION_TIMEOUT_SECS: u64 = 5;

/// Publishes updated conference state.
#[async_trait::async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish(&self, state: &ConvoVideoState) -> Result<(), ConvoError>;
}

/// Publisher used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotificationPublisher;

#[async_trait::async_trait]
impl NotificationPublisher for NoopNotificationPublisher {
    async fn publish(&self, _state: &ConvoVideoState) -> Result<(), ConvoError> {
        Ok(())
    }
}

#[derive(Serialize)]
struct StateChanged<'a> {
    version: u8,
    state: &'a ConvoVideoState,
}

/// Posts state changes to a webhook.
#[derive(Clone)]
pub struct HttpNotificationPublisher {
    client: Client,
    url: String,
}

impl HttpNotificationPublisher {
    /// Create a new webhook publisher.
    ///
    /// # Errors
    ///
    /// Returns `ConvoError::Internal` if the HTTP client cannot be built.
    pub fn new(url: String) -> Result<Self, ConvoError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(NOTIFICATION_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                error!(target: "convo.collaborators.notifications", error = %e, "Failed to build HTTP client");
                ConvoError::Internal
            })?;

        Ok(Self { client, url })
    }
}

#[async_trait::async_trait]
impl NotificationPublisher for HttpNotificationPublisher {
    #[instrument(skip_all, name = "convo.notifications.publish", fields(conversation_id = %state.conversation_id))]
    async fn publish(&self, state: &ConvoVideoState) -> Result<(), ConvoError> {
        let response = self
            .client
            .post(&self.url)
            .json(&StateChanged { version: 1, state })
            .send()
            .await
            .map_err(|e| {
                warn!(target: "convo.collaborators.notifications", error = %e, "Notification request failed");
                ConvoError::Dependency("notification service unreachable".to_string())
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ConvoError::Dependency(format!(
                "notification service returned {}",
                response.status()
            )))
        }
    }
}

/// Recording publisher for tests.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// Records every published state, optionally failing each publish.
    #[derive(Default)]
    pub struct RecordingPublisher {
        fail: bool,
        published: Mutex<Vec<ConvoVideoState>>,
        call_count: AtomicUsize,
    }

    impl RecordingPublisher {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Every publish fails after being recorded.
        #[must_use]
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        #[must_use]
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        /// States published so far, oldest first.
        pub async fn published(&self) -> Vec<ConvoVideoState> {
            self.published.lock().await.clone()
        }
    }

    #[async_trait::async_trait]
    impl NotificationPublisher for RecordingPublisher {
        async fn publish(&self, state: &ConvoVideoState) -> Result<(), ConvoError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.published.lock().await.push(state.clone());
            if self.fail {
                return Err(ConvoError::Dependency("mock publish failure".to_string()));
            }
            Ok(())
        }
    }
}
