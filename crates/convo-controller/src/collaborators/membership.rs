//! Membership policy client.
//!
//! Answers whether a participant may join a conversation's conference. The
//! HTTP implementation asks the membership service:
//!
//! `GET {base}/v1/conversations/{conversation}/members/{participant}`
//!
//! - 200: allowed
//! - 403, 404: denied
//! - anything else: dependency failure

use crate::errors::ConvoError;
use common::types::{ConversationId, ParticipantId};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{error, instrument, warn};

/// Default timeout for membership requests in seconds.
const MEMBERSHIP_REQUEST_TIMEOUT_SECS: u64 = 5;

/// Decides whether a participant may join a conversation.
#[async_trait::async_trait]
pub trait MembershipPolicy: Send + Sync {
    /// Returns `Ok(false)` for a denial; `Err` only when the policy could
    /// not be evaluated.
    async fn is_allowed(
        &self,
        conversation_id: &ConversationId,
        participant: &ParticipantId,
    ) -> Result<bool, ConvoError>;
}

/// HTTP client for the membership service.
#[derive(Clone)]
pub struct HttpMembershipPolicy {
    client: Client,
    base_url: String,
}

impl HttpMembershipPolicy {
    /// Create a new membership client.
    ///
    /// # Errors
    ///
    /// Returns `ConvoError::Internal` if the HTTP client cannot be built.
    pub fn new(base_url: String) -> Result<Self, ConvoError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(MEMBERSHIP_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| {
                error!(target: "convo.collaborators.membership", error = %e, "Failed to build HTTP client");
                ConvoError::Internal
            })?;

        Ok(Self { client, base_url })
    }
}

#[async_trait::async_trait]
impl MembershipPolicy for HttpMembershipPolicy {
    #[instrument(skip_all, name = "convo.membership.is_allowed", fields(conversation_id = %conversation_id))]
    async fn is_allowed(
        &self,
        conversation_id: &ConversationId,
        participant: &ParticipantId,
    ) -> Result<bool, ConvoError> {
        let url = format!(
            "{}/v1/conversations/{}/members/{}",
            self.base_url,
            conversation_id.to_base64url(),
            participant.to_base64url()
        );

        let response = self.client.get(&url).send().await.map_err(|e| {
            warn!(target: "convo.collaborators.membership", error = %e, "Membership request failed");
            ConvoError::Dependency("membership service unreachable".to_string())
        })?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Ok(false),
            status => {
                warn!(target: "convo.collaborators.membership", status = %status, "Unexpected membership response");
                Err(ConvoError::Dependency(format!(
                    "membership service returned {status}"
                )))
            }
        }
    }
}

/// Mock membership policies for tests.
pub mod mock {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Mode {
        AllowAll,
        DenyAll,
        Members(HashSet<ParticipantId>),
        Failing,
    }

    /// Mock membership policy with a call counter.
    pub struct MockMembershipPolicy {
        mode: Mode,
        call_count: AtomicUsize,
    }

    impl MockMembershipPolicy {
        fn with_mode(mode: Mode) -> Self {
            Self {
                mode,
                call_count: AtomicUsize::new(0),
            }
        }

        /// Every participant is a member.
        #[must_use]
        pub fn allow_all() -> Self {
            Self::with_mode(Mode::AllowAll)
        }

        /// Nobody is a member.
        #[must_use]
        pub fn deny_all() -> Self {
            Self::with_mode(Mode::DenyAll)
        }

        /// Only the listed participants are members, of every conversation.
        #[must_use]
        pub fn members(members: impl IntoIterator<Item = ParticipantId>) -> Self {
            Self::with_mode(Mode::Members(members.into_iter().collect()))
        }

        /// The policy cannot be evaluated.
        #[must_use]
        pub fn failing() -> Self {
            Self::with_mode(Mode::Failing)
        }

        #[must_use]
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl MembershipPolicy for MockMembershipPolicy {
        async fn is_allowed(
            &self,
            _conversation_id: &ConversationId,
            participant: &ParticipantId,
        ) -> Result<bool, ConvoError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            match &self.mode {
                Mode::AllowAll => Ok(true),
                Mode::DenyAll => Ok(false),
                Mode::Members(members) => Ok(members.contains(participant)),
                Mode::Failing => Err(ConvoError::Dependency(
                    "mock membership failure".to_string(),
                )),
            }
        }
    }
}
