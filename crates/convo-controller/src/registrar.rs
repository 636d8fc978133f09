//! Join/leave state machine for conversation conferences.
//!
//! Per `(conversation, participant)`:
//!
//! ```text
//! ABSENT --join--> CONNECTING --media CONNECTED--> CONNECTED
//!    ^                 |                               |
//!    +--leave / media DISCONNECTED / failed join ------+
//! ```
//!
//! Every transition advances the participant's sequence. Tokens and media
//! reservations carry the sequence and the conference epoch; a leave or media
//! event from another epoch, or older than the last issued token, is ignored.
//!
//! Join is fetch-then-commit: the participant is reserved as CONNECTING
//! under the conversation lock, the media server is called with no lock
//! held, and the result is either committed or rolled back under the lock
//! again. A failed join never leaves a CONNECTING entry behind.

use crate::collaborators::{
    ConnectionInfo, MediaServerClient, MembershipPolicy, NotificationPublisher,
};
use crate::errors::ConvoError;
use crate::observability::metrics;
use crate::store::{ConvoStateStore, ConvoVideoState, ParticipantState};
use crate::tokens::{ConnectionToken, TokenIssuer};
use common::types::{ConversationId, ParticipantId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Result of a join. Business outcomes are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JoinOutcome {
    /// The participant is in the conference.
    Ok {
        state: ConvoVideoState,
        connection_info: ConnectionInfo,
        token: ConnectionToken,
    },
    /// The conference is at capacity. Nothing changed.
    Full { state: ConvoVideoState },
    /// Membership policy denied the caller. Nothing changed.
    NotAllowed,
}

impl JoinOutcome {
    fn label(&self) -> &'static str {
        match self {
            JoinOutcome::Ok { .. } => "ok",
            JoinOutcome::Full { .. } => "full",
            JoinOutcome::NotAllowed => "not_allowed",
        }
    }
}

/// What a leave did. Never reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    Applied,
    /// A newer join or a newer conference incarnation exists.
    Stale,
    /// The participant was not in the conference.
    Absent,
    /// The token did not verify.
    InvalidToken,
    /// The token was minted for a different conversation or participant.
    Mismatch,
}

impl LeaveOutcome {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            LeaveOutcome::Applied => "applied",
            LeaveOutcome::Stale => "stale",
            LeaveOutcome::Absent => "absent",
            LeaveOutcome::InvalidToken => "invalid_token",
            LeaveOutcome::Mismatch => "mismatch",
        }
    }
}

/// Out-of-band state change reported by the media server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaEventKind {
    Connected,
    Disconnected,
}

impl MediaEventKind {
    fn label(self) -> &'static str {
        match self {
            MediaEventKind::Connected => "connected",
            MediaEventKind::Disconnected => "disconnected",
        }
    }
}

/// What a media-server event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEventOutcome {
    Applied,
    /// From another conference incarnation, or older than the last issued token.
    Stale,
    /// Newer than any sequence the registrar handed out.
    UnknownSequence,
    /// CONNECTED for a participant that is already connected.
    Duplicate,
    Absent,
}

impl MediaEventOutcome {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            MediaEventOutcome::Applied => "applied",
            MediaEventOutcome::Stale => "stale",
            MediaEventOutcome::UnknownSequence => "unknown_sequence",
            MediaEventOutcome::Duplicate => "duplicate",
            MediaEventOutcome::Absent => "absent",
        }
    }
}

enum Reservation {
    New { sequence: u64, epoch: u64 },
    Existing { sequence: u64, epoch: u64 },
    Full(ConvoVideoState),
}

/// Owns every mutation of conference state.
pub struct ConferenceRegistrar {
    store: Arc<ConvoStateStore>,
    tokens: Arc<TokenIssuer>,
    membership: Arc<dyn MembershipPolicy>,
    media: Arc<dyn MediaServerClient>,
    publisher: Arc<dyn NotificationPublisher>,
    media_reserve_timeout: Duration,
}

impl ConferenceRegistrar {
    #[must_use]
    pub fn new(
        store: Arc<ConvoStateStore>,
        tokens: Arc<TokenIssuer>,
        membership: Arc<dyn MembershipPolicy>,
        media: Arc<dyn MediaServerClient>,
        publisher: Arc<dyn NotificationPublisher>,
        media_reserve_timeout: Duration,
    ) -> Self {
        Self {
            store,
            tokens,
            membership,
            media,
            publisher,
            media_reserve_timeout,
        }
    }

    /// Join a participant to a conversation's conference.
    ///
    /// Re-joining while CONNECTING or CONNECTED changes no state but mints a
    /// fresh token and fetches fresh connection info.
    ///
    /// # Errors
    ///
    /// - `Dependency` if membership or the media server fails (any local
    ///   reservation is rolled back)
    /// - `DeadlineExceeded` if `deadline` elapses during the reservation
    ///   (rolled back as well)
    /// - `Superseded` if a media-server disconnect removed the reservation
    ///   before it was committed
    /// - `Storage` if the store cannot create the conference
    #[instrument(skip_all, name = "convo.registrar.join", fields(conversation_id = %conversation_id))]
    pub async fn join(
        &self,
        conversation_id: &ConversationId,
        participant: &ParticipantId,
        deadline: Option<Instant>,
    ) -> Result<JoinOutcome, ConvoError> {
        let result = self.join_inner(conversation_id, participant, deadline).await;
        match &result {
            Ok(outcome) => metrics::record_join(outcome.label()),
            Err(e) => metrics::record_join(e.label()),
        }
        result
    }

    async fn join_inner(
        &self,
        conversation_id: &ConversationId,
        participant: &ParticipantId,
        deadline: Option<Instant>,
    ) -> Result<JoinOutcome, ConvoError> {
        if !self
            .membership
            .is_allowed(conversation_id, participant)
            .await?
        {
            debug!(target: "convo.registrar", "Membership denied");
            return Ok(JoinOutcome::NotAllowed);
        }

        let reservation = self
            .store
            .upsert(conversation_id, |state| {
                if let Some(entry) = state.participant(participant) {
                    return Reservation::Existing {
                        sequence: entry.sequence,
                        epoch: state.epoch(),
                    };
                }
                if state.is_full() {
                    return Reservation::Full(state.snapshot());
                }
                let sequence = state.next_join_sequence();
                state.insert_connecting(participant.clone(), sequence);
                Reservation::New {
                    sequence,
                    epoch: state.epoch(),
                }
            })
            .await?;

        let (sequence, epoch, is_new) = match reservation {
            Reservation::Full(state) => {
                debug!(target: "convo.registrar", participants = state.participants.len(), "Conference full");
                return Ok(JoinOutcome::Full { state });
            }
            Reservation::New { sequence, epoch } => (sequence, epoch, true),
            Reservation::Existing { sequence, epoch } => (sequence, epoch, false),
        };

        debug!(target: "convo.registrar", sequence = sequence, is_new = is_new, "Participant reserved");

        let connection_info = match self
            .reserve_media(conversation_id, participant, epoch, sequence, deadline)
            .await
        {
            Ok(info) => info,
            Err(e) => {
                if is_new {
                    self.roll_back(conversation_id, participant, sequence).await;
                }
                return Err(e);
            }
        };

        let committed = self
            .store
            .update_existing(conversation_id, |state| {
                if state.epoch() != epoch {
                    return None;
                }
                let entry = state.participant_mut(participant)?;
                if entry.sequence < sequence || entry.last_token_sequence > sequence {
                    return None;
                }
                entry.last_token_sequence = sequence;
                Some(state.snapshot())
            })
            .await
            .flatten();

        let Some(state) = committed else {
            warn!(target: "convo.registrar", sequence = sequence, "Reservation superseded before commit");
            return Err(ConvoError::Superseded);
        };

        let token = self
            .tokens
            .issue(conversation_id, participant, sequence, epoch)?;

        if is_new {
            info!(target: "convo.registrar", sequence = sequence, participants = state.participants.len(), "Participant joined");
            self.publish(state.clone());
        }

        Ok(JoinOutcome::Ok {
            state,
            connection_info,
            token,
        })
    }

    /// Best-effort leave. Returns what happened for logging and metrics only.
    #[instrument(skip_all, name = "convo.registrar.leave", fields(conversation_id = %conversation_id))]
    pub async fn leave(
        &self,
        conversation_id: &ConversationId,
        participant: &ParticipantId,
        token: &str,
    ) -> LeaveOutcome {
        let outcome = self.leave_inner(conversation_id, participant, token).await;
        metrics::record_leave(outcome.label());
        outcome
    }

    async fn leave_inner(
        &self,
        conversation_id: &ConversationId,
        participant: &ParticipantId,
        token: &str,
    ) -> LeaveOutcome {
        let claims = match self.tokens.verify(token) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(target: "convo.registrar", error = %e, "Ignoring leave with invalid token");
                return LeaveOutcome::InvalidToken;
            }
        };

        if &claims.conversation_id != conversation_id || &claims.participant != participant {
            warn!(target: "convo.registrar", "Ignoring leave with token for another conversation or participant");
            return LeaveOutcome::Mismatch;
        }

        let applied = self
            .store
            .update_existing(conversation_id, |state| {
                if state.epoch() != claims.epoch {
                    return (LeaveOutcome::Stale, None);
                }
                match state.participant(participant) {
                    None => (LeaveOutcome::Absent, None),
                    Some(entry) if claims.sequence < entry.last_token_sequence => {
                        (LeaveOutcome::Stale, None)
                    }
                    Some(_) => {
                        state.remove_participant(participant);
                        (LeaveOutcome::Applied, Some(state.snapshot()))
                    }
                }
            })
            .await;

        let Some((outcome, snapshot)) = applied else {
            return LeaveOutcome::Absent;
        };

        match outcome {
            LeaveOutcome::Applied => {
                info!(target: "convo.registrar", sequence = claims.sequence, "Participant left");
            }
            LeaveOutcome::Stale => {
                debug!(target: "convo.registrar", sequence = claims.sequence, "Ignoring stale leave");
            }
            _ => {}
        }
        if let Some(state) = snapshot {
            self.publish(state);
        }
        outcome
    }

    /// Apply a CONNECTED or DISCONNECTED report from the media server.
    ///
    /// `observed_epoch` and `observed_sequence` are the values the media
    /// server was given when the slot was reserved.
    #[instrument(skip_all, name = "convo.registrar.media_event", fields(conversation_id = %conversation_id, kind = kind.label()))]
    pub async fn apply_media_event(
        &self,
        conversation_id: &ConversationId,
        participant: &ParticipantId,
        kind: MediaEventKind,
        observed_epoch: u64,
        observed_sequence: u64,
    ) -> MediaEventOutcome {
        let applied = self
            .store
            .update_existing(conversation_id, |state| {
                if state.epoch() != observed_epoch {
                    return MediaEventOutcome::Stale;
                }
                let Some(entry) = state.participant_mut(participant) else {
                    return MediaEventOutcome::Absent;
                };
                if observed_sequence < entry.last_token_sequence {
                    return MediaEventOutcome::Stale;
                }
                if observed_sequence > entry.sequence {
                    return MediaEventOutcome::UnknownSequence;
                }
                match kind {
                    MediaEventKind::Connected => {
                        if entry.state == ParticipantState::Connected {
                            return MediaEventOutcome::Duplicate;
                        }
                        entry.state = ParticipantState::Connected;
                        entry.sequence = entry.sequence.saturating_add(1);
                    }
                    MediaEventKind::Disconnected => {
                        state.remove_participant(participant);
                    }
                }
                MediaEventOutcome::Applied
            })
            .await;

        let outcome = applied.unwrap_or(MediaEventOutcome::Absent);
        metrics::record_media_event(kind.label(), outcome.label());

        if outcome == MediaEventOutcome::Applied {
            debug!(target: "convo.registrar", observed_sequence = observed_sequence, "Media event applied");
            self.publish(self.store.get(conversation_id).await);
        } else {
            debug!(target: "convo.registrar", observed_sequence = observed_sequence, outcome = outcome.label(), "Media event ignored");
        }
        outcome
    }

    async fn reserve_media(
        &self,
        conversation_id: &ConversationId,
        participant: &ParticipantId,
        epoch: u64,
        sequence: u64,
        deadline: Option<Instant>,
    ) -> Result<ConnectionInfo, ConvoError> {
        let start = Instant::now();
        let (bound, deadline_bound) = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(start);
                if remaining < self.media_reserve_timeout {
                    (remaining, true)
                } else {
                    (self.media_reserve_timeout, false)
                }
            }
            None => (self.media_reserve_timeout, false),
        };

        let result = tokio::time::timeout(
            bound,
            self.media.reserve(conversation_id, participant, epoch, sequence),
        )
        .await;

        match result {
            Ok(Ok(info)) => {
                metrics::record_media_reserve("success", start.elapsed());
                Ok(info)
            }
            Ok(Err(e)) => {
                metrics::record_media_reserve("error", start.elapsed());
                warn!(target: "convo.registrar", error = %e, "Media reservation failed");
                Err(e)
            }
            Err(_) => {
                metrics::record_media_reserve("timeout", start.elapsed());
                warn!(target: "convo.registrar", timeout_ms = bound.as_millis(), "Media reservation timed out");
                if deadline_bound {
                    Err(ConvoError::DeadlineExceeded)
                } else {
                    Err(ConvoError::Dependency(
                        "media server reservation timed out".to_string(),
                    ))
                }
            }
        }
    }

    /// Undo a reservation made by a join that then failed.
    async fn roll_back(
        &self,
        conversation_id: &ConversationId,
        participant: &ParticipantId,
        sequence: u64,
    ) {
        let rolled_back = self
            .store
            .update_existing(conversation_id, |state| {
                let ours = state
                    .participant(participant)
                    .is_some_and(|entry| entry.last_token_sequence == sequence);
                if ours {
                    state.remove_participant(participant);
                }
                ours
            })
            .await
            .unwrap_or(false);

        debug!(target: "convo.registrar", sequence = sequence, rolled_back = rolled_back, "Join rolled back");
    }

    fn publish(&self, state: ConvoVideoState) {
        let publisher = Arc::clone(&self.publisher);
        tokio::spawn(async move {
            if let Err(e) = publisher.publish(&state).await {
                metrics::record_notification_failed();
                warn!(target: "convo.registrar", conversation_id = %state.conversation_id, error = %e, "State notification failed");
            }
        });
    }
}
