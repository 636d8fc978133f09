//! Wire types for the conference API.
//!
//! Every request and response carries an explicit `version`. Identifiers
//! are unpadded base64url strings and are bounds-checked while parsing.

use crate::errors::ConvoError;
use crate::registrar::{JoinOutcome, MediaEventKind};
use crate::store::ConvoVideoState;
use common::types::{ConversationId, ParticipantId};
use serde::{Deserialize, Serialize};

/// The only API version this build speaks.
pub const API_VERSION: u32 = 1;

/// Bounds on `BatchGetStateRequest::conversation_ids`.
pub const MIN_BATCH_SIZE: usize = 1;
pub const MAX_BATCH_SIZE: usize = 20;

/// Maximum accepted connection token length.
pub const MAX_TOKEN_LENGTH: usize = 1024;

/// Shape checks applied before a request reaches the registrar.
pub trait Validate {
    /// # Errors
    ///
    /// Returns [`ConvoError::Validation`] describing the first problem found.
    fn validate(&self) -> Result<(), ConvoError>;
}

fn check_version(version: u32) -> Result<(), ConvoError> {
    if version == API_VERSION {
        Ok(())
    } else {
        Err(ConvoError::Validation(format!(
            "unsupported version {version}, expected {API_VERSION}"
        )))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchGetStateRequest {
    pub version: u32,
    pub conversation_ids: Vec<ConversationId>,
}

impl Validate for BatchGetStateRequest {
    fn validate(&self) -> Result<(), ConvoError> {
        check_version(self.version)?;
        let len = self.conversation_ids.len();
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&len) {
            return Err(ConvoError::Validation(format!(
                "conversation_ids must contain {MIN_BATCH_SIZE} to {MAX_BATCH_SIZE} ids, got {len}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchGetStateResponse {
    pub version: u32,
    /// One entry per requested id, in request order.
    pub states: Vec<ConvoVideoState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinRequest {
    pub version: u32,
    pub conversation_id: ConversationId,
}

impl Validate for JoinRequest {
    fn validate(&self) -> Result<(), ConvoError> {
        check_version(self.version)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResponse {
    pub version: u32,
    #[serde(flatten)]
    pub outcome: JoinOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LeaveRequest {
    pub version: u32,
    pub conversation_id: ConversationId,
    pub token: String,
}

impl Validate for LeaveRequest {
    fn validate(&self) -> Result<(), ConvoError> {
        check_version(self.version)?;
        if self.token.is_empty() {
            return Err(ConvoError::Validation("token is required".to_string()));
        }
        if self.token.len() > MAX_TOKEN_LENGTH {
            return Err(ConvoError::Validation(format!(
                "token exceeds {MAX_TOKEN_LENGTH} bytes"
            )));
        }
        Ok(())
    }
}

/// Acknowledgement for leave and media events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub version: u32,
}

impl Default for Ack {
    fn default() -> Self {
        Self {
            version: API_VERSION,
        }
    }
}

/// Out-of-band report from the media server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MediaEventRequest {
    pub version: u32,
    pub conversation_id: ConversationId,
    pub participant_id: ParticipantId,
    pub kind: MediaEventKind,
    /// Conference epoch the media server was given when the slot was reserved.
    pub epoch: u64,
    /// Sequence the media server was given when the slot was reserved.
    pub sequence: u64,
}

impl Validate for MediaEventRequest {
    fn validate(&self) -> Result<(), ConvoError> {
        check_version(self.version)?;
        if self.sequence == 0 {
            return Err(ConvoError::Validation(
                "sequence must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn convo_ids(n: usize) -> Vec<ConversationId> {
        (0..n)
            .map(|i| ConversationId::from_bytes(vec![u8::try_from(i).unwrap() + 1]).unwrap())
            .collect()
    }

    #[test]
    fn test_batch_size_bounds() {
        for (n, ok) in [(0, false), (1, true), (20, true), (21, false)] {
            let request = BatchGetStateRequest {
                version: API_VERSION,
                conversation_ids: convo_ids(n),
            };
            assert_eq!(request.validate().is_ok(), ok, "batch of {n}");
        }
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let request = JoinRequest {
            version: 2,
            conversation_id: ConversationId::from_bytes(b"c".to_vec()).unwrap(),
        };
        let err = request.validate().unwrap_err();
        assert!(matches!(err, ConvoError::Validation(msg) if msg.contains("unsupported version 2")));
    }

    #[test]
    fn test_leave_requires_token() {
        let mut request = LeaveRequest {
            version: API_VERSION,
            conversation_id: ConversationId::from_bytes(b"c".to_vec()).unwrap(),
            token: String::new(),
        };
        assert!(request.validate().is_err());

        request.token = "x".repeat(MAX_TOKEN_LENGTH + 1);
        assert!(request.validate().is_err());

        request.token = "abc.def".to_string();
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_media_event_requires_positive_sequence() {
        let request: MediaEventRequest = serde_json::from_value(json!({
            "version": 1,
            "conversation_id": "Yw",
            "participant_id": "cA",
            "kind": "CONNECTED",
            "epoch": 7,
            "sequence": 0
        }))
        .unwrap();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_media_event_without_epoch_fails_to_parse() {
        let result: Result<MediaEventRequest, _> = serde_json::from_value(json!({
            "version": 1,
            "conversation_id": "Yw",
            "participant_id": "cA",
            "kind": "DISCONNECTED",
            "sequence": 1
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_oversized_id_fails_to_parse() {
        let too_long = ConversationId::from_bytes(vec![1u8; 64])
            .unwrap()
            .to_base64url()
            + "AAAA";
        let result: Result<JoinRequest, _> = serde_json::from_value(json!({
            "version": 1,
            "conversation_id": too_long
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let result: Result<JoinRequest, _> = serde_json::from_value(json!({
            "version": 1,
            "conversation_id": "Yw",
            "tag_7": true
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_join_response_flattens_outcome() {
        let response = JoinResponse {
            version: API_VERSION,
            outcome: JoinOutcome::NotAllowed,
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value, json!({ "version": 1, "result": "NOT_ALLOWED" }));

        let parsed: JoinResponse = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.outcome, JoinOutcome::NotAllowed);
    }
}
