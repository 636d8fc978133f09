//! Deterministic identifiers and secrets for tests.

use common::secret::SecretBox;
use common::types::{ConversationId, ParticipantId};
use convo_controller::middleware::MediaEventAuth;
use convo_controller::tokens::TokenIssuer;

/// 32-byte master secret used by test token issuers.
pub const TEST_TOKEN_SECRET: [u8; 32] = [0x5a; 32];

/// 32-byte secret the test media server signs its reports with.
pub const TEST_MEDIA_EVENT_SECRET: [u8; 32] = [0x6b; 32];

/// Build a conversation id from a readable name.
pub fn conversation(name: &str) -> ConversationId {
    ConversationId::from_bytes(name.as_bytes().to_vec()).expect("valid test conversation id")
}

/// Build a participant id from a readable name.
pub fn participant(name: &str) -> ParticipantId {
    ParticipantId::from_bytes(name.as_bytes().to_vec()).expect("valid test participant id")
}

/// `n` distinct participants named `p0`, `p1`, ...
pub fn participants(n: usize) -> Vec<ParticipantId> {
    (0..n).map(|i| participant(&format!("p{i}"))).collect()
}

/// Token issuer keyed with [`TEST_TOKEN_SECRET`].
pub fn test_token_issuer() -> TokenIssuer {
    TokenIssuer::new(SecretBox::new(Box::new(TEST_TOKEN_SECRET.to_vec())))
        .expect("test secret is long enough")
}

/// Media event verifier keyed with [`TEST_MEDIA_EVENT_SECRET`].
pub fn test_media_event_auth() -> MediaEventAuth {
    MediaEventAuth::new(&SecretBox::new(Box::new(TEST_MEDIA_EVENT_SECRET.to_vec())))
        .expect("test secret is long enough")
}
