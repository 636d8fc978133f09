//! Connection token minting and verification.
//!
//! A connection token proves a specific join event and is required to leave.
//! Authenticity is checked without a storage round trip:
//!
//! - **Claims**: `{v, convo, participant, seq, epoch, iat}` as JSON
//! - **Key derivation**: `HKDF-SHA256(master_secret, salt=conversation_id, info="connection-token")`
//! - **Tag**: `HMAC-SHA256(conversation_key, base64url(claims))`
//! - **Wire form**: `base64url(claims) "." base64url(tag)`
//!
//! Verification uses `ring::hmac::verify`, which compares in constant time.
//! Freshness against live conference state is not checked here; see
//! [`crate::registrar`].

use crate::config::ConfigError;
use crate::errors::{ConvoError, TokenError};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use common::secret::{ExposeSecret, SecretBox, SecretString};
use common::types::{ConversationId, ParticipantId};
use ring::{hkdf, hmac};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Minimum master secret length for HMAC-SHA256.
pub const MIN_SECRET_LENGTH: usize = 32;

/// Current token format version.
pub const TOKEN_VERSION: u8 = 1;

const KEY_INFO: &[u8] = b"connection-token";

/// Opaque connection token handed to clients.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionToken(String);

impl ConnectionToken {
    /// Wrap a token string received from a client.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ConnectionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConnectionToken([REDACTED])")
    }
}

/// Claims bound by a connection token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(rename = "v")]
    pub version: u8,
    #[serde(rename = "convo")]
    pub conversation_id: ConversationId,
    pub participant: ParticipantId,
    #[serde(rename = "seq")]
    pub sequence: u64,
    /// Incarnation of the conference the token was minted for.
    pub epoch: u64,
    /// Issue time, milliseconds since the Unix epoch.
    #[serde(rename = "iat")]
    pub issued_at_ms: i64,
}

/// Mints and verifies connection tokens.
pub struct TokenIssuer {
    master_secret: SecretBox<Vec<u8>>,
}

impl TokenIssuer {
    /// Create an issuer from decoded key material.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if the secret is shorter than
    /// [`MIN_SECRET_LENGTH`].
    pub fn new(master_secret: SecretBox<Vec<u8>>) -> Result<Self, ConfigError> {
        let len = master_secret.expose_secret().len();
        if len < MIN_SECRET_LENGTH {
            return Err(ConfigError::InvalidValue(format!(
                "token secret must be at least {MIN_SECRET_LENGTH} bytes, got {len}"
            )));
        }
        Ok(Self { master_secret })
    }

    /// Create an issuer from the base64 form used in configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for bad base64 or a short secret.
    pub fn from_base64(encoded: &SecretString) -> Result<Self, ConfigError> {
        let bytes = STANDARD
            .decode(encoded.expose_secret().trim())
            .map_err(|e| ConfigError::InvalidValue(format!("token secret is not base64: {e}")))?;
        Self::new(SecretBox::new(Box::new(bytes)))
    }

    /// Mint a token for `(conversation, participant, sequence)` in the
    /// conference incarnation `epoch`.
    ///
    /// # Errors
    ///
    /// Returns [`ConvoError::Internal`] if the claims cannot be encoded or the
    /// key cannot be derived.
    pub fn issue(
        &self,
        conversation_id: &ConversationId,
        participant: &ParticipantId,
        sequence: u64,
        epoch: u64,
    ) -> Result<ConnectionToken, ConvoError> {
        let claims = TokenClaims {
            version: TOKEN_VERSION,
            conversation_id: conversation_id.clone(),
            participant: participant.clone(),
            sequence,
            epoch,
            issued_at_ms: chrono::Utc::now().timestamp_millis(),
        };
        self.sign(&claims)
    }

    /// Encode and sign arbitrary claims.
    pub(crate) fn sign(&self, claims: &TokenClaims) -> Result<ConnectionToken, ConvoError> {
        let payload = serde_json::to_vec(claims).map_err(|e| {
            tracing::error!(target: "convo.tokens", error = %e, "Failed to encode token claims");
            ConvoError::Internal
        })?;
        let encoded_payload = URL_SAFE_NO_PAD.encode(payload);

        let key = self
            .derive_conversation_key(&claims.conversation_id)
            .ok_or(ConvoError::Internal)?;
        let tag = hmac::sign(&key, encoded_payload.as_bytes());

        Ok(ConnectionToken(format!(
            "{encoded_payload}.{}",
            URL_SAFE_NO_PAD.encode(tag.as_ref())
        )))
    }

    /// Verify a token and return its claims.
    ///
    /// # Errors
    ///
    /// - [`TokenError::Malformed`] if the token does not parse
    /// - [`TokenError::InvalidSignature`] if the tag does not match
    /// - [`TokenError::UnsupportedVersion`] for an unknown format version
    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let (encoded_payload, encoded_tag) = token.split_once('.').ok_or(TokenError::Malformed)?;

        let payload = URL_SAFE_NO_PAD
            .decode(encoded_payload)
            .map_err(|_| TokenError::Malformed)?;
        let tag = URL_SAFE_NO_PAD
            .decode(encoded_tag)
            .map_err(|_| TokenError::Malformed)?;
        let claims: TokenClaims =
            serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;

        let key = self
            .derive_conversation_key(&claims.conversation_id)
            .ok_or(TokenError::InvalidSignature)?;
        hmac::verify(&key, encoded_payload.as_bytes(), &tag).map_err(|_| {
            debug!(target: "convo.tokens", conversation_id = %claims.conversation_id, "Token signature mismatch");
            TokenError::InvalidSignature
        })?;

        if claims.version != TOKEN_VERSION {
            return Err(TokenError::UnsupportedVersion(claims.version));
        }

        Ok(claims)
    }

    /// Derive the per-conversation HMAC key.
    ///
    /// Returns `None` only if HKDF expansion fails, which cannot happen for a
    /// single info block and a SHA-256 sized output.
    fn derive_conversation_key(&self, conversation_id: &ConversationId) -> Option<hmac::Key> {
        let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, conversation_id.as_bytes());
        let prk = salt.extract(self.master_secret.expose_secret());
        let okm = prk.expand(&[KEY_INFO], hmac::HMAC_SHA256).ok()?;
        Some(hmac::Key::from(okm))
    }
}
