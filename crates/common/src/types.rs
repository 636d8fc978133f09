//! Identifier value objects for conversations and participants.
//!
//! Both identifiers are opaque byte strings chosen by upstream systems. The
//! control plane never interprets them; it only enforces the byte-length
//! bounds, compares them, and hashes them.
//!
//! - Wire form: unpadded base64url (`"q83v"`)
//! - Log form: lowercase hex (`abcdef`)

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Maximum length of an identifier in bytes.
pub const MAX_ID_BYTES: usize = 64;

/// Errors produced when constructing an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// Identifier has no bytes.
    #[error("identifier must not be empty")]
    Empty,

    /// Identifier exceeds [`MAX_ID_BYTES`].
    #[error("identifier exceeds {max} bytes (got {len})")]
    TooLong { len: usize, max: usize },

    /// Wire form is not unpadded base64url.
    #[error("identifier is not valid base64url")]
    InvalidEncoding,
}

fn check_len(bytes: &[u8]) -> Result<(), IdError> {
    if bytes.is_empty() {
        return Err(IdError::Empty);
    }
    if bytes.len() > MAX_ID_BYTES {
        return Err(IdError::TooLong {
            len: bytes.len(),
            max: MAX_ID_BYTES,
        });
    }
    Ok(())
}

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Vec<u8>);

        impl $name {
            /// Build an identifier from raw bytes.
            ///
            /// # Errors
            ///
            /// Returns [`IdError`] if the byte length is out of bounds.
            pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, IdError> {
                let bytes = bytes.into();
                check_len(&bytes)?;
                Ok(Self(bytes))
            }

            /// Parse the unpadded base64url wire form.
            ///
            /// # Errors
            ///
            /// Returns [`IdError::InvalidEncoding`] for bad base64 and the
            /// length errors of [`Self::from_bytes`].
            pub fn from_base64url(encoded: &str) -> Result<Self, IdError> {
                let bytes = URL_SAFE_NO_PAD
                    .decode(encoded)
                    .map_err(|_| IdError::InvalidEncoding)?;
                Self::from_bytes(bytes)
            }

            /// Unpadded base64url wire form.
            #[must_use]
            pub fn to_base64url(&self) -> String {
                URL_SAFE_NO_PAD.encode(&self.0)
            }

            /// Raw identifier bytes.
            #[must_use]
            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(&self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(&self.0))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_base64url())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let encoded = String::deserialize(deserializer)?;
                Self::from_base64url(&encoded).map_err(de::Error::custom)
            }
        }
    };
}

opaque_id!(
    /// Identifier of a chat or group that a conference is scoped to.
    ConversationId
);

opaque_id!(
    /// Identifier of a user or persona taking part in a conference.
    ParticipantId
);

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes_rejects_empty() {
        assert_eq!(ConversationId::from_bytes(Vec::new()), Err(IdError::Empty));
    }

    #[test]
    fn test_from_bytes_rejects_oversized() {
        let result = ParticipantId::from_bytes(vec![7u8; MAX_ID_BYTES + 1]);
        assert_eq!(
            result,
            Err(IdError::TooLong {
                len: MAX_ID_BYTES + 1,
                max: MAX_ID_BYTES
            })
        );
    }

    #[test]
    fn test_max_length_is_accepted() {
        assert!(ParticipantId::from_bytes(vec![7u8; MAX_ID_BYTES]).is_ok());
    }

    #[test]
    fn test_display_is_hex() {
        let id = ConversationId::from_bytes(vec![0xab, 0xcd, 0xef]).unwrap();
        assert_eq!(id.to_string(), "abcdef");
        assert_eq!(format!("{id:?}"), "ConversationId(abcdef)");
    }

    #[test]
    fn test_wire_form_is_unpadded_base64url() {
        let id = ConversationId::from_bytes(vec![0xfb, 0xff]).unwrap();
        assert_eq!(id.to_base64url(), "-_8");

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"-_8\"");

        let parsed: ConversationId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_deserialize_rejects_standard_base64_padding() {
        let result: Result<ParticipantId, _> = serde_json::from_str("\"+/8=\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_rejects_empty_string() {
        let result: Result<ParticipantId, _> = serde_json::from_str("\"\"");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("must not be empty"), "got: {err}");
    }
}
