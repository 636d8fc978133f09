//! Media server authentication for the internal event endpoint.
//!
//! The media server signs every report with a secret shared with this
//! controller:
//!
//! ```text
//! x-media-signature: base64url(HMAC-SHA256(media_event_secret, body))
//! ```
//!
//! The middleware buffers the body, verifies the tag with
//! `ring::hmac::verify` (constant time), and hands the same bytes on to the
//! handler. Unsigned or mis-signed reports are rejected with 401 before they
//! can touch conference state.

use crate::config::ConfigError;
use crate::errors::ConvoError;
use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use common::secret::{ExposeSecret, SecretBox, SecretString};
use ring::hmac;
use std::sync::Arc;
use tracing::instrument;

/// Header carrying the report signature.
pub const MEDIA_SIGNATURE_HEADER: &str = "x-media-signature";

/// Minimum shared secret length for HMAC-SHA256.
pub const MIN_MEDIA_SECRET_LENGTH: usize = 32;

/// Reports are a few hundred bytes; anything larger is not a report.
const MAX_MEDIA_EVENT_BODY_BYTES: usize = 16 * 1024;

/// Verifies media server report signatures.
pub struct MediaEventAuth {
    key: hmac::Key,
}

impl MediaEventAuth {
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if the secret is shorter than
    /// [`MIN_MEDIA_SECRET_LENGTH`].
    pub fn new(secret: &SecretBox<Vec<u8>>) -> Result<Self, ConfigError> {
        let secret = secret.expose_secret();
        if secret.len() < MIN_MEDIA_SECRET_LENGTH {
            return Err(ConfigError::InvalidValue(format!(
                "media event secret must be at least {MIN_MEDIA_SECRET_LENGTH} bytes, got {}",
                secret.len()
            )));
        }
        Ok(Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        })
    }

    /// Build from the base64 form used in configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for bad base64 or a short secret.
    pub fn from_base64(encoded: &SecretString) -> Result<Self, ConfigError> {
        let bytes = STANDARD
            .decode(encoded.expose_secret().trim())
            .map_err(|e| {
                ConfigError::InvalidValue(format!("media event secret is not base64: {e}"))
            })?;
        Self::new(&SecretBox::new(Box::new(bytes)))
    }

    /// Signature header value for `body`.
    #[must_use]
    pub fn sign(&self, body: &[u8]) -> String {
        URL_SAFE_NO_PAD.encode(hmac::sign(&self.key, body).as_ref())
    }

    /// Check `signature` against `body`.
    #[must_use]
    pub fn verify(&self, body: &[u8], signature: &str) -> bool {
        let Ok(tag) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        hmac::verify(&self.key, body, &tag).is_ok()
    }
}

/// Reject media event reports that are not signed by the media server.
///
/// - Returns 401 if `x-media-signature` is missing or does not match the body
/// - Returns 400 if the body cannot be read or is oversized
#[instrument(skip_all, name = "convo.middleware.media_signature")]
pub async fn require_media_signature(
    State(auth): State<Arc<MediaEventAuth>>,
    req: Request,
    next: Next,
) -> Result<impl IntoResponse, ConvoError> {
    let signature = req
        .headers()
        .get(MEDIA_SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::to_owned)
        .ok_or_else(|| {
            tracing::warn!(target: "convo.middleware.media_signature", "Unsigned media event rejected");
            ConvoError::Unauthenticated("Missing media server signature".to_string())
        })?;

    let (parts, body) = req.into_parts();
    let bytes = to_bytes(body, MAX_MEDIA_EVENT_BODY_BYTES)
        .await
        .map_err(|e| {
            tracing::debug!(target: "convo.middleware.media_signature", error = %e, "Failed to read media event body");
            ConvoError::Validation("Invalid request body".to_string())
        })?;

    if !auth.verify(&bytes, &signature) {
        tracing::warn!(target: "convo.middleware.media_signature", "Media event signature mismatch");
        return Err(ConvoError::Unauthenticated(
            "Invalid media server signature".to_string(),
        ));
    }

    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::http::{Request as HttpRequest, StatusCode};
    use axum::routing::post;
    use axum::Router;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const BODY: &str = r#"{"kind":"DISCONNECTED","sequence":1}"#;

    fn auth() -> Arc<MediaEventAuth> {
        Arc::new(MediaEventAuth::new(&SecretBox::new(Box::new(vec![0x6b; 32]))).unwrap())
    }

    async fn echo(body: Bytes) -> Bytes {
        body
    }

    fn app(auth: Arc<MediaEventAuth>) -> Router {
        Router::new()
            .route("/", post(echo))
            .layer(axum::middleware::from_fn_with_state(
                auth,
                require_media_signature,
            ))
    }

    fn request(body: &str, signature: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().method("POST").uri("/");
        if let Some(signature) = signature {
            builder = builder.header(MEDIA_SIGNATURE_HEADER, signature);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_signed_report_reaches_handler_intact() {
        let auth = auth();
        let signature = auth.sign(BODY.as_bytes());

        let response = app(auth)
            .oneshot(request(BODY, Some(&signature)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, BODY);
    }

    #[tokio::test]
    async fn test_unsigned_report_is_unauthorized() {
        let response = app(auth()).oneshot(request(BODY, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_tampered_report_is_unauthorized() {
        let auth = auth();
        let signature = auth.sign(BODY.as_bytes());
        let tampered = BODY.replace("DISCONNECTED", "CONNECTED");

        let response = app(auth)
            .oneshot(request(&tampered, Some(&signature)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_signature_from_another_secret_is_unauthorized() {
        let other = MediaEventAuth::new(&SecretBox::new(Box::new(vec![0x01; 32]))).unwrap();
        let signature = other.sign(BODY.as_bytes());

        let response = app(auth())
            .oneshot(request(BODY, Some(&signature)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_garbage_signature_does_not_verify() {
        assert!(!auth().verify(BODY.as_bytes(), "not base64!"));
        assert!(!auth().verify(BODY.as_bytes(), ""));
    }

    #[test]
    fn test_short_secret_is_rejected() {
        let result = MediaEventAuth::new(&SecretBox::new(Box::new(vec![0x6b; 16])));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_from_base64() {
        let encoded = SecretString::from(STANDARD.encode([0x6b; 32]));
        let from_config = MediaEventAuth::from_base64(&encoded).unwrap();
        assert!(auth().verify(BODY.as_bytes(), &from_config.sign(BODY.as_bytes())));

        let bad = SecretString::from("%%%".to_string());
        assert!(MediaEventAuth::from_base64(&bad).is_err());
    }
}
