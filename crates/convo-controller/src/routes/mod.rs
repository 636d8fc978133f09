//! HTTP routes for the Convo Controller.
//!
//! Defines the Axum router and application state.

use crate::handlers;
use crate::middleware::{require_caller, require_media_signature, MediaEventAuth};
use crate::observability::{health_router, HealthState};
use crate::service::ControlPlaneService;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Slack added to the request timeout for the outer timeout layer, so the
/// service reports `DEADLINE_EXCEEDED` itself before the layer cuts in.
const TIMEOUT_LAYER_GRACE: Duration = Duration::from_secs(1);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ControlPlaneService>,
}

/// Build the application routes.
///
/// - `/health`, `/ready` - probes, public, unversioned
/// - `/metrics` - Prometheus scrape endpoint, when a handle is supplied
/// - `/api/v1/conference/*` - conference API, requires `x-caller-id`
/// - `/internal/v1/media-events` - media server reports, requires a valid
///   `x-media-signature`
/// - TraceLayer for request logging
/// - Request timeout of `request_timeout` plus a short grace
pub fn build_routes(
    state: Arc<AppState>,
    health_state: Arc<HealthState>,
    media_auth: Arc<MediaEventAuth>,
    metrics_handle: Option<PrometheusHandle>,
    request_timeout: Duration,
) -> Router {
    let conference_routes = Router::new()
        .route(
            "/api/v1/conference/batch-get-state",
            post(handlers::batch_get_state),
        )
        .route("/api/v1/conference/join", post(handlers::join))
        .route("/api/v1/conference/leave", post(handlers::leave))
        .route_layer(middleware::from_fn(require_caller))
        .with_state(Arc::clone(&state));

    let internal_routes = Router::new()
        .route(
            "/internal/v1/media-events",
            post(handlers::apply_media_event),
        )
        .route_layer(middleware::from_fn_with_state(
            media_auth,
            require_media_signature,
        ))
        .with_state(state);

    let mut app = health_router(health_state)
        .merge(conference_routes)
        .merge(internal_routes);

    if let Some(handle) = metrics_handle {
        let metrics_routes = Router::new()
            .route("/metrics", get(handlers::metrics_handler))
            .with_state(handle);
        app = app.merge(metrics_routes);
    }

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - innermost
    // 2. TraceLayer - logs every request, including timeouts
    app.layer(TimeoutLayer::new(
        request_timeout.saturating_add(TIMEOUT_LAYER_GRACE),
    ))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::collaborators::media_server::mock::MockMediaServer;
    use crate::collaborators::membership::mock::MockMembershipPolicy;
    use crate::collaborators::NoopNotificationPublisher;
    use crate::middleware::caller::CALLER_ID_HEADER;
    use crate::middleware::media_signature::MEDIA_SIGNATURE_HEADER;
    use crate::registrar::ConferenceRegistrar;
    use crate::store::ConvoStateStore;
    use crate::tokens::TokenIssuer;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use common::secret::SecretBox;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const MEDIA_EVENT: &str = r#"{"version":1,"conversation_id":"Yw","participant_id":"cA","kind":"CONNECTED","epoch":1,"sequence":1}"#;

    fn media_auth() -> Arc<MediaEventAuth> {
        Arc::new(MediaEventAuth::new(&SecretBox::new(Box::new(vec![0x6b; 32]))).unwrap())
    }

    fn app() -> Router {
        app_with_timeout(Duration::from_secs(30))
    }

    fn app_with_timeout(request_timeout: Duration) -> Router {
        let store = Arc::new(ConvoStateStore::new(8, 100));
        let tokens =
            Arc::new(TokenIssuer::new(SecretBox::new(Box::new(vec![0x44; 32]))).unwrap());
        let registrar = Arc::new(ConferenceRegistrar::new(
            Arc::clone(&store),
            tokens,
            Arc::new(MockMembershipPolicy::allow_all()),
            Arc::new(MockMediaServer::succeeding()),
            Arc::new(NoopNotificationPublisher),
            Duration::from_secs(3),
        ));
        let service = Arc::new(ControlPlaneService::new(store, registrar, request_timeout));
        let health = Arc::new(HealthState::new());
        health.set_ready();
        build_routes(
            Arc::new(AppState { service }),
            health,
            media_auth(),
            None,
            request_timeout,
        )
    }

    fn post(uri: &str, caller: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(caller) = caller {
            builder = builder.header(CALLER_ID_HEADER, caller);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[tokio::test]
    async fn test_conference_routes_require_caller() {
        let response = app()
            .oneshot(post(
                "/api/v1/conference/join",
                None,
                r#"{"version":1,"conversation_id":"Yw"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"]["code"], "UNAUTHENTICATED");
    }

    #[tokio::test]
    async fn test_join_returns_ok_outcome() {
        let response = app()
            .oneshot(post(
                "/api/v1/conference/join",
                Some("YWxpY2U"),
                r#"{"version":1,"conversation_id":"Yw"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["version"], 1);
        assert_eq!(body["result"], "OK");
        assert!(body["token"].as_str().is_some_and(|t| t.contains('.')));
    }

    #[tokio::test]
    async fn test_malformed_batch_is_bad_request() {
        let response = app()
            .oneshot(post(
                "/api/v1/conference/batch-get-state",
                Some("YWxpY2U"),
                "{not json",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_leave_with_garbage_body_is_acked() {
        let response = app()
            .oneshot(post("/api/v1/conference/leave", Some("YWxpY2U"), "garbage"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({ "version": 1 }));
    }

    #[tokio::test]
    async fn test_signed_media_event_for_absent_participant_is_acked() {
        let mut request = post("/internal/v1/media-events", None, MEDIA_EVENT);
        request.headers_mut().insert(
            MEDIA_SIGNATURE_HEADER,
            media_auth().sign(MEDIA_EVENT.as_bytes()).parse().unwrap(),
        );

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unsigned_media_event_is_unauthorized() {
        let response = app()
            .oneshot(post("/internal/v1/media-events", None, MEDIA_EVENT))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"]["code"], "UNAUTHENTICATED");
    }

    #[tokio::test]
    async fn test_huge_request_timeout_does_not_overflow() {
        let response = app_with_timeout(Duration::MAX)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_routes_are_merged() {
        let response = app()
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
