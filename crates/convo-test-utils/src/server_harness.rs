//! Test server harness for E2E testing
//!
//! Provides `TestConvoServer` for spawning a real Convo Controller router
//! on a random port, wired to mock collaborators.

use crate::fixtures::{test_media_event_auth, test_token_issuer};
use common::types::{ConversationId, ParticipantId};
use convo_controller::collaborators::media_server::mock::MockMediaServer;
use convo_controller::collaborators::membership::mock::MockMembershipPolicy;
use convo_controller::collaborators::{
    MediaServerClient, MembershipPolicy, NoopNotificationPublisher, NotificationPublisher,
};
use convo_controller::middleware::caller::CALLER_ID_HEADER;
use convo_controller::middleware::media_signature::MEDIA_SIGNATURE_HEADER;
use convo_controller::middleware::MediaEventAuth;
use convo_controller::observability::HealthState;
use convo_controller::registrar::ConferenceRegistrar;
use convo_controller::routes::{self, AppState};
use convo_controller::service::ControlPlaneService;
use convo_controller::store::ConvoStateStore;
use convo_controller::tokens::TokenIssuer;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Test harness for spawning the Convo Controller in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_join_flow() -> Result<()> {
///     let server = TestConvoServer::spawn().await?;
///     let response = server.join(&participant("alice"), &conversation("c1")).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestConvoServer {
    addr: SocketAddr,
    store: Arc<ConvoStateStore>,
    issuer: Arc<TokenIssuer>,
    media_auth: Arc<MediaEventAuth>,
    health: Arc<HealthState>,
    client: reqwest::Client,
    _handle: JoinHandle<()>,
}

/// Builder for [`TestConvoServer`]; defaults to allow-all membership and a
/// succeeding media server.
pub struct TestConvoServerBuilder {
    capacity: usize,
    max_conferences: usize,
    membership: Arc<dyn MembershipPolicy>,
    media: Arc<dyn MediaServerClient>,
    publisher: Arc<dyn NotificationPublisher>,
    media_reserve_timeout: Duration,
    request_timeout: Duration,
}

impl Default for TestConvoServerBuilder {
    fn default() -> Self {
        Self {
            capacity: 8,
            max_conferences: 1000,
            membership: Arc::new(MockMembershipPolicy::allow_all()),
            media: Arc::new(MockMediaServer::succeeding()),
            publisher: Arc::new(NoopNotificationPublisher),
            media_reserve_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl TestConvoServerBuilder {
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn max_conferences(mut self, max_conferences: usize) -> Self {
        self.max_conferences = max_conferences;
        self
    }

    pub fn membership(mut self, membership: Arc<dyn MembershipPolicy>) -> Self {
        self.membership = membership;
        self
    }

    pub fn media(mut self, media: Arc<dyn MediaServerClient>) -> Self {
        self.media = media;
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn NotificationPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn media_reserve_timeout(mut self, timeout: Duration) -> Self {
        self.media_reserve_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Spawn the server.
    ///
    /// - Binds to a random available port (127.0.0.1:0)
    /// - Marks the server ready before returning
    pub async fn spawn(self) -> Result<TestConvoServer, anyhow::Error> {
        let store = Arc::new(ConvoStateStore::new(self.capacity, self.max_conferences));
        let issuer = Arc::new(test_token_issuer());
        let registrar = Arc::new(ConferenceRegistrar::new(
            Arc::clone(&store),
            Arc::clone(&issuer),
            self.membership,
            self.media,
            self.publisher,
            self.media_reserve_timeout,
        ));
        let service = Arc::new(ControlPlaneService::new(
            Arc::clone(&store),
            registrar,
            self.request_timeout,
        ));

        let media_auth = Arc::new(test_media_event_auth());
        let health = Arc::new(HealthState::new());
        let app = routes::build_routes(
            Arc::new(AppState { service }),
            Arc::clone(&health),
            Arc::clone(&media_auth),
            None,
            self.request_timeout,
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        health.set_ready();

        Ok(TestConvoServer {
            addr,
            store,
            issuer,
            media_auth,
            health,
            client: reqwest::Client::new(),
            _handle: handle,
        })
    }
}

impl TestConvoServer {
    pub fn builder() -> TestConvoServerBuilder {
        TestConvoServerBuilder::default()
    }

    /// Spawn with default collaborators.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::builder().spawn().await
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The store behind the server, for asserting on state directly.
    pub fn store(&self) -> &Arc<ConvoStateStore> {
        &self.store
    }

    /// The issuer the server signs tokens with.
    pub fn issuer(&self) -> &Arc<TokenIssuer> {
        &self.issuer
    }

    /// The verifier for media server reports, for signing test reports.
    pub fn media_auth(&self) -> &Arc<MediaEventAuth> {
        &self.media_auth
    }

    pub fn health(&self) -> &Arc<HealthState> {
        &self.health
    }

    /// POST a JSON body, optionally as `caller`.
    pub async fn post_json(
        &self,
        path: &str,
        caller: Option<&ParticipantId>,
        body: &Value,
    ) -> Result<reqwest::Response, anyhow::Error> {
        let mut request = self.client.post(format!("{}{}", self.url(), path)).json(body);
        if let Some(caller) = caller {
            request = request.header(CALLER_ID_HEADER, caller.to_base64url());
        }
        Ok(request.send().await?)
    }

    pub async fn join(
        &self,
        caller: &ParticipantId,
        conversation_id: &ConversationId,
    ) -> Result<reqwest::Response, anyhow::Error> {
        self.post_json(
            "/api/v1/conference/join",
            Some(caller),
            &json!({ "version": 1, "conversation_id": conversation_id }),
        )
        .await
    }

    pub async fn leave(
        &self,
        caller: &ParticipantId,
        conversation_id: &ConversationId,
        token: &str,
    ) -> Result<reqwest::Response, anyhow::Error> {
        self.post_json(
            "/api/v1/conference/leave",
            Some(caller),
            &json!({ "version": 1, "conversation_id": conversation_id, "token": token }),
        )
        .await
    }

    pub async fn batch_get(
        &self,
        caller: &ParticipantId,
        conversation_ids: &[ConversationId],
    ) -> Result<reqwest::Response, anyhow::Error> {
        self.post_json(
            "/api/v1/conference/batch-get-state",
            Some(caller),
            &json!({ "version": 1, "conversation_ids": conversation_ids }),
        )
        .await
    }

    /// Send a media server report signed with the test media secret.
    pub async fn media_event(
        &self,
        conversation_id: &ConversationId,
        participant_id: &ParticipantId,
        kind: &str,
        epoch: u64,
        sequence: u64,
    ) -> Result<reqwest::Response, anyhow::Error> {
        let body = serde_json::to_vec(&json!({
            "version": 1,
            "conversation_id": conversation_id,
            "participant_id": participant_id,
            "kind": kind,
            "epoch": epoch,
            "sequence": sequence,
        }))?;
        let signature = self.media_auth.sign(&body);
        self.post_media_event(body, Some(&signature)).await
    }

    /// POST a raw media event body with an optional signature header.
    pub async fn post_media_event(
        &self,
        body: Vec<u8>,
        signature: Option<&str>,
    ) -> Result<reqwest::Response, anyhow::Error> {
        let mut request = self
            .client
            .post(format!("{}/internal/v1/media-events", self.url()))
            .header("content-type", "application/json")
            .body(body);
        if let Some(signature) = signature {
            request = request.header(MEDIA_SIGNATURE_HEADER, signature);
        }
        Ok(request.send().await?)
    }
}

impl Drop for TestConvoServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
