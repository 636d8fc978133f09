//! Convo Controller
//!
//! Control plane for conversation video conferences.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing (JSON when `CONVO_LOG_JSON` is set)
//! 3. Initialize Prometheus metrics recorder
//! 4. Build the token issuer, media event verifier, and HTTP collaborators
//! 5. Build store, registrar, and service
//! 6. Spawn the conference janitor under a supervisor that clears liveness
//!    if it panics
//! 7. Serve HTTP until a shutdown signal arrives

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use convo_controller::collaborators::{
    HttpMediaServerClient, HttpMembershipPolicy, HttpNotificationPublisher,
    NoopNotificationPublisher, NotificationPublisher,
};
use convo_controller::config::Config;
use convo_controller::middleware::MediaEventAuth;
use convo_controller::observability::{init_metrics_recorder, HealthState};
use convo_controller::registrar::ConferenceRegistrar;
use convo_controller::routes::{self, AppState};
use convo_controller::service::ControlPlaneService;
use convo_controller::store::ConvoStateStore;
use convo_controller::tasks::{run_conference_janitor, supervise, ConferenceJanitorConfig};
use convo_controller::tokens::TokenIssuer;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        e
    })?;

    init_tracing(config.log_json);

    info!("Starting Convo Controller");
    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        conference_capacity = config.conference_capacity,
        max_conferences = config.max_conferences,
        notifications_enabled = config.notification_url.is_some(),
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        anyhow::anyhow!(e)
    })?;

    let tokens = Arc::new(TokenIssuer::from_base64(&config.token_secret).map_err(|e| {
        error!("Invalid token secret: {}", e);
        e
    })?);

    let media_auth = Arc::new(
        MediaEventAuth::from_base64(&config.media_event_secret).map_err(|e| {
            error!("Invalid media event secret: {}", e);
            e
        })?,
    );

    let membership = Arc::new(HttpMembershipPolicy::new(config.membership_url.clone())?);
    let media = Arc::new(HttpMediaServerClient::new(config.media_server_url.clone())?);
    let publisher: Arc<dyn NotificationPublisher> = match &config.notification_url {
        Some(url) => Arc::new(HttpNotificationPublisher::new(url.clone())?),
        None => Arc::new(NoopNotificationPublisher),
    };

    let store = Arc::new(ConvoStateStore::new(
        config.conference_capacity,
        config.max_conferences,
    ));
    let registrar = Arc::new(ConferenceRegistrar::new(
        Arc::clone(&store),
        tokens,
        membership,
        media,
        publisher,
        config.media_reserve_timeout(),
    ));
    let service = Arc::new(ControlPlaneService::new(
        Arc::clone(&store),
        registrar,
        config.request_timeout(),
    ));

    // Cancelled on shutdown to stop background tasks
    let shutdown_token = CancellationToken::new();
    let health_state = Arc::new(HealthState::new());

    let janitor = tokio::spawn(run_conference_janitor(
        Arc::clone(&store),
        ConferenceJanitorConfig {
            interval: Duration::from_secs(config.janitor_interval_seconds),
            idle_ttl: Duration::from_secs(config.idle_conference_ttl_seconds),
        },
        shutdown_token.child_token(),
    ));
    let janitor_handle = tokio::spawn(supervise(
        "conference_janitor",
        janitor,
        Arc::clone(&health_state),
    ));

    let app = routes::build_routes(
        Arc::new(AppState { service }),
        Arc::clone(&health_state),
        media_auth,
        Some(metrics_handle),
        config.request_timeout(),
    );

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    health_state.set_ready();
    info!("Convo Controller listening on {}", addr);

    let shutdown_health = Arc::clone(&health_state);
    let shutdown_cancel = shutdown_token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_health.set_not_ready();
            shutdown_cancel.cancel();
        })
        .await?;

    shutdown_token.cancel();
    if let Err(e) = janitor_handle.await {
        error!("Conference janitor supervisor failed: {}", e);
    }

    info!("Convo Controller shutdown complete");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "convo_controller=debug,tower_http=debug".into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown"),
            Err(e) => {
                error!("Failed to listen for SIGINT: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
