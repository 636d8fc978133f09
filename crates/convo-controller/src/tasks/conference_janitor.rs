//! Conference janitor background task.
//!
//! Periodically drops conference records that have no participants and
//! have seen no activity for the configured idle TTL. A later join for the
//! same conversation creates a fresh record with a new epoch.
//!
//! # Graceful Shutdown
//!
//! The task exits when the cancellation token is cancelled. An in-progress
//! sweep finishes first.

use crate::observability::metrics;
use crate::store::ConvoStateStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default sweep interval in seconds.
const DEFAULT_INTERVAL_SECONDS: u64 = 60;

/// Default idle TTL in seconds before an empty conference is evicted.
const DEFAULT_IDLE_TTL_SECONDS: u64 = 300;

#[derive(Debug, Clone)]
pub struct ConferenceJanitorConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Minimum idle time before an empty conference is evicted.
    pub idle_ttl: Duration,
}

impl Default for ConferenceJanitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECONDS),
            idle_ttl: Duration::from_secs(DEFAULT_IDLE_TTL_SECONDS),
        }
    }
}

/// Run the janitor until `cancel_token` is cancelled.
///
/// A zero interval is replaced with the default.
#[instrument(skip_all, name = "convo.task.janitor")]
pub async fn run_conference_janitor(
    store: Arc<ConvoStateStore>,
    config: ConferenceJanitorConfig,
    cancel_token: CancellationToken,
) {
    let period = if config.interval.is_zero() {
        warn!(
            target: "convo.task.janitor",
            default_seconds = DEFAULT_INTERVAL_SECONDS,
            "Zero janitor interval, using default"
        );
        Duration::from_secs(DEFAULT_INTERVAL_SECONDS)
    } else {
        config.interval
    };

    info!(
        target: "convo.task.janitor",
        interval_seconds = period.as_secs(),
        idle_ttl_seconds = config.idle_ttl.as_secs(),
        "Starting conference janitor"
    );

    let mut interval = tokio::time::interval(period);
    // The first tick completes immediately; nothing is idle yet.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                sweep(&store, config.idle_ttl).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "convo.task.janitor",
                    "Conference janitor received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "convo.task.janitor", "Conference janitor stopped");
}

pub(crate) async fn sweep(store: &ConvoStateStore, idle_ttl: Duration) -> usize {
    let evicted = store.evict_idle(idle_ttl).await;
    if evicted > 0 {
        metrics::record_conferences_evicted(evicted);
        info!(
            target: "convo.task.janitor",
            evicted,
            remaining = store.conference_count(),
            "Evicted idle conferences"
        );
    } else {
        debug!(target: "convo.task.janitor", "No idle conferences");
    }
    evicted
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::ParticipantState;
    use common::types::{ConversationId, ParticipantId};

    fn convo(bytes: &[u8]) -> ConversationId {
        ConversationId::from_bytes(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = ConferenceJanitorConfig::default();
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.idle_ttl, Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_only_idle_empty_conferences() {
        let store = ConvoStateStore::new(8, 100);
        let participant = ParticipantId::from_bytes(b"p".to_vec()).unwrap();

        // Empty record
        store.upsert(&convo(b"empty"), |_| ()).await.unwrap();
        // Occupied record
        store
            .upsert(&convo(b"busy"), |state| {
                state.insert_connecting(participant.clone(), 1);
            })
            .await
            .unwrap();
        assert_eq!(store.conference_count(), 2);

        // Not idle long enough yet
        assert_eq!(sweep(&store, Duration::from_secs(300)).await, 0);

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(sweep(&store, Duration::from_secs(300)).await, 1);
        assert_eq!(store.conference_count(), 1);

        let busy = store.get(&convo(b"busy")).await;
        assert_eq!(busy.participants.len(), 1);
        assert_eq!(
            busy.participants.first().map(|p| p.state),
            Some(ParticipantState::Connecting)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_janitor_runs_on_interval_and_stops_on_cancel() {
        let store = Arc::new(ConvoStateStore::new(8, 100));
        store.upsert(&convo(b"idle"), |_| ()).await.unwrap();

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(run_conference_janitor(
            Arc::clone(&store),
            ConferenceJanitorConfig {
                interval: Duration::from_secs(10),
                idle_ttl: Duration::from_secs(5),
            },
            cancel_token.clone(),
        ));

        // Past the first real sweep
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(store.conference_count(), 0);

        cancel_token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("janitor should exit after cancel")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_falls_back_to_default() {
        let store = Arc::new(ConvoStateStore::new(8, 100));
        store.upsert(&convo(b"idle"), |_| ()).await.unwrap();

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(run_conference_janitor(
            Arc::clone(&store),
            ConferenceJanitorConfig {
                interval: Duration::ZERO,
                idle_ttl: Duration::from_secs(5),
            },
            cancel_token.clone(),
        ));

        // Still sweeping on the default period
        tokio::time::sleep(Duration::from_secs(DEFAULT_INTERVAL_SECONDS + 1)).await;
        assert_eq!(store.conference_count(), 0);

        cancel_token.cancel();
        // A panic inside the task would surface here as a JoinError
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("janitor should exit after cancel")
            .unwrap();
    }
}
