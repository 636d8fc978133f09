//! Supervision for long-running background tasks.
//!
//! A background task that panics would otherwise stop silently while the
//! process keeps serving. The supervisor awaits the task and, on a panic,
//! clears liveness so `/health` reports 503.

use crate::observability::{metrics, HealthState};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Await `handle` and clear liveness if the task panicked.
pub async fn supervise(task: &'static str, handle: JoinHandle<()>, health: Arc<HealthState>) {
    match handle.await {
        Ok(()) => {
            info!(target: "convo.task.supervisor", task, "Background task exited");
        }
        Err(join_error) if join_error.is_panic() => {
            error!(
                target: "convo.task.supervisor",
                task,
                error = ?join_error,
                "Background task panicked, marking process not live"
            );
            metrics::record_task_panic(task);
            health.set_not_live();
        }
        Err(join_error) => {
            warn!(target: "convo.task.supervisor", task, error = ?join_error, "Background task cancelled");
        }
    }
}
