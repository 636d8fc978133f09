//! Observability for the Convo Controller.
//!
//! Operations are instrumented with `#[instrument(skip_all)]` and only
//! record bounded fields. Conversation and participant identifiers appear
//! in logs as hex, never in metric labels.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `convo_join_total` | Counter | `result` |
//! | `convo_leave_total` | Counter | `outcome` |
//! | `convo_media_event_total` | Counter | `kind`, `outcome` |
//! | `convo_batch_get_total` | Counter | none |
//! | `convo_media_reserve_duration_seconds` | Histogram | `status` |
//! | `convo_conferences_active` | Gauge | none |
//! | `convo_conferences_evicted_total` | Counter | none |
//! | `convo_notifications_failed_total` | Counter | none |
//! | `convo_task_panics_total` | Counter | `task` |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
