//! HTTP request handlers for the Convo Controller.

pub mod conference;
pub mod media_events;
pub mod metrics;

pub use conference::{batch_get_state, join, leave};
pub use media_events::apply_media_event;
pub use metrics::metrics_handler;
