//! Background tasks for the Convo Controller.
//!
//! - `conference_janitor` - evicts empty, idle conference records
//! - `supervisor` - clears liveness when a background task panics

pub mod conference_janitor;
pub mod supervisor;

pub use conference_janitor::{run_conference_janitor, ConferenceJanitorConfig};
pub use supervisor::supervise;
