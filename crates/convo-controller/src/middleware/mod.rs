//! HTTP middleware for the Convo Controller.
//!
//! - `caller` - caller identity and deadline extraction for the conference API
//! - `media_signature` - media server report authentication

pub mod caller;
pub mod media_signature;

pub use caller::{require_caller, CallerContext};
pub use media_signature::{require_media_signature, MediaEventAuth};
