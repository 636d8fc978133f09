//! External collaborators consumed by the registrar.
//!
//! Each collaborator is a trait with an HTTP implementation and a `mock`
//! module for tests.

pub mod media_server;
pub mod membership;
pub mod notifications;

pub use media_server::{ConnectionInfo, HttpMediaServerClient, MediaServerClient};
pub use membership::{HttpMembershipPolicy, MembershipPolicy};
pub use notifications::{HttpNotificationPublisher, NoopNotificationPublisher, NotificationPublisher};
