//! Convo Controller Service Library
//!
//! Control plane for per-conversation video conferences. Each conversation
//! has at most one conference with a fixed participant capacity. The
//! controller:
//!
//! - Tracks who is CONNECTING or CONNECTED in each conference
//! - Admits participants subject to membership and capacity
//! - Reserves media-server capacity and issues signed connection tokens
//! - Applies leave requests and media-server reports, discarding stale ones
//!
//! # Architecture
//!
//! ```text
//! HTTP (routes, handlers, middleware)
//!   └── ControlPlaneService      validation, deadlines
//!        └── ConferenceRegistrar  join / leave / media events
//!             ├── ConvoStateStore  sharded in-memory conference records
//!             ├── TokenIssuer      HKDF + HMAC-SHA256 connection tokens
//!             └── collaborators    membership, media server, notifications
//! ```
//!
//! # Sequences
//!
//! Every participant entry carries a monotonically increasing sequence.
//! Tokens record the sequence they were issued at, so a leave or media
//! report that refers to an older sequence is ignored. Each conference
//! record also has a random epoch; tokens from an evicted record never
//! match its replacement.
//!
//! # Modules
//!
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types and HTTP error envelope
//! - [`store`] - Conference state store
//! - [`registrar`] - Join/leave/media-event state transitions
//! - [`service`] - RPC facade
//! - [`tokens`] - Connection token issue and verify

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod collaborators;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod registrar;
pub mod routes;
pub mod service;
pub mod store;
pub mod tasks;
pub mod tokens;
