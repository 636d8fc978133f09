//! Common utilities and types shared across the conference control plane crates.

#![warn(clippy::pedantic)]

/// Module for conversation and participant identifier value objects
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;
