//! # Convo Test Utilities
//!
//! Shared test utilities for the Convo Controller.
//!
//! - Fixtures (`conversation`, `participant`, a fixed token secret)
//! - Server harness (`TestConvoServer` for E2E tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use convo_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<()> {
//!     let server = TestConvoServer::spawn().await?;
//!     let response = reqwest::get(format!("{}/health", server.url())).await?;
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod server_harness;

pub use fixtures::*;
pub use server_harness::*;
