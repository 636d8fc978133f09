//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for the connection-token master
//! secret and for collaborator credentials. `SecretBox<T>` and `SecretString`
//! render as `[REDACTED]` in `Debug`, so any struct deriving `Debug` that
//! holds one is safe to log, and both zeroize their contents on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretBox};
//!
//! let master_secret = SecretBox::new(Box::new(vec![0u8; 32]));
//! assert_eq!(master_secret.expose_secret().len(), 32);
//! assert!(format!("{master_secret:?}").contains("REDACTED"));
//! ```
//!
//! Use `SecretString` for values read from configuration (base64 secrets,
//! bearer tokens) and `SecretBox<Vec<u8>>` once they are decoded into key
//! material.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
