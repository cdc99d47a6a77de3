//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Room access tokens
//! handed to the media provider at join time are the main user: they travel
//! inside `JoinRequest`, which is `Debug` and shows up in `tracing` spans.
//!
//! `SecretString` implements `Debug` with redaction, so deriving `Debug` on a
//! struct that contains one is safe to log. Secrets are zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct RoomCredentials {
//!     room_url: String,
//!     token: SecretString,  // Safe: Debug shows "[REDACTED]"
//! }
//!
//! let creds = RoomCredentials {
//!     room_url: "https://video.example.com/standup".to_string(),
//!     token: SecretString::from("eyJhbGciOi..."),
//! };
//!
//! assert!(!format!("{creds:?}").contains("eyJhbGciOi"));
//!
//! // Reaching the value is always explicit
//! let token: &str = creds.token.expose_secret();
//! assert!(token.starts_with("eyJ"));
//! ```
//!
//! # Serde Integration
//!
//! Secrets can be deserialized from JSON, which is how join parameters arrive
//! from the calling page:
//!
//! ```rust
//! use serde::Deserialize;
//! use common::secret::SecretString;
//!
//! #[derive(Debug, Deserialize)]
//! struct JoinParams {
//!     room_url: String,
//!     token: Option<SecretString>,
//! }
//!
//! let json = r#"{"room_url": "https://video.example.com/a", "token": "abc"}"#;
//! let params: JoinParams = serde_json::from_str(json).unwrap();
//! assert!(params.token.is_some());
//! ```

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};
