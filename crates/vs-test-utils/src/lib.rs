//! # Video Session Test Utilities
//!
//! Shared test utilities for the video session crates.
//!
//! ## Modules
//!
//! - `fixtures` - Rooms, join requests and participant records
//! - `harness` - A session orchestrator wired to the simulated provider
//! - `recorder` - Collects snapshots from a subscription for assertions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vs_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let harness = SessionHarness::new();
//!     let room = TestRoom::new("standup");
//!
//!     harness.handle().join(room.join_request().build()).await.unwrap();
//!     let alice = harness.provider().add_remote("Alice").unwrap();
//!
//!     // Run your test...
//! }
//! ```

pub mod fixtures;
pub mod harness;
pub mod recorder;

// Re-export commonly used items
pub use fixtures::*;
pub use harness::*;
pub use recorder::*;
