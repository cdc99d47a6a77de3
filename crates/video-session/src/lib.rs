//! Video Session Library
//!
//! Real-time video session orchestration on top of a third-party conferencing
//! provider:
//!
//! - Session lifecycle state machine with an idempotent re-join guard and
//!   room switching
//! - Media state aggregation into immutable, pointer-shared snapshots
//! - Error normalization into one stable error contract with recovery actions
//! - Declarative, deep-mergeable UI configuration
//! - Throttled snapshot views whose lifetime is decoupled from the session
//!
//! # Architecture
//!
//! ```text
//! SessionRegistry (process-wide, keyed by scope)
//! └── SessionOrchestratorHandle
//!     └── SessionOrchestrator (actor, one per scope)
//!         ├── EngineAdapter ──► MediaProvider (SDK boundary)
//!         ├── MediaStateAggregator ──► SnapshotSubscription
//!         │                            └── ThrottledView (per UI observer)
//!         └── ErrorNormalizer (bounded diagnostic log)
//! ```
//!
//! # Modules
//!
//! - [`config`] - Service configuration from environment
//! - [`engine`] - Provider boundary, adapter and the simulated provider
//! - [`errors`] - Raw error shapes from every origin
//! - [`media_state`] - Snapshot fold and listener fan-out
//! - [`normalizer`] - Error classification tables and the rolling log
//! - [`observability`] - Metrics
//! - [`session`] - The orchestrator actor
//! - [`subscription`] - Registry, throttle and derived views
//! - [`ui_config`] - Branding, layout, feature, behavior and control settings

pub mod config;
pub mod engine;
pub mod errors;
pub mod media_state;
pub mod normalizer;
pub mod observability;
pub mod session;
pub mod subscription;
pub mod ui_config;
