//! Observability for the video session core.
//!
//! # Privacy by Default
//!
//! Run loops use `#[instrument(skip_all)]` with an explicit allow-list of
//! fields. Join tokens never reach a span or log line. Metric labels are
//! bounded:
//! - `phase`: 5 values (idle, joining, joined, leaving, error)
//! - `origin`: 5 values (engine, provider, device, orchestrator, unrecognized)
//! - `action`: 5 values (retry, rejoin, refresh, contact-support, none)
//! - `severity`: 3 values (fatal, error, warning)
//! - `outcome`: 2 values (success, error)
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `vs_session_transitions_total` | Counter | `phase` | Session state machine transitions |
//! | `vs_join_duration_seconds` | Histogram | `outcome` | Time from join request to settled outcome |
//! | `vs_errors_normalized_total` | Counter | `origin`, `action`, `severity` | Errors passed through the normalizer |
//! | `vs_snapshots_published_total` | Counter | none | Media state snapshots published |
//! | `vs_snapshot_listeners` | Gauge | none | Registered snapshot listeners |
//! | `vs_engine_events_lagged_total` | Counter | none | Engine events dropped by a slow pump |
//! | `vs_throttle_delivered_total` | Counter | none | Snapshots delivered by throttled views |
//! | `vs_throttle_coalesced_total` | Counter | none | Snapshots superseded within a throttle window |

pub mod metrics;

pub use metrics::{
    record_engine_events_lagged, record_join_duration, record_normalized_error,
    record_session_transition, record_snapshot_published, record_throttle_coalesced,
    record_throttle_delivered, set_snapshot_listeners,
};
