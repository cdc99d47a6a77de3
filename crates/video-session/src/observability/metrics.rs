//! Metric recording functions.
//!
//! All metrics follow Prometheus naming conventions:
//! - `vs_` prefix for the video session core
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! No recorder is installed by the library. Embedders install one; without it
//! the `metrics` facade discards everything.

use crate::normalizer::{RecoveryAction, Severity};
use metrics::{counter, gauge, histogram};
use std::time::Duration;

// ============================================================================
// Session Metrics
// ============================================================================

/// Record a session state machine transition.
///
/// Metric: `vs_session_transitions_total`
/// Labels: `phase` (the phase entered)
pub fn record_session_transition(phase: &'static str) {
    counter!("vs_session_transitions_total", "phase" => phase).increment(1);
}

/// Record how long a join took to settle.
///
/// Metric: `vs_join_duration_seconds`
/// Labels: `outcome` (success, error)
pub fn record_join_duration(outcome: &'static str, duration: Duration) {
    histogram!("vs_join_duration_seconds", "outcome" => outcome).record(duration.as_secs_f64());
}

// ============================================================================
// Error Metrics
// ============================================================================

/// Record an error that passed through the normalizer.
///
/// Metric: `vs_errors_normalized_total`
/// Labels: `origin`, `action`, `severity`
///
/// Cardinality: 5 x 5 x 3 = 75 combinations max.
pub fn record_normalized_error(origin: &'static str, action: RecoveryAction, severity: Severity) {
    counter!(
        "vs_errors_normalized_total",
        "origin" => origin,
        "action" => action.as_str(),
        "severity" => severity.as_str()
    )
    .increment(1);
}

// ============================================================================
// Media State Metrics
// ============================================================================

/// Record a published media state snapshot.
///
/// Metric: `vs_snapshots_published_total`
pub fn record_snapshot_published() {
    counter!("vs_snapshots_published_total").increment(1);
}

/// Set the number of registered snapshot listeners.
///
/// Metric: `vs_snapshot_listeners`
pub fn set_snapshot_listeners(count: usize) {
    // usize to f64 conversion is safe for realistic listener counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("vs_snapshot_listeners").set(count as f64);
}

/// Record engine events skipped because the event pump fell behind.
///
/// Metric: `vs_engine_events_lagged_total`
pub fn record_engine_events_lagged(skipped: u64) {
    counter!("vs_engine_events_lagged_total").increment(skipped);
}

// ============================================================================
// Throttle Metrics
// ============================================================================

/// Record a snapshot delivered by a throttled view.
///
/// Metric: `vs_throttle_delivered_total`
pub fn record_throttle_delivered() {
    counter!("vs_throttle_delivered_total").increment(1);
}

/// Record a snapshot superseded before its throttle window closed.
///
/// Metric: `vs_throttle_coalesced_total`
pub fn record_throttle_coalesced() {
    counter!("vs_throttle_coalesced_total").increment(1);
}
