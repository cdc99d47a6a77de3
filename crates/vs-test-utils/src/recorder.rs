//! Snapshot recording for assertions.

use std::sync::Arc;
use std::time::Duration;
use video_session::media_state::{MediaState, SnapshotSubscription};
use video_session::session::SessionOrchestratorHandle;

/// How long [`SnapshotRecorder::next`] waits before failing the test.
pub const RECORDER_TIMEOUT: Duration = Duration::from_secs(5);

/// Collects every snapshot delivered to one subscription.
#[derive(Debug)]
pub struct SnapshotRecorder {
    subscription: SnapshotSubscription,
    received: Vec<Arc<MediaState>>,
}

impl SnapshotRecorder {
    #[must_use]
    pub fn new(subscription: SnapshotSubscription) -> Self {
        Self {
            subscription,
            received: Vec::new(),
        }
    }

    /// Subscribe to `handle` and record from now on.
    pub async fn attach(handle: &SessionOrchestratorHandle) -> Self {
        Self::new(handle.subscribe().await.expect("subscribe to session"))
    }

    /// Snapshot current when recording started.
    #[must_use]
    pub fn initial(&self) -> Arc<MediaState> {
        self.subscription.initial()
    }

    /// Move everything already queued into the record; returns the new count.
    pub fn drain(&mut self) -> usize {
        let before = self.received.len();
        while let Some(snapshot) = self.subscription.try_recv() {
            self.received.push(snapshot);
        }
        self.received.len() - before
    }

    /// Wait for the next snapshot and record it.
    ///
    /// # Panics
    ///
    /// If nothing arrives within [`RECORDER_TIMEOUT`] or the aggregator is gone.
    pub async fn next(&mut self) -> Arc<MediaState> {
        let snapshot = tokio::time::timeout(RECORDER_TIMEOUT, self.subscription.recv())
            .await
            .expect("timed out waiting for snapshot")
            .expect("snapshot source closed");
        self.received.push(Arc::clone(&snapshot));
        snapshot
    }

    /// Everything recorded so far, oldest first.
    #[must_use]
    pub fn received(&self) -> &[Arc<MediaState>] {
        &self.received
    }

    /// Most recent recorded snapshot.
    #[must_use]
    pub fn last(&self) -> Option<&Arc<MediaState>> {
        self.received.last()
    }

    /// Forget what was recorded.
    pub fn clear(&mut self) {
        self.received.clear();
    }
}
