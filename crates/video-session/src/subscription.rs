//! Presentation boundary: session registry, throttled snapshot views and
//! memoized derived views.
//!
//! Views come and go with the UI; sessions do not. A [`ThrottledView`] holds a
//! snapshot registration and nothing else, so dropping one never touches the
//! session behind it. Sessions live in a [`SessionRegistry`] until removed.

use crate::media_state::{MediaState, ParticipantMediaState, SnapshotSubscription};
use crate::normalizer::NormalizedError;
use crate::observability::metrics;
use crate::session::SessionOrchestratorHandle;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

static GLOBAL_REGISTRY: OnceLock<SessionRegistry> = OnceLock::new();

/// Scope-keyed session handles.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionOrchestratorHandle>>,
}

impl SessionRegistry {
    /// Process-wide registry.
    pub fn global() -> &'static SessionRegistry {
        GLOBAL_REGISTRY.get_or_init(SessionRegistry::new)
    }

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, SessionOrchestratorHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the live session for `scope`, creating it with `init` if there is
    /// none. Concurrent callers for the same scope get the same handle; `init`
    /// runs at most once per created session.
    ///
    /// A session whose actor has exited is replaced.
    pub fn get_or_create(
        &self,
        scope: &str,
        init: impl FnOnce() -> SessionOrchestratorHandle,
    ) -> SessionOrchestratorHandle {
        let mut sessions = self.sessions();
        if let Some(handle) = sessions.get(scope) {
            if !handle.is_closed() {
                return handle.clone();
            }
            debug!(target: "vs.subscription", scope, "Replacing closed session");
        }

        let handle = init();
        info!(target: "vs.subscription", scope, "Session registered");
        sessions.insert(scope.to_string(), handle.clone());
        handle
    }

    /// The live session for `scope`, if any.
    #[must_use]
    pub fn get(&self, scope: &str) -> Option<SessionOrchestratorHandle> {
        self.sessions()
            .get(scope)
            .filter(|handle| !handle.is_closed())
            .cloned()
    }

    /// Forget `scope`. The session keeps running until its last handle is
    /// dropped or it is cancelled.
    pub fn remove(&self, scope: &str) -> Option<SessionOrchestratorHandle> {
        let removed = self.sessions().remove(scope);
        if removed.is_some() {
            info!(target: "vs.subscription", scope, "Session unregistered");
        }
        removed
    }

    /// Registered scopes, sorted.
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        let mut scopes: Vec<String> = self.sessions().keys().cloned().collect();
        scopes.sort();
        scopes
    }
}

/// Trailing-edge throttle with latest-wins coalescing.
///
/// A value offered while the interval since the last emission has elapsed is
/// emitted at once. Otherwise it is held, replacing any value already held,
/// and becomes due one interval after the last emission.
#[derive(Debug)]
pub struct TrailingThrottle<T> {
    interval: Duration,
    last_emit: Option<Instant>,
    pending: Option<T>,
}

impl<T> TrailingThrottle<T> {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            pending: None,
        }
    }

    fn ready_at(&self) -> Option<Instant> {
        self.last_emit.map(|last| last + self.interval)
    }

    /// Offer a value. Returns it back if it should be emitted now.
    pub fn offer(&mut self, value: T, now: Instant) -> Option<T> {
        let ready = self.ready_at().map_or(true, |at| now >= at);
        if ready && self.pending.is_none() {
            self.last_emit = Some(now);
            metrics::record_throttle_delivered();
            return Some(value);
        }
        if self.pending.replace(value).is_some() {
            metrics::record_throttle_coalesced();
        }
        None
    }

    /// When the held value becomes due. `None` when nothing is held.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref()?;
        Some(self.ready_at().unwrap_or_else(Instant::now))
    }

    /// Take the held value if it is due at `now`.
    pub fn take_due(&mut self, now: Instant) -> Option<T> {
        let deadline = self.deadline()?;
        if now < deadline {
            return None;
        }
        self.last_emit = Some(now);
        metrics::record_throttle_delivered();
        self.pending.take()
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// Rate-limited view of one session's snapshots.
///
/// Delivers at most one snapshot per interval through a `watch` channel; the
/// last snapshot before each tick is the one delivered.
#[derive(Debug)]
pub struct ThrottledView {
    receiver: watch::Receiver<Arc<MediaState>>,
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

impl ThrottledView {
    /// Register with `handle` and start throttling.
    ///
    /// # Errors
    ///
    /// `session-unavailable` if the session actor is gone.
    pub async fn attach(
        handle: &SessionOrchestratorHandle,
        interval: Duration,
    ) -> Result<Self, NormalizedError> {
        let subscription = handle.subscribe().await?;
        Ok(Self::from_subscription(subscription, interval))
    }

    /// Throttle an existing registration.
    #[must_use]
    pub fn from_subscription(subscription: SnapshotSubscription, interval: Duration) -> Self {
        let (sender, receiver) = watch::channel(subscription.initial());
        let cancel_token = CancellationToken::new();
        let task = tokio::spawn(run_throttle(
            subscription,
            TrailingThrottle::new(interval),
            sender,
            cancel_token.clone(),
        ));
        Self {
            receiver,
            cancel_token,
            task,
        }
    }

    /// A receiver of delivered snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<MediaState>> {
        self.receiver.clone()
    }

    /// The last delivered snapshot.
    #[must_use]
    pub fn latest(&self) -> Arc<MediaState> {
        Arc::clone(&self.receiver.borrow())
    }

    /// Whether the throttle task is still running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for ThrottledView {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

#[instrument(skip_all, name = "vs.subscription.throttle")]
async fn run_throttle(
    mut subscription: SnapshotSubscription,
    mut throttle: TrailingThrottle<Arc<MediaState>>,
    sender: watch::Sender<Arc<MediaState>>,
    cancel_token: CancellationToken,
) {
    let mut source_open = true;

    loop {
        let deadline = throttle.deadline();
        if !source_open && deadline.is_none() {
            break;
        }

        tokio::select! {
            () = cancel_token.cancelled() => break,

            () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some(snapshot) = throttle.take_due(Instant::now()) {
                    sender.send_replace(snapshot);
                }
            }

            next = subscription.recv(), if source_open => {
                match next {
                    Some(snapshot) => {
                        if let Some(snapshot) = throttle.offer(snapshot, Instant::now()) {
                            sender.send_replace(snapshot);
                        }
                    }
                    None => source_open = false,
                }
            }
        }
    }

    debug!(target: "vs.subscription", "Throttle stopped");
}

/// Views derived from one snapshot.
#[derive(Debug, Clone, Default)]
pub struct DerivedViews {
    /// Local participant first, then by display name and session id.
    pub participants: Vec<Arc<ParticipantMediaState>>,
    pub local: Option<Arc<ParticipantMediaState>>,
    pub remotes: Vec<Arc<ParticipantMediaState>>,
}

impl DerivedViews {
    fn derive(state: &MediaState) -> Self {
        let mut participants: Vec<Arc<ParticipantMediaState>> =
            state.participants.values().cloned().collect();
        participants.sort_by(|a, b| {
            b.is_local
                .cmp(&a.is_local)
                .then_with(|| a.display_name.cmp(&b.display_name))
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        let local = state.local_participant().cloned();
        let remotes = participants
            .iter()
            .filter(|participant| !participant.is_local)
            .cloned()
            .collect();
        Self {
            participants,
            local,
            remotes,
        }
    }
}

/// Caches [`DerivedViews`] per snapshot pointer.
#[derive(Debug, Default)]
pub struct MemoizedViews {
    source: Option<Arc<MediaState>>,
    views: Arc<DerivedViews>,
    recomputations: u64,
}

impl MemoizedViews {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Views for `snapshot`; recomputed only when the pointer changes.
    pub fn views(&mut self, snapshot: &Arc<MediaState>) -> Arc<DerivedViews> {
        let fresh = self
            .source
            .as_ref()
            .map_or(true, |source| !Arc::ptr_eq(source, snapshot));
        if fresh {
            self.views = Arc::new(DerivedViews::derive(snapshot));
            self.source = Some(Arc::clone(snapshot));
            self.recomputations += 1;
        }
        Arc::clone(&self.views)
    }

    #[must_use]
    pub fn recomputations(&self) -> u64 {
        self.recomputations
    }
}
