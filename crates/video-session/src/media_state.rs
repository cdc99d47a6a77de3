//! Media state aggregation.
//!
//! Folds engine events into immutable `MediaState` snapshots. Each snapshot is
//! an `Arc`; participant entries are `Arc`s too, and an entry unaffected by an
//! event is carried into the next snapshot by pointer. Consumers compare by
//! pointer to skip work.
//!
//! The fold itself ([`MediaState::apply`]) is pure. [`MediaStateAggregator`]
//! adds the current-snapshot cell, listener registry and the event pump task.

use crate::engine::{EngineEvent, ParticipantInfo, TrackHandle, TrackKind};
use crate::observability::metrics;

use common::types::ParticipantSessionId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

/// One participant's media, as seen by the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantMediaState {
    pub session_id: ParticipantSessionId,
    pub is_local: bool,
    pub display_name: String,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub screen_sharing: bool,
    pub audio_track: Option<TrackHandle>,
    pub video_track: Option<TrackHandle>,
    pub screen_track: Option<TrackHandle>,
}

impl ParticipantMediaState {
    fn from_info(info: &ParticipantInfo) -> Self {
        Self {
            session_id: info.session_id.clone(),
            is_local: info.local,
            display_name: info.user_name.clone(),
            audio_enabled: info.audio,
            video_enabled: info.video,
            screen_sharing: info.screen,
            audio_track: None,
            video_track: None,
            screen_track: None,
        }
    }

    /// Take flags and name from `info`, keep tracks.
    fn merge_info(&mut self, info: &ParticipantInfo) {
        self.is_local = info.local;
        self.display_name.clone_from(&info.user_name);
        self.audio_enabled = info.audio;
        self.video_enabled = info.video;
        self.screen_sharing = info.screen;
    }

    fn set_track(&mut self, kind: TrackKind, track: Option<TrackHandle>) {
        let enabled = track.is_some();
        match kind {
            TrackKind::Audio => {
                self.audio_enabled = enabled;
                self.audio_track = track;
            }
            TrackKind::Video => {
                self.video_enabled = enabled;
                self.video_track = track;
            }
            TrackKind::ScreenVideo => {
                self.screen_sharing = enabled;
                self.screen_track = track;
            }
        }
    }
}

/// Immutable snapshot of the room's media.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaState {
    /// Local audio enablement. Mirrors the local participant entry.
    pub is_audio_enabled: bool,
    /// Local video enablement. Mirrors the local participant entry.
    pub is_video_enabled: bool,
    /// Local screen share. Mirrors the local participant entry.
    pub is_screen_sharing: bool,
    pub participants: HashMap<ParticipantSessionId, Arc<ParticipantMediaState>>,
    pub local_session_id: Option<ParticipantSessionId>,
}

impl MediaState {
    #[must_use]
    pub fn local_participant(&self) -> Option<&Arc<ParticipantMediaState>> {
        self.local_session_id
            .as_ref()
            .and_then(|id| self.participants.get(id))
    }

    #[must_use]
    pub fn participant(&self, session_id: &ParticipantSessionId) -> Option<&Arc<ParticipantMediaState>> {
        self.participants.get(session_id)
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty() && self.local_session_id.is_none()
    }

    /// Fold one engine event. `None` means the event changed nothing.
    #[must_use]
    pub fn apply(&self, event: &EngineEvent) -> Option<MediaState> {
        match event {
            EngineEvent::JoinedMeeting { local } => self.upsert_local(local),
            EngineEvent::ParticipantJoined(info) | EngineEvent::ParticipantUpdated(info) => {
                if info.local {
                    self.upsert_local(info)
                } else {
                    self.upsert(info)
                }
            }
            EngineEvent::ParticipantLeft { session_id } => self.remove(session_id),
            EngineEvent::TrackStarted {
                session_id,
                kind,
                track,
            } => self.update(session_id, |p| p.set_track(*kind, Some(track.clone()))),
            EngineEvent::TrackStopped { session_id, kind } => {
                self.update(session_id, |p| p.set_track(*kind, None))
            }
            EngineEvent::AppMessage { .. } => None,
            EngineEvent::LeftMeeting => {
                if self.is_empty() {
                    None
                } else {
                    Some(MediaState::default())
                }
            }
        }
    }

    /// Insert the local participant from a join result, unless an event
    /// already did.
    #[must_use]
    pub fn with_local_join(&self, local: &ParticipantInfo) -> Option<MediaState> {
        if self.participants.contains_key(&local.session_id) {
            return None;
        }
        self.upsert_local(local)
    }

    fn upsert_local(&self, info: &ParticipantInfo) -> Option<MediaState> {
        let mut info = info.clone();
        info.local = true;

        let mut next = self.clone();
        // A new local participant replaces any previous one
        if let Some(previous) = &self.local_session_id {
            if *previous != info.session_id {
                next.participants.remove(previous);
            }
        }
        next.local_session_id = Some(info.session_id.clone());
        next.participants
            .insert(info.session_id.clone(), Arc::new(self.merged_entry(&info)));
        next.finish(self)
    }

    fn upsert(&self, info: &ParticipantInfo) -> Option<MediaState> {
        let mut next = self.clone();
        next.participants
            .insert(info.session_id.clone(), Arc::new(self.merged_entry(info)));
        next.finish(self)
    }

    fn merged_entry(&self, info: &ParticipantInfo) -> ParticipantMediaState {
        match self.participants.get(&info.session_id) {
            Some(existing) => {
                let mut entry = ParticipantMediaState::clone(existing);
                entry.merge_info(info);
                entry
            }
            None => ParticipantMediaState::from_info(info),
        }
    }

    fn remove(&self, session_id: &ParticipantSessionId) -> Option<MediaState> {
        if !self.participants.contains_key(session_id) {
            return None;
        }
        let mut next = self.clone();
        next.participants.remove(session_id);
        if next.local_session_id.as_ref() == Some(session_id) {
            next.local_session_id = None;
        }
        next.finish(self)
    }

    fn update(
        &self,
        session_id: &ParticipantSessionId,
        change: impl FnOnce(&mut ParticipantMediaState),
    ) -> Option<MediaState> {
        let Some(existing) = self.participants.get(session_id) else {
            trace!(target: "vs.aggregator", session_id = %session_id, "Event for unknown participant");
            return None;
        };
        let mut entry = ParticipantMediaState::clone(existing);
        change(&mut entry);
        if entry == **existing {
            return None;
        }

        let mut next = self.clone();
        next.participants.insert(session_id.clone(), Arc::new(entry));
        next.finish(self)
    }

    /// Recompute the local projection; `None` if nothing differs from `previous`.
    fn finish(mut self, previous: &MediaState) -> Option<MediaState> {
        let (audio, video, screen) = self
            .local_participant()
            .map_or((false, false, false), |local| {
                (local.audio_enabled, local.video_enabled, local.screen_sharing)
            });
        self.is_audio_enabled = audio;
        self.is_video_enabled = video;
        self.is_screen_sharing = screen;

        if self == *previous {
            None
        } else {
            Some(self)
        }
    }
}

struct Listener {
    id: u64,
    sender: mpsc::UnboundedSender<Arc<MediaState>>,
}

struct Shared {
    current: Arc<MediaState>,
    listeners: Vec<Listener>,
    next_listener_id: u64,
}

impl Shared {
    fn publish(&mut self, next: MediaState) {
        let snapshot = Arc::new(next);
        self.current = Arc::clone(&snapshot);
        self.listeners
            .retain(|listener| listener.sender.send(Arc::clone(&snapshot)).is_ok());
        metrics::record_snapshot_published();
        metrics::set_snapshot_listeners(self.listeners.len());
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A registered snapshot listener. Unregisters on drop.
///
/// Receives every snapshot published after registration, in order.
pub struct SnapshotSubscription {
    id: u64,
    initial: Arc<MediaState>,
    receiver: mpsc::UnboundedReceiver<Arc<MediaState>>,
    shared: Weak<Mutex<Shared>>,
}

impl SnapshotSubscription {
    /// The snapshot current at registration time.
    #[must_use]
    pub fn initial(&self) -> Arc<MediaState> {
        Arc::clone(&self.initial)
    }

    /// Wait for the next snapshot. `None` once the aggregator is gone.
    pub async fn recv(&mut self) -> Option<Arc<MediaState>> {
        self.receiver.recv().await
    }

    /// Next snapshot if one is already queued.
    pub fn try_recv(&mut self) -> Option<Arc<MediaState>> {
        self.receiver.try_recv().ok()
    }

    /// Unregister now.
    pub fn unsubscribe(self) {}
}

impl std::fmt::Debug for SnapshotSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotSubscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Drop for SnapshotSubscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            let mut shared = lock(&shared);
            shared.listeners.retain(|listener| listener.id != self.id);
            metrics::set_snapshot_listeners(shared.listeners.len());
        }
    }
}

struct EventPump {
    cancel_token: CancellationToken,
    flush_tx: mpsc::UnboundedSender<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

/// Owns the current snapshot and fans it out to listeners.
pub struct MediaStateAggregator {
    shared: Arc<Mutex<Shared>>,
    pump: Option<EventPump>,
}

impl Default for MediaStateAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaStateAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                current: Arc::new(MediaState::default()),
                listeners: Vec::new(),
                next_listener_id: 0,
            })),
            pump: None,
        }
    }

    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<MediaState> {
        Arc::clone(&lock(&self.shared).current)
    }

    /// Register a listener.
    #[must_use]
    pub fn subscribe(&self) -> SnapshotSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut shared = lock(&self.shared);
        let id = shared.next_listener_id;
        shared.next_listener_id += 1;
        shared.listeners.push(Listener { id, sender });
        metrics::set_snapshot_listeners(shared.listeners.len());

        SnapshotSubscription {
            id,
            initial: Arc::clone(&shared.current),
            receiver,
            shared: Arc::downgrade(&self.shared),
        }
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        lock(&self.shared).listeners.len()
    }

    /// Fold one event and publish if it changed anything.
    ///
    /// Returns whether a snapshot was published.
    pub fn apply_event(&self, event: &EngineEvent) -> bool {
        apply_to(&self.shared, event)
    }

    /// Record the local participant from a join result.
    pub fn record_local_join(&self, local: &ParticipantInfo) -> bool {
        let mut shared = lock(&self.shared);
        match shared.current.with_local_join(local) {
            Some(next) => {
                shared.publish(next);
                true
            }
            None => false,
        }
    }

    /// Publish an empty snapshot, unless already empty.
    pub fn reset(&self) {
        let mut shared = lock(&self.shared);
        if !shared.current.is_empty() {
            debug!(target: "vs.aggregator", "Resetting media state");
            shared.publish(MediaState::default());
        }
    }

    /// Start folding events from `events`. Replaces any previous source.
    pub fn attach(&mut self, events: broadcast::Receiver<EngineEvent>) {
        self.detach();
        let cancel_token = CancellationToken::new();
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_event_pump(
            Arc::clone(&self.shared),
            events,
            flush_rx,
            cancel_token.clone(),
        ));
        self.pump = Some(EventPump {
            cancel_token,
            flush_tx,
            task,
        });
    }

    /// Fold every engine event already queued, then return.
    ///
    /// Events emitted before this call are reflected in the snapshot once it
    /// returns. A no-op when detached.
    pub async fn flush(&self) {
        let Some(pump) = &self.pump else {
            return;
        };
        let (done_tx, done_rx) = oneshot::channel();
        if pump.flush_tx.send(done_tx).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Stop folding engine events.
    pub fn detach(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.cancel_token.cancel();
            pump.task.abort();
        }
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.pump.is_some()
    }

    /// Detach and publish an empty snapshot. Listeners stay registered.
    pub fn destroy(&mut self) {
        self.detach();
        self.reset();
    }
}

impl Drop for MediaStateAggregator {
    fn drop(&mut self) {
        self.detach();
    }
}

fn apply_to(shared: &Mutex<Shared>, event: &EngineEvent) -> bool {
    let mut shared = lock(shared);
    match shared.current.apply(event) {
        Some(next) => {
            shared.publish(next);
            true
        }
        None => false,
    }
}

#[instrument(skip_all, name = "vs.aggregator.pump")]
async fn run_event_pump(
    shared: Arc<Mutex<Shared>>,
    mut events: broadcast::Receiver<EngineEvent>,
    mut flush_rx: mpsc::UnboundedReceiver<oneshot::Sender<()>>,
    cancel_token: CancellationToken,
) {
    debug!(target: "vs.aggregator", "Event pump started");
    let mut source_open = true;
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            Some(done) = flush_rx.recv() => {
                drain_queued(&shared, &mut events);
                let _ = done.send(());
            }
            received = events.recv(), if source_open => match received {
                Ok(event) => {
                    apply_to(&shared, &event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => log_lag(skipped),
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(target: "vs.aggregator", "Engine event source closed");
                    source_open = false;
                }
            },
        }
    }
    debug!(target: "vs.aggregator", "Event pump stopped");
}

fn drain_queued(shared: &Mutex<Shared>, events: &mut broadcast::Receiver<EngineEvent>) {
    loop {
        match events.try_recv() {
            Ok(event) => {
                apply_to(shared, &event);
            }
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => log_lag(skipped),
            Err(_) => break,
        }
    }
}

fn log_lag(skipped: u64) {
    warn!(
        target: "vs.aggregator",
        skipped,
        "Event pump lagged, engine events dropped"
    );
    metrics::record_engine_events_lagged(skipped);
}
