//! In-process media provider.
//!
//! Behaves like a conferencing SDK without any network: joins succeed after a
//! configurable delay, tracks are real `Arc<MediaTrack>` values owned here,
//! and remote participants are scripted through [`SimulatedProvider`] methods.
//! Failures are injected through [`SimulatedControl`], which is shared by the
//! factory and every provider it creates.

use super::{
    EngineEvent, JoinRequest, LocalMedia, MediaProvider, MediaTrack, ParticipantInfo,
    ProviderFactory, TrackHandle, TrackKind,
};
use crate::errors::{ProviderError, ProviderErrorCode, ProviderFailure};

use async_trait::async_trait;
use common::types::{ParticipantSessionId, RoomUrl};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

/// Event channel capacity per provider.
const EVENT_CHANNEL_CAPACITY: usize = 256;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn set_flag(info: &mut ParticipantInfo, kind: TrackKind, enabled: bool) {
    match kind {
        TrackKind::Audio => info.audio = enabled,
        TrackKind::Video => info.video = enabled,
        TrackKind::ScreenVideo => info.screen = enabled,
    }
}

#[derive(Default)]
struct Script {
    init_failures: VecDeque<ProviderFailure>,
    join_failures: VecDeque<ProviderFailure>,
    leave_failures: VecDeque<ProviderFailure>,
    action_failures: VecDeque<ProviderFailure>,
    join_delay: Duration,
    join_ack_delay: Duration,
    leave_delay: Duration,
    joined_rooms: Vec<RoomUrl>,
    sent_messages: Vec<String>,
}

#[derive(Default)]
struct ControlInner {
    script: Mutex<Script>,
    current: Mutex<Weak<SimulatedProvider>>,
    providers_created: AtomicUsize,
    join_calls: AtomicUsize,
    leave_calls: AtomicUsize,
    destroy_calls: AtomicUsize,
    active_connections: AtomicUsize,
}

/// Failure injection, latency knobs and call counters.
#[derive(Clone, Default)]
pub struct SimulatedControl {
    inner: Arc<ControlInner>,
}

impl SimulatedControl {
    /// Make the next `ProviderFactory::create` fail.
    pub fn fail_init(&self, failure: ProviderFailure) {
        lock(&self.inner.script).init_failures.push_back(failure);
    }

    /// Make the next join fail (after the join delay).
    pub fn fail_next_join(&self, failure: ProviderFailure) {
        lock(&self.inner.script).join_failures.push_back(failure);
    }

    /// Make the next leave fail (after the leave delay).
    pub fn fail_next_leave(&self, failure: ProviderFailure) {
        lock(&self.inner.script).leave_failures.push_back(failure);
    }

    /// Make the next media or moderation action fail.
    pub fn fail_next_action(&self, failure: ProviderFailure) {
        lock(&self.inner.script).action_failures.push_back(failure);
    }

    pub fn set_join_delay(&self, delay: Duration) {
        lock(&self.inner.script).join_delay = delay;
    }

    /// Delay between the connection opening and `join` returning, like an SDK
    /// whose join acknowledgement arrives late.
    pub fn set_join_ack_delay(&self, delay: Duration) {
        lock(&self.inner.script).join_ack_delay = delay;
    }

    pub fn set_leave_delay(&self, delay: Duration) {
        lock(&self.inner.script).leave_delay = delay;
    }

    /// The most recently created provider, while something still holds it.
    #[must_use]
    pub fn provider(&self) -> Option<Arc<SimulatedProvider>> {
        lock(&self.inner.current).upgrade()
    }

    #[must_use]
    pub fn providers_created(&self) -> usize {
        self.inner.providers_created.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn join_calls(&self) -> usize {
        self.inner.join_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn leave_calls(&self) -> usize {
        self.inner.leave_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn destroy_calls(&self) -> usize {
        self.inner.destroy_calls.load(Ordering::SeqCst)
    }

    /// Connections currently joined, across all providers.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.inner.active_connections.load(Ordering::SeqCst)
    }

    /// Every room successfully joined, in order.
    #[must_use]
    pub fn joined_rooms(&self) -> Vec<RoomUrl> {
        lock(&self.inner.script).joined_rooms.clone()
    }

    /// App messages sent by the local participant, in order.
    #[must_use]
    pub fn sent_messages(&self) -> Vec<String> {
        lock(&self.inner.script).sent_messages.clone()
    }

    fn take_init_failure(&self) -> Option<ProviderFailure> {
        lock(&self.inner.script).init_failures.pop_front()
    }

    fn take_join_failure(&self) -> Option<ProviderFailure> {
        lock(&self.inner.script).join_failures.pop_front()
    }

    fn take_leave_failure(&self) -> Option<ProviderFailure> {
        lock(&self.inner.script).leave_failures.pop_front()
    }

    fn take_action_failure(&self) -> Option<ProviderFailure> {
        lock(&self.inner.script).action_failures.pop_front()
    }

    fn join_delay(&self) -> Duration {
        lock(&self.inner.script).join_delay
    }

    fn join_ack_delay(&self) -> Duration {
        lock(&self.inner.script).join_ack_delay
    }

    fn leave_delay(&self) -> Duration {
        lock(&self.inner.script).leave_delay
    }

    fn connection_opened(&self, room: RoomUrl) {
        self.inner.active_connections.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.script).joined_rooms.push(room);
    }

    fn connection_closed(&self) {
        self.inner.active_connections.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Factory handing out [`SimulatedProvider`]s.
#[derive(Clone, Default)]
pub struct SimulatedProviderFactory {
    control: SimulatedControl,
}

impl SimulatedProviderFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn control(&self) -> &SimulatedControl {
        &self.control
    }
}

impl ProviderFactory for SimulatedProviderFactory {
    fn create(&self) -> Result<Arc<dyn MediaProvider>, ProviderFailure> {
        if let Some(failure) = self.control.take_init_failure() {
            return Err(failure);
        }

        let provider = Arc::new(SimulatedProvider::new(self.control.clone()));
        self.control
            .inner
            .providers_created
            .fetch_add(1, Ordering::SeqCst);
        *lock(&self.control.inner.current) = Arc::downgrade(&provider);
        Ok(provider as Arc<dyn MediaProvider>)
    }
}

#[derive(Default)]
struct Connection {
    room: Option<RoomUrl>,
    local: Option<ParticipantInfo>,
    remotes: HashMap<ParticipantSessionId, ParticipantInfo>,
    tracks: HashMap<(ParticipantSessionId, TrackKind), Arc<MediaTrack>>,
    destroyed: bool,
}

impl Connection {
    fn close(&mut self) -> bool {
        let was_open = self.room.take().is_some();
        self.local = None;
        self.remotes.clear();
        self.tracks.clear();
        was_open
    }

    fn start_track(
        &mut self,
        session_id: &ParticipantSessionId,
        kind: TrackKind,
    ) -> EngineEvent {
        let track = MediaTrack::new(kind);
        let handle = TrackHandle::from_track(&track);
        self.tracks.insert((session_id.clone(), kind), track);
        EngineEvent::TrackStarted {
            session_id: session_id.clone(),
            kind,
            track: handle,
        }
    }
}

/// A simulated SDK connection.
pub struct SimulatedProvider {
    control: SimulatedControl,
    events: broadcast::Sender<EngineEvent>,
    connection: Mutex<Connection>,
}

impl SimulatedProvider {
    fn new(control: SimulatedControl) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            control,
            events,
            connection: Mutex::new(Connection::default()),
        }
    }

    fn emit(&self, event: EngineEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn not_connected() -> ProviderFailure {
        ProviderFailure::Connection("not connected to a room".to_string())
    }

    fn participant_not_found(session_id: &ParticipantSessionId) -> ProviderFailure {
        ProviderFailure::Api(ProviderError::new(
            ProviderErrorCode::Other("participant-not-found".to_string()),
            format!("no participant {session_id}"),
        ))
    }

    fn open_connection(&self, request: &JoinRequest) -> Result<ParticipantInfo, ProviderFailure> {
        let mut conn = lock(&self.connection);
        if conn.destroyed {
            return Err(ProviderFailure::Internal("provider destroyed".to_string()));
        }
        if conn.room.is_some() {
            return Err(ProviderFailure::Connection("already connected".to_string()));
        }

        let local = ParticipantInfo {
            session_id: ParticipantSessionId::random(),
            user_name: request.user_name.clone(),
            local: true,
            audio: !request.features.start_audio_off,
            video: !request.features.start_video_off,
            screen: false,
        };
        conn.room = Some(request.room_url.clone());
        conn.local = Some(local.clone());
        self.control.connection_opened(request.room_url.clone());

        self.emit(EngineEvent::JoinedMeeting {
            local: local.clone(),
        });
        if local.audio {
            let event = conn.start_track(&local.session_id, TrackKind::Audio);
            self.emit(event);
        }
        if local.video {
            let event = conn.start_track(&local.session_id, TrackKind::Video);
            self.emit(event);
        }
        Ok(local)
    }

    /// Whether the provider is currently joined.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        lock(&self.connection).room.is_some()
    }

    /// Number of remote participants in the room.
    #[must_use]
    pub fn remote_count(&self) -> usize {
        lock(&self.connection).remotes.len()
    }

    /// The provider-owned track, if any.
    #[must_use]
    pub fn track(&self, session_id: &ParticipantSessionId, kind: TrackKind) -> Option<Arc<MediaTrack>> {
        lock(&self.connection)
            .tracks
            .get(&(session_id.clone(), kind))
            .cloned()
    }

    /// Add a remote participant publishing audio and video.
    ///
    /// Returns `None` when not connected.
    pub fn add_remote(&self, user_name: &str) -> Option<ParticipantSessionId> {
        let mut conn = lock(&self.connection);
        conn.room.as_ref()?;

        let info = ParticipantInfo {
            session_id: ParticipantSessionId::random(),
            user_name: user_name.to_string(),
            local: false,
            audio: true,
            video: true,
            screen: false,
        };
        let session_id = info.session_id.clone();
        conn.remotes.insert(session_id.clone(), info.clone());
        self.emit(EngineEvent::ParticipantJoined(info));

        let audio = conn.start_track(&session_id, TrackKind::Audio);
        self.emit(audio);
        let video = conn.start_track(&session_id, TrackKind::Video);
        self.emit(video);

        debug!(target: "vs.engine", session_id = %session_id, "Simulated remote joined");
        Some(session_id)
    }

    /// Remove a remote participant and release its tracks.
    pub fn remove_remote(&self, session_id: &ParticipantSessionId) -> bool {
        let mut conn = lock(&self.connection);
        if conn.remotes.remove(session_id).is_none() {
            return false;
        }
        conn.tracks.retain(|(owner, _), _| owner != session_id);
        self.emit(EngineEvent::ParticipantLeft {
            session_id: session_id.clone(),
        });
        true
    }

    /// Stop and release one remote track.
    pub fn stop_remote_track(&self, session_id: &ParticipantSessionId, kind: TrackKind) -> bool {
        let mut conn = lock(&self.connection);
        let Some(info) = conn.remotes.get_mut(session_id) else {
            return false;
        };
        set_flag(info, kind, false);
        if conn.tracks.remove(&(session_id.clone(), kind)).is_none() {
            return false;
        }
        self.emit(EngineEvent::TrackStopped {
            session_id: session_id.clone(),
            kind,
        });
        true
    }

    /// Start a new remote track, replacing any existing one of the same kind.
    pub fn start_remote_track(&self, session_id: &ParticipantSessionId, kind: TrackKind) -> bool {
        let mut conn = lock(&self.connection);
        let Some(info) = conn.remotes.get_mut(session_id) else {
            return false;
        };
        set_flag(info, kind, true);
        let event = conn.start_track(session_id, kind);
        self.emit(event);
        true
    }

    /// Change a remote participant's audio mute state.
    pub fn set_remote_audio(&self, session_id: &ParticipantSessionId, enabled: bool) -> bool {
        let mut conn = lock(&self.connection);
        let Some(info) = conn.remotes.get_mut(session_id) else {
            return false;
        };
        info.audio = enabled;
        let info = info.clone();
        self.emit(EngineEvent::ParticipantUpdated(info));
        true
    }

    /// Deliver an app message from a remote participant.
    pub fn send_remote_message(&self, session_id: &ParticipantSessionId, text: &str) -> bool {
        let conn = lock(&self.connection);
        if !conn.remotes.contains_key(session_id) {
            return false;
        }
        self.emit(EngineEvent::AppMessage {
            from: session_id.clone(),
            text: text.to_string(),
        });
        true
    }

    fn set_local_media(&self, kind: TrackKind, enabled: bool) -> Result<(), ProviderFailure> {
        if let Some(failure) = self.control.take_action_failure() {
            return Err(failure);
        }

        let mut conn = lock(&self.connection);
        let Some(mut local) = conn.local.clone() else {
            return Err(Self::not_connected());
        };
        let current = match kind {
            TrackKind::Audio => local.audio,
            TrackKind::Video => local.video,
            TrackKind::ScreenVideo => local.screen,
        };
        if current == enabled {
            return Ok(());
        }

        set_flag(&mut local, kind, enabled);
        let session_id = local.session_id.clone();
        conn.local = Some(local.clone());

        let key = (session_id.clone(), kind);
        let event = match kind {
            // Screen share tracks exist only while sharing
            TrackKind::ScreenVideo if enabled => conn.start_track(&session_id, kind),
            TrackKind::ScreenVideo => {
                conn.tracks.remove(&key);
                EngineEvent::TrackStopped { session_id, kind }
            }
            // Camera and microphone tracks are muted, not released
            _ if enabled && !conn.tracks.contains_key(&key) => conn.start_track(&session_id, kind),
            _ => EngineEvent::ParticipantUpdated(local),
        };
        self.emit(event);
        Ok(())
    }
}

#[async_trait]
impl MediaProvider for SimulatedProvider {
    async fn join(&self, request: &JoinRequest) -> Result<ParticipantInfo, ProviderFailure> {
        self.control.inner.join_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.control.join_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = self.control.take_join_failure() {
            return Err(failure);
        }

        let local = self.open_connection(request)?;

        let ack_delay = self.control.join_ack_delay();
        if !ack_delay.is_zero() {
            tokio::time::sleep(ack_delay).await;
        }
        Ok(local)
    }

    async fn leave(&self) -> Result<(), ProviderFailure> {
        self.control.inner.leave_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.control.leave_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = self.control.take_leave_failure() {
            return Err(failure);
        }

        let mut conn = lock(&self.connection);
        if conn.close() {
            self.control.connection_closed();
            self.emit(EngineEvent::LeftMeeting);
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<(), ProviderFailure> {
        self.control.inner.destroy_calls.fetch_add(1, Ordering::SeqCst);

        let mut conn = lock(&self.connection);
        if conn.close() {
            self.control.connection_closed();
            self.emit(EngineEvent::LeftMeeting);
        }
        conn.destroyed = true;
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn local_media(&self) -> LocalMedia {
        lock(&self.connection)
            .local
            .as_ref()
            .map(|local| LocalMedia {
                audio: local.audio,
                video: local.video,
                screen: local.screen,
            })
            .unwrap_or_default()
    }

    async fn set_local_audio(&self, enabled: bool) -> Result<(), ProviderFailure> {
        self.set_local_media(TrackKind::Audio, enabled)
    }

    async fn set_local_video(&self, enabled: bool) -> Result<(), ProviderFailure> {
        self.set_local_media(TrackKind::Video, enabled)
    }

    async fn start_screen_share(&self) -> Result<(), ProviderFailure> {
        self.set_local_media(TrackKind::ScreenVideo, true)
    }

    async fn stop_screen_share(&self) -> Result<(), ProviderFailure> {
        self.set_local_media(TrackKind::ScreenVideo, false)
    }

    async fn send_app_message(&self, text: &str) -> Result<(), ProviderFailure> {
        if let Some(failure) = self.control.take_action_failure() {
            return Err(failure);
        }
        if !self.is_connected() {
            return Err(Self::not_connected());
        }
        lock(&self.control.inner.script)
            .sent_messages
            .push(text.to_string());
        Ok(())
    }

    async fn set_participant_audio(
        &self,
        session_id: &ParticipantSessionId,
        enabled: bool,
    ) -> Result<(), ProviderFailure> {
        if let Some(failure) = self.control.take_action_failure() {
            return Err(failure);
        }
        if !self.is_connected() {
            return Err(Self::not_connected());
        }
        if self.set_remote_audio(session_id, enabled) {
            Ok(())
        } else {
            Err(Self::participant_not_found(session_id))
        }
    }

    async fn eject_participant(
        &self,
        session_id: &ParticipantSessionId,
    ) -> Result<(), ProviderFailure> {
        if let Some(failure) = self.control.take_action_failure() {
            return Err(failure);
        }
        if !self.is_connected() {
            return Err(Self::not_connected());
        }
        if self.remove_remote(session_id) {
            Ok(())
        } else {
            Err(Self::participant_not_found(session_id))
        }
    }
}
