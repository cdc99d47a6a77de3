//! Engine layer: the boundary to the third-party media provider.
//!
//! ```text
//! SessionOrchestrator
//! └── EngineAdapter (owns one provider connection)
//!     └── dyn MediaProvider (third-party SDK, created by a ProviderFactory)
//!         └── broadcast<EngineEvent> ──> MediaStateAggregator
//! ```
//!
//! The provider owns all media tracks (`Arc<MediaTrack>`). Events only carry
//! `TrackHandle`s, which are weak, so nothing above this layer can keep a track
//! alive after the provider releases it.
//!
//! # Modules
//!
//! - [`adapter`] - `EngineAdapter`, error translation, join timeout
//! - [`simulated`] - in-process provider for development and tests

pub mod adapter;
pub mod simulated;

pub use adapter::{EngineAdapter, EngineConnection};
pub use simulated::{SimulatedControl, SimulatedProvider, SimulatedProviderFactory};

use crate::errors::ProviderFailure;
use crate::ui_config::BehaviorConfig;

use async_trait::async_trait;
use common::secret::SecretString;
use common::types::{ParticipantSessionId, RoomUrl};
use serde::Deserialize;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Kind of media carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
    ScreenVideo,
}

impl TrackKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
            TrackKind::ScreenVideo => "screen-video",
        }
    }
}

/// A live media track. Owned by the provider.
#[derive(Debug)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
}

impl MediaTrack {
    /// Create a track with a fresh ID.
    #[must_use]
    pub fn new(kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            kind,
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn kind(&self) -> TrackKind {
        self.kind
    }
}

/// Non-owning reference to a provider track.
#[derive(Debug, Clone)]
pub struct TrackHandle(Weak<MediaTrack>);

impl TrackHandle {
    #[must_use]
    pub fn from_track(track: &Arc<MediaTrack>) -> Self {
        Self(Arc::downgrade(track))
    }

    /// Get the track if the provider still holds it.
    #[must_use]
    pub fn upgrade(&self) -> Option<Arc<MediaTrack>> {
        self.0.upgrade()
    }

    /// Whether the provider still holds the track.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl PartialEq for TrackHandle {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for TrackHandle {}

/// Participant as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantInfo {
    pub session_id: ParticipantSessionId,
    pub user_name: String,
    pub local: bool,
    pub audio: bool,
    pub video: bool,
    pub screen: bool,
}

/// Local media enablement, as the provider currently sees it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalMedia {
    pub audio: bool,
    pub video: bool,
    pub screen: bool,
}

/// Provider-agnostic engine events.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The local participant finished joining.
    JoinedMeeting { local: ParticipantInfo },
    /// A participant (usually remote) joined.
    ParticipantJoined(ParticipantInfo),
    /// Participant flags or name changed (mute toggles).
    ParticipantUpdated(ParticipantInfo),
    /// A participant left.
    ParticipantLeft { session_id: ParticipantSessionId },
    /// A track became playable.
    TrackStarted {
        session_id: ParticipantSessionId,
        kind: TrackKind,
        track: TrackHandle,
    },
    /// A track stopped.
    TrackStopped {
        session_id: ParticipantSessionId,
        kind: TrackKind,
    },
    /// An app-level (chat) message arrived.
    AppMessage {
        from: ParticipantSessionId,
        text: String,
    },
    /// The local participant left the room.
    LeftMeeting,
}

/// Feature toggles applied at join time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JoinFeatures {
    pub start_audio_off: bool,
    pub start_video_off: bool,
    pub screen_share: bool,
    pub chat: bool,
}

/// Caller-supplied join parameters.
///
/// Immutable for the duration of one join; a new request implies a new session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub room_url: RoomUrl,
    #[serde(default)]
    pub token: Option<SecretString>,
    pub user_name: String,
    #[serde(default)]
    pub features: JoinFeatures,
}

impl JoinRequest {
    #[must_use]
    pub fn new(room_url: RoomUrl, user_name: impl Into<String>) -> Self {
        Self {
            room_url,
            token: None,
            user_name: user_name.into(),
            features: JoinFeatures {
                screen_share: true,
                chat: true,
                ..JoinFeatures::default()
            },
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }

    #[must_use]
    pub fn with_features(mut self, features: JoinFeatures) -> Self {
        self.features = features;
        self
    }

    /// Apply the default join behavior from the UI configuration.
    #[must_use]
    pub fn with_behavior(mut self, behavior: &BehaviorConfig) -> Self {
        self.features.start_audio_off = behavior.start_audio_off;
        self.features.start_video_off = behavior.start_video_off;
        self
    }
}

/// The third-party SDK connection.
///
/// Implementations own their media tracks and publish `EngineEvent`s on a
/// broadcast channel. All methods take `&self`; the SDK manages its own
/// interior state.
#[async_trait]
pub trait MediaProvider: Send + Sync {
    /// Connect to the room. Returns the local participant.
    async fn join(&self, request: &JoinRequest) -> Result<ParticipantInfo, ProviderFailure>;

    /// Disconnect. A no-op when not connected.
    async fn leave(&self) -> Result<(), ProviderFailure>;

    /// Release every resource held by the connection.
    async fn destroy(&self) -> Result<(), ProviderFailure>;

    /// Subscribe to engine events.
    fn events(&self) -> broadcast::Receiver<EngineEvent>;

    /// Current local media enablement.
    fn local_media(&self) -> LocalMedia;

    async fn set_local_audio(&self, enabled: bool) -> Result<(), ProviderFailure>;

    async fn set_local_video(&self, enabled: bool) -> Result<(), ProviderFailure>;

    /// Prompt for a display surface and start sharing it.
    async fn start_screen_share(&self) -> Result<(), ProviderFailure>;

    async fn stop_screen_share(&self) -> Result<(), ProviderFailure>;

    /// Broadcast an app message (chat) to the room.
    async fn send_app_message(&self, text: &str) -> Result<(), ProviderFailure>;

    /// Moderation: force a participant's audio state.
    async fn set_participant_audio(
        &self,
        session_id: &ParticipantSessionId,
        enabled: bool,
    ) -> Result<(), ProviderFailure>;

    /// Moderation: remove a participant from the room.
    async fn eject_participant(&self, session_id: &ParticipantSessionId)
        -> Result<(), ProviderFailure>;
}

/// Constructs provider connections.
pub trait ProviderFactory: Send + Sync {
    /// Build a new, unconnected provider.
    ///
    /// # Errors
    ///
    /// Returns the SDK failure when the provider cannot be constructed.
    fn create(&self) -> Result<Arc<dyn MediaProvider>, ProviderFailure>;
}
