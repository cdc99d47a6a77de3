//! Pre-configured test data fixtures.

use common::secret::SecretString;
use common::types::{ParticipantSessionId, RoomUrl};
use uuid::Uuid;
use video_session::engine::{JoinFeatures, JoinRequest, ParticipantInfo};

/// Base address of fixture rooms.
pub const TEST_ROOM_BASE: &str = "https://video.example.com";

/// Test room fixture.
#[derive(Debug, Clone)]
pub struct TestRoom {
    /// Room name (last path segment).
    pub name: String,
}

impl TestRoom {
    /// Create a room fixture with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Create a room fixture with a random name.
    #[must_use]
    pub fn random() -> Self {
        Self::new(format!("room-{}", Uuid::new_v4()))
    }

    /// The room address.
    #[must_use]
    pub fn url(&self) -> RoomUrl {
        RoomUrl::parse(&format!("{TEST_ROOM_BASE}/{}", self.name)).expect("fixture room url")
    }

    /// Start a join request for this room.
    #[must_use]
    pub fn join_request(&self) -> JoinRequestBuilder {
        JoinRequestBuilder::new(self.url())
    }
}

/// Builder for [`JoinRequest`].
#[derive(Debug, Clone)]
pub struct JoinRequestBuilder {
    room_url: RoomUrl,
    user_name: String,
    token: Option<String>,
    features: Option<JoinFeatures>,
    start_audio_off: bool,
    start_video_off: bool,
}

impl JoinRequestBuilder {
    #[must_use]
    pub fn new(room_url: RoomUrl) -> Self {
        Self {
            room_url,
            user_name: "Test User".to_string(),
            token: None,
            features: None,
            start_audio_off: false,
            start_video_off: false,
        }
    }

    #[must_use]
    pub fn user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = name.into();
        self
    }

    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn features(mut self, features: JoinFeatures) -> Self {
        self.features = Some(features);
        self
    }

    /// Join with the microphone off.
    #[must_use]
    pub fn audio_off(mut self) -> Self {
        self.start_audio_off = true;
        self
    }

    /// Join with the camera off.
    #[must_use]
    pub fn video_off(mut self) -> Self {
        self.start_video_off = true;
        self
    }

    #[must_use]
    pub fn build(self) -> JoinRequest {
        let mut request = JoinRequest::new(self.room_url, self.user_name);
        if let Some(features) = self.features {
            request = request.with_features(features);
        }
        request.features.start_audio_off |= self.start_audio_off;
        request.features.start_video_off |= self.start_video_off;
        if let Some(token) = self.token {
            request = request.with_token(SecretString::from(token));
        }
        request
    }
}

/// A remote participant record with audio and video on.
#[must_use]
pub fn remote_participant(id: &str, name: &str) -> ParticipantInfo {
    ParticipantInfo {
        session_id: ParticipantSessionId::new(id).expect("fixture session id"),
        user_name: name.to_string(),
        local: false,
        audio: true,
        video: true,
        screen: false,
    }
}

/// The local participant record with audio and video on.
#[must_use]
pub fn local_participant(id: &str, name: &str) -> ParticipantInfo {
    ParticipantInfo {
        local: true,
        ..remote_participant(id, name)
    }
}
