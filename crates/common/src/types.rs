//! Common data types for the video session crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Errors produced when parsing identifier types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    /// The room URL was empty after trimming.
    #[error("Room URL is empty")]
    EmptyRoomUrl,

    /// The room URL could not be parsed as an absolute URL.
    #[error("Invalid room URL '{url}': {reason}")]
    InvalidRoomUrl { url: String, reason: String },

    /// The room URL does not use an http(s) scheme.
    #[error("Room URL must use http or https: {0}")]
    InvalidScheme(String),

    /// The participant session ID was empty.
    #[error("Participant session ID is empty")]
    EmptySessionId,
}

/// Address of a conferencing room.
///
/// Stored in the normalized form produced by [`url::Url`] (scheme and host
/// lowercased, default port dropped) with trailing slashes removed, so that two
/// spellings of the same room compare equal. The orchestrator relies on this
/// equality for its same-room re-join guard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomUrl(String);

impl RoomUrl {
    /// Parse and normalize a room URL.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::EmptyRoomUrl` for blank input,
    /// `TypeError::InvalidRoomUrl` when the input is not an absolute URL with a
    /// valid host, and `TypeError::InvalidScheme` when the scheme is not http or
    /// https.
    pub fn parse(raw: &str) -> Result<Self, TypeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TypeError::EmptyRoomUrl);
        }

        let url = Url::parse(trimmed).map_err(|e| TypeError::InvalidRoomUrl {
            url: trimmed.to_string(),
            reason: e.to_string(),
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(TypeError::InvalidScheme(trimmed.to_string()));
        }

        Ok(Self(url.as_str().trim_end_matches('/').to_string()))
    }

    /// Get the normalized URL.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment, which providers conventionally use as the room name.
    #[must_use]
    pub fn room_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for RoomUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoomUrl {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomUrl> for String {
    fn from(value: RoomUrl) -> Self {
        value.0
    }
}

/// Session-scoped participant identifier.
///
/// Unique per participant per session. Assigned by the media provider; a new
/// session hands out new IDs even for the same user.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantSessionId(String);

impl ParticipantSessionId {
    /// Wrap a provider-assigned identifier.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::EmptySessionId` for blank input.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(TypeError::EmptySessionId);
        }
        Ok(Self(id))
    }

    /// Create a new random identifier.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_room_url_normalizes_equivalent_spellings() {
        let a = RoomUrl::parse("https://Video.Example.com/standup/").unwrap();
        let b = RoomUrl::parse("  https://video.example.com/standup").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "https://video.example.com/standup");
        assert_eq!(a.room_name(), "standup");
    }

    #[test]
    fn test_room_url_path_is_case_sensitive() {
        let a = RoomUrl::parse("https://video.example.com/Standup").unwrap();
        let b = RoomUrl::parse("https://video.example.com/standup").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_room_url_rejects_bad_input() {
        assert_eq!(RoomUrl::parse("   "), Err(TypeError::EmptyRoomUrl));
        assert!(matches!(
            RoomUrl::parse("ftp://video.example.com/a"),
            Err(TypeError::InvalidScheme(_))
        ));
        assert!(matches!(
            RoomUrl::parse("video.example.com/a"),
            Err(TypeError::InvalidRoomUrl { .. })
        ));
        assert!(matches!(
            RoomUrl::parse("https://"),
            Err(TypeError::InvalidRoomUrl { .. })
        ));
        assert!(matches!(
            RoomUrl::parse("https:// bad host/a"),
            Err(TypeError::InvalidRoomUrl { .. })
        ));
    }

    #[test]
    fn test_room_url_drops_default_port() {
        let plain = RoomUrl::parse("https://video.example.com/a").unwrap();
        let explicit = RoomUrl::parse("HTTPS://video.example.com:443/a").unwrap();
        assert_eq!(plain, explicit);

        let custom = RoomUrl::parse("https://video.example.com:8443/a").unwrap();
        assert_ne!(plain, custom);
        assert_eq!(custom.as_str(), "https://video.example.com:8443/a");
    }

    #[test]
    fn test_room_url_bare_host() {
        let url = RoomUrl::parse("https://video.example.com/").unwrap();
        assert_eq!(url.as_str(), "https://video.example.com");
    }

    #[test]
    fn test_room_url_serde_validates() {
        let url: RoomUrl = serde_json::from_str(r#""https://video.example.com/x/""#).unwrap();
        assert_eq!(url.as_str(), "https://video.example.com/x");
        assert!(serde_json::from_str::<RoomUrl>(r#""nope""#).is_err());
    }

    #[test]
    fn test_participant_session_id() {
        assert!(ParticipantSessionId::new("").is_err());
        let id = ParticipantSessionId::new("abc").unwrap();
        assert_eq!(id.to_string(), "abc");

        let r1 = ParticipantSessionId::random();
        let r2 = ParticipantSessionId::random();
        assert_ne!(r1, r2);
    }
}
