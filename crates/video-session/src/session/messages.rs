//! Message types for the session orchestrator actor.

use crate::engine::{JoinRequest, ParticipantInfo};
use crate::errors::RawError;
use crate::media_state::{MediaState, SnapshotSubscription};
use crate::normalizer::{ErrorLogEntry, NormalizedError};
use crate::session::state::SessionStatus;

use common::types::ParticipantSessionId;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Local media the caller can toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaToggle {
    Audio,
    Video,
    ScreenShare,
}

impl MediaToggle {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaToggle::Audio => "toggle-audio",
            MediaToggle::Video => "toggle-video",
            MediaToggle::ScreenShare => "toggle-screen-share",
        }
    }
}

/// Messages sent to the `SessionOrchestrator` through its handle.
#[derive(Debug)]
pub enum SessionMessage {
    Join {
        request: JoinRequest,
        respond_to: oneshot::Sender<Result<(), NormalizedError>>,
    },

    Leave {
        respond_to: oneshot::Sender<Result<(), NormalizedError>>,
    },

    /// Unconditional teardown.
    Destroy { respond_to: oneshot::Sender<()> },

    /// Flip a local media source; replies with the new enablement.
    ToggleMedia {
        toggle: MediaToggle,
        respond_to: oneshot::Sender<Result<bool, NormalizedError>>,
    },

    SendChatMessage {
        text: String,
        respond_to: oneshot::Sender<Result<(), NormalizedError>>,
    },

    MuteParticipant {
        session_id: ParticipantSessionId,
        respond_to: oneshot::Sender<Result<(), NormalizedError>>,
    },

    RemoveParticipant {
        session_id: ParticipantSessionId,
        respond_to: oneshot::Sender<Result<(), NormalizedError>>,
    },

    Subscribe {
        respond_to: oneshot::Sender<SnapshotSubscription>,
    },

    GetMediaState {
        respond_to: oneshot::Sender<Arc<MediaState>>,
    },

    GetStatus {
        respond_to: oneshot::Sender<SessionStatus>,
    },

    GetErrorLog {
        respond_to: oneshot::Sender<Vec<ErrorLogEntry>>,
    },
}

/// Results of work the orchestrator spawned, fed back into its loop.
///
/// Every variant carries the epoch it was started under; a completion from an
/// older epoch is discarded.
#[derive(Debug)]
pub(crate) enum Completion {
    Join {
        epoch: u64,
        started_at: Instant,
        result: Result<ParticipantInfo, RawError>,
    },
    Leave {
        epoch: u64,
        result: Result<(), RawError>,
    },
    /// The room switch settle delay elapsed.
    SwitchSettled { epoch: u64 },
    /// A join parked behind a running leave ran out of patience.
    LeaveWaitExpired { epoch: u64, wait_id: u64 },
}
