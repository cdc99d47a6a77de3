//! Raw error types for the video session core.
//!
//! Every failure is tagged with its origin at the point where it is first
//! observed:
//!
//! - `EngineError` - produced by the engine adapter (connectivity, meeting state)
//! - `ProviderError` - provider-specific API rejections (room, token, ejection)
//! - `DeviceError` - capture device / permission failures
//! - `OrchestratorError` - illegal sequencing detected by the session actor
//!
//! `RawError` is the closed union of these. Callers never see it directly: the
//! error normalizer turns every `RawError` into a `NormalizedError`.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

// ----------------------------------------------------------------------------
// Engine errors
// ----------------------------------------------------------------------------

/// Classification of engine adapter failures.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EngineErrorKind {
    /// The provider SDK could not be constructed.
    InitFailed,
    /// An operation was attempted before `initialize()`.
    NotInitialized,
    /// Network connectivity lost or unreachable.
    Network,
    /// Signaling or media handshake failed.
    ConnectionFailed,
    /// The operation did not complete in time.
    Timeout,
    /// The room is at capacity.
    MeetingFull,
    /// The meeting has ended for everyone.
    MeetingEnded,
    /// Unexpected provider-internal failure.
    Internal,
    /// A provider code this adapter has no mapping for.
    Other(String),
}

impl EngineErrorKind {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            EngineErrorKind::InitFailed => "init-failed",
            EngineErrorKind::NotInitialized => "not-initialized",
            EngineErrorKind::Network => "network-error",
            EngineErrorKind::ConnectionFailed => "connection-failed",
            EngineErrorKind::Timeout => "timeout",
            EngineErrorKind::MeetingFull => "meeting-full",
            EngineErrorKind::MeetingEnded => "meeting-ended",
            EngineErrorKind::Internal => "internal-error",
            EngineErrorKind::Other(code) => code,
        }
    }

    /// Whether a later attempt can succeed without outside intervention.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            EngineErrorKind::InitFailed | EngineErrorKind::MeetingEnded | EngineErrorKind::Internal
        )
    }
}

/// Uniform error shape raised by the engine adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Engine error ({}): {message}", .kind.code())]
pub struct EngineError {
    /// Error classification.
    pub kind: EngineErrorKind,
    /// Raw diagnostic text.
    pub message: String,
    /// Whether retrying can succeed.
    pub recoverable: bool,
}

impl EngineError {
    /// Create an engine error; recoverability follows the kind.
    #[must_use]
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        let recoverable = kind.is_recoverable();
        Self {
            kind,
            message: message.into(),
            recoverable,
        }
    }
}

// ----------------------------------------------------------------------------
// Provider errors
// ----------------------------------------------------------------------------

/// Provider-specific rejection codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProviderErrorCode {
    /// The room does not exist.
    RoomNotFound,
    /// The room exists but is outside its availability window.
    RoomNotAvailable,
    /// The meeting token failed validation.
    TokenInvalid,
    /// The meeting token has expired.
    TokenExpired,
    /// The participant was removed by a moderator.
    Ejected,
    /// The room does not admit this participant.
    AccessDenied,
    /// Unmapped provider code.
    Other(String),
}

impl ProviderErrorCode {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            ProviderErrorCode::RoomNotFound => "room-not-found",
            ProviderErrorCode::RoomNotAvailable => "room-not-available",
            ProviderErrorCode::TokenInvalid => "token-invalid",
            ProviderErrorCode::TokenExpired => "token-expired",
            ProviderErrorCode::Ejected => "ejected",
            ProviderErrorCode::AccessDenied => "access-denied",
            ProviderErrorCode::Other(code) => code,
        }
    }
}

/// Error reported by the provider's API for a specific request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Provider error ({}): {message}", .code.code())]
pub struct ProviderError {
    /// Provider code.
    pub code: ProviderErrorCode,
    /// Raw diagnostic text.
    pub message: String,
}

impl ProviderError {
    #[must_use]
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Device errors
// ----------------------------------------------------------------------------

/// Capture device involved in a device failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Camera,
    Microphone,
    Display,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceKind::Camera => "camera",
            DeviceKind::Microphone => "microphone",
            DeviceKind::Display => "display",
        })
    }
}

/// Device and permission failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// The user or the platform denied access.
    #[error("Permission denied for {0}")]
    PermissionDenied(DeviceKind),

    /// No matching device is present.
    #[error("No {0} found")]
    NotFound(DeviceKind),

    /// The device exists but another application holds it.
    #[error("The {0} is in use by another application")]
    InUse(DeviceKind),

    /// No device satisfies the requested constraint.
    #[error("No {device} satisfies constraint '{constraint}'")]
    ConstraintsNotSatisfied {
        device: DeviceKind,
        constraint: String,
    },

    /// Capture blocked by the platform security policy.
    #[error("Security policy blocked {0} access")]
    Security(DeviceKind),

    /// Capture start was aborted.
    #[error("Starting the {0} was aborted")]
    Aborted(DeviceKind),
}

impl DeviceError {
    /// Wrap a named platform exception (`NotAllowedError`, `NotFoundError`, ...)
    /// raised while acquiring `device`.
    ///
    /// Returns `None` for names that are not device failures, so the caller can
    /// route them elsewhere instead of guessing.
    #[must_use]
    pub fn from_exception(name: &str, device: DeviceKind, detail: &str) -> Option<Self> {
        match name {
            "NotAllowedError" | "PermissionDeniedError" => Some(DeviceError::PermissionDenied(device)),
            "NotFoundError" | "DevicesNotFoundError" => Some(DeviceError::NotFound(device)),
            "NotReadableError" | "TrackStartError" => Some(DeviceError::InUse(device)),
            "OverconstrainedError" | "ConstraintNotSatisfiedError" => {
                Some(DeviceError::ConstraintsNotSatisfied {
                    device,
                    constraint: detail.to_string(),
                })
            }
            "SecurityError" => Some(DeviceError::Security(device)),
            "AbortError" => Some(DeviceError::Aborted(device)),
            _ => None,
        }
    }

    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            DeviceError::PermissionDenied(_) => "permission-denied",
            DeviceError::NotFound(_) => "device-not-found",
            DeviceError::InUse(_) => "device-in-use",
            DeviceError::ConstraintsNotSatisfied { .. } => "constraints-not-satisfied",
            DeviceError::Security(_) => "security-error",
            DeviceError::Aborted(_) => "device-aborted",
        }
    }

    /// The device involved.
    #[must_use]
    pub fn device(&self) -> DeviceKind {
        match self {
            DeviceError::PermissionDenied(d)
            | DeviceError::NotFound(d)
            | DeviceError::InUse(d)
            | DeviceError::Security(d)
            | DeviceError::Aborted(d)
            | DeviceError::ConstraintsNotSatisfied { device: d, .. } => *d,
        }
    }

    /// Permission failures need the user to change a setting, not retry.
    #[must_use]
    pub fn is_permission_related(&self) -> bool {
        matches!(self, DeviceError::PermissionDenied(_) | DeviceError::Security(_))
    }
}

// ----------------------------------------------------------------------------
// Orchestrator errors
// ----------------------------------------------------------------------------

/// Sequencing failures detected by the session orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    /// A join is already in flight.
    #[error("A join is already in progress")]
    JoinInProgress,

    /// The operation requires a joined session.
    #[error("Not joined to a room")]
    NotJoined,

    /// A previous leave did not settle within the grace window.
    #[error("Previous leave did not settle within {0:?}")]
    LeaveTimeout(Duration),

    /// The session was destroyed while the operation was pending.
    #[error("Session destroyed")]
    Destroyed,

    /// A queued join was abandoned by a later leave.
    #[error("Join cancelled by leave")]
    JoinCancelled,

    /// The orchestrator task is gone.
    #[error("Session orchestrator unavailable: {0}")]
    Unavailable(String),

    /// Rejoin after a non-recoverable failure is disabled.
    #[error("Rejoin blocked after fatal error: {0}")]
    RejoinBlocked(String),
}

impl OrchestratorError {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::JoinInProgress => "join-in-progress",
            OrchestratorError::NotJoined => "not-joined",
            OrchestratorError::LeaveTimeout(_) => "leave-timeout",
            OrchestratorError::Destroyed => "session-destroyed",
            OrchestratorError::JoinCancelled => "join-cancelled",
            OrchestratorError::Unavailable(_) => "session-unavailable",
            OrchestratorError::RejoinBlocked(_) => "rejoin-blocked",
        }
    }
}

// ----------------------------------------------------------------------------
// SDK boundary failure shape
// ----------------------------------------------------------------------------

/// Failure reported by a `MediaProvider` implementation.
///
/// This is the provider-facing shape; the engine adapter translates it into a
/// `RawError` before anything else sees it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderFailure {
    #[error("network failure: {0}")]
    Network(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("connection failure: {0}")]
    Connection(String),

    #[error("meeting is full")]
    MeetingFull,

    #[error("meeting has ended")]
    MeetingEnded,

    #[error(transparent)]
    Api(#[from] ProviderError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("provider internal failure: {0}")]
    Internal(String),
}

// ----------------------------------------------------------------------------
// Raw error union
// ----------------------------------------------------------------------------

/// Origin of a raw error, for log fields and normalizer dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorOrigin {
    Engine,
    Provider,
    Device,
    Orchestrator,
    Unrecognized,
}

impl ErrorOrigin {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorOrigin::Engine => "engine",
            ErrorOrigin::Provider => "provider",
            ErrorOrigin::Device => "device",
            ErrorOrigin::Orchestrator => "orchestrator",
            ErrorOrigin::Unrecognized => "unrecognized",
        }
    }
}

/// Any failure before normalization, tagged by origin.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RawError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("Unrecognized error: {0}")]
    Unrecognized(String),
}

impl RawError {
    /// Where the error came from.
    #[must_use]
    pub fn origin(&self) -> ErrorOrigin {
        match self {
            RawError::Engine(_) => ErrorOrigin::Engine,
            RawError::Provider(_) => ErrorOrigin::Provider,
            RawError::Device(_) => ErrorOrigin::Device,
            RawError::Orchestrator(_) => ErrorOrigin::Orchestrator,
            RawError::Unrecognized(_) => ErrorOrigin::Unrecognized,
        }
    }
}
