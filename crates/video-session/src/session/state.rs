//! Session lifecycle states and the pure transition decisions.
//!
//! ```text
//! idle --join--> joining --ok--> joined --leave--> leaving --> idle
//!                   |                |
//!                   +--fail--> error +--join(other room)--> leaving --> idle --> joining
//! error --join--> (reset) joining
//! error --leave--> idle
//! ```
//!
//! The orchestrator asks [`SessionState::plan_join`] / [`SessionState::plan_leave`]
//! what to do and then carries out the plan. Keeping the decision pure makes
//! the table testable without an actor.

use crate::errors::OrchestratorError;
use crate::normalizer::NormalizedError;

use common::types::{ParticipantSessionId, RoomUrl};
use serde::Serialize;
use std::fmt;

/// Session state with its payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Joining {
        room: RoomUrl,
    },
    Joined {
        room: RoomUrl,
    },
    Leaving,
    Error {
        cause: NormalizedError,
    },
}

/// Payload-free discriminant of [`SessionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Joining,
    Joined,
    Leaving,
    Error,
}

impl SessionPhase {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Joining => "joining",
            SessionPhase::Joined => "joined",
            SessionPhase::Leaving => "leaving",
            SessionPhase::Error => "error",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a join request should do from the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinPlan {
    /// Start joining now.
    Start,
    /// Already in the requested room; succeed without engine work.
    AlreadyJoined,
    /// Leave the current room, settle, then join.
    SwitchRoom,
    /// A leave is running; join once it settles.
    AwaitLeave,
    /// Clear the error and start joining. `fatal` when the cause was not
    /// recoverable.
    RecoverThenStart { fatal: bool, cause_code: String },
    Reject(OrchestratorError),
}

/// What a leave request should do from the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeavePlan {
    /// Nothing to leave.
    AlreadyIdle,
    /// Start leaving now.
    Start,
    /// A leave is already running; wait for its outcome.
    AwaitCurrent,
    /// Clear the error without engine work.
    ResetFromError,
    Reject(OrchestratorError),
}

impl SessionState {
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Idle => SessionPhase::Idle,
            SessionState::Joining { .. } => SessionPhase::Joining,
            SessionState::Joined { .. } => SessionPhase::Joined,
            SessionState::Leaving => SessionPhase::Leaving,
            SessionState::Error { .. } => SessionPhase::Error,
        }
    }

    /// The room being joined or joined.
    #[must_use]
    pub fn room(&self) -> Option<&RoomUrl> {
        match self {
            SessionState::Joining { room } | SessionState::Joined { room } => Some(room),
            _ => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&NormalizedError> {
        match self {
            SessionState::Error { cause } => Some(cause),
            _ => None,
        }
    }

    #[must_use]
    pub fn plan_join(&self, room: &RoomUrl) -> JoinPlan {
        match self {
            SessionState::Idle => JoinPlan::Start,
            SessionState::Joining { .. } => JoinPlan::Reject(OrchestratorError::JoinInProgress),
            SessionState::Joined { room: current } if current == room => JoinPlan::AlreadyJoined,
            SessionState::Joined { .. } => JoinPlan::SwitchRoom,
            SessionState::Leaving => JoinPlan::AwaitLeave,
            SessionState::Error { cause } => JoinPlan::RecoverThenStart {
                fatal: !cause.recoverable,
                cause_code: cause.code.clone(),
            },
        }
    }

    #[must_use]
    pub fn plan_leave(&self) -> LeavePlan {
        match self {
            SessionState::Idle => LeavePlan::AlreadyIdle,
            SessionState::Joining { .. } => LeavePlan::Reject(OrchestratorError::JoinInProgress),
            SessionState::Joined { .. } => LeavePlan::Start,
            SessionState::Leaving => LeavePlan::AwaitCurrent,
            SessionState::Error { .. } => LeavePlan::ResetFromError,
        }
    }

    /// Whether media and moderation actions are allowed.
    #[must_use]
    pub fn accepts_actions(&self) -> bool {
        matches!(self, SessionState::Joined { .. })
    }
}

/// Point-in-time summary for callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub room: Option<RoomUrl>,
    pub participant_count: usize,
    pub local_session_id: Option<ParticipantSessionId>,
    pub last_error: Option<NormalizedError>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::errors::{EngineError, EngineErrorKind, RawError};
    use crate::normalizer::classify;

    fn room(name: &str) -> RoomUrl {
        RoomUrl::parse(&format!("https://video.example.com/{name}")).unwrap()
    }

    fn error_state(kind: EngineErrorKind) -> SessionState {
        SessionState::Error {
            cause: classify(&RawError::from(EngineError::new(kind, "boom"))),
        }
    }

    #[test]
    fn test_join_plans() {
        let a = room("a");
        let b = room("b");

        assert_eq!(SessionState::Idle.plan_join(&a), JoinPlan::Start);
        assert_eq!(
            SessionState::Joining { room: a.clone() }.plan_join(&a),
            JoinPlan::Reject(OrchestratorError::JoinInProgress)
        );
        assert_eq!(
            SessionState::Joining { room: a.clone() }.plan_join(&b),
            JoinPlan::Reject(OrchestratorError::JoinInProgress)
        );
        assert_eq!(
            SessionState::Joined { room: a.clone() }.plan_join(&a),
            JoinPlan::AlreadyJoined
        );
        assert_eq!(
            SessionState::Joined { room: a.clone() }.plan_join(&b),
            JoinPlan::SwitchRoom
        );
        assert_eq!(SessionState::Leaving.plan_join(&a), JoinPlan::AwaitLeave);
    }

    #[test]
    fn test_join_from_error_reports_fatality() {
        let a = room("a");
        assert_eq!(
            error_state(EngineErrorKind::Network).plan_join(&a),
            JoinPlan::RecoverThenStart {
                fatal: false,
                cause_code: "network-error".to_string()
            }
        );
        assert_eq!(
            error_state(EngineErrorKind::MeetingEnded).plan_join(&a),
            JoinPlan::RecoverThenStart {
                fatal: true,
                cause_code: "meeting-ended".to_string()
            }
        );
    }

    #[test]
    fn test_leave_plans() {
        let a = room("a");
        assert_eq!(SessionState::Idle.plan_leave(), LeavePlan::AlreadyIdle);
        assert_eq!(
            SessionState::Joining { room: a.clone() }.plan_leave(),
            LeavePlan::Reject(OrchestratorError::JoinInProgress)
        );
        assert_eq!(SessionState::Joined { room: a }.plan_leave(), LeavePlan::Start);
        assert_eq!(SessionState::Leaving.plan_leave(), LeavePlan::AwaitCurrent);
        assert_eq!(
            error_state(EngineErrorKind::Timeout).plan_leave(),
            LeavePlan::ResetFromError
        );
    }

    #[test]
    fn test_phase_and_room() {
        let a = room("a");
        let state = SessionState::Joined { room: a.clone() };
        assert_eq!(state.phase(), SessionPhase::Joined);
        assert_eq!(state.room(), Some(&a));
        assert!(state.accepts_actions());

        assert_eq!(SessionState::Leaving.room(), None);
        assert!(!SessionState::Leaving.accepts_actions());
        assert_eq!(SessionPhase::Error.to_string(), "error");
    }
}
