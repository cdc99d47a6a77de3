//! Error normalization.
//!
//! Converts every `RawError` into the single caller-facing contract,
//! `NormalizedError`, and keeps a bounded rolling log for diagnostics.
//!
//! Classification is table-driven per origin. Each known code maps to a fixed
//! `(user_message, action, recoverable)` triple; unknown codes fall back to a
//! generic retryable classification so that nothing unclassified ever looks
//! terminal.
//!
//! | Origin       | Fallback                 |
//! |--------------|--------------------------|
//! | engine       | generic retry            |
//! | provider     | generic retry            |
//! | device       | (closed set, no fallback)|
//! | orchestrator | (closed set, no fallback)|
//! | unrecognized | `unknown-error`, retry   |
//!
//! The normalizer does not retry anything. The `action` field tells the caller
//! what remediation to offer.

use crate::errors::{ErrorOrigin, RawError};
use crate::observability::metrics;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;
use tracing::{error, info, warn};

/// Default rolling log capacity.
pub const DEFAULT_ERROR_LOG_CAPACITY: usize = 50;

/// Code used for errors whose origin could not be determined.
pub const UNKNOWN_ERROR_CODE: &str = "unknown-error";

/// Remediation the presentation layer should offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryAction {
    Retry,
    Rejoin,
    Refresh,
    ContactSupport,
    None,
}

impl RecoveryAction {
    /// All values, in display order.
    pub const ALL: [RecoveryAction; 5] = [
        RecoveryAction::Retry,
        RecoveryAction::Rejoin,
        RecoveryAction::Refresh,
        RecoveryAction::ContactSupport,
        RecoveryAction::None,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RecoveryAction::Retry => "retry",
            RecoveryAction::Rejoin => "rejoin",
            RecoveryAction::Refresh => "refresh",
            RecoveryAction::ContactSupport => "contact-support",
            RecoveryAction::None => "none",
        }
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log routing level. Does not affect control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Fatal,
    Error,
    Warning,
}

impl Severity {
    /// Permission problems are the user's call, so they are only warnings even
    /// though they cannot be retried. Otherwise non-recoverable is fatal.
    #[must_use]
    pub const fn derive(recoverable: bool, permission_related: bool) -> Self {
        if permission_related {
            Severity::Warning
        } else if !recoverable {
            Severity::Fatal
        } else {
            Severity::Error
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Severity::Fatal => "fatal",
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }
}

/// The single error contract observed by callers.
///
/// Created once per failure and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{code}: {message}")]
pub struct NormalizedError {
    /// Stable machine-readable code.
    pub code: String,
    /// Raw diagnostic text. Not for display.
    pub message: String,
    /// The only text presentation code should render.
    pub user_message: String,
    /// Whether a retry affordance makes sense.
    pub recoverable: bool,
    /// Remediation to offer.
    pub action: RecoveryAction,
    /// Log routing level.
    pub severity: Severity,
}

/// One table row.
#[derive(Debug, Clone, Copy)]
struct Classification {
    user_message: &'static str,
    action: RecoveryAction,
    recoverable: bool,
}

const fn row(
    user_message: &'static str,
    action: RecoveryAction,
    recoverable: bool,
) -> Classification {
    Classification {
        user_message,
        action,
        recoverable,
    }
}

const GENERIC: Classification = row(
    "Something went wrong. Please try again.",
    RecoveryAction::Retry,
    true,
);

const ENGINE_TABLE: &[(&str, Classification)] = &[
    (
        "network-error",
        row(
            "Network connection lost. Check your internet connection and try again.",
            RecoveryAction::Retry,
            true,
        ),
    ),
    (
        "connection-failed",
        row(
            "Could not connect to the meeting. Please rejoin.",
            RecoveryAction::Rejoin,
            true,
        ),
    ),
    (
        "timeout",
        row(
            "The connection timed out. Please try again.",
            RecoveryAction::Retry,
            true,
        ),
    ),
    (
        "meeting-full",
        row(
            "This meeting is full. Please try again later.",
            RecoveryAction::None,
            true,
        ),
    ),
    (
        "meeting-ended",
        row("This meeting has ended.", RecoveryAction::None, false),
    ),
    (
        "init-failed",
        row(
            "Video could not be started. Please refresh the page.",
            RecoveryAction::Refresh,
            false,
        ),
    ),
    (
        "not-initialized",
        row(
            "Video is not ready yet. Please refresh the page.",
            RecoveryAction::Refresh,
            true,
        ),
    ),
    (
        "internal-error",
        row(
            "An unexpected error occurred. Please contact support.",
            RecoveryAction::ContactSupport,
            false,
        ),
    ),
];

const PROVIDER_TABLE: &[(&str, Classification)] = &[
    (
        "room-not-found",
        row("This meeting link is not valid.", RecoveryAction::None, false),
    ),
    (
        "room-not-available",
        row(
            "This meeting is not available right now.",
            RecoveryAction::None,
            false,
        ),
    ),
    (
        "token-invalid",
        row(
            "Your meeting access could not be verified. Please refresh the page.",
            RecoveryAction::Refresh,
            true,
        ),
    ),
    (
        "token-expired",
        row(
            "Your meeting access has expired. Please refresh the page.",
            RecoveryAction::Refresh,
            true,
        ),
    ),
    (
        "ejected",
        row(
            "You have been removed from the meeting.",
            RecoveryAction::None,
            false,
        ),
    ),
    (
        "access-denied",
        row(
            "You do not have permission to join this meeting.",
            RecoveryAction::None,
            false,
        ),
    ),
];

// `{device}` is substituted with the device name.
const DEVICE_TABLE: &[(&str, Classification)] = &[
    (
        "permission-denied",
        row(
            "Access to your {device} was denied. Allow it in your browser settings and try again.",
            RecoveryAction::None,
            false,
        ),
    ),
    (
        "device-not-found",
        row(
            "No {device} was found. Connect one and try again.",
            RecoveryAction::None,
            false,
        ),
    ),
    (
        "device-in-use",
        row(
            "Your {device} is being used by another application.",
            RecoveryAction::None,
            false,
        ),
    ),
    (
        "constraints-not-satisfied",
        row(
            "Your {device} does not support the requested settings.",
            RecoveryAction::None,
            false,
        ),
    ),
    (
        "security-error",
        row(
            "Access to your {device} is blocked by a security policy.",
            RecoveryAction::None,
            false,
        ),
    ),
    (
        "device-aborted",
        row(
            "Starting your {device} was interrupted.",
            RecoveryAction::None,
            false,
        ),
    ),
];

const ORCHESTRATOR_TABLE: &[(&str, Classification)] = &[
    (
        "join-in-progress",
        row("Already joining the meeting.", RecoveryAction::None, true),
    ),
    (
        "not-joined",
        row(
            "You are not connected to the meeting. Please rejoin.",
            RecoveryAction::Rejoin,
            true,
        ),
    ),
    (
        "leave-timeout",
        row(
            "Still leaving the previous meeting. Please try again.",
            RecoveryAction::Retry,
            true,
        ),
    ),
    (
        "session-destroyed",
        row("The call was closed.", RecoveryAction::None, true),
    ),
    (
        "join-cancelled",
        row("Joining was cancelled.", RecoveryAction::None, true),
    ),
    (
        "session-unavailable",
        row(
            "The video session stopped unexpectedly. Please refresh the page.",
            RecoveryAction::Refresh,
            false,
        ),
    ),
    (
        "rejoin-blocked",
        row(
            "This meeting cannot be rejoined. Please contact support.",
            RecoveryAction::ContactSupport,
            false,
        ),
    ),
];

fn lookup(table: &[(&str, Classification)], code: &str) -> Classification {
    table
        .iter()
        .find(|(known, _)| *known == code)
        .map_or(GENERIC, |(_, class)| *class)
}

/// Classify a raw error. Pure function of its input.
#[must_use]
pub fn classify(raw: &RawError) -> NormalizedError {
    let (code, class, permission_related, user_message) = match raw {
        RawError::Engine(e) => {
            let class = lookup(ENGINE_TABLE, e.kind.code());
            (e.kind.code().to_string(), class, false, None)
        }
        RawError::Provider(e) => {
            let class = lookup(PROVIDER_TABLE, e.code.code());
            (e.code.code().to_string(), class, false, None)
        }
        RawError::Device(e) => {
            let class = lookup(DEVICE_TABLE, e.code());
            let message = class
                .user_message
                .replace("{device}", &e.device().to_string());
            (
                e.code().to_string(),
                class,
                e.is_permission_related(),
                Some(message),
            )
        }
        RawError::Orchestrator(e) => {
            let class = lookup(ORCHESTRATOR_TABLE, e.code());
            (e.code().to_string(), class, false, None)
        }
        RawError::Unrecognized(_) => (UNKNOWN_ERROR_CODE.to_string(), GENERIC, false, None),
    };

    NormalizedError {
        code,
        message: raw.to_string(),
        user_message: user_message.unwrap_or_else(|| class.user_message.to_string()),
        recoverable: class.recoverable,
        action: class.action,
        severity: Severity::derive(class.recoverable, permission_related),
    }
}

/// One diagnostic log record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLogEntry {
    pub error: NormalizedError,
    pub origin: &'static str,
    pub context: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Bounded FIFO log of normalized errors.
#[derive(Debug)]
pub struct ErrorLog {
    capacity: usize,
    entries: VecDeque<ErrorLogEntry>,
}

impl ErrorLog {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Append, evicting the oldest entries beyond capacity.
    pub fn push(&mut self, entry: ErrorLogEntry) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<ErrorLogEntry> {
        self.entries.iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Serialize the log for a diagnostics export.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; callers treat this as non-fatal.
    pub fn export_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.entries)
    }
}

/// Stateless classifier plus the rolling diagnostic log.
#[derive(Debug)]
pub struct ErrorNormalizer {
    log: ErrorLog,
}

impl ErrorNormalizer {
    #[must_use]
    pub fn new(log_capacity: usize) -> Self {
        Self {
            log: ErrorLog::new(log_capacity),
        }
    }

    /// Normalize `raw`, log it by severity and append it to the rolling log.
    pub fn handle(&mut self, raw: &RawError, context: Option<&str>) -> NormalizedError {
        let normalized = classify(raw);
        let origin = raw.origin();

        emit_log(&normalized, origin, context);
        metrics::record_normalized_error(origin.as_str(), normalized.action, normalized.severity);

        self.log.push(ErrorLogEntry {
            error: normalized.clone(),
            origin: origin.as_str(),
            context: context.map(str::to_string),
            occurred_at: Utc::now(),
        });

        normalized
    }

    /// Read access to the rolling log.
    #[must_use]
    pub fn log(&self) -> &ErrorLog {
        &self.log
    }

    /// Drop all log entries.
    pub fn clear_log(&mut self) {
        self.log.clear();
    }
}

impl Default for ErrorNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_LOG_CAPACITY)
    }
}

fn emit_log(normalized: &NormalizedError, origin: ErrorOrigin, context: Option<&str>) {
    let context = context.unwrap_or("-");
    match normalized.severity {
        Severity::Fatal => error!(
            target: "vs.errors",
            code = %normalized.code,
            origin = origin.as_str(),
            action = normalized.action.as_str(),
            context,
            message = %normalized.message,
            "Fatal session error"
        ),
        Severity::Error => warn!(
            target: "vs.errors",
            code = %normalized.code,
            origin = origin.as_str(),
            action = normalized.action.as_str(),
            context,
            message = %normalized.message,
            "Recoverable session error"
        ),
        Severity::Warning => info!(
            target: "vs.errors",
            code = %normalized.code,
            origin = origin.as_str(),
            context,
            message = %normalized.message,
            "Session permission warning"
        ),
    }
}
