//! Video session configuration.
//!
//! Configuration is loaded from environment variables. The room token is
//! redacted in Debug output.

pub use crate::normalizer::DEFAULT_ERROR_LOG_CAPACITY;

use common::secret::SecretString;
use common::types::RoomUrl;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default snapshot throttle interval (4 updates per second).
pub const DEFAULT_THROTTLE_INTERVAL_MS: u64 = 250;

/// Default bound on a single join attempt.
pub const DEFAULT_JOIN_TIMEOUT_MS: u64 = 30_000;

/// Default grace window for a join issued while a leave is still running.
pub const DEFAULT_LEAVE_SETTLE_TIMEOUT_MS: u64 = 3_000;

/// Default settle delay between leaving one room and joining another.
pub const DEFAULT_ROOM_SWITCH_DELAY_MS: u64 = 500;

/// Default registry scope.
pub const DEFAULT_SESSION_SCOPE: &str = "default";

/// Default room for the development binary.
pub const DEFAULT_ROOM_URL: &str = "https://video.example.com/dev-room";

/// Default display name for the development binary.
pub const DEFAULT_USER_NAME: &str = "developer";

/// Orchestrator tuning, with typed durations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub join_timeout: Duration,
    pub leave_settle_timeout: Duration,
    pub room_switch_delay: Duration,
    pub error_log_capacity: usize,
    pub allow_rejoin_after_fatal: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_millis(DEFAULT_JOIN_TIMEOUT_MS),
            leave_settle_timeout: Duration::from_millis(DEFAULT_LEAVE_SETTLE_TIMEOUT_MS),
            room_switch_delay: Duration::from_millis(DEFAULT_ROOM_SWITCH_DELAY_MS),
            error_log_capacity: DEFAULT_ERROR_LOG_CAPACITY,
            allow_rejoin_after_fatal: true,
        }
    }
}

/// Video session configuration.
#[derive(Clone)]
pub struct Config {
    /// Minimum spacing between throttled snapshot deliveries (default: 250).
    pub throttle_interval_ms: u64,

    /// Join timeout (default: 30000).
    pub join_timeout_ms: u64,

    /// Grace window for a join issued while leaving (default: 3000).
    pub leave_settle_timeout_ms: u64,

    /// Settle delay on room switch (default: 500).
    pub room_switch_delay_ms: u64,

    /// Rolling error log size (default: 50).
    pub error_log_capacity: usize,

    /// Permit a join out of a non-recoverable error (default: true).
    pub allow_rejoin_after_fatal: bool,

    /// Registry key for the session (default: "default").
    pub session_scope: String,

    /// Room joined by the development binary.
    pub room_url: RoomUrl,

    /// Display name used by the development binary.
    pub user_name: String,

    /// Optional room access token.
    /// Protected by `SecretString` to prevent accidental logging.
    pub room_token: Option<SecretString>,

    /// Emit JSON logs (`VS_LOG_FORMAT=json`).
    pub log_json: bool,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("throttle_interval_ms", &self.throttle_interval_ms)
            .field("join_timeout_ms", &self.join_timeout_ms)
            .field("leave_settle_timeout_ms", &self.leave_settle_timeout_ms)
            .field("room_switch_delay_ms", &self.room_switch_delay_ms)
            .field("error_log_capacity", &self.error_log_capacity)
            .field("allow_rejoin_after_fatal", &self.allow_rejoin_after_fatal)
            .field("session_scope", &self.session_scope)
            .field("room_url", &self.room_url)
            .field("user_name", &self.user_name)
            .field(
                "room_token",
                &self.room_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("log_json", &self.log_json)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    match vars.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(format!("{key}={raw:?}: {e}"))),
        None => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidValue` for malformed values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidValue` for malformed values.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let throttle_interval_ms =
            parse_var(vars, "VS_THROTTLE_INTERVAL_MS", DEFAULT_THROTTLE_INTERVAL_MS)?;
        if throttle_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "VS_THROTTLE_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }

        let join_timeout_ms = parse_var(vars, "VS_JOIN_TIMEOUT_MS", DEFAULT_JOIN_TIMEOUT_MS)?;
        if join_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "VS_JOIN_TIMEOUT_MS must be greater than zero".to_string(),
            ));
        }

        let leave_settle_timeout_ms = parse_var(
            vars,
            "VS_LEAVE_SETTLE_TIMEOUT_MS",
            DEFAULT_LEAVE_SETTLE_TIMEOUT_MS,
        )?;
        let room_switch_delay_ms =
            parse_var(vars, "VS_ROOM_SWITCH_DELAY_MS", DEFAULT_ROOM_SWITCH_DELAY_MS)?;
        let error_log_capacity =
            parse_var(vars, "VS_ERROR_LOG_CAPACITY", DEFAULT_ERROR_LOG_CAPACITY)?;
        let allow_rejoin_after_fatal = parse_var(vars, "VS_ALLOW_REJOIN_AFTER_FATAL", true)?;

        let session_scope = vars
            .get("VS_SESSION_SCOPE")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SESSION_SCOPE.to_string());

        let room_url = RoomUrl::parse(
            vars.get("VS_ROOM_URL")
                .map_or(DEFAULT_ROOM_URL, String::as_str),
        )
        .map_err(|e| ConfigError::InvalidValue(format!("VS_ROOM_URL: {e}")))?;

        let user_name = vars
            .get("VS_USER_NAME")
            .cloned()
            .unwrap_or_else(|| DEFAULT_USER_NAME.to_string());

        let room_token = vars
            .get("VS_ROOM_TOKEN")
            .filter(|token| !token.is_empty())
            .map(|token| SecretString::from(token.clone()));

        let log_json = vars
            .get("VS_LOG_FORMAT")
            .is_some_and(|format| format.eq_ignore_ascii_case("json"));

        Ok(Config {
            throttle_interval_ms,
            join_timeout_ms,
            leave_settle_timeout_ms,
            room_switch_delay_ms,
            error_log_capacity,
            allow_rejoin_after_fatal,
            session_scope,
            room_url,
            user_name,
            room_token,
            log_json,
        })
    }

    #[must_use]
    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_interval_ms)
    }

    /// Orchestrator settings derived from this configuration.
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            join_timeout: Duration::from_millis(self.join_timeout_ms),
            leave_settle_timeout: Duration::from_millis(self.leave_settle_timeout_ms),
            room_switch_delay: Duration::from_millis(self.room_switch_delay_ms),
            error_log_capacity: self.error_log_capacity,
            allow_rejoin_after_fatal: self.allow_rejoin_after_fatal,
        }
    }
}
