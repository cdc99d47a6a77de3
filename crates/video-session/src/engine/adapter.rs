//! `EngineAdapter` - the single gateway to the media provider.
//!
//! Owns at most one provider connection. Every provider failure is translated
//! into a `RawError` here, so nothing above this layer sees SDK-specific error
//! types.

use super::{EngineEvent, JoinRequest, LocalMedia, MediaProvider, ParticipantInfo, ProviderFactory};
use crate::errors::{EngineError, EngineErrorKind, ProviderFailure, RawError};

use common::types::ParticipantSessionId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Default bound on a single join attempt.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Translate a provider failure into the raw error taxonomy.
#[must_use]
pub fn translate(failure: ProviderFailure) -> RawError {
    match failure {
        ProviderFailure::Network(msg) => EngineError::new(EngineErrorKind::Network, msg).into(),
        ProviderFailure::Timeout(msg) => EngineError::new(EngineErrorKind::Timeout, msg).into(),
        ProviderFailure::Connection(msg) => {
            EngineError::new(EngineErrorKind::ConnectionFailed, msg).into()
        }
        ProviderFailure::MeetingFull => {
            EngineError::new(EngineErrorKind::MeetingFull, "meeting is full").into()
        }
        ProviderFailure::MeetingEnded => {
            EngineError::new(EngineErrorKind::MeetingEnded, "meeting has ended").into()
        }
        ProviderFailure::Internal(msg) => {
            EngineError::new(EngineErrorKind::Internal, msg).into()
        }
        ProviderFailure::Api(err) => RawError::Provider(err),
        ProviderFailure::Device(err) => RawError::Device(err),
    }
}

fn not_initialized() -> RawError {
    EngineError::new(
        EngineErrorKind::NotInitialized,
        "engine adapter used before initialize",
    )
    .into()
}

/// Cloneable view of an initialized connection.
///
/// Lets the orchestrator run join/leave on a spawned task while it keeps
/// processing messages.
#[derive(Clone)]
pub struct EngineConnection {
    provider: Arc<dyn MediaProvider>,
    join_timeout: Duration,
}

impl EngineConnection {
    /// Join the room described by `request`, bounded by the join timeout.
    ///
    /// # Errors
    ///
    /// Translated provider failure, or an engine `timeout` error.
    pub async fn join(&self, request: &JoinRequest) -> Result<ParticipantInfo, RawError> {
        debug!(target: "vs.engine", room = %request.room_url, "Joining room");

        match tokio::time::timeout(self.join_timeout, self.provider.join(request)).await {
            Ok(Ok(local)) => {
                info!(
                    target: "vs.engine",
                    room = %request.room_url,
                    session_id = %local.session_id,
                    "Joined room"
                );
                Ok(local)
            }
            Ok(Err(failure)) => Err(translate(failure)),
            Err(_) => {
                warn!(
                    target: "vs.engine",
                    room = %request.room_url,
                    timeout_ms = self.join_timeout.as_millis(),
                    "Join timed out"
                );
                // The provider may have connected after the deadline
                if let Err(failure) = self.provider.leave().await {
                    warn!(
                        target: "vs.engine",
                        error = %failure,
                        "Leave after join timeout failed"
                    );
                }
                Err(EngineError::new(
                    EngineErrorKind::Timeout,
                    format!("join did not complete within {:?}", self.join_timeout),
                )
                .into())
            }
        }
    }

    /// Leave the current room.
    ///
    /// # Errors
    ///
    /// Translated provider failure.
    pub async fn leave(&self) -> Result<(), RawError> {
        debug!(target: "vs.engine", "Leaving room");
        self.provider.leave().await.map_err(translate)
    }
}

/// Wraps the provider with a stable, provider-agnostic contract.
pub struct EngineAdapter {
    factory: Arc<dyn ProviderFactory>,
    provider: Option<Arc<dyn MediaProvider>>,
    join_timeout: Duration,
}

impl EngineAdapter {
    #[must_use]
    pub fn new(factory: Arc<dyn ProviderFactory>, join_timeout: Duration) -> Self {
        Self {
            factory,
            provider: None,
            join_timeout,
        }
    }

    /// Create the provider connection. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an engine `init-failed` error when the provider cannot be built.
    pub fn initialize(&mut self) -> Result<(), RawError> {
        if self.provider.is_some() {
            return Ok(());
        }

        let provider = self.factory.create().map_err(|failure| {
            warn!(target: "vs.engine", error = %failure, "Provider construction failed");
            RawError::from(EngineError::new(
                EngineErrorKind::InitFailed,
                failure.to_string(),
            ))
        })?;

        info!(target: "vs.engine", "Engine adapter initialized");
        self.provider = Some(provider);
        Ok(())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.provider.is_some()
    }

    fn provider(&self) -> Result<&Arc<dyn MediaProvider>, RawError> {
        self.provider.as_ref().ok_or_else(not_initialized)
    }

    /// A cloneable handle for join/leave work off the caller's task.
    ///
    /// # Errors
    ///
    /// `not-initialized` before `initialize`.
    pub fn connection(&self) -> Result<EngineConnection, RawError> {
        Ok(EngineConnection {
            provider: Arc::clone(self.provider()?),
            join_timeout: self.join_timeout,
        })
    }

    /// Subscribe to provider events.
    ///
    /// # Errors
    ///
    /// `not-initialized` before `initialize`.
    pub fn events(&self) -> Result<broadcast::Receiver<EngineEvent>, RawError> {
        Ok(self.provider()?.events())
    }

    /// # Errors
    ///
    /// `not-initialized`, the translated provider failure, or a join timeout.
    pub async fn join(&self, request: &JoinRequest) -> Result<ParticipantInfo, RawError> {
        self.connection()?.join(request).await
    }

    /// Leave the room. Safe to call when never initialized or never joined.
    ///
    /// # Errors
    ///
    /// Translated provider failure.
    pub async fn leave(&self) -> Result<(), RawError> {
        match self.connection() {
            Ok(connection) => connection.leave().await,
            Err(_) => Ok(()),
        }
    }

    /// Tear down and release the provider. Safe to call repeatedly.
    ///
    /// The provider is released even if its destroy call fails.
    ///
    /// # Errors
    ///
    /// Translated provider failure.
    pub async fn destroy(&mut self) -> Result<(), RawError> {
        let Some(provider) = self.provider.take() else {
            return Ok(());
        };
        info!(target: "vs.engine", "Destroying engine connection");
        provider.destroy().await.map_err(translate)
    }

    /// Current local media enablement.
    ///
    /// # Errors
    ///
    /// `not-initialized` before `initialize`.
    pub fn local_media(&self) -> Result<LocalMedia, RawError> {
        Ok(self.provider()?.local_media())
    }

    /// Flip local audio. Returns the new enablement.
    ///
    /// # Errors
    ///
    /// `not-initialized` or the translated provider failure.
    pub async fn toggle_audio(&self) -> Result<bool, RawError> {
        let provider = self.provider()?;
        let enabled = !provider.local_media().audio;
        provider.set_local_audio(enabled).await.map_err(translate)?;
        Ok(enabled)
    }

    /// Flip local video. Returns the new enablement.
    ///
    /// # Errors
    ///
    /// `not-initialized` or the translated provider failure.
    pub async fn toggle_video(&self) -> Result<bool, RawError> {
        let provider = self.provider()?;
        let enabled = !provider.local_media().video;
        provider.set_local_video(enabled).await.map_err(translate)?;
        Ok(enabled)
    }

    /// Start or stop screen sharing. Returns whether sharing is now active.
    ///
    /// # Errors
    ///
    /// `not-initialized` or the translated provider failure. A denied display
    /// picker surfaces as a device error.
    pub async fn toggle_screen_share(&self) -> Result<bool, RawError> {
        let provider = self.provider()?;
        if provider.local_media().screen {
            provider.stop_screen_share().await.map_err(translate)?;
            Ok(false)
        } else {
            provider.start_screen_share().await.map_err(translate)?;
            Ok(true)
        }
    }

    /// # Errors
    ///
    /// `not-initialized` or the translated provider failure.
    pub async fn send_app_message(&self, text: &str) -> Result<(), RawError> {
        self.provider()?
            .send_app_message(text)
            .await
            .map_err(translate)
    }

    /// # Errors
    ///
    /// `not-initialized` or the translated provider failure.
    pub async fn mute_participant(&self, session_id: &ParticipantSessionId) -> Result<(), RawError> {
        self.provider()?
            .set_participant_audio(session_id, false)
            .await
            .map_err(translate)
    }

    /// # Errors
    ///
    /// `not-initialized` or the translated provider failure.
    pub async fn remove_participant(
        &self,
        session_id: &ParticipantSessionId,
    ) -> Result<(), RawError> {
        self.provider()?
            .eject_participant(session_id)
            .await
            .map_err(translate)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::simulated::SimulatedProviderFactory;
    use crate::errors::{
        DeviceError, DeviceKind, ErrorOrigin, ProviderError, ProviderErrorCode,
    };
    use common::types::RoomUrl;

    fn request() -> JoinRequest {
        JoinRequest::new(RoomUrl::parse("https://video.example.com/a").unwrap(), "Ada")
    }

    fn adapter(factory: &SimulatedProviderFactory) -> EngineAdapter {
        EngineAdapter::new(Arc::new(factory.clone()), DEFAULT_JOIN_TIMEOUT)
    }

    fn engine_kind(err: &RawError) -> Option<&EngineErrorKind> {
        match err {
            RawError::Engine(e) => Some(&e.kind),
            _ => None,
        }
    }

    #[test]
    fn test_translate_engine_level_failures() {
        let cases = [
            (ProviderFailure::Network("x".into()), EngineErrorKind::Network),
            (ProviderFailure::Timeout("x".into()), EngineErrorKind::Timeout),
            (
                ProviderFailure::Connection("x".into()),
                EngineErrorKind::ConnectionFailed,
            ),
            (ProviderFailure::MeetingFull, EngineErrorKind::MeetingFull),
            (ProviderFailure::MeetingEnded, EngineErrorKind::MeetingEnded),
            (ProviderFailure::Internal("x".into()), EngineErrorKind::Internal),
        ];
        for (failure, kind) in cases {
            let raw = translate(failure);
            assert_eq!(engine_kind(&raw), Some(&kind));
        }
    }

    #[test]
    fn test_translate_keeps_provider_and_device_origin() {
        let raw = translate(ProviderFailure::Api(ProviderError::new(
            ProviderErrorCode::TokenExpired,
            "expired",
        )));
        assert_eq!(raw.origin(), ErrorOrigin::Provider);

        let raw = translate(ProviderFailure::Device(DeviceError::PermissionDenied(
            DeviceKind::Camera,
        )));
        assert_eq!(raw.origin(), ErrorOrigin::Device);
    }

    #[tokio::test]
    async fn test_calls_before_initialize_fail_not_initialized() {
        let factory = SimulatedProviderFactory::new();
        let adapter = adapter(&factory);

        let err = adapter.join(&request()).await.unwrap_err();
        assert_eq!(engine_kind(&err), Some(&EngineErrorKind::NotInitialized));

        let err = adapter.toggle_audio().await.unwrap_err();
        assert_eq!(engine_kind(&err), Some(&EngineErrorKind::NotInitialized));

        assert!(adapter.events().is_err());
    }

    #[tokio::test]
    async fn test_leave_and_destroy_before_initialize_are_noops() {
        let factory = SimulatedProviderFactory::new();
        let mut adapter = adapter(&factory);

        adapter.leave().await.unwrap();
        adapter.destroy().await.unwrap();
        adapter.destroy().await.unwrap();
        assert_eq!(factory.control().leave_calls(), 0);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let factory = SimulatedProviderFactory::new();
        let mut adapter = adapter(&factory);

        adapter.initialize().unwrap();
        adapter.initialize().unwrap();
        assert!(adapter.is_initialized());
        assert_eq!(factory.control().providers_created(), 1);
    }

    #[test]
    fn test_initialize_failure_is_init_failed() {
        let factory = SimulatedProviderFactory::new();
        factory
            .control()
            .fail_init(ProviderFailure::Internal("sdk bundle missing".into()));
        let mut adapter = adapter(&factory);

        let err = adapter.initialize().unwrap_err();
        assert_eq!(engine_kind(&err), Some(&EngineErrorKind::InitFailed));
        assert!(!adapter.is_initialized());

        // Next attempt succeeds
        adapter.initialize().unwrap();
    }

    #[tokio::test]
    async fn test_join_and_toggle() {
        let factory = SimulatedProviderFactory::new();
        let mut adapter = adapter(&factory);
        adapter.initialize().unwrap();

        let local = adapter.join(&request()).await.unwrap();
        assert!(local.local);
        assert!(local.audio);

        assert!(!adapter.toggle_audio().await.unwrap());
        assert!(adapter.toggle_audio().await.unwrap());
        assert!(adapter.toggle_screen_share().await.unwrap());
        assert!(adapter.local_media().unwrap().screen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_timeout_maps_to_engine_timeout() {
        let factory = SimulatedProviderFactory::new();
        factory.control().set_join_delay(Duration::from_secs(60));
        let mut adapter = EngineAdapter::new(Arc::new(factory.clone()), Duration::from_secs(5));
        adapter.initialize().unwrap();

        let err = adapter.join(&request()).await.unwrap_err();
        assert_eq!(engine_kind(&err), Some(&EngineErrorKind::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_join_ack_leaves_no_connection() {
        let factory = SimulatedProviderFactory::new();
        factory.control().set_join_ack_delay(Duration::from_secs(60));
        let mut adapter = EngineAdapter::new(Arc::new(factory.clone()), Duration::from_secs(5));
        adapter.initialize().unwrap();

        let err = adapter.join(&request()).await.unwrap_err();
        assert_eq!(engine_kind(&err), Some(&EngineErrorKind::Timeout));
        assert_eq!(factory.control().active_connections(), 0);
        assert_eq!(factory.control().leave_calls(), 1);

        // The same provider can join again
        factory.control().set_join_ack_delay(Duration::ZERO);
        adapter.join(&request()).await.unwrap();
        assert_eq!(factory.control().active_connections(), 1);
    }

    #[tokio::test]
    async fn test_leave_after_join_closes_connection() {
        let factory = SimulatedProviderFactory::new();
        let mut adapter = adapter(&factory);
        adapter.initialize().unwrap();
        adapter.join(&request()).await.unwrap();

        adapter.leave().await.unwrap();
        assert_eq!(factory.control().active_connections(), 0);
        assert_eq!(factory.control().leave_calls(), 1);
    }

    #[tokio::test]
    async fn test_destroy_releases_provider() {
        let factory = SimulatedProviderFactory::new();
        let mut adapter = adapter(&factory);
        adapter.initialize().unwrap();
        adapter.join(&request()).await.unwrap();
        assert_eq!(factory.control().active_connections(), 1);

        adapter.destroy().await.unwrap();
        assert!(!adapter.is_initialized());
        assert_eq!(factory.control().active_connections(), 0);
    }
}
