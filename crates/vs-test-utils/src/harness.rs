//! Session orchestrator wired to the simulated provider.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use video_session::config::SessionSettings;
use video_session::engine::{SimulatedControl, SimulatedProvider, SimulatedProviderFactory};
use video_session::session::{SessionOrchestrator, SessionOrchestratorHandle};

/// Default scope for harness sessions.
pub const HARNESS_SCOPE: &str = "test";

/// Settings with short timing windows, for tests without paused time.
#[must_use]
pub fn fast_settings() -> SessionSettings {
    SessionSettings {
        join_timeout: Duration::from_secs(5),
        leave_settle_timeout: Duration::from_millis(500),
        room_switch_delay: Duration::from_millis(10),
        ..SessionSettings::default()
    }
}

/// One orchestrator plus the simulated provider behind it.
///
/// Dropping the harness cancels the orchestrator.
pub struct SessionHarness {
    factory: SimulatedProviderFactory,
    handle: SessionOrchestratorHandle,
    task: Option<JoinHandle<()>>,
    cancel_token: CancellationToken,
}

impl SessionHarness {
    /// Harness with [`fast_settings`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(fast_settings())
    }

    #[must_use]
    pub fn with_settings(settings: SessionSettings) -> Self {
        Self::with_factory(SimulatedProviderFactory::new(), settings)
    }

    /// Harness around an existing factory, e.g. one with failures queued.
    #[must_use]
    pub fn with_factory(factory: SimulatedProviderFactory, settings: SessionSettings) -> Self {
        let cancel_token = CancellationToken::new();
        let (handle, task) = SessionOrchestrator::spawn(
            HARNESS_SCOPE,
            Arc::new(factory.clone()),
            settings,
            cancel_token.clone(),
        );
        Self {
            factory,
            handle,
            task: Some(task),
            cancel_token,
        }
    }

    #[must_use]
    pub fn handle(&self) -> &SessionOrchestratorHandle {
        &self.handle
    }

    #[must_use]
    pub fn control(&self) -> &SimulatedControl {
        self.factory.control()
    }

    /// The provider the session is currently using.
    ///
    /// # Panics
    ///
    /// Before the first join initializes the engine.
    #[must_use]
    pub fn provider(&self) -> Arc<SimulatedProvider> {
        self.control()
            .provider()
            .expect("no provider yet; join first")
    }

    /// Cancel the orchestrator and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.cancel_token.cancel();
        if let Some(task) = self.task.take() {
            task.await.expect("orchestrator task panicked");
        }
    }
}

impl Default for SessionHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionHarness {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
