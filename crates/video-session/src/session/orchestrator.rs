//! `SessionOrchestrator` - owns one session's lifecycle.
//!
//! The actor is the only writer of session state. Engine joins and leaves run
//! on spawned tasks and report back through an internal completion channel,
//! so the actor keeps answering (and rejecting) requests while they run.
//! Every completion carries the epoch it started under; `destroy` bumps the
//! epoch, which turns anything still running into a no-op when it lands.

use super::messages::{Completion, MediaToggle, SessionMessage};
use super::state::{JoinPlan, LeavePlan, SessionPhase, SessionState, SessionStatus};
use crate::config::SessionSettings;
use crate::engine::{EngineAdapter, EngineConnection, JoinRequest, ParticipantInfo, ProviderFactory};
use crate::errors::{OrchestratorError, RawError};
use crate::media_state::{MediaState, MediaStateAggregator, SnapshotSubscription};
use crate::normalizer::{classify, ErrorLogEntry, ErrorNormalizer, NormalizedError};
use crate::observability::metrics;

use common::types::ParticipantSessionId;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the session mailbox.
const SESSION_CHANNEL_BUFFER: usize = 64;

/// Phase broadcast capacity. Slow phase observers see `Lagged`.
const PHASE_CHANNEL_CAPACITY: usize = 64;

type Reply = oneshot::Sender<Result<(), NormalizedError>>;

fn unavailable(detail: String) -> NormalizedError {
    warn!(target: "vs.session", detail = %detail, "Session orchestrator unreachable");
    classify(&OrchestratorError::Unavailable(detail).into())
}

/// Handle to a `SessionOrchestrator`.
#[derive(Clone)]
pub struct SessionOrchestratorHandle {
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    phases: broadcast::Sender<SessionPhase>,
    scope: Arc<str>,
}

impl fmt::Debug for SessionOrchestratorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOrchestratorHandle")
            .field("scope", &self.scope)
            .field("closed", &self.sender.is_closed())
            .finish_non_exhaustive()
    }
}

impl SessionOrchestratorHandle {
    /// Registry scope this session was created under.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Observe phase transitions.
    #[must_use]
    pub fn phase_changes(&self) -> broadcast::Receiver<SessionPhase> {
        self.phases.subscribe()
    }

    /// Stop the actor. Tears the session down on the way out.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Whether the actor has exited.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> SessionMessage,
    ) -> Result<T, NormalizedError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|e| unavailable(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| unavailable(format!("response receive failed: {e}")))
    }

    /// Join a room. Re-joining the current room is a no-op; joining another
    /// room leaves the current one first.
    ///
    /// # Errors
    ///
    /// Any join failure, normalized.
    pub async fn join(&self, request: JoinRequest) -> Result<(), NormalizedError> {
        self.request(|respond_to| SessionMessage::Join {
            request,
            respond_to,
        })
        .await?
    }

    /// Leave the current room. A no-op when idle.
    ///
    /// # Errors
    ///
    /// `join-in-progress` while joining, or the engine's leave failure.
    pub async fn leave(&self) -> Result<(), NormalizedError> {
        self.request(|respond_to| SessionMessage::Leave { respond_to })
            .await?
    }

    /// Unconditional teardown. The session can be joined again afterwards.
    ///
    /// # Errors
    ///
    /// `session-unavailable` if the actor is gone.
    pub async fn destroy(&self) -> Result<(), NormalizedError> {
        self.request(|respond_to| SessionMessage::Destroy { respond_to })
            .await
    }

    async fn toggle(&self, toggle: MediaToggle) -> Result<bool, NormalizedError> {
        self.request(|respond_to| SessionMessage::ToggleMedia { toggle, respond_to })
            .await?
    }

    /// Flip the microphone. Returns the new enablement.
    ///
    /// # Errors
    ///
    /// `not-joined` outside a joined session, or the engine failure.
    pub async fn toggle_audio(&self) -> Result<bool, NormalizedError> {
        self.toggle(MediaToggle::Audio).await
    }

    /// Flip the camera. Returns the new enablement.
    ///
    /// # Errors
    ///
    /// `not-joined` outside a joined session, or the engine failure.
    pub async fn toggle_video(&self) -> Result<bool, NormalizedError> {
        self.toggle(MediaToggle::Video).await
    }

    /// Start or stop screen sharing. Returns whether sharing is now active.
    ///
    /// # Errors
    ///
    /// `not-joined` outside a joined session, or the engine failure.
    pub async fn toggle_screen_share(&self) -> Result<bool, NormalizedError> {
        self.toggle(MediaToggle::ScreenShare).await
    }

    /// # Errors
    ///
    /// `not-joined` outside a joined session, or the engine failure.
    pub async fn send_chat_message(&self, text: impl Into<String>) -> Result<(), NormalizedError> {
        let text = text.into();
        self.request(|respond_to| SessionMessage::SendChatMessage { text, respond_to })
            .await?
    }

    /// Moderation: mute a participant's audio.
    ///
    /// # Errors
    ///
    /// `not-joined` outside a joined session, or the engine failure.
    pub async fn mute_participant(
        &self,
        session_id: ParticipantSessionId,
    ) -> Result<(), NormalizedError> {
        self.request(|respond_to| SessionMessage::MuteParticipant {
            session_id,
            respond_to,
        })
        .await?
    }

    /// Moderation: remove a participant from the room.
    ///
    /// # Errors
    ///
    /// `not-joined` outside a joined session, or the engine failure.
    pub async fn remove_participant(
        &self,
        session_id: ParticipantSessionId,
    ) -> Result<(), NormalizedError> {
        self.request(|respond_to| SessionMessage::RemoveParticipant {
            session_id,
            respond_to,
        })
        .await?
    }

    /// Register for every media state snapshot from now on.
    ///
    /// # Errors
    ///
    /// `session-unavailable` if the actor is gone.
    pub async fn subscribe(&self) -> Result<SnapshotSubscription, NormalizedError> {
        self.request(|respond_to| SessionMessage::Subscribe { respond_to })
            .await
    }

    /// The current media state snapshot.
    ///
    /// # Errors
    ///
    /// `session-unavailable` if the actor is gone.
    pub async fn media_state(&self) -> Result<Arc<MediaState>, NormalizedError> {
        self.request(|respond_to| SessionMessage::GetMediaState { respond_to })
            .await
    }

    /// # Errors
    ///
    /// `session-unavailable` if the actor is gone.
    pub async fn status(&self) -> Result<SessionStatus, NormalizedError> {
        self.request(|respond_to| SessionMessage::GetStatus { respond_to })
            .await
    }

    /// Rolling diagnostic log, oldest first.
    ///
    /// # Errors
    ///
    /// `session-unavailable` if the actor is gone.
    pub async fn recent_errors(&self) -> Result<Vec<ErrorLogEntry>, NormalizedError> {
        self.request(|respond_to| SessionMessage::GetErrorLog { respond_to })
            .await
    }

    /// Rolling diagnostic log as JSON.
    ///
    /// # Errors
    ///
    /// `session-unavailable` if the actor is gone.
    pub async fn export_error_log(&self) -> Result<String, NormalizedError> {
        let entries = self.recent_errors().await?;
        serde_json::to_string(&entries)
            .map_err(|e| classify(&RawError::Unrecognized(format!("error log export: {e}"))))
    }
}

/// A join waiting for a leave to finish.
struct PendingJoin {
    request: JoinRequest,
    respond_to: Reply,
    kind: PendingKind,
}

enum PendingKind {
    /// Issued while joined to another room; runs after leave plus settle delay.
    RoomSwitch,
    /// Issued while a leave was already running; bounded by the settle timeout.
    AwaitingLeave { wait_id: u64 },
}

/// The `SessionOrchestrator` implementation.
pub struct SessionOrchestrator {
    /// Registry scope.
    scope: Arc<str>,
    /// Message receiver.
    receiver: mpsc::Receiver<SessionMessage>,
    /// Cancellation token.
    cancel_token: CancellationToken,
    /// Completions from spawned engine work.
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    /// Phase broadcast.
    phases: broadcast::Sender<SessionPhase>,
    settings: SessionSettings,
    engine: EngineAdapter,
    aggregator: MediaStateAggregator,
    normalizer: ErrorNormalizer,
    state: SessionState,
    /// Bumped by teardown; completions from older epochs are ignored.
    epoch: u64,
    in_flight_join: Option<Reply>,
    pending_join: Option<PendingJoin>,
    leave_in_flight: bool,
    leave_waiters: Vec<Reply>,
    next_wait_id: u64,
}

impl SessionOrchestrator {
    /// Spawn a new session orchestrator.
    ///
    /// Returns a handle and the task join handle.
    ///
    /// # Arguments
    ///
    /// * `scope` - Registry key, used in logs
    /// * `factory` - Builds the provider connection on first join
    /// * `settings` - Timeouts and error log sizing
    /// * `cancel_token` - Stops the actor (may be a child of a parent token)
    pub fn spawn(
        scope: impl Into<String>,
        factory: Arc<dyn ProviderFactory>,
        settings: SessionSettings,
        cancel_token: CancellationToken,
    ) -> (SessionOrchestratorHandle, JoinHandle<()>) {
        let scope: Arc<str> = Arc::from(scope.into());
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (phases, _) = broadcast::channel(PHASE_CHANNEL_CAPACITY);

        let actor = Self {
            scope: Arc::clone(&scope),
            receiver,
            cancel_token: cancel_token.clone(),
            completions_tx,
            completions_rx,
            phases: phases.clone(),
            engine: EngineAdapter::new(factory, settings.join_timeout),
            aggregator: MediaStateAggregator::new(),
            normalizer: ErrorNormalizer::new(settings.error_log_capacity),
            settings,
            state: SessionState::Idle,
            epoch: 0,
            in_flight_join: None,
            pending_join: None,
            leave_in_flight: false,
            leave_waiters: Vec::new(),
            next_wait_id: 0,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionOrchestratorHandle {
            sender,
            cancel_token,
            phases,
            scope,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "vs.session", fields(scope = %self.scope))]
    async fn run(mut self) {
        info!(target: "vs.session", scope = %self.scope, "SessionOrchestrator started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "vs.session",
                        scope = %self.scope,
                        "SessionOrchestrator received cancellation signal"
                    );
                    break;
                }

                Some(completion) = self.completions_rx.recv() => {
                    self.handle_completion(completion).await;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(
                                target: "vs.session",
                                scope = %self.scope,
                                "SessionOrchestrator channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.teardown("shutdown").await;
        info!(target: "vs.session", scope = %self.scope, "SessionOrchestrator stopped");
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Join {
                request,
                respond_to,
            } => self.handle_join(request, respond_to),

            SessionMessage::Leave { respond_to } => self.handle_leave(respond_to),

            SessionMessage::Destroy { respond_to } => {
                self.teardown("destroy").await;
                let _ = respond_to.send(());
            }

            SessionMessage::ToggleMedia { toggle, respond_to } => {
                let result = self.handle_toggle(toggle).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::SendChatMessage { text, respond_to } => {
                let result = self.handle_chat(&text).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::MuteParticipant {
                session_id,
                respond_to,
            } => {
                let result = match self.require_joined("mute-participant") {
                    Ok(()) => {
                        let outcome = self.engine.mute_participant(&session_id).await;
                        self.settle_action(outcome, "mute-participant").await
                    }
                    Err(e) => Err(e),
                };
                let _ = respond_to.send(result);
            }

            SessionMessage::RemoveParticipant {
                session_id,
                respond_to,
            } => {
                let result = match self.require_joined("remove-participant") {
                    Ok(()) => {
                        let outcome = self.engine.remove_participant(&session_id).await;
                        self.settle_action(outcome, "remove-participant").await
                    }
                    Err(e) => Err(e),
                };
                let _ = respond_to.send(result);
            }

            SessionMessage::Subscribe { respond_to } => {
                let _ = respond_to.send(self.aggregator.subscribe());
            }

            SessionMessage::GetMediaState { respond_to } => {
                let _ = respond_to.send(self.aggregator.snapshot());
            }

            SessionMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }

            SessionMessage::GetErrorLog { respond_to } => {
                let _ = respond_to.send(self.normalizer.log().entries());
            }
        }
    }

    async fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Join {
                epoch,
                started_at,
                result,
            } => self.finish_join(epoch, started_at, result).await,
            Completion::Leave { epoch, result } => self.finish_leave(epoch, result).await,
            Completion::SwitchSettled { epoch } => self.finish_switch(epoch),
            Completion::LeaveWaitExpired { epoch, wait_id } => {
                self.expire_leave_wait(epoch, wait_id);
            }
        }
    }

    // ------------------------------------------------------------------
    // Join
    // ------------------------------------------------------------------

    fn handle_join(&mut self, request: JoinRequest, respond_to: Reply) {
        match self.state.plan_join(&request.room_url) {
            JoinPlan::Start => self.begin_join(request, respond_to),

            JoinPlan::AlreadyJoined => {
                debug!(
                    target: "vs.session",
                    room = %request.room_url,
                    "Already joined to requested room"
                );
                let _ = respond_to.send(Ok(()));
            }

            JoinPlan::SwitchRoom => {
                info!(
                    target: "vs.session",
                    from = ?self.state.room().map(|room| room.as_str()),
                    to = %request.room_url,
                    "Switching rooms"
                );
                self.pending_join = Some(PendingJoin {
                    request,
                    respond_to,
                    kind: PendingKind::RoomSwitch,
                });
                self.begin_leave();
            }

            JoinPlan::AwaitLeave => {
                if self.pending_join.is_some() {
                    let err = self.reject(OrchestratorError::JoinInProgress, "join");
                    let _ = respond_to.send(Err(err));
                    return;
                }
                let wait_id = self.next_wait_id;
                self.next_wait_id += 1;
                debug!(
                    target: "vs.session",
                    room = %request.room_url,
                    wait_id,
                    "Join queued behind running leave"
                );
                self.schedule(
                    self.settings.leave_settle_timeout,
                    Completion::LeaveWaitExpired {
                        epoch: self.epoch,
                        wait_id,
                    },
                );
                self.pending_join = Some(PendingJoin {
                    request,
                    respond_to,
                    kind: PendingKind::AwaitingLeave { wait_id },
                });
            }

            JoinPlan::RecoverThenStart { fatal, cause_code } => {
                if fatal && !self.settings.allow_rejoin_after_fatal {
                    let err = self.reject(OrchestratorError::RejoinBlocked(cause_code), "join");
                    let _ = respond_to.send(Err(err));
                    return;
                }
                if fatal {
                    warn!(
                        target: "vs.session",
                        cause = %cause_code,
                        "Rejoining after non-recoverable error"
                    );
                }
                self.transition(SessionState::Idle);
                self.begin_join(request, respond_to);
            }

            JoinPlan::Reject(err) => {
                let err = self.reject(err, "join");
                let _ = respond_to.send(Err(err));
            }
        }
    }

    fn prepare_engine(&mut self) -> Result<EngineConnection, RawError> {
        self.engine.initialize()?;
        if !self.aggregator.is_attached() {
            self.aggregator.attach(self.engine.events()?);
        }
        self.engine.connection()
    }

    fn begin_join(&mut self, request: JoinRequest, respond_to: Reply) {
        let connection = match self.prepare_engine() {
            Ok(connection) => connection,
            Err(raw) => {
                let cause = self.normalize(&raw, "initialize");
                self.transition(SessionState::Error {
                    cause: cause.clone(),
                });
                let _ = respond_to.send(Err(cause));
                return;
            }
        };

        info!(target: "vs.session", room = %request.room_url, "Joining room");
        self.transition(SessionState::Joining {
            room: request.room_url.clone(),
        });
        self.in_flight_join = Some(respond_to);

        let epoch = self.epoch;
        let completions = self.completions_tx.clone();
        let started_at = Instant::now();
        tokio::spawn(async move {
            let result = connection.join(&request).await;
            let _ = completions.send(Completion::Join {
                epoch,
                started_at,
                result,
            });
        });
    }

    async fn finish_join(
        &mut self,
        epoch: u64,
        started_at: Instant,
        result: Result<ParticipantInfo, RawError>,
    ) {
        if self.is_stale(epoch, "join") {
            return;
        }
        let SessionState::Joining { room } = &self.state else {
            warn!(target: "vs.session", state = %self.state.phase(), "Join completed outside joining");
            return;
        };
        let room = room.clone();
        let Some(respond_to) = self.in_flight_join.take() else {
            return;
        };

        match result {
            Ok(local) => {
                metrics::record_join_duration("success", started_at.elapsed());
                self.aggregator.record_local_join(&local);
                info!(
                    target: "vs.session",
                    room = %room,
                    session_id = %local.session_id,
                    "Session joined"
                );
                self.transition(SessionState::Joined { room });
                let _ = respond_to.send(Ok(()));
            }
            Err(raw) => {
                metrics::record_join_duration("error", started_at.elapsed());
                self.aggregator.flush().await;
                self.aggregator.reset();
                let cause = self.normalize(&raw, "join");
                self.transition(SessionState::Error {
                    cause: cause.clone(),
                });
                let _ = respond_to.send(Err(cause));
            }
        }
    }

    fn finish_switch(&mut self, epoch: u64) {
        if self.is_stale(epoch, "room-switch") {
            return;
        }
        let Some(pending) = self.pending_join.take() else {
            return;
        };
        self.transition(SessionState::Idle);
        self.handle_join(pending.request, pending.respond_to);
    }

    fn expire_leave_wait(&mut self, epoch: u64, wait_id: u64) {
        if self.is_stale(epoch, "leave-wait") {
            return;
        }
        let expired = matches!(
            &self.pending_join,
            Some(PendingJoin { kind: PendingKind::AwaitingLeave { wait_id: id }, .. }) if *id == wait_id
        );
        if !expired {
            return;
        }
        if let Some(pending) = self.pending_join.take() {
            let err = self.reject(
                OrchestratorError::LeaveTimeout(self.settings.leave_settle_timeout),
                "join",
            );
            let _ = pending.respond_to.send(Err(err));
        }
    }

    // ------------------------------------------------------------------
    // Leave
    // ------------------------------------------------------------------

    fn handle_leave(&mut self, respond_to: Reply) {
        match self.state.plan_leave() {
            LeavePlan::AlreadyIdle => {
                let _ = respond_to.send(Ok(()));
            }

            LeavePlan::Start => {
                self.leave_waiters.push(respond_to);
                self.begin_leave();
            }

            LeavePlan::AwaitCurrent => {
                // An explicit leave wins over a queued join
                if let Some(pending) = self.pending_join.take() {
                    let err = self.reject(OrchestratorError::JoinCancelled, "join");
                    let _ = pending.respond_to.send(Err(err));
                }
                if self.leave_in_flight {
                    self.leave_waiters.push(respond_to);
                } else {
                    // Engine leave already finished; only the switch delay was pending
                    self.transition(SessionState::Idle);
                    let _ = respond_to.send(Ok(()));
                }
            }

            LeavePlan::ResetFromError => {
                self.aggregator.reset();
                self.transition(SessionState::Idle);
                let _ = respond_to.send(Ok(()));
            }

            LeavePlan::Reject(err) => {
                let err = self.reject(err, "leave");
                let _ = respond_to.send(Err(err));
            }
        }
    }

    fn begin_leave(&mut self) {
        self.transition(SessionState::Leaving);
        self.leave_in_flight = true;

        let epoch = self.epoch;
        let completions = self.completions_tx.clone();
        match self.engine.connection() {
            Ok(connection) => {
                tokio::spawn(async move {
                    let result = connection.leave().await;
                    let _ = completions.send(Completion::Leave { epoch, result });
                });
            }
            Err(_) => {
                let _ = completions.send(Completion::Leave {
                    epoch,
                    result: Ok(()),
                });
            }
        }
    }

    async fn finish_leave(&mut self, epoch: u64, result: Result<(), RawError>) {
        if self.is_stale(epoch, "leave") || self.state != SessionState::Leaving {
            return;
        }
        self.leave_in_flight = false;
        self.aggregator.flush().await;
        self.aggregator.reset();

        let result = result.map_err(|raw| self.normalize(&raw, "leave"));
        for waiter in self.leave_waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }

        match (result, self.pending_join.take()) {
            (Err(cause), pending) => {
                // The provider may still be connected; the next join starts fresh
                self.release_engine("leave-failed").await;
                self.transition(SessionState::Error {
                    cause: cause.clone(),
                });
                if let Some(pending) = pending {
                    let _ = pending.respond_to.send(Err(cause));
                }
            }
            (Ok(()), Some(pending)) if matches!(pending.kind, PendingKind::RoomSwitch) => {
                debug!(
                    target: "vs.session",
                    delay_ms = self.settings.room_switch_delay.as_millis(),
                    "Previous room left, settling before switch"
                );
                self.pending_join = Some(pending);
                self.schedule(
                    self.settings.room_switch_delay,
                    Completion::SwitchSettled { epoch: self.epoch },
                );
            }
            (Ok(()), Some(pending)) => {
                self.transition(SessionState::Idle);
                self.handle_join(pending.request, pending.respond_to);
            }
            (Ok(()), None) => {
                info!(target: "vs.session", "Session left");
                self.transition(SessionState::Idle);
            }
        }
    }

    // ------------------------------------------------------------------
    // Media and moderation actions
    // ------------------------------------------------------------------

    fn require_joined(&mut self, context: &'static str) -> Result<(), NormalizedError> {
        if self.state.accepts_actions() {
            Ok(())
        } else {
            Err(self.reject(OrchestratorError::NotJoined, context))
        }
    }

    async fn handle_toggle(&mut self, toggle: MediaToggle) -> Result<bool, NormalizedError> {
        self.require_joined(toggle.as_str())?;
        let outcome = match toggle {
            MediaToggle::Audio => self.engine.toggle_audio().await,
            MediaToggle::Video => self.engine.toggle_video().await,
            MediaToggle::ScreenShare => self.engine.toggle_screen_share().await,
        };
        self.settle_action(outcome, toggle.as_str()).await
    }

    async fn handle_chat(&mut self, text: &str) -> Result<(), NormalizedError> {
        self.require_joined("send-chat-message")?;
        if text.trim().is_empty() {
            debug!(target: "vs.session", "Ignoring empty chat message");
            return Ok(());
        }
        let outcome = self.engine.send_app_message(text).await;
        self.settle_action(outcome, "send-chat-message").await
    }

    /// Normalize a failed action, or wait until its engine events are folded.
    async fn settle_action<T>(
        &mut self,
        outcome: Result<T, RawError>,
        context: &'static str,
    ) -> Result<T, NormalizedError> {
        match outcome {
            Ok(value) => {
                self.aggregator.flush().await;
                Ok(value)
            }
            Err(raw) => Err(self.normalize(&raw, context)),
        }
    }

    // ------------------------------------------------------------------
    // Teardown and helpers
    // ------------------------------------------------------------------

    async fn teardown(&mut self, reason: &'static str) {
        self.epoch += 1;
        info!(
            target: "vs.session",
            scope = %self.scope,
            reason,
            epoch = self.epoch,
            "Tearing down session"
        );

        if let Some(respond_to) = self.in_flight_join.take() {
            let err = self.reject(OrchestratorError::Destroyed, "join");
            let _ = respond_to.send(Err(err));
        }
        if let Some(pending) = self.pending_join.take() {
            let err = self.reject(OrchestratorError::Destroyed, "join");
            let _ = pending.respond_to.send(Err(err));
        }
        for waiter in self.leave_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
        self.leave_in_flight = false;

        if let Err(raw) = self.engine.destroy().await {
            self.normalize(&raw, "destroy");
        }
        self.aggregator.destroy();
        self.transition(SessionState::Idle);
    }

    /// Drop the provider without touching phase or pending work.
    async fn release_engine(&mut self, reason: &'static str) {
        if !self.engine.is_initialized() {
            return;
        }
        warn!(target: "vs.session", reason, "Releasing provider connection");
        self.aggregator.detach();
        if let Err(raw) = self.engine.destroy().await {
            self.normalize(&raw, "release");
        }
    }

    fn schedule(&self, delay: Duration, completion: Completion) {
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = completions.send(completion);
        });
    }

    fn is_stale(&self, epoch: u64, operation: &'static str) -> bool {
        if epoch == self.epoch {
            return false;
        }
        debug!(
            target: "vs.session",
            operation,
            epoch,
            current_epoch = self.epoch,
            "Ignoring completion from before teardown"
        );
        true
    }

    fn normalize(&mut self, raw: &RawError, context: &str) -> NormalizedError {
        self.normalizer.handle(raw, Some(context))
    }

    fn reject(&mut self, err: OrchestratorError, context: &str) -> NormalizedError {
        self.normalize(&err.into(), context)
    }

    fn transition(&mut self, next: SessionState) {
        let from = self.state.phase();
        let to = next.phase();
        self.state = next;
        if from != to {
            debug!(
                target: "vs.session",
                scope = %self.scope,
                from = %from,
                to = %to,
                "Session phase changed"
            );
            metrics::record_session_transition(to.as_str());
            let _ = self.phases.send(to);
        }
    }

    fn status(&self) -> SessionStatus {
        let snapshot = self.aggregator.snapshot();
        SessionStatus {
            phase: self.state.phase(),
            room: self.state.room().cloned(),
            participant_count: snapshot.participant_count(),
            local_session_id: snapshot.local_session_id.clone(),
            last_error: self.state.error().cloned(),
        }
    }
}
