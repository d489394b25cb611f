//! Tap-driven flow coordinator.
//!
//! A [`TapFlow`] is the single owner of everything one screen needs to talk
//! to a token: the [`TokenSessionManager`], the [`AuthenticationGate`], the
//! [`PendingActionQueue`] and, for poll/feed token families, the running
//! [`CardProtocolEngine`]. Taps, secret submissions and engine events are
//! independent triggers; the flow handles them one at a time and reports
//! everything the UI needs through a [`FlowEvent`] stream.
//!
//! # Architecture
//!
//! ```text
//!  FlowHandle ──commands──▶┌──────────────┐──FlowEvent──▶ UI
//!                          │   TapFlow    │
//!  TagDetector ──scans────▶│  (one task)  │──execute───▶ ActionExecutor
//!                          └──────────────┘
//!                             ▲        │ spawn per session
//!                EngineEvent  │        ▼
//!                          CardProtocolEngine
//! ```
//!
//! # Examples
//!
//! ```no_run
//! use tapsign_core::WalletId;
//! use tapsign_hardware::AnyDetector;
//! use tapsign_hardware::mock::MockDetector;
//! use tapsign_session::{FlowConfig, PendingAction, TapFlow};
//! use tapsign_session::mock::MockSigner;
//!
//! #[tokio::main]
//! async fn main() -> tapsign_session::Result<()> {
//!     let (detector, _taps) = MockDetector::new();
//!     let (signer, _signer_handle) = MockSigner::new();
//!     let (flow, mut events) =
//!         TapFlow::new(FlowConfig::default(), AnyDetector::Mock(detector), signer)?;
//!
//!     let handle = flow.spawn();
//!     handle
//!         .enqueue(PendingAction::ExportWallet(WalletId::new("vault")?))
//!         .await?;
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!     handle.shutdown().await
//! }
//! ```

use crate::action::{ActionOutput, PendingAction};
use crate::auth::{AuthenticationGate, DeviceAuthStatus, FailureOutcome};
use crate::classifier::{ErrorKind, classify, reported_attempts};
use crate::config::FlowConfig;
use crate::error::{Result, SessionError};
use crate::executor::{ActionExecutor, ExecutionContext};
use crate::pending::{Dispatch, PendingActionQueue, Readiness};
use crate::session::TokenSessionManager;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tapsign_core::{RequestCode, Secret};
use tapsign_hardware::{AnyDetector, ScanEvent};
use tapsign_protocol::{AnyProtocol, CardProtocolEngine, EngineEvent, EngineOutcome};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Capacity of the internal engine event channel.
const ENGINE_CHANNEL_CAPACITY: usize = 8;

/// Capacity of the command channel behind a [`FlowHandle`].
const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// Everything the UI is told.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FlowEvent {
    PromptForTap {
        request_code: RequestCode,
    },
    PromptForSecret {
        request_code: RequestCode,
        attempts_remaining: u8,
    },
    WrongSecret {
        attempts_remaining: u8,
    },
    /// The flow is over; start a new one to continue.
    LockedOut,
    Progress(FlowProgress),
    Success(ActionOutput),
    Failure {
        kind: ErrorKind,
        detail: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum FlowProgress {
    SessionOpened { session_id: Uuid },
    HandshakeCompleted { session_id: Uuid },
    Executing { action: String },
    SessionLost,
}

/// Coordinator for one tap-driven flow.
pub struct TapFlow<E> {
    config: FlowConfig,
    sessions: TokenSessionManager,
    gate: AuthenticationGate,
    queue: PendingActionQueue,
    executor: Arc<E>,
    protocol: Option<Arc<AnyProtocol>>,
    events: mpsc::Sender<FlowEvent>,
    engine_tx: mpsc::Sender<EngineEvent>,
    engine_rx: mpsc::Receiver<EngineEvent>,
    deferred_engine_events: VecDeque<EngineEvent>,
    engine_task: Option<JoinHandle<()>>,
    request_code: Option<RequestCode>,
    secret_required: bool,
    disconnects: u8,
    tap_prompted: bool,
    secret_prompted: bool,
    shutdown: CancellationToken,
}

fn readiness(
    sessions: &TokenSessionManager,
    gate: &AuthenticationGate,
    secret_required: bool,
    action: &PendingAction,
) -> Readiness {
    Readiness {
        session_active: sessions.is_session_ready(),
        secret_required: secret_required && action.needs_secret(),
        secret_held: gate.has_secret(),
        locked_out: gate.is_locked_out(),
    }
}

impl<E: ActionExecutor> TapFlow<E> {
    /// Create a flow and the receiving end of its event stream.
    ///
    /// # Errors
    /// Returns `Core(Error::Config)` if `config` does not validate.
    pub fn new(
        config: FlowConfig,
        detector: AnyDetector,
        executor: E,
    ) -> Result<(Self, mpsc::Receiver<FlowEvent>)> {
        config.validate()?;

        let (events, events_rx) = mpsc::channel(config.event_channel_capacity);
        let (engine_tx, engine_rx) = mpsc::channel(ENGINE_CHANNEL_CAPACITY);

        let flow = Self {
            sessions: TokenSessionManager::from_config(detector, &config),
            gate: AuthenticationGate::from_config(&config),
            queue: PendingActionQueue::new(),
            executor: Arc::new(executor),
            protocol: None,
            events,
            engine_tx,
            engine_rx,
            deferred_engine_events: VecDeque::new(),
            engine_task: None,
            request_code: None,
            secret_required: false,
            disconnects: 0,
            tap_prompted: false,
            secret_prompted: false,
            shutdown: CancellationToken::new(),
            config,
        };
        Ok((flow, events_rx))
    }

    /// Drive sessions through a poll/feed protocol loop before actions run.
    pub fn with_protocol(mut self, protocol: AnyProtocol) -> Self {
        self.protocol = Some(Arc::new(protocol));
        self
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn gate(&self) -> &AuthenticationGate {
        &self.gate
    }

    pub fn queue(&self) -> &PendingActionQueue {
        &self.queue
    }

    pub fn sessions(&self) -> &TokenSessionManager {
        &self.sessions
    }

    pub fn request_code(&self) -> Option<RequestCode> {
        self.request_code
    }

    pub fn secret_required(&self) -> bool {
        self.secret_required
    }

    /// Begin a flow for `code`, discarding whatever the previous flow held.
    ///
    /// `requires_secret` overrides the exempt-code lookup. Returns false if
    /// the flow could not arm for a tap; a `Failure` has been emitted then.
    pub async fn start_flow(&mut self, code: RequestCode, requires_secret: Option<bool>) -> bool {
        self.reset_flow();
        self.request_code = Some(code);
        self.secret_required = requires_secret.unwrap_or_else(|| self.gate.requires_secret(code));
        info!(%code, secret_required = self.secret_required, "Flow started");

        if !self.prompt_tap().await {
            return false;
        }
        if self.secret_required {
            self.prompt_secret().await;
        }
        true
    }

    /// Queue `action`, replacing any action not yet run.
    ///
    /// Starts a flow for the action's request code if none is running.
    pub async fn enqueue(&mut self, action: PendingAction) {
        if self.request_code.is_none() && !self.start_flow(action.request_code(), None).await {
            return;
        }
        if self.gate.is_locked_out() {
            warn!(action = %action, "Flow locked out; action refused");
            self.emit(FlowEvent::LockedOut).await;
            return;
        }

        if !self.gate.has_secret()
            && let Some(fingerprint) = action.fingerprint()
            && self.gate.recall(fingerprint)
        {
            debug!(%fingerprint, "Reusing secret for signer");
        }

        let dispatch = self.queue.enqueue(action, |action| {
            readiness(&self.sessions, &self.gate, self.secret_required, action)
        });
        self.pump(dispatch).await;
    }

    /// Hold `secret` for the pending action and run it if a session is up.
    pub async fn submit_secret(&mut self, secret: Secret) {
        match self.gate.submit_secret(secret) {
            Ok(()) => self.secret_prompted = false,
            Err(SessionError::LockedOut) => {
                self.emit(FlowEvent::LockedOut).await;
                return;
            }
            Err(e) => {
                self.on_failure(None, e).await;
                return;
            }
        }

        let dispatch = self.queue.on_secret_submitted(|action| {
            readiness(&self.sessions, &self.gate, self.secret_required, action)
        });
        self.pump(dispatch).await;
    }

    /// Abandon the flow: the pending action, the secret and the session.
    pub async fn cancel(&mut self) {
        info!(code = ?self.request_code.map(|c| c.as_u16()), "Flow cancelled");
        self.reset_flow();
        self.request_code = None;
    }

    /// Consume one tap.
    pub async fn on_scan(&mut self, event: ScanEvent) {
        let session_id = match self.sessions.on_tag_detected(event) {
            Ok(Some(id)) => id,
            Ok(None) => return,
            Err(e) => {
                self.on_failure(None, e).await;
                return;
            }
        };

        self.stop_engine();
        self.tap_prompted = false;
        self.emit(FlowEvent::Progress(FlowProgress::SessionOpened { session_id }))
            .await;

        match self.protocol.clone() {
            Some(protocol) => self.start_engine(session_id, protocol),
            None => {
                self.sessions.mark_ready(session_id);
                self.on_session_ready().await;
            }
        }
    }

    /// Wait for the detector's next tap and consume it.
    ///
    /// # Errors
    /// Returns `Transport` if the detector has no more taps to deliver.
    pub async fn process_next_scan(&mut self) -> Result<()> {
        let event = self.sessions.next_scan().await?;
        self.on_scan(event).await;
        Ok(())
    }

    /// Handle a lifecycle event from the protocol engine.
    pub async fn on_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Established { session_id } => {
                if !self.sessions.mark_ready(session_id) {
                    debug!(session = %session_id, "Handshake for a replaced session");
                    return;
                }
                self.emit(FlowEvent::Progress(FlowProgress::HandshakeCompleted {
                    session_id,
                }))
                .await;
                self.on_session_ready().await;
            }
            EngineEvent::Stopped {
                session_id,
                outcome,
            } => {
                if self.sessions.session_id() != Some(session_id) {
                    debug!(session = %session_id, "Engine stopped for a replaced session");
                    return;
                }
                self.engine_task = None;
                match outcome {
                    EngineOutcome::Completed | EngineOutcome::Cancelled => {
                        debug!(session = %session_id, "Protocol loop ended");
                    }
                    outcome => {
                        let error = outcome
                            .into_error()
                            .map_or(SessionError::NoSession, SessionError::Protocol);
                        self.on_failure(None, error).await;
                    }
                }
            }
        }
    }

    /// Release the detector, the session and the protocol loop.
    pub fn teardown(&mut self) {
        self.queue.clear();
        self.stop_engine();
        self.sessions.teardown();
        debug!("Flow torn down");
    }

    /// Run the flow as a task and return the handle that drives it.
    pub fn spawn(self) -> FlowHandle {
        let (commands, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(self.run(commands_rx));
        FlowHandle {
            commands,
            shutdown,
            task: Some(task),
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<FlowCommand>) {
        let shutdown = self.shutdown.clone();
        let mut scans_open = true;

        loop {
            while let Some(event) = self.deferred_engine_events.pop_front() {
                self.on_engine_event(event).await;
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                Some(event) = self.engine_rx.recv() => self.on_engine_event(event).await,
                scan = self.sessions.next_scan(), if scans_open => match scan {
                    Ok(event) => self.on_scan(event).await,
                    Err(e) => {
                        warn!(error = %e, "Tap detector stopped");
                        scans_open = false;
                    }
                },
            }
        }

        self.teardown();
        info!("Flow task finished");
    }

    async fn on_command(&mut self, command: FlowCommand) {
        match command {
            FlowCommand::StartFlow {
                code,
                requires_secret,
            } => {
                self.start_flow(code, requires_secret).await;
            }
            FlowCommand::Enqueue(action) => self.enqueue(action).await,
            FlowCommand::SubmitSecret(secret) => self.submit_secret(secret).await,
            FlowCommand::Cancel => self.cancel().await,
        }
    }

    async fn on_session_ready(&mut self) {
        let dispatch = self.queue.on_session_established(|action| {
            readiness(&self.sessions, &self.gate, self.secret_required, action)
        });
        self.pump(dispatch).await;
    }

    async fn pump(&mut self, mut dispatch: Dispatch) {
        loop {
            match dispatch {
                Dispatch::Idle => return,
                Dispatch::AwaitSecret => {
                    self.prompt_secret().await;
                    return;
                }
                Dispatch::AwaitSession => {
                    self.prompt_tap().await;
                    return;
                }
                Dispatch::Execute { ticket, action } => {
                    self.execute(ticket, action).await;
                    if self.shutdown.is_cancelled() {
                        return;
                    }
                    dispatch = self.queue.dispatch(|action| {
                        readiness(&self.sessions, &self.gate, self.secret_required, action)
                    });
                }
            }
        }
    }

    async fn execute(&mut self, ticket: u64, action: PendingAction) {
        let Some(session) = self.sessions.session() else {
            self.on_failure(Some(ticket), SessionError::NoSession).await;
            return;
        };
        let session_id = session.id();
        let tag = session.tag();
        let lost = session.cancel_token();

        let uses_secret = self.secret_required && action.needs_secret();
        let secret = if uses_secret {
            match self.gate.begin_validation() {
                Ok(secret) => Some(secret),
                Err(e) => {
                    self.on_failure(Some(ticket), e).await;
                    return;
                }
            }
        } else {
            None
        };

        let ctx = ExecutionContext {
            session_id,
            request_code: self.request_code.unwrap_or_else(|| action.request_code()),
            tag,
            secret,
        };

        info!(session = %session_id, action = %action, ticket, "Executing action");
        self.emit(FlowEvent::Progress(FlowProgress::Executing {
            action: action.to_string(),
        }))
        .await;

        let executor = Arc::clone(&self.executor);
        let shutdown = self.shutdown.clone();
        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            _ = lost.cancelled() => Err(self.lost_cause(session_id).await),
            result = executor.execute(action.clone(), ctx) => result,
        };

        match result {
            Ok(output) => self.on_success(ticket, &action, output, uses_secret).await,
            Err(e) => self.on_failure(Some(ticket), e).await,
        }
    }

    // The engine cancels the session before reporting why; wait briefly
    // for the report so a protocol failure is not mistaken for a lost tag.
    // Events for other sessions are kept for the run loop.
    async fn lost_cause(&mut self, session_id: Uuid) -> SessionError {
        if self.protocol.is_none() {
            return SessionError::NoSession;
        }

        let engine_rx = &mut self.engine_rx;
        let deferred = &mut self.deferred_engine_events;
        let stopped = tokio::time::timeout(self.config.transceive_timeout(), async {
            while let Some(event) = engine_rx.recv().await {
                match event {
                    EngineEvent::Stopped {
                        session_id: id,
                        outcome,
                    } if id == session_id => return outcome.into_error(),
                    other => deferred.push_back(other),
                }
            }
            None
        })
        .await;

        match stopped {
            Ok(Some(e)) => SessionError::Protocol(e),
            _ => SessionError::NoSession,
        }
    }

    async fn on_success(
        &mut self,
        ticket: u64,
        action: &PendingAction,
        output: ActionOutput,
        used_secret: bool,
    ) {
        self.queue.complete(ticket, None);
        self.disconnects = 0;

        if used_secret {
            self.gate.record_success();
            if let Some(fingerprint) = action.fingerprint() {
                self.gate.remember(fingerprint.clone());
            }
            // every other action asks again
            self.gate.forget_secret();
        }

        if let PendingAction::SetupToken(params) = action {
            match &params.secret {
                None => {
                    info!("Token set up without a secret; prompting disabled");
                    self.secret_required = false;
                }
                Some(secret) => {
                    if let Err(e) = self.gate.submit_secret(secret.clone()) {
                        warn!(error = %e, "Could not hold new token secret");
                    }
                }
            }
        }

        let locked = output
            .token_status()
            .is_some_and(|status| self.gate.apply_device_status(status.device_auth()));

        info!(action = %action, "Action succeeded");
        self.emit(FlowEvent::Success(output)).await;

        if locked {
            self.enter_lockout().await;
        }
    }

    async fn on_failure(&mut self, ticket: Option<u64>, error: SessionError) {
        let kind = classify(&error);
        let detail = error.to_string();
        warn!(%kind, error = %detail, "Operation failed");

        if let Some(ticket) = ticket {
            self.queue.complete(ticket, Some(kind));
        }

        let mut outcome = self.gate.record_failure(kind);
        if let Some(remaining) = reported_attempts(&error) {
            let status = DeviceAuthStatus {
                locked_out: remaining == 0,
                attempts_remaining: Some(remaining),
            };
            if self.gate.apply_device_status(status) {
                outcome = FailureOutcome::LockedOut;
            }
        }

        if outcome == FailureOutcome::LockedOut {
            self.enter_lockout().await;
            return;
        }

        match kind {
            ErrorKind::WrongSecret => {
                self.secret_prompted = false;
                self.emit(FlowEvent::WrongSecret {
                    attempts_remaining: self.gate.attempts_remaining(),
                })
                .await;
            }
            ErrorKind::SecretRetryLimitExceeded => self.enter_lockout().await,
            ErrorKind::Disconnected => self.on_session_lost(detail).await,
            ErrorKind::Fatal => {
                // failures outside an execution carry no ticket
                self.queue.clear();
                if !self.sessions.is_session_active() {
                    self.close_session();
                }
                self.emit(FlowEvent::Failure { kind, detail }).await;
            }
        }
    }

    async fn on_session_lost(&mut self, detail: String) {
        self.close_session();
        self.emit(FlowEvent::Progress(FlowProgress::SessionLost)).await;

        self.disconnects = self.disconnects.saturating_add(1);
        if self.disconnects > self.config.max_disconnect_retries {
            warn!(disconnects = self.disconnects, "Giving up after repeated disconnects");
            self.disconnects = 0;
            self.queue.clear();
            self.emit(FlowEvent::Failure {
                kind: ErrorKind::Disconnected,
                detail,
            })
            .await;
            return;
        }

        self.tap_prompted = false;
        self.prompt_tap().await;
    }

    async fn enter_lockout(&mut self) {
        if !self.gate.is_locked_out() {
            self.gate.lock_out();
        }
        self.queue.clear();
        self.stop_engine();
        self.sessions.teardown();
        self.emit(FlowEvent::LockedOut).await;
    }

    /// Arm for the flow's code and prompt once. Returns false if arming
    /// failed.
    async fn prompt_tap(&mut self) -> bool {
        let Some(code) = self.request_code else {
            return false;
        };
        if self.sessions.is_session_active() {
            return true;
        }

        if let Err(e) = self.sessions.arm_request(code) {
            let error = SessionError::from(e);
            self.queue.clear();
            self.emit(FlowEvent::Failure {
                kind: classify(&error),
                detail: error.to_string(),
            })
            .await;
            return false;
        }

        if !self.tap_prompted {
            self.tap_prompted = true;
            self.emit(FlowEvent::PromptForTap { request_code: code })
                .await;
        }
        true
    }

    async fn prompt_secret(&mut self) {
        let Some(code) = self.request_code else {
            return;
        };
        if self.secret_prompted || self.gate.is_locked_out() {
            return;
        }
        if let Err(e) = self.gate.await_secret() {
            warn!(error = %e, "Cannot prompt for secret");
            return;
        }

        self.secret_prompted = true;
        self.emit(FlowEvent::PromptForSecret {
            request_code: code,
            attempts_remaining: self.gate.attempts_remaining(),
        })
        .await;
    }

    fn start_engine(&mut self, session_id: Uuid, protocol: Arc<AnyProtocol>) {
        let Some(session) = self.sessions.session() else {
            return;
        };
        debug!(session = %session_id, protocol = protocol.name(), "Starting protocol loop");
        let engine = CardProtocolEngine::new(session_id, protocol, session.cancel_token());
        let task = tokio::spawn(engine.run(session.tag(), self.engine_tx.clone()));
        self.engine_task = Some(task);
    }

    fn stop_engine(&mut self) {
        if let Some(task) = self.engine_task.take() {
            task.abort();
        }
    }

    fn close_session(&mut self) {
        self.stop_engine();
        self.sessions.close_session();
    }

    fn reset_flow(&mut self) {
        self.queue.clear();
        self.gate.reset();
        self.close_session();
        if let Err(e) = self.sessions.disarm() {
            warn!(error = %e, "Failed to disarm");
        }
        self.secret_required = false;
        self.disconnects = 0;
        self.tap_prompted = false;
        self.secret_prompted = false;
    }

    async fn emit(&self, event: FlowEvent) {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {}
            sent = self.events.send(event) => {
                if sent.is_err() {
                    debug!("Flow event receiver dropped");
                }
            }
        }
    }
}

impl<E> Drop for TapFlow<E> {
    fn drop(&mut self) {
        if let Some(task) = self.engine_task.take() {
            task.abort();
        }
    }
}

#[derive(Debug)]
enum FlowCommand {
    StartFlow {
        code: RequestCode,
        requires_secret: Option<bool>,
    },
    Enqueue(PendingAction),
    SubmitSecret(Secret),
    Cancel,
}

/// Handle to a spawned [`TapFlow`].
///
/// Dropping the handle stops the flow; the task disarms detection, closes
/// the session and cancels the protocol loop on its way out.
#[derive(Debug)]
pub struct FlowHandle {
    commands: mpsc::Sender<FlowCommand>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl FlowHandle {
    /// # Errors
    /// Returns `Cancelled` if the flow task has stopped.
    pub async fn start_flow(&self, code: RequestCode, requires_secret: Option<bool>) -> Result<()> {
        self.send(FlowCommand::StartFlow {
            code,
            requires_secret,
        })
        .await
    }

    /// # Errors
    /// Returns `Cancelled` if the flow task has stopped.
    pub async fn enqueue(&self, action: PendingAction) -> Result<()> {
        self.send(FlowCommand::Enqueue(action)).await
    }

    /// # Errors
    /// Returns `Cancelled` if the flow task has stopped.
    pub async fn submit_secret(&self, secret: Secret) -> Result<()> {
        self.send(FlowCommand::SubmitSecret(secret)).await
    }

    /// # Errors
    /// Returns `Cancelled` if the flow task has stopped.
    pub async fn cancel(&self) -> Result<()> {
        self.send(FlowCommand::Cancel).await
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stop the flow and wait for its releases to run.
    ///
    /// # Errors
    /// Returns `Executor` if the flow task panicked.
    pub async fn shutdown(mut self) -> Result<()> {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| SessionError::Executor(format!("flow task failed: {e}")))?;
        }
        Ok(())
    }

    async fn send(&self, command: FlowCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Cancelled)
    }
}

impl Drop for FlowHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockSigner, MockSignerHandle};
    use tapsign_core::WalletId;
    use tapsign_hardware::AnyTag;
    use tapsign_hardware::mock::{
        MockDetector, MockDetectorHandle, MockReply, MockTag, MockTagHandle,
    };
    use tapsign_protocol::{MockToken, ProtocolError};

    type Flow = TapFlow<MockSigner>;

    fn flow() -> (Flow, mpsc::Receiver<FlowEvent>, MockDetectorHandle, MockSignerHandle) {
        let (detector, taps) = MockDetector::new();
        let (signer, signer_handle) = MockSigner::new();
        let (flow, events) =
            TapFlow::new(FlowConfig::default(), AnyDetector::Mock(detector), signer).unwrap();
        (flow, events, taps, signer_handle)
    }

    fn responsive_tag() -> (MockTag, MockTagHandle) {
        let (tag, handle) = MockTag::new();
        handle.set_responder(|_| MockReply::Data(vec![0x90, 0x00]));
        (tag, handle)
    }

    fn tap(code: RequestCode) -> (ScanEvent, MockTagHandle) {
        let (tag, handle) = responsive_tag();
        (ScanEvent::new(code, AnyTag::Mock(tag), Vec::new()), handle)
    }

    fn drain(events: &mut mpsc::Receiver<FlowEvent>) -> Vec<FlowEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = events.try_recv() {
            drained.push(event);
        }
        drained
    }

    fn export() -> PendingAction {
        PendingAction::ExportWallet(WalletId::new("vault").unwrap())
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let (detector, _taps) = MockDetector::new();
        let (signer, _) = MockSigner::new();
        let config = FlowConfig {
            max_secret_attempts: 0,
            ..FlowConfig::default()
        };
        assert!(matches!(
            TapFlow::new(config, AnyDetector::Mock(detector), signer),
            Err(SessionError::Core(_))
        ));
    }

    #[tokio::test]
    async fn test_start_flow_prompts() {
        let (mut flow, mut events, taps, _) = flow();

        assert!(flow.start_flow(RequestCode::SIGN_TRANSACTION, None).await);
        assert_eq!(
            drain(&mut events),
            vec![
                FlowEvent::PromptForTap {
                    request_code: RequestCode::SIGN_TRANSACTION
                },
                FlowEvent::PromptForSecret {
                    request_code: RequestCode::SIGN_TRANSACTION,
                    attempts_remaining: 3
                },
            ]
        );
        assert_eq!(taps.armed(), Some(RequestCode::SIGN_TRANSACTION));

        assert!(flow.start_flow(RequestCode::STATUS, None).await);
        assert!(!flow.secret_required());
        assert_eq!(
            drain(&mut events),
            vec![FlowEvent::PromptForTap {
                request_code: RequestCode::STATUS
            }]
        );
    }

    #[tokio::test]
    async fn test_detection_unavailable_fails_flow() {
        let (mut flow, mut events, taps, _) = flow();
        taps.set_available(false);

        assert!(!flow.start_flow(RequestCode::EXPORT_WALLET, Some(false)).await);
        match drain(&mut events).as_slice() {
            [FlowEvent::Failure { kind, .. }] => assert_eq!(*kind, ErrorKind::Fatal),
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_enqueue_without_flow_starts_one() {
        let (mut flow, mut events, _taps, _) = flow();
        flow.enqueue(PendingAction::CheckFirmwareVersion).await;

        assert_eq!(flow.request_code(), Some(RequestCode::CHECK_FIRMWARE));
        assert_eq!(
            drain(&mut events),
            vec![FlowEvent::PromptForTap {
                request_code: RequestCode::CHECK_FIRMWARE
            }]
        );
        assert_eq!(flow.queue().peek(), Some(&PendingAction::CheckFirmwareVersion));
    }

    #[tokio::test]
    async fn test_tap_runs_queued_action() {
        let (mut flow, mut events, _taps, signer) = flow();
        signer.set_secret(None);
        flow.start_flow(RequestCode::EXPORT_WALLET, Some(false)).await;
        flow.enqueue(export()).await;
        drain(&mut events);

        let (event, _tag) = tap(RequestCode::EXPORT_WALLET);
        flow.on_scan(event).await;

        let emitted = drain(&mut events);
        assert!(matches!(emitted[0], FlowEvent::Progress(FlowProgress::SessionOpened { .. })));
        assert!(matches!(emitted[1], FlowEvent::Progress(FlowProgress::Executing { .. })));
        assert!(matches!(emitted[2], FlowEvent::Success(ActionOutput::WalletExported { .. })));
        assert_eq!(emitted.len(), 3);
        assert_eq!(signer.executed(), vec!["ExportWallet".to_string()]);
        assert!(flow.queue().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_reprompts_then_surfaces() {
        let (mut flow, mut events, taps, _) = flow();
        flow.start_flow(RequestCode::EXPORT_WALLET, Some(false)).await;
        flow.enqueue(export()).await;
        drain(&mut events);

        for round in 0..=flow.config().max_disconnect_retries {
            let (tag, handle) = MockTag::new();
            handle.queue_reply(MockReply::Lost);
            flow.on_scan(ScanEvent::new(RequestCode::EXPORT_WALLET, AnyTag::Mock(tag), Vec::new()))
                .await;

            let emitted = drain(&mut events);
            assert!(emitted.contains(&FlowEvent::Progress(FlowProgress::SessionLost)));
            if round < flow.config().max_disconnect_retries {
                assert_eq!(
                    emitted.last(),
                    Some(&FlowEvent::PromptForTap {
                        request_code: RequestCode::EXPORT_WALLET
                    })
                );
                assert_eq!(taps.armed(), Some(RequestCode::EXPORT_WALLET));
                assert!(flow.queue().peek().is_some());
            } else {
                assert!(matches!(
                    emitted.last(),
                    Some(FlowEvent::Failure {
                        kind: ErrorKind::Disconnected,
                        ..
                    })
                ));
                assert!(flow.queue().is_empty());
            }
        }
    }

    #[tokio::test]
    async fn test_fatal_failure_discards_action() {
        let (mut flow, mut events, _taps, signer) = flow();
        signer.set_initialized(false);
        flow.start_flow(RequestCode::EXPORT_WALLET, Some(false)).await;
        flow.enqueue(export()).await;

        let (event, _tag) = tap(RequestCode::EXPORT_WALLET);
        flow.on_scan(event).await;

        assert!(matches!(
            drain(&mut events).last(),
            Some(FlowEvent::Failure {
                kind: ErrorKind::Fatal,
                ..
            })
        ));
        assert!(flow.queue().is_empty());
        assert!(flow.sessions().is_session_active());
    }

    #[tokio::test]
    async fn test_cancel_releases_everything() {
        let (mut flow, _events, taps, signer) = flow();
        signer.set_secret(None);
        flow.start_flow(RequestCode::EXPORT_WALLET, Some(false)).await;
        let (event, tag) = tap(RequestCode::EXPORT_WALLET);
        flow.on_scan(event).await;
        flow.enqueue(PendingAction::ImportWallet).await;

        flow.cancel().await;
        assert!(tag.is_closed());
        assert_eq!(taps.armed(), None);
        assert!(flow.queue().is_empty());
        assert_eq!(flow.request_code(), None);
    }

    #[tokio::test]
    async fn test_setup_without_secret_disables_prompting() {
        let (mut flow, mut events, _taps, signer) = flow();
        signer.set_initialized(false);
        flow.start_flow(RequestCode::SETUP_TOKEN, Some(true)).await;
        let (event, _tag) = tap(RequestCode::SETUP_TOKEN);
        flow.on_scan(event).await;

        flow.enqueue(PendingAction::SetupToken(crate::action::SetupParams {
            mnemonic: "abandon ".repeat(11) + "about",
            word_count: 12,
            secret: None,
        }))
        .await;
        assert!(!flow.secret_required());

        drain(&mut events);
        flow.enqueue(PendingAction::ImportWallet).await;
        assert!(matches!(
            drain(&mut events).last(),
            Some(FlowEvent::Success(ActionOutput::WalletImported { .. }))
        ));
    }

    #[tokio::test]
    async fn test_device_reported_lockout_ends_flow() {
        let (mut flow, mut events, taps, signer) = flow();
        signer.set_attempts_remaining(0);
        flow.start_flow(RequestCode::CHECK_FIRMWARE, None).await;
        flow.enqueue(PendingAction::CheckFirmwareVersion).await;

        let (event, tag) = tap(RequestCode::CHECK_FIRMWARE);
        flow.on_scan(event).await;

        let emitted = drain(&mut events);
        assert!(matches!(
            emitted[emitted.len() - 2],
            FlowEvent::Success(ActionOutput::FirmwareVersion { .. })
        ));
        assert_eq!(emitted.last(), Some(&FlowEvent::LockedOut));
        assert!(flow.gate().is_locked_out());
        assert!(tag.is_closed());
        assert_eq!(taps.armed(), None);

        flow.enqueue(PendingAction::ImportWallet).await;
        assert_eq!(drain(&mut events), vec![FlowEvent::LockedOut]);
    }

    #[tokio::test]
    async fn test_handle_shutdown_releases_session() {
        let (flow, mut events, taps, _) = flow();
        let handle = flow.spawn();
        handle
            .start_flow(RequestCode::EXPORT_WALLET, Some(false))
            .await
            .unwrap();
        assert!(matches!(events.recv().await, Some(FlowEvent::PromptForTap { .. })));

        let (tag, tag_handle) = responsive_tag();
        taps.tap(tag).await.unwrap();
        assert!(matches!(
            events.recv().await,
            Some(FlowEvent::Progress(FlowProgress::SessionOpened { .. }))
        ));

        handle.shutdown().await.unwrap();
        assert!(tag_handle.is_closed());
        assert_eq!(taps.armed(), None);
    }

    #[tokio::test]
    async fn test_lost_cause_keeps_other_sessions_events() {
        let (flow, _events, _taps, _) = flow();
        let mut flow = flow.with_protocol(AnyProtocol::Mock(Arc::new(MockToken::new())));
        let lost = Uuid::new_v4();
        let other = Uuid::new_v4();

        flow.engine_tx
            .send(EngineEvent::Established { session_id: other })
            .await
            .unwrap();
        flow.engine_tx
            .send(EngineEvent::Stopped {
                session_id: lost,
                outcome: EngineOutcome::Failed(ProtocolError::HandshakeFailed("bad mac".into())),
            })
            .await
            .unwrap();

        let error = flow.lost_cause(lost).await;
        assert!(matches!(
            error,
            SessionError::Protocol(ProtocolError::HandshakeFailed(_))
        ));
        assert!(matches!(
            flow.deferred_engine_events.front(),
            Some(EngineEvent::Established { session_id }) if *session_id == other
        ));
        assert_eq!(flow.deferred_engine_events.len(), 1);
    }
}
