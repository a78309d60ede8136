//! Submission and tracking of one analysis through self-scheduled polling.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use threatscope_analysis_contract::check_consistency;
use threatscope_core::{AnalysisDetail, AnalysisLogs, AnalysisStatus, StagedFile};
use threatscope_gateway::{AnalysisGateway, GatewayError, classify_gateway_error};
use threatscope_ui::{
    AnalysisPresentation, InMemoryPreviewBackend, PreviewBackend, PreviewHandle,
    PreviewResourceManager, compose_presentation,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;

/// Message recorded when submit is called with nothing staged.
pub const NOTHING_STAGED: &str = "Select a diagram file first";

/// Lifecycle phase of the tracked analysis.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LifecyclePhase {
    /// Nothing submitted or tracked.
    #[default]
    Idle,
    /// Create request in flight.
    Submitting,
    /// Polling a non-terminal analysis.
    Tracking {
        /// Analysis identifier.
        id: String,
        /// Last observed status.
        status: AnalysisStatus,
    },
    /// Terminal status observed; no further network activity.
    Settled {
        /// Analysis identifier.
        id: String,
        /// Terminal status.
        status: AnalysisStatus,
    },
    /// Submit or initial load failed.
    LoadError,
    /// Polling stopped after too many consecutive failures.
    Abandoned {
        /// Analysis identifier.
        id: String,
        /// Last status observed before giving up.
        last_status: Option<AnalysisStatus>,
    },
}

impl LifecyclePhase {
    /// Identifier of the analysis this phase refers to.
    pub fn analysis_id(&self) -> Option<&str> {
        match self {
            Self::Tracking { id, .. } | Self::Settled { id, .. } | Self::Abandoned { id, .. } => {
                Some(id)
            }
            Self::Idle | Self::Submitting | Self::LoadError => None,
        }
    }
}

/// Immutable state published by [`AnalysisLifecycleController`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LifecycleSnapshot {
    /// Current phase.
    pub phase: LifecyclePhase,
    /// Name of the staged file, if any.
    pub staged_file: Option<String>,
    /// Preview handle of the staged file; released when the file is replaced
    /// or dropped.
    pub preview: Option<PreviewHandle>,
    /// `true` while the initial fetch of [`AnalysisLifecycleController::track`] runs.
    pub loading: bool,
    /// Latest server record.
    pub analysis: Option<Arc<AnalysisDetail>>,
    /// Latest log text.
    pub logs: Option<String>,
    /// Validation, submit or load error.
    pub error: Option<String>,
    /// Error of the last poll; cleared by the next successful one.
    pub poll_error: Option<String>,
    /// Consecutive failed polls.
    pub consecutive_poll_failures: u32,
}

impl LifecycleSnapshot {
    /// Presentation of the latest record.
    pub fn presentation(&self) -> Option<AnalysisPresentation> {
        self.analysis
            .as_deref()
            .map(|detail| compose_presentation(detail, self.logs.as_deref()))
    }
}

/// Lifecycle controller errors.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Precondition not met; no request was sent.
    #[error("{0}")]
    Validation(String),
    /// Gateway call failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// Operation needs a tracked analysis.
    #[error("no analysis is being tracked")]
    NotTracking,
}

struct Session {
    staged: Option<StagedFile>,
    preview: PreviewResourceManager,
    tracked_id: Option<String>,
    token: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl Session {
    fn new(previews: Arc<dyn PreviewBackend>) -> Self {
        Self {
            staged: None,
            preview: PreviewResourceManager::new(previews),
            tracked_id: None,
            token: None,
            task: None,
        }
    }

    fn cancel(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
        self.task.take();
        self.tracked_id = None;
    }
}

#[derive(Clone)]
struct PollContext {
    gateway: Arc<dyn AnalysisGateway>,
    state: Arc<watch::Sender<LifecycleSnapshot>>,
    token: CancellationToken,
    id: String,
    poll_interval: Duration,
    max_failures: Option<u32>,
}

enum Step {
    Continue,
    Stop,
}

/// Drives one analysis from submission to a terminal status.
///
/// At most one tracking session exists per controller. Starting a new one,
/// [`teardown`](Self::teardown), [`reset`](Self::reset) or dropping the
/// controller cancels the current session; responses arriving afterwards are
/// discarded.
pub struct AnalysisLifecycleController {
    gateway: Arc<dyn AnalysisGateway>,
    config: ControllerConfig,
    state: Arc<watch::Sender<LifecycleSnapshot>>,
    session: Mutex<Session>,
}

impl std::fmt::Debug for AnalysisLifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisLifecycleController")
            .field("phase", &self.state.borrow().phase)
            .finish_non_exhaustive()
    }
}

impl AnalysisLifecycleController {
    /// Creates an idle controller with in-memory previews.
    pub fn new(gateway: Arc<dyn AnalysisGateway>, config: ControllerConfig) -> Self {
        Self::with_preview_backend(gateway, config, Arc::new(InMemoryPreviewBackend::new()))
    }

    /// Creates an idle controller allocating previews from `previews`.
    pub fn with_preview_backend(
        gateway: Arc<dyn AnalysisGateway>,
        config: ControllerConfig,
        previews: Arc<dyn PreviewBackend>,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleSnapshot::default());
        Self {
            gateway,
            config,
            state: Arc::new(state),
            session: Mutex::new(Session::new(previews)),
        }
    }

    /// Subscribes to snapshots.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleSnapshot> {
        self.state.subscribe()
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> LifecycleSnapshot {
        self.state.borrow().clone()
    }

    /// Stages `file` for the next submit, replacing any staged file.
    ///
    /// The preview of the replaced file is released.
    pub fn stage(&self, file: StagedFile) {
        let name = file.file_name.clone();
        let mut session = self.lock_session();
        let preview = session.preview.stage(&file).clone();
        session.staged = Some(file);
        self.state.send_modify(|snapshot| {
            snapshot.staged_file = Some(name);
            snapshot.preview = Some(preview);
            if snapshot.phase == LifecyclePhase::Idle {
                snapshot.error = None;
            }
        });
    }

    /// Drops the staged file and releases its preview.
    pub fn clear_staged(&self) {
        let mut session = self.lock_session();
        session.staged = None;
        session.preview.clear();
        self.state.send_modify(|snapshot| {
            snapshot.staged_file = None;
            snapshot.preview = None;
        });
    }

    /// Submits the staged file and starts tracking the created analysis.
    ///
    /// Returns the created analysis identifier.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Validation`] when nothing is staged; the
    /// phase stays `Idle` and the message is recorded in the snapshot.
    /// Returns [`LifecycleError::Gateway`] when the create call fails; the
    /// phase becomes `LoadError`.
    pub async fn submit(&self) -> Result<String, LifecycleError> {
        let (file, token) = {
            let mut session = self.lock_session();
            let Some(file) = session.staged.clone() else {
                drop(session);
                self.state.send_modify(|snapshot| {
                    snapshot.error = Some(NOTHING_STAGED.to_string());
                });
                return Err(LifecycleError::Validation(NOTHING_STAGED.to_string()));
            };

            session.cancel();
            let token = CancellationToken::new();
            session.token = Some(token.clone());
            (file, token)
        };

        self.state.send_modify(|snapshot| {
            let staged_file = snapshot.staged_file.take();
            let preview = snapshot.preview.take();
            *snapshot = LifecycleSnapshot {
                phase: LifecyclePhase::Submitting,
                staged_file,
                preview,
                ..LifecycleSnapshot::default()
            };
        });
        info!(stage = "lifecycle", action = "submit", file = ?file, "submitting analysis");

        let created = match self.gateway.create_analysis(&file).await {
            Ok(created) => created,
            Err(error) => {
                warn!(stage = "lifecycle", action = "submit", error = %error, "create failed");
                let message = error.user_message();
                self.state.send_if_modified(|snapshot| {
                    if token.is_cancelled() {
                        return false;
                    }
                    snapshot.phase = LifecyclePhase::LoadError;
                    snapshot.error = Some(message);
                    true
                });
                return Err(LifecycleError::Gateway(error));
            }
        };

        let id = created.id.clone();
        let committed = self.state.send_if_modified(|snapshot| {
            if token.is_cancelled() {
                return false;
            }
            snapshot.phase = LifecyclePhase::Tracking {
                id: created.id.clone(),
                status: created.status,
            };
            true
        });
        if !committed {
            debug!(stage = "lifecycle", action = "submit", id = %id, "session cancelled before create returned");
            return Ok(id);
        }

        info!(stage = "lifecycle", action = "created", id = %id, code = %created.code, status = %created.status, "tracking analysis");
        let context = self.poll_context(&id, token);
        self.spawn_loop(context, created.status.is_terminal());
        Ok(id)
    }

    /// Starts tracking an existing analysis.
    ///
    /// Fetches the record immediately. A terminal record settles without
    /// polling; a non-terminal one starts polling. Tracking the analysis that
    /// is already being tracked is a no-op.
    ///
    /// # Errors
    /// Returns [`LifecycleError::Gateway`] when the initial fetch fails; the
    /// phase becomes `LoadError`.
    pub async fn track(&self, id: &str) -> Result<(), LifecycleError> {
        let token = {
            let mut session = self.lock_session();
            if self.is_tracking(&session, id) {
                debug!(stage = "lifecycle", action = "track", id, "already tracking");
                return Ok(());
            }

            session.cancel();
            let token = CancellationToken::new();
            session.token = Some(token.clone());
            session.tracked_id = Some(id.to_string());
            token
        };

        self.state.send_modify(|snapshot| {
            let staged_file = snapshot.staged_file.take();
            let preview = snapshot.preview.take();
            *snapshot = LifecycleSnapshot {
                staged_file,
                preview,
                loading: true,
                ..LifecycleSnapshot::default()
            };
        });
        info!(stage = "lifecycle", action = "track", id, "loading analysis");

        let context = self.poll_context(id, token.clone());
        let (detail, logs) = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            fetched = fetch_with_logs(context.gateway.as_ref(), id) => fetched,
        };

        match detail {
            Ok(detail) => {
                if let Step::Continue = apply_fetch(&context, detail, logs) {
                    self.spawn_loop(context, false);
                }
                Ok(())
            }
            Err(error) => {
                warn!(stage = "lifecycle", action = "track", id, error = %error, "initial load failed");
                let message = error.user_message();
                self.state.send_if_modified(|snapshot| {
                    if token.is_cancelled() {
                        return false;
                    }
                    snapshot.phase = LifecyclePhase::LoadError;
                    snapshot.loading = false;
                    snapshot.error = Some(message);
                    true
                });
                Err(LifecycleError::Gateway(error))
            }
        }
    }

    /// Cancels the current session and returns to `Idle`.
    ///
    /// The staged file is kept.
    pub fn teardown(&self) {
        let mut session = self.lock_session();
        self.end_session(&mut session);
        debug!(stage = "lifecycle", action = "teardown", "session cancelled");
    }

    /// Cancels `session` and publishes `Idle` while the session lock is held.
    fn end_session(&self, session: &mut Session) {
        session.cancel();
        self.state.send_modify(|snapshot| {
            let staged_file = snapshot.staged_file.take();
            let preview = snapshot.preview.take();
            *snapshot = LifecycleSnapshot {
                staged_file,
                preview,
                ..LifecycleSnapshot::default()
            };
        });
    }

    /// Cancels the current session and drops the staged file.
    pub fn reset(&self) {
        let mut session = self.lock_session();
        session.cancel();
        session.staged = None;
        session.preview.clear();
        self.state.send_replace(LifecycleSnapshot::default());
        debug!(stage = "lifecycle", action = "reset", "controller reset");
    }

    /// Deletes the tracked analysis on the server, then tears down.
    ///
    /// When another session started while the delete was in flight, that
    /// session is left untouched.
    ///
    /// # Errors
    /// Returns [`LifecycleError::NotTracking`] when no analysis is tracked.
    /// Returns [`LifecycleError::Gateway`] when the delete call fails; the
    /// session is kept and the message is recorded in the snapshot.
    pub async fn delete(&self) -> Result<(), LifecycleError> {
        let (id, token) = {
            let session = self.lock_session();
            let id = session
                .tracked_id
                .clone()
                .or_else(|| self.state.borrow().phase.analysis_id().map(str::to_string))
                .ok_or(LifecycleError::NotTracking)?;
            (id, session.token.clone())
        };

        info!(stage = "lifecycle", action = "delete", id = %id, "deleting analysis");
        let outcome = self.gateway.delete_analysis(&id).await;

        let mut session = self.lock_session();
        let unchanged = match &token {
            Some(token) => !token.is_cancelled(),
            None => {
                session.token.is_none() && self.state.borrow().phase.analysis_id() == Some(id.as_str())
            }
        };

        if let Err(error) = outcome {
            warn!(stage = "lifecycle", action = "delete", id = %id, error = %error, "delete failed");
            if unchanged {
                let message = error.user_message();
                self.state.send_modify(|snapshot| snapshot.error = Some(message));
            }
            return Err(LifecycleError::Gateway(error));
        }

        if unchanged {
            self.end_session(&mut session);
            debug!(stage = "lifecycle", action = "delete", id = %id, "session ended after delete");
        } else {
            debug!(stage = "lifecycle", action = "delete", id = %id, "newer session kept after delete");
        }
        Ok(())
    }

    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_tracking(&self, session: &Session, id: &str) -> bool {
        let live = session.tracked_id.as_deref() == Some(id)
            && session.token.as_ref().is_some_and(|token| !token.is_cancelled());
        if !live {
            return false;
        }

        let snapshot = self.state.borrow();
        snapshot.loading || matches!(&snapshot.phase, LifecyclePhase::Tracking { id: current, .. } if current == id)
    }

    fn poll_context(&self, id: &str, token: CancellationToken) -> PollContext {
        PollContext {
            gateway: Arc::clone(&self.gateway),
            state: Arc::clone(&self.state),
            token,
            id: id.to_string(),
            poll_interval: self.config.poll_interval,
            max_failures: self.config.max_consecutive_poll_failures,
        }
    }

    fn spawn_loop(&self, context: PollContext, immediate: bool) {
        let mut session = self.lock_session();
        // A cancelled context token means a newer session owns the slot.
        if context.token.is_cancelled() {
            return;
        }
        session.tracked_id = Some(context.id.clone());
        session.task = Some(tokio::spawn(poll_loop(context, immediate)));
    }
}

impl Drop for AnalysisLifecycleController {
    fn drop(&mut self) {
        self.lock_session().cancel();
    }
}

async fn fetch_with_logs(
    gateway: &dyn AnalysisGateway,
    id: &str,
) -> (Result<AnalysisDetail, GatewayError>, Option<AnalysisLogs>) {
    let (detail, logs) = tokio::join!(gateway.get_analysis(id), gateway.get_logs(id));
    let logs = match logs {
        Ok(logs) => Some(logs),
        Err(error) => {
            debug!(stage = "lifecycle", action = "fetch_logs", id, error = %error, "log fetch absorbed");
            None
        }
    };
    (detail, logs)
}

async fn poll_loop(context: PollContext, immediate: bool) {
    let mut wait = !immediate;
    loop {
        if wait {
            tokio::select! {
                _ = context.token.cancelled() => break,
                _ = tokio::time::sleep(context.poll_interval) => {}
            }
        }
        wait = true;

        let (detail, logs) = tokio::select! {
            _ = context.token.cancelled() => break,
            fetched = fetch_with_logs(context.gateway.as_ref(), &context.id) => fetched,
        };

        let step = match detail {
            Ok(detail) if detail.status.is_terminal() => {
                apply_fetch(&context, detail, logs);
                Step::Stop
            }
            Ok(detail) => apply_fetch(&context, detail, logs),
            Err(error) => apply_failure(&context, &error),
        };
        if let Step::Stop = step {
            break;
        }
    }
    debug!(stage = "lifecycle", action = "poll_loop", id = %context.id, "poll loop finished");
}

fn apply_fetch(context: &PollContext, detail: AnalysisDetail, logs: Option<AnalysisLogs>) -> Step {
    let status = detail.status;
    for violation in detail.integrity_violations() {
        warn!(stage = "lifecycle", action = "integrity", id = %context.id, violation = %violation, "inconsistent snapshot");
    }
    if let Some(result) = detail.result.as_ref() {
        let consistency = check_consistency(result);
        if consistency.is_defect() {
            warn!(stage = "lifecycle", action = "risk_level", id = %context.id, consistency = ?consistency, "backend risk level diverges from score");
        }
    }

    let mut settled_now = false;
    let committed = context.state.send_if_modified(|snapshot| {
        if context.token.is_cancelled() {
            return false;
        }
        if matches!(&snapshot.phase, LifecyclePhase::Settled { id, .. } if *id == context.id) {
            return false;
        }

        snapshot.phase = if status.is_terminal() {
            settled_now = true;
            LifecyclePhase::Settled {
                id: context.id.clone(),
                status,
            }
        } else {
            LifecyclePhase::Tracking {
                id: context.id.clone(),
                status,
            }
        };
        snapshot.loading = false;
        snapshot.error = None;
        snapshot.poll_error = None;
        snapshot.consecutive_poll_failures = 0;
        snapshot.analysis = Some(Arc::new(detail));
        if let Some(logs) = logs {
            snapshot.logs = Some(logs.logs);
        }
        true
    });

    if settled_now {
        info!(stage = "lifecycle", action = "settled", id = %context.id, status = %status, "analysis settled");
    }
    if committed && !status.is_terminal() {
        Step::Continue
    } else {
        Step::Stop
    }
}

fn apply_failure(context: &PollContext, error: &GatewayError) -> Step {
    let class = classify_gateway_error(error);
    warn!(stage = "lifecycle", action = "poll", id = %context.id, error = %error, class = ?class, "poll failed");

    let message = error.user_message();
    let mut abandoned = false;
    let committed = context.state.send_if_modified(|snapshot| {
        if context.token.is_cancelled() {
            return false;
        }
        snapshot.consecutive_poll_failures = snapshot.consecutive_poll_failures.saturating_add(1);
        snapshot.poll_error = Some(message);

        if context
            .max_failures
            .is_some_and(|cap| snapshot.consecutive_poll_failures >= cap)
        {
            let last_status = match &snapshot.phase {
                LifecyclePhase::Tracking { status, .. } => Some(*status),
                _ => snapshot.analysis.as_ref().map(|detail| detail.status),
            };
            snapshot.phase = LifecyclePhase::Abandoned {
                id: context.id.clone(),
                last_status,
            };
            abandoned = true;
        }
        true
    });

    if abandoned {
        warn!(stage = "lifecycle", action = "abandon", id = %context.id, "poll failure cap reached");
        return Step::Stop;
    }
    if committed { Step::Continue } else { Step::Stop }
}
