use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::{SessionConfig, StreamOptions};
use super::events::SessionEvent;
use super::journal::SessionJournal;
use super::status::{SessionState, SessionStatus};
use super::worker::{self, WorkerEvent, WorkerMessage, WorkerOutcome, WorkerSettings};
use crate::config::{Config, EncoderConfig, SessionSettings};
use crate::encoder::{launch, EncoderCommand, EncoderExit, LogLine};
use crate::error::{AnomalousExit, RejectReason, SessionError};
use crate::media::{MediaAcquirer, MediaFile};
use crate::sink::LogSink;

const WORKER_CHANNEL_CAPACITY: usize = 1024;
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Extra time `stop` allows the worker beyond its own termination bounds
const STOP_SLACK: std::time::Duration = std::time::Duration::from_millis(500);

/// Result of a successful `stop`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StopOutcome {
    /// The encoder was terminated and reaped
    Stopped { exit: EncoderExit },

    /// Nothing to do; the session was already stopped (or is being stopped)
    AlreadyStopped,

    /// The encoder could not be confirmed dead. The session is idle anyway.
    Leaked { pid: u32 },
}

/// Owns the single streaming session.
///
/// Cheap to clone; all clones control the same session. Must be created
/// inside a Tokio runtime.
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<Shared>,
}

struct Shared {
    inner: Mutex<Inner>,
    encoder: EncoderConfig,
    settings: SessionSettings,
    sink: Arc<dyn LogSink>,
    events: broadcast::Sender<SessionEvent>,
    state_tx: watch::Sender<SessionState>,
    worker_tx: mpsc::Sender<WorkerMessage>,
}

struct Inner {
    state: SessionState,
    active: Option<ActiveSession>,

    /// Log of the current session, or of the last one until the next start
    journal: Option<SessionJournal>,

    /// The last session ended through `stop` and nothing started since
    stopped_on_request: bool,
}

struct ActiveSession {
    id: Uuid,
    config: SessionConfig,
    pid: u32,
    started_at: DateTime<Utc>,
    stop_tx: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<WorkerOutcome>>,
}

impl SessionController {
    pub fn new(encoder: EncoderConfig, settings: SessionSettings, sink: Arc<dyn LogSink>) -> Self {
        let (worker_tx, worker_rx) = mpsc::channel(WORKER_CHANNEL_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, _) = watch::channel(SessionState::Idle);

        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                active: None,
                journal: None,
                stopped_on_request: false,
            }),
            encoder,
            settings,
            sink,
            events,
            state_tx,
            worker_tx,
        });

        tokio::spawn(event_loop(Arc::downgrade(&shared), worker_rx));

        Self { shared }
    }

    pub fn from_config(config: &Config, sink: Arc<dyn LogSink>) -> Self {
        Self::new(config.encoder.clone(), config.session.clone(), sink)
    }

    /// Start streaming. Rejected unless idle.
    ///
    /// Returns once the encoder has been spawned; it keeps running in the
    /// background until `stop` or until it dies.
    pub async fn start(&self, config: SessionConfig) -> Result<Uuid, SessionError> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;

        if !inner.state.is_idle() {
            warn!("Start rejected: session is {}", inner.state);
            return Err(RejectReason::SessionActive.into());
        }

        if let Err(e) = config.validate() {
            warn!("Start rejected: {}", e);
            return Err(e.into());
        }

        let session_id = Uuid::new_v4();
        inner.journal = Some(SessionJournal::new(session_id));
        inner.stopped_on_request = false;
        shared.set_state(&mut inner, SessionState::Starting);

        info!(
            session = %session_id,
            "Starting stream of {} (vertical: {})",
            config.media.path.display(),
            config.vertical_mode
        );

        let command = EncoderCommand::build(&shared.encoder, &config);
        shared.emit(&mut inner, format!("Running: {}", command));

        let mut process = match launch(&command) {
            Ok(process) => process,
            Err(e) => {
                error!(session = %session_id, "{}", e);
                shared.emit(&mut inner, format!("Error: {}", e));
                shared.set_state(&mut inner, SessionState::Idle);
                return Err(e.into());
            }
        };
        process.set_kill_timeout(shared.settings.kill_timeout());
        let pid = process.pid();

        let (stop_tx, stop_rx) = oneshot::channel();
        let worker = worker::spawn(
            session_id,
            process,
            stop_rx,
            shared.worker_tx.clone(),
            WorkerSettings {
                grace_period: shared.settings.grace_period(),
                drain_timeout: shared.settings.drain_timeout(),
            },
        );

        inner.active = Some(ActiveSession {
            id: session_id,
            config,
            pid,
            started_at: Utc::now(),
            stop_tx: Some(stop_tx),
            worker: Some(worker),
        });
        shared.set_state(&mut inner, SessionState::Running);
        shared.emit(&mut inner, format!("Streaming started (encoder pid {})", pid));

        Ok(session_id)
    }

    /// Acquire media, then `start` with it.
    ///
    /// Transient media is deleted again if the session does not start.
    pub async fn start_from(
        &self,
        acquirer: &dyn MediaAcquirer,
        options: StreamOptions,
    ) -> Result<Uuid, SessionError> {
        if !self.state().is_idle() {
            return Err(RejectReason::SessionActive.into());
        }

        info!("Acquiring media from {}", acquirer.describe());
        let media = acquirer.acquire().await.map_err(|e| {
            warn!("Acquisition failed: {}", e);
            e
        })?;

        let config = SessionConfig::from_options(media.clone(), options);
        let result = self.start(config).await;
        if result.is_err() {
            discard_quietly(&media);
        }
        result
    }

    /// Stop the running session and clean up after it.
    ///
    /// Blocks only on bounded termination. Calling it again while a stop is in
    /// flight, or right after one finished, returns `AlreadyStopped`.
    pub async fn stop(&self) -> Result<StopOutcome, SessionError> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;

        match inner.state {
            SessionState::Idle if inner.stopped_on_request => {
                debug!("Stop ignored: already stopped");
                return Ok(StopOutcome::AlreadyStopped);
            }
            SessionState::Idle => {
                warn!("Stop rejected: no active session");
                return Err(RejectReason::NoActiveSession.into());
            }
            SessionState::Stopping => {
                drop(inner);
                self.wait_for_idle().await;
                return Ok(StopOutcome::AlreadyStopped);
            }
            SessionState::Starting | SessionState::Running => {}
        }

        let Some(active) = inner.active.as_mut() else {
            // Running without a session cannot happen; recover to idle
            error!("Session state {} without an active session", inner.state);
            shared.set_state(&mut inner, SessionState::Idle);
            return Err(RejectReason::NoActiveSession.into());
        };
        let session_id = active.id;
        let pid = active.pid;
        let stop_tx = active.stop_tx.take();
        let worker = active.worker.take();

        shared.set_state(&mut inner, SessionState::Stopping);
        shared.emit(&mut inner, "Stopping stream");
        drop(inner);

        if let Some(stop_tx) = stop_tx {
            // Fails only if the worker already finished on its own
            let _ = stop_tx.send(());
        }
        let outcome = shared.collect_worker(session_id, pid, worker).await;

        let mut inner = shared.inner.lock().await;
        match &outcome {
            StopOutcome::Stopped { exit } if exit.is_anomalous() => {
                // Died on its own before the stop request reached it
                shared.report_anomaly(&mut inner, session_id, *exit);
            }
            StopOutcome::Stopped { exit } => {
                info!(session = %session_id, "Encoder stopped: {}", exit);
                shared.emit(&mut inner, format!("Encoder stopped ({})", exit));
            }
            StopOutcome::Leaked { pid } => {
                let message = format!(
                    "Warning: encoder pid {} did not terminate; a zombie process may remain",
                    pid
                );
                error!(session = %session_id, "{}", message);
                shared.emit(&mut inner, message);
                let _ = shared.events.send(SessionEvent::TerminationFailed {
                    session_id,
                    pid: *pid,
                });
            }
            StopOutcome::AlreadyStopped => {}
        }

        shared.finish(&mut inner, true);
        Ok(outcome)
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state_tx.borrow()
    }

    /// Follow state transitions
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    /// Follow log lines, state changes and failures
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.shared.settings
    }

    pub async fn status(&self) -> SessionStatus {
        let inner = self.shared.inner.lock().await;
        let active = inner.active.as_ref();
        let journal = inner.journal.as_ref();

        SessionStatus {
            state: inner.state,
            session_id: active
                .map(|a| a.id)
                .or_else(|| journal.map(|j| j.session_id())),
            started_at: active.map(|a| a.started_at),
            uptime_secs: active.map(|a| {
                Utc::now()
                    .signed_duration_since(a.started_at)
                    .num_milliseconds() as f64
                    / 1000.0
            }),
            source: active.map(|a| a.config.media.path.clone()),
            vertical_mode: active.map(|a| a.config.vertical_mode),
            air_date: active.and_then(|a| a.config.air_date),
            air_time: active.and_then(|a| a.config.air_time),
            pid: active.map(|a| a.pid),
            log_lines: journal.map_or(0, |j| j.len()),
            progress: journal.and_then(|j| j.progress().cloned()),
        }
    }

    /// Most recent log lines, `log_tail` by default
    pub async fn logs(&self, tail: Option<usize>) -> Vec<LogLine> {
        let n = tail.unwrap_or(self.shared.settings.log_tail);
        let inner = self.shared.inner.lock().await;
        inner.journal.as_ref().map_or_else(Vec::new, |j| j.tail(n))
    }

    /// Every log line of the current (or last) session
    pub async fn history(&self) -> Vec<LogLine> {
        self.logs(Some(usize::MAX)).await
    }

    async fn wait_for_idle(&self) {
        let mut rx = self.shared.state_tx.subscribe();
        if rx.wait_for(|state| state.is_idle()).await.is_err() {
            debug!("State channel closed while waiting for idle");
        }
    }
}

impl Shared {
    fn set_state(&self, inner: &mut Inner, state: SessionState) {
        if inner.state != state {
            debug!("Session {} -> {}", inner.state, state);
        }
        inner.state = state;
        self.state_tx.send_replace(state);

        let session_id = inner.journal.as_ref().map(|j| j.session_id());
        let _ = self
            .events
            .send(SessionEvent::StateChanged { session_id, state });
    }

    /// Record a controller log line and forward it like encoder output
    fn emit(&self, inner: &mut Inner, text: impl Into<String>) {
        self.publish(inner, LogLine::session(text));
    }

    fn publish(&self, inner: &mut Inner, line: LogLine) {
        if let Some(journal) = inner.journal.as_mut() {
            journal.push(line.clone());
        }
        self.sink.deliver(&line);
        let _ = self.events.send(SessionEvent::Log(line));
    }

    /// Wait (bounded) for the worker to terminate the encoder
    async fn collect_worker(
        &self,
        session_id: Uuid,
        pid: u32,
        worker: Option<JoinHandle<WorkerOutcome>>,
    ) -> StopOutcome {
        let Some(mut worker) = worker else {
            return StopOutcome::AlreadyStopped;
        };

        let bound = self.settings.grace_period()
            + self.settings.kill_timeout()
            + self.settings.drain_timeout()
            + STOP_SLACK;

        match timeout(bound, &mut worker).await {
            Ok(Ok(Ok(exit))) => StopOutcome::Stopped { exit },
            Ok(Ok(Err(e))) => {
                warn!(session = %session_id, "{}", e);
                StopOutcome::Leaked { pid: e.pid() }
            }
            Ok(Err(e)) => {
                error!(session = %session_id, "Session worker failed: {}", e);
                StopOutcome::Leaked { pid }
            }
            Err(_) => {
                error!(session = %session_id, "Session worker did not finish in {:?}", bound);
                // Dropping the process handle kills the encoder
                worker.abort();
                StopOutcome::Leaked { pid }
            }
        }
    }

    /// Stopping -> Idle: delete transient media, close out the log
    fn finish(&self, inner: &mut Inner, requested: bool) {
        if let Some(active) = inner.active.take() {
            match active.config.media.discard() {
                Ok(true) => self.emit(
                    inner,
                    format!("Removed temporary file {}", active.config.media.path.display()),
                ),
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to remove {}: {}", active.config.media.path.display(), e);
                    self.emit(
                        inner,
                        format!(
                            "Failed to remove temporary file {}: {}",
                            active.config.media.path.display(),
                            e
                        ),
                    );
                }
            }
        }

        self.emit(inner, "Streaming finished or stopped");
        inner.stopped_on_request = requested;
        self.set_state(inner, SessionState::Idle);
    }

    async fn on_worker_message(&self, message: WorkerMessage) {
        let mut inner = self.inner.lock().await;
        let WorkerMessage { session_id, event } = message;

        match event {
            WorkerEvent::Line(line) => {
                let current = inner.active.as_ref().map(|a| a.id) == Some(session_id);
                if current {
                    self.publish(&mut inner, line);
                } else {
                    // Straggler from a finished session; the journal is closed
                    self.sink.deliver(&line);
                }
            }
            WorkerEvent::Exited(exit) => {
                if !self.is_running(&inner, session_id) {
                    debug!(session = %session_id, "Exit during stop: {}", exit);
                    return;
                }

                self.report_anomaly(&mut inner, session_id, exit);
                self.set_state(&mut inner, SessionState::Stopping);
                self.finish(&mut inner, false);
            }
            WorkerEvent::Lost { pid } => {
                if !self.is_running(&inner, session_id) {
                    return;
                }

                let message = format!(
                    "Warning: lost track of encoder pid {}; a zombie process may remain",
                    pid
                );
                error!(session = %session_id, "{}", message);
                self.emit(&mut inner, message);
                let _ = self
                    .events
                    .send(SessionEvent::TerminationFailed { session_id, pid });

                self.set_state(&mut inner, SessionState::Stopping);
                self.finish(&mut inner, false);
            }
        }
    }

    /// Log an unrequested exit and broadcast it with the recent tail
    fn report_anomaly(&self, inner: &mut Inner, session_id: Uuid, exit: EncoderExit) {
        let message = format!("Encoder exited unexpectedly ({})", exit);
        error!(session = %session_id, "{}", message);
        self.emit(inner, message);

        let tail = inner
            .journal
            .as_ref()
            .map_or_else(Vec::new, |j| j.tail(self.settings.log_tail));
        let _ = self.events.send(SessionEvent::Anomaly {
            session_id,
            exit: AnomalousExit { exit, tail },
        });
    }

    fn is_running(&self, inner: &Inner, session_id: Uuid) -> bool {
        inner.state == SessionState::Running
            && inner.active.as_ref().map(|a| a.id) == Some(session_id)
    }
}

/// Apply worker messages to session state, in arrival order
async fn event_loop(shared: Weak<Shared>, mut rx: mpsc::Receiver<WorkerMessage>) {
    while let Some(message) = rx.recv().await {
        let Some(controller) = shared.upgrade() else {
            break;
        };
        controller.on_worker_message(message).await;
    }
    debug!("Session event loop stopped");
}

fn discard_quietly(media: &MediaFile) {
    if let Err(e) = media.discard() {
        warn!("Failed to remove {}: {}", media.path.display(), e);
    }
}
