//! Per-session background task.
//!
//! Owns the encoder process. Forwards its output to the controller in order,
//! notices when it exits, and terminates it when asked. It never touches
//! session state; everything goes back to the controller as messages.

use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::encoder::{EncoderExit, LogLine, LogStream, ProcessHandle};
use crate::error::TerminationError;

/// What the worker reports back to the controller
#[derive(Debug)]
pub(super) enum WorkerEvent {
    Line(LogLine),

    /// The encoder exited without being asked to
    Exited(EncoderExit),

    /// The encoder's status became unknowable and it could not be killed
    Lost { pid: u32 },
}

#[derive(Debug)]
pub(super) struct WorkerMessage {
    pub session_id: Uuid,
    pub event: WorkerEvent,
}

#[derive(Debug, Clone, Copy)]
pub(super) struct WorkerSettings {
    pub grace_period: Duration,
    pub drain_timeout: Duration,
}

/// Final result of a worker, collected by `stop`
pub(super) type WorkerOutcome = Result<EncoderExit, TerminationError>;

pub(super) fn spawn(
    session_id: Uuid,
    process: ProcessHandle,
    stop_rx: oneshot::Receiver<()>,
    events: mpsc::Sender<WorkerMessage>,
    settings: WorkerSettings,
) -> JoinHandle<WorkerOutcome> {
    let worker = Worker {
        session_id,
        events,
        settings,
    };
    tokio::spawn(worker.run(process, stop_rx))
}

struct Worker {
    session_id: Uuid,
    events: mpsc::Sender<WorkerMessage>,
    settings: WorkerSettings,
}

impl Worker {
    async fn run(self, mut process: ProcessHandle, mut stop_rx: oneshot::Receiver<()>) -> WorkerOutcome {
        let pid = process.pid();
        let mut output = process.stream_logs();
        let mut output_open = output.is_some();

        debug!(session = %self.session_id, pid, "Session worker started");

        loop {
            tokio::select! {
                biased;

                // A dropped sender means the controller is gone; stop either way
                _ = &mut stop_rx => {
                    info!(session = %self.session_id, pid, "Stop requested");
                    let outcome = process.terminate(self.settings.grace_period).await;
                    self.drain(&mut output, output_open).await;
                    return outcome;
                }

                line = next_line(&mut output), if output_open => match line {
                    Some(line) => self.send(WorkerEvent::Line(line)).await,
                    None => {
                        debug!(session = %self.session_id, pid, "Encoder output closed");
                        output_open = false;
                    }
                },

                exit = process.wait() => {
                    self.drain(&mut output, output_open).await;

                    let outcome = match exit {
                        Ok(exit) => {
                            warn!(session = %self.session_id, pid, "Encoder exited on its own: {}", exit);
                            self.send(WorkerEvent::Exited(exit)).await;
                            Ok(exit)
                        }
                        Err(e) => {
                            warn!(session = %self.session_id, pid, "Lost track of encoder: {}", e);
                            let outcome = process.terminate(self.settings.grace_period).await;
                            match &outcome {
                                Ok(exit) => self.send(WorkerEvent::Exited(*exit)).await,
                                Err(_) => self.send(WorkerEvent::Lost { pid }).await,
                            }
                            outcome
                        }
                    };
                    return outcome;
                }
            }
        }
    }

    /// Forward whatever output is still buffered, for at most the drain timeout
    async fn drain(&self, output: &mut Option<LogStream>, open: bool) {
        let Some(stream) = output.as_mut().filter(|_| open) else {
            return;
        };

        let deadline = Instant::now() + self.settings.drain_timeout;
        loop {
            match timeout_at(deadline, stream.next()).await {
                Ok(Some(line)) => self.send(WorkerEvent::Line(line)).await,
                Ok(None) => break,
                Err(_) => {
                    debug!(session = %self.session_id, "Encoder output still open after drain timeout");
                    break;
                }
            }
        }
    }

    async fn send(&self, event: WorkerEvent) {
        let message = WorkerMessage {
            session_id: self.session_id,
            event,
        };
        if self.events.send(message).await.is_err() {
            debug!(session = %self.session_id, "Controller gone, dropping worker event");
        }
    }
}

async fn next_line(output: &mut Option<LogStream>) -> Option<LogLine> {
    match output {
        Some(stream) => stream.next().await,
        None => None,
    }
}
