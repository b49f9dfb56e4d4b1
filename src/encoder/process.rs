use std::fmt;
use std::io;
#[cfg(unix)]
use std::os::fd::OwnedFd;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::Serialize;
#[cfg(unix)]
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{info, warn};

use super::command::EncoderCommand;
use super::output::LogStream;
use crate::error::{LaunchError, TerminationError};

/// Default time a killed encoder gets to be reaped
pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(2);

/// How an encoder process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EncoderExit {
    /// Exit code, when the process exited normally
    pub code: Option<i32>,

    /// Terminating signal, when it was killed (unix only)
    pub signal: Option<i32>,

    /// Whether termination was asked for by the caller
    pub requested: bool,

    /// Whether the graceful signal had to be escalated to a kill
    pub forced: bool,
}

impl EncoderExit {
    fn from_status(status: ExitStatus, requested: bool, forced: bool) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
            requested,
            forced,
        }
    }

    /// The encoder loops its input forever, so exiting on its own is never expected.
    pub fn is_anomalous(&self) -> bool {
        !self.requested
    }
}

impl fmt::Display for EncoderExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code)?,
            (None, Some(signal)) => write!(f, "killed by signal {}", signal)?,
            (None, None) => write!(f, "unknown exit status")?,
        }
        if self.requested {
            write!(f, ", stop requested")?;
        } else {
            write!(f, ", exited on its own")?;
        }
        if self.forced {
            write!(f, ", forced")?;
        }
        Ok(())
    }
}

/// Exclusive ownership of one running encoder process.
///
/// Only the process spawned here is ever signalled. Dropping the handle kills
/// the process if it is still running.
pub struct ProcessHandle {
    child: Child,
    pid: u32,
    output: Option<LogStream>,
    termination_requested: bool,
    kill_timeout: Duration,
    exit: Option<EncoderExit>,
}

/// Spawn the encoder with stdout and stderr captured into one log stream.
pub fn launch(cmd: &EncoderCommand) -> Result<ProcessHandle, LaunchError> {
    let launch_error = |source: io::Error| LaunchError {
        program: cmd.program.clone(),
        source,
    };

    let mut command = Command::new(&cmd.program);
    command.args(cmd.argv()).stdin(Stdio::null()).kill_on_drop(true);

    #[cfg(unix)]
    let (mut child, output) = {
        let (reader, stdout, stderr) = merged_pipe().map_err(launch_error)?;
        // The parent's write ends go away with `command`, so the reader sees
        // EOF once the encoder and its children have exited
        let child = command.stdout(stdout).stderr(stderr).spawn().map_err(launch_error)?;
        drop(command);
        (child, LogStream::spawn(reader, cmd.redactor()))
    };

    #[cfg(not(unix))]
    let (mut child, output) = {
        let mut child = command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(launch_error)?;
        let output = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => LogStream::spawn_split(stdout, stderr, cmd.redactor()),
            _ => {
                return Err(launch_error(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "encoder output pipes unavailable",
                )))
            }
        };
        (child, output)
    };

    let pid = match child.id() {
        Some(pid) => pid,
        None => {
            let _ = child.start_kill();
            return Err(launch_error(io::Error::new(
                io::ErrorKind::Other,
                "encoder exited during spawn",
            )));
        }
    };

    info!(pid, "Launched encoder: {}", cmd);

    Ok(ProcessHandle {
        child,
        pid,
        output: Some(output),
        termination_requested: false,
        kill_timeout: DEFAULT_KILL_TIMEOUT,
        exit: None,
    })
}

/// One pipe whose write end is shared by the child's stdout and stderr
#[cfg(unix)]
fn merged_pipe() -> io::Result<(pipe::Receiver, Stdio, Stdio)> {
    let (reader, writer) = std::io::pipe()?;
    let stderr = writer.try_clone()?;
    let reader = pipe::Receiver::from_owned_fd(OwnedFd::from(reader))?;
    Ok((reader, Stdio::from(writer), Stdio::from(stderr)))
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn set_kill_timeout(&mut self, kill_timeout: Duration) {
        self.kill_timeout = kill_timeout;
    }

    /// Take the combined output stream. Available once per process.
    pub fn stream_logs(&mut self) -> Option<LogStream> {
        self.output.take()
    }

    /// Wait for the process to exit. Cancel-safe.
    pub async fn wait(&mut self) -> io::Result<EncoderExit> {
        if let Some(exit) = self.exit {
            return Ok(exit);
        }

        let status = self.child.wait().await?;
        Ok(self.record(status, false))
    }

    /// Stop the process: SIGTERM, then a forced kill if it is still alive
    /// after `grace`.
    ///
    /// On `Ok` the process has been reaped. On `Err` it may still exist.
    pub async fn terminate(&mut self, grace: Duration) -> Result<EncoderExit, TerminationError> {
        if let Some(exit) = self.exit {
            return Ok(exit);
        }

        // An encoder that already exited on its own is reported as such
        match self.child.try_wait() {
            Ok(Some(status)) => return Ok(self.record(status, false)),
            Ok(None) => {}
            Err(e) => warn!(pid = self.pid, "Failed to poll encoder status: {}", e),
        }
        self.termination_requested = true;

        match send_sigterm(self.pid) {
            Ok(()) => match timeout(grace, self.child.wait()).await {
                Ok(Ok(status)) => {
                    info!(pid = self.pid, "Encoder exited after SIGTERM");
                    return Ok(self.record(status, false));
                }
                Ok(Err(e)) => warn!(pid = self.pid, "Failed waiting on encoder: {}", e),
                Err(_) => warn!(
                    pid = self.pid,
                    "Encoder still running {}ms after SIGTERM, killing",
                    grace.as_millis()
                ),
            },
            Err(e) => warn!(pid = self.pid, "SIGTERM failed ({}), killing", e),
        }

        if let Err(e) = self.child.start_kill() {
            warn!(pid = self.pid, "Kill failed: {}", e);
        }

        match timeout(self.kill_timeout, self.child.wait()).await {
            Ok(Ok(status)) => Ok(self.record(status, true)),
            Ok(Err(source)) => Err(TerminationError::Signal {
                pid: self.pid,
                source,
            }),
            Err(_) => Err(TerminationError::StillRunning { pid: self.pid }),
        }
    }

    fn record(&mut self, status: ExitStatus, forced: bool) -> EncoderExit {
        let exit = EncoderExit::from_status(status, self.termination_requested, forced);
        self.exit = Some(exit);
        exit
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;

    // SAFETY: kill(2) has no memory-safety preconditions. The child has not
    // been reaped yet, so the pid still names the process we spawned.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "graceful termination is unix-only",
    ))
}
