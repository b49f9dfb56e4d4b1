//! Error taxonomy for streaming sessions.
//!
//! Validation, acquisition and launch failures are returned synchronously from
//! `start`. Termination failures and anomalous exits happen after the encoder is
//! running and are reported through session events instead.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::encoder::{EncoderExit, LogLine};

/// Bad or missing session configuration. The session never starts.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("source file {0} does not exist")]
    SourceMissing(PathBuf),

    #[error("source {0} is not a regular file")]
    SourceNotAFile(PathBuf),

    #[error("source file {0} is empty")]
    SourceEmpty(PathBuf),

    #[error("source file {path} is not readable: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("stream key must not be empty")]
    EmptyStreamKey,
}

/// Failure to produce a local media file. The session never starts.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("media file {0} not found")]
    NotFound(PathBuf),

    #[error("invalid media name {0:?}")]
    InvalidName(String),

    #[error("not a Google Drive file link: {0}")]
    InvalidLink(String),

    #[error("download from {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("failed to stage media at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The OS refused to spawn the encoder.
#[derive(Debug, Error)]
#[error("failed to launch encoder `{program}`: {source}")]
pub struct LaunchError {
    pub program: String,
    #[source]
    pub source: io::Error,
}

impl LaunchError {
    /// True when the encoder executable could not be found on this host.
    pub fn is_not_found(&self) -> bool {
        self.source.kind() == io::ErrorKind::NotFound
    }
}

/// The encoder would not die. A zombie or orphaned process may remain.
#[derive(Debug, Error)]
pub enum TerminationError {
    #[error("encoder pid {pid} still running after forced kill")]
    StillRunning { pid: u32 },

    #[error("failed to signal encoder pid {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: io::Error,
    },
}

impl TerminationError {
    pub fn pid(&self) -> u32 {
        match self {
            TerminationError::StillRunning { pid } | TerminationError::Signal { pid, .. } => *pid,
        }
    }
}

/// The encoder exited without anyone asking it to.
///
/// The input is looped forever, so any self-initiated exit is unexpected. The
/// most recent log lines are attached for diagnosis.
#[derive(Debug, Clone, Error)]
#[error("encoder exited unexpectedly ({exit})")]
pub struct AnomalousExit {
    pub exit: EncoderExit,
    pub tail: Vec<LogLine>,
}

/// Why the controller refused a request outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("session already active")]
    SessionActive,

    #[error("no active session")]
    NoActiveSession,
}

/// Errors returned synchronously by the session controller.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("request rejected: {0}")]
    Rejected(#[from] RejectReason),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Launch(#[from] LaunchError),
}

impl SessionError {
    pub fn is_rejected(&self) -> bool {
        matches!(self, SessionError::Rejected(_))
    }
}
