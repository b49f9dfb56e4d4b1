use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::encoder::Progress;

/// Lifecycle state of the (single) streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, SessionState::Idle)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Snapshot of the controller, safe to show operators (no stream key)
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,

    /// Current session, or the last one while idle
    pub session_id: Option<Uuid>,

    /// When the current session started
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds since `started_at`
    pub uptime_secs: Option<f64>,

    pub source: Option<PathBuf>,
    pub vertical_mode: Option<bool>,
    pub air_date: Option<NaiveDate>,
    pub air_time: Option<NaiveTime>,

    /// Encoder process id while running
    pub pid: Option<u32>,

    /// Number of log lines captured for the session
    pub log_lines: usize,

    /// Most recent encoder progress record
    pub progress: Option<Progress>,
}
