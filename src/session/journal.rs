use uuid::Uuid;

use crate::encoder::{LogLine, LogSource, Progress};

/// Every log line of one session, in arrival order.
///
/// The whole session is kept for diagnostics; displays read a bounded tail.
#[derive(Debug, Clone)]
pub struct SessionJournal {
    session_id: Uuid,
    lines: Vec<LogLine>,
    progress: Option<Progress>,
}

impl SessionJournal {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            lines: Vec::new(),
            progress: None,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn push(&mut self, line: LogLine) {
        if line.source != LogSource::Session {
            if let Some(progress) = Progress::parse(&line.text) {
                self.progress = Some(progress);
            }
        }
        self.lines.push(line);
    }

    /// The most recent `n` lines, oldest first
    pub fn tail(&self, n: usize) -> Vec<LogLine> {
        let start = self.lines.len().saturating_sub(n);
        self.lines[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn progress(&self) -> Option<&Progress> {
        self.progress.as_ref()
    }
}
