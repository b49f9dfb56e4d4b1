//! Log sinks
//!
//! A sink receives the session's log lines in order. Delivery never blocks:
//! when a sink cannot take a line it falls back to the console.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::encoder::{LogLine, LogSource};

pub trait LogSink: Send + Sync {
    fn deliver(&self, line: &LogLine);
}

/// Writes lines to the console through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn deliver(&self, line: &LogLine) {
        match line.source {
            LogSource::Session => info!(target: "loopcast::session", "{}", line.text),
            LogSource::Encoder => info!(target: "encoder", "{}", line.text),
        }
    }
}

/// Forwards lines into a bounded channel, e.g. for a UI.
///
/// A full or closed channel degrades to the console instead of stalling the
/// session.
pub struct ChannelSink {
    tx: mpsc::Sender<LogLine>,
    fallback: ConsoleSink,
    degraded: AtomicBool,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<LogLine>) -> Self {
        Self {
            tx,
            fallback: ConsoleSink,
            degraded: AtomicBool::new(false),
        }
    }

    /// Create a sink together with its receiving end
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<LogLine>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl LogSink for ChannelSink {
    fn deliver(&self, line: &LogLine) {
        match self.tx.try_send(line.clone()) {
            Ok(()) => {
                if self.degraded.swap(false, Ordering::Relaxed) {
                    info!("Log sink recovered");
                }
            }
            Err(e) => {
                if !self.degraded.swap(true, Ordering::Relaxed) {
                    let reason = match e {
                        mpsc::error::TrySendError::Full(_) => "full",
                        mpsc::error::TrySendError::Closed(_) => "closed",
                    };
                    warn!("Log sink {}, falling back to console", reason);
                }
                self.fallback.deliver(line);
            }
        }
    }
}
