use uuid::Uuid;

use super::status::SessionState;
use crate::encoder::LogLine;
use crate::error::AnomalousExit;

/// Asynchronous notifications from the session controller.
///
/// Failures that happen after the encoder is running arrive here rather than
/// as return values of `start`.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged {
        session_id: Option<Uuid>,
        state: SessionState,
    },

    Log(LogLine),

    /// The encoder exited without a stop request
    Anomaly {
        session_id: Uuid,
        exit: AnomalousExit,
    },

    /// The encoder could not be confirmed dead; the session was forced idle
    TerminationFailed {
        session_id: Uuid,
        pid: u32,
    },
}
