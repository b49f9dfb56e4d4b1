//! Streaming session management
//!
//! This module provides the `SessionController` that manages:
//! - The single session's state machine (idle, starting, running, stopping)
//! - Launching and stopping the encoder through a background worker
//! - Log capture, forwarding to the sink, and bounded tail reads
//! - Cleanup of transient media when a session ends

mod config;
mod controller;
mod events;
mod journal;
mod status;
mod worker;

pub use config::{SessionConfig, StreamOptions};
pub use controller::{SessionController, StopOutcome};
pub use events::SessionEvent;
pub use journal::SessionJournal;
pub use status::{SessionState, SessionStatus};
