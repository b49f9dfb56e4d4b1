//! Transcode process supervision
//!
//! This module owns everything about the external encoder:
//! - Building its argument list from a session config
//! - Spawning it with combined, line-decoded, redacted output
//! - Bounded termination (SIGTERM, then kill) of the one process it spawned
//! - Parsing progress records

mod command;
mod output;
mod process;
mod progress;
mod redact;

pub use command::{EncodeProfile, EncoderCommand, IngestUrl, LIVE_PROFILE, VERTICAL_HEIGHT, VERTICAL_WIDTH};
pub use output::{LogLine, LogSource, LogStream};
pub use process::{launch, EncoderExit, ProcessHandle, DEFAULT_KILL_TIMEOUT};
pub use progress::Progress;
pub use redact::{Redactor, StreamKey, REDACTED};
