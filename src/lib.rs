pub mod config;
pub mod encoder;
pub mod error;
pub mod http;
pub mod media;
pub mod session;
pub mod sink;

pub use config::Config;
pub use encoder::{EncoderCommand, EncoderExit, LogLine, LogSource, StreamKey};
pub use error::{
    AcquisitionError, AnomalousExit, LaunchError, RejectReason, SessionError, TerminationError,
    ValidationError,
};
pub use http::{create_router, AppState};
pub use media::{DriveLink, LocalFile, MediaAcquirer, MediaFile, StagedUpload};
pub use session::{
    SessionConfig, SessionController, SessionEvent, SessionState, SessionStatus, StopOutcome,
    StreamOptions,
};
pub use sink::{ChannelSink, ConsoleSink, LogSink};
