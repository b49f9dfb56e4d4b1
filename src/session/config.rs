use chrono::{NaiveDate, NaiveTime};
use std::fs::File;
use std::io;

use crate::encoder::StreamKey;
use crate::error::ValidationError;
use crate::media::MediaFile;

/// Configuration for a streaming session. Immutable once the session starts.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Media to loop; must be a readable, non-empty file
    pub media: MediaFile,

    /// Ingest credential, interpolated into the destination URL only
    pub stream_key: StreamKey,

    /// Force 720x1280 output instead of passing source dimensions through
    pub vertical_mode: bool,

    /// Intended air date. Informational only; nothing is scheduled.
    pub air_date: Option<NaiveDate>,

    /// Intended air time. Informational only.
    pub air_time: Option<NaiveTime>,
}

/// Everything a session needs besides its media
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub stream_key: StreamKey,
    pub vertical_mode: bool,
    pub air_date: Option<NaiveDate>,
    pub air_time: Option<NaiveTime>,
}

impl StreamOptions {
    pub fn new(stream_key: StreamKey, vertical_mode: bool) -> Self {
        Self {
            stream_key,
            vertical_mode,
            air_date: None,
            air_time: None,
        }
    }
}

impl SessionConfig {
    pub fn from_options(media: MediaFile, options: StreamOptions) -> Self {
        Self::new(media, options.stream_key, options.vertical_mode)
            .with_schedule(options.air_date, options.air_time)
    }

    pub fn new(media: MediaFile, stream_key: StreamKey, vertical_mode: bool) -> Self {
        Self {
            media,
            stream_key,
            vertical_mode,
            air_date: None,
            air_time: None,
        }
    }

    pub fn with_schedule(mut self, air_date: Option<NaiveDate>, air_time: Option<NaiveTime>) -> Self {
        self.air_date = air_date;
        self.air_time = air_time;
        self
    }

    /// Check the source file and stream key without touching the encoder
    pub fn validate(&self) -> Result<(), ValidationError> {
        let path = &self.media.path;

        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ValidationError::SourceMissing(path.clone()))
            }
            Err(source) => {
                return Err(ValidationError::SourceUnreadable {
                    path: path.clone(),
                    source,
                })
            }
        };

        if !metadata.is_file() {
            return Err(ValidationError::SourceNotAFile(path.clone()));
        }
        if metadata.len() == 0 {
            return Err(ValidationError::SourceEmpty(path.clone()));
        }
        File::open(path).map_err(|source| ValidationError::SourceUnreadable {
            path: path.clone(),
            source,
        })?;

        if self.stream_key.is_blank() {
            return Err(ValidationError::EmptyStreamKey);
        }

        Ok(())
    }
}
