//! Media acquisition
//!
//! Turns an operator's choice into a local file path the encoder can read.
//! Files the system creates itself (staged uploads) are marked transient and
//! are deleted when their session stops; operator-owned files never are.

mod remote;
mod upload;

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::AcquisitionError;

pub use remote::{extract_drive_id, DriveLink, DOWNLOAD_PREFIX, DRIVE_DOWNLOAD_ENDPOINT};
pub use upload::{StagedUpload, UPLOAD_PREFIX};

/// Extensions offered when listing local media
pub const MEDIA_EXTENSIONS: &[&str] = &["mp4", "flv"];

/// A local media file ready for a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaFile {
    pub path: PathBuf,

    /// Created by this system; deleted once the session using it stops
    pub transient: bool,
}

impl MediaFile {
    /// An operator-owned file
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            transient: false,
        }
    }

    /// A file this system created
    pub fn transient(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            transient: true,
        }
    }

    /// Delete the file if it is transient. Returns whether anything was removed.
    pub fn discard(&self) -> io::Result<bool> {
        if !self.transient {
            return Ok(false);
        }

        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Removed transient media {}", self.path.display());
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Produces a `MediaFile` for a session
#[async_trait::async_trait]
pub trait MediaAcquirer: Send + Sync {
    async fn acquire(&self) -> Result<MediaFile, AcquisitionError>;

    /// Short description for logging
    fn describe(&self) -> String;
}

/// A file the operator already has on disk
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl MediaAcquirer for LocalFile {
    async fn acquire(&self) -> Result<MediaFile, AcquisitionError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(_) => Ok(MediaFile::local(self.path.clone())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(AcquisitionError::NotFound(self.path.clone()))
            }
            Err(source) => Err(AcquisitionError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn describe(&self) -> String {
        format!("local file {}", self.path.display())
    }
}

/// List operator-selectable media in `dir`, sorted by name.
///
/// Staged uploads and downloads are excluded; they belong to the session that
/// created them.
pub fn list_local_media(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if !entry.file_type()?.is_file() {
            continue;
        }
        let staged = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.starts_with(UPLOAD_PREFIX) || n.starts_with(DOWNLOAD_PREFIX));
        if staged || !has_media_extension(&path) {
            continue;
        }

        files.push(path);
    }

    files.sort();
    debug!("Found {} media files in {}", files.len(), dir.display());
    Ok(files)
}

pub(crate) fn has_media_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |ext| {
            MEDIA_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
}
