use std::path::{Path, PathBuf};

use tracing::info;
use uuid::Uuid;

use super::{has_media_extension, MediaAcquirer, MediaFile};
use crate::error::AcquisitionError;

/// File name prefix of staged uploads
pub const UPLOAD_PREFIX: &str = "upload-";

/// Uploaded bytes written into the media directory as a transient file
pub struct StagedUpload<B> {
    dir: PathBuf,
    name: String,
    data: B,
}

impl<B> StagedUpload<B>
where
    B: AsRef<[u8]> + Send + Sync,
{
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>, data: B) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
            data,
        }
    }

    /// `upload-<uuid>-<name>`, rejecting anything that is not a plain media file name
    fn target_path(&self) -> Result<PathBuf, AcquisitionError> {
        let name = self.name.trim();
        let plain = Path::new(name)
            .file_name()
            .map_or(false, |file_name| file_name == name);

        if !plain || name.starts_with('.') || !has_media_extension(Path::new(name)) {
            return Err(AcquisitionError::InvalidName(self.name.clone()));
        }

        Ok(self
            .dir
            .join(format!("{}{}-{}", UPLOAD_PREFIX, Uuid::new_v4().simple(), name)))
    }
}

#[async_trait::async_trait]
impl<B> MediaAcquirer for StagedUpload<B>
where
    B: AsRef<[u8]> + Send + Sync,
{
    async fn acquire(&self) -> Result<MediaFile, AcquisitionError> {
        let path = self.target_path()?;
        let io_error = |source| AcquisitionError::Io {
            path: path.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.dir).await.map_err(io_error)?;
        tokio::fs::write(&path, self.data.as_ref())
            .await
            .map_err(io_error)?;

        info!(
            "Staged upload {} ({} bytes) at {}",
            self.name,
            self.data.as_ref().len(),
            path.display()
        );

        Ok(MediaFile::transient(path))
    }

    fn describe(&self) -> String {
        format!("upload {}", self.name)
    }
}
