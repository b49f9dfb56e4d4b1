use std::path::{Path, PathBuf};

use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{MediaAcquirer, MediaFile};
use crate::error::AcquisitionError;

/// File name prefix of downloaded media
pub const DOWNLOAD_PREFIX: &str = "download-";

/// Public download endpoint for shared Drive files
pub const DRIVE_DOWNLOAD_ENDPOINT: &str = "https://drive.google.com/uc?export=download";

/// File id from a Drive share link.
///
/// Accepts `https://drive.google.com/file/d/<id>/view` style paths as well as
/// `open?id=<id>` and `uc?id=<id>` queries.
pub fn extract_drive_id(link: &str) -> Option<String> {
    let url = Url::parse(link.trim()).ok()?;
    let host = url.host_str()?;
    if host != "drive.google.com" && !host.ends_with(".drive.google.com") {
        return None;
    }

    let segments: Vec<&str> = url.path_segments()?.collect();
    let from_path = segments
        .windows(3)
        .find(|w| w[0] == "file" && w[1] == "d")
        .map(|w| w[2].to_string());

    let id = match from_path {
        Some(id) => id,
        None => url
            .query_pairs()
            .find(|(key, _)| key == "id")
            .map(|(_, value)| value.into_owned())?,
    };

    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then_some(id)
}

/// A publicly shared Google Drive file, downloaded into the media directory
/// as transient media
pub struct DriveLink {
    link: String,
    dir: PathBuf,
    endpoint: String,
    client: reqwest::Client,
}

impl DriveLink {
    pub fn new(link: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            link: link.into(),
            dir: dir.into(),
            endpoint: DRIVE_DOWNLOAD_ENDPOINT.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Download from `endpoint` instead of Google's
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn download_url(&self, id: &str) -> Result<Url, AcquisitionError> {
        let mut url = Url::parse(&self.endpoint).map_err(|e| AcquisitionError::Download {
            url: self.endpoint.clone(),
            reason: format!("bad download endpoint: {}", e),
        })?;
        url.query_pairs_mut().append_pair("id", id);
        Ok(url)
    }

    async fn fetch(&self, url: &Url, path: &Path) -> Result<u64, AcquisitionError> {
        let failed = |reason: String| AcquisitionError::Download {
            url: url.to_string(),
            reason,
        };
        let io_error = |source| AcquisitionError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status())));
        }

        // Drive answers private or oversized files with an HTML page
        let html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |v| v.starts_with("text/html"));
        if html {
            return Err(failed(
                "received a web page instead of the file; is the link shared publicly?".to_string(),
            ));
        }

        let mut file = tokio::fs::File::create(path).await.map_err(io_error)?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(|e| failed(e.to_string()))? {
            file.write_all(&chunk).await.map_err(io_error)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_error)?;

        if written == 0 {
            return Err(failed("empty response".to_string()));
        }
        Ok(written)
    }
}

#[async_trait::async_trait]
impl MediaAcquirer for DriveLink {
    async fn acquire(&self) -> Result<MediaFile, AcquisitionError> {
        let id = extract_drive_id(&self.link)
            .ok_or_else(|| AcquisitionError::InvalidLink(self.link.clone()))?;
        let url = self.download_url(&id)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| AcquisitionError::Io {
                path: self.dir.clone(),
                source,
            })?;
        let path = self
            .dir
            .join(format!("{}{}-{}.mp4", DOWNLOAD_PREFIX, Uuid::new_v4().simple(), id));

        info!("Downloading Drive file {} to {}", id, path.display());
        match self.fetch(&url, &path).await {
            Ok(bytes) => {
                info!("Downloaded {} bytes to {}", bytes, path.display());
                Ok(MediaFile::transient(path))
            }
            Err(e) => {
                warn!("Download of Drive file {} failed: {}", id, e);
                if let Err(remove) = tokio::fs::remove_file(&path).await {
                    debug!("No partial download to remove at {}: {}", path.display(), remove);
                }
                Err(e)
            }
        }
    }

    fn describe(&self) -> String {
        format!("Drive link {}", self.link)
    }
}
