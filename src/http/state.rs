use crate::media::{MediaFile, DRIVE_DOWNLOAD_ENDPOINT};
use crate::session::SessionController;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The single session controller
    pub controller: SessionController,

    /// Uploads staged but not yet used by a session (upload_id → file)
    pub uploads: Arc<RwLock<HashMap<Uuid, MediaFile>>>,

    /// Where local media is listed and uploads are staged
    pub media_dir: PathBuf,

    /// Maximum upload body size in bytes
    pub upload_limit: usize,

    /// Where Drive links are downloaded from
    pub drive_endpoint: String,
}

impl AppState {
    pub fn new(controller: SessionController, media_dir: PathBuf, upload_limit: usize) -> Self {
        Self {
            controller,
            uploads: Arc::new(RwLock::new(HashMap::new())),
            media_dir,
            upload_limit,
            drive_endpoint: DRIVE_DOWNLOAD_ENDPOINT.to_string(),
        }
    }

    pub fn with_drive_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.drive_endpoint = endpoint.into();
        self
    }

    /// Delete every staged upload no session has claimed. Returns how many
    /// files were removed.
    pub async fn discard_uploads(&self) -> usize {
        let staged: Vec<(Uuid, MediaFile)> = self.uploads.write().await.drain().collect();

        let mut removed = 0;
        for (upload_id, media) in staged {
            match media.discard() {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to remove upload {}: {}", upload_id, e),
            }
        }
        if removed > 0 {
            info!("Discarded {} unused uploads", removed);
        }
        removed
    }
}
