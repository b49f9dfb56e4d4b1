use super::state::AppState;
use crate::encoder::{LogLine, StreamKey};
use crate::error::{AcquisitionError, SessionError};
use crate::media::{list_local_media, DriveLink, MediaAcquirer, MediaFile, StagedUpload};
use crate::session::{SessionConfig, SessionStatus, StopOutcome, StreamOptions};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{error, info, warn};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    /// Local media file (relative paths resolve against the media directory)
    pub source_path: Option<String>,

    /// A staged upload, as returned by `PUT /media/:name`
    pub upload_id: Option<Uuid>,

    /// A publicly shared Google Drive file link
    pub drive_url: Option<String>,

    pub stream_key: StreamKey,

    /// Force 720x1280 output
    #[serde(default)]
    pub vertical_mode: bool,

    pub air_date: Option<NaiveDate>,
    pub air_time: Option<NaiveTime>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: Uuid,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StopSessionResponse {
    pub status: String,
    pub message: String,
    pub result: StopOutcome,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub upload_id: Uuid,
    pub path: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct MediaEntry {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub tail: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

fn session_error_response(e: &SessionError) -> Response {
    let status = match e {
        SessionError::Rejected(_) => StatusCode::CONFLICT,
        SessionError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SessionError::Acquisition(AcquisitionError::InvalidName(_)) => StatusCode::BAD_REQUEST,
        SessionError::Acquisition(AcquisitionError::InvalidLink(_)) => StatusCode::BAD_REQUEST,
        SessionError::Acquisition(AcquisitionError::NotFound(_)) => StatusCode::NOT_FOUND,
        SessionError::Acquisition(AcquisitionError::Download { .. }) => StatusCode::BAD_GATEWAY,
        SessionError::Acquisition(AcquisitionError::Io { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
        SessionError::Launch(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e.to_string())
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /media
/// List local media files the operator can stream
pub async fn list_media(State(state): State<AppState>) -> impl IntoResponse {
    match list_local_media(&state.media_dir) {
        Ok(files) => {
            let entries: Vec<MediaEntry> = files
                .into_iter()
                .map(|path| MediaEntry {
                    name: path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    path,
                })
                .collect();
            (StatusCode::OK, Json(entries)).into_response()
        }
        Err(e) => {
            error!("Failed to list {}: {}", state.media_dir.display(), e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to list media: {}", e),
            )
        }
    }
}

/// PUT /media/:name
/// Stage an uploaded file; it is deleted when the session using it stops
pub async fn upload_media(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let upload = StagedUpload::new(state.media_dir.clone(), name, body);

    match upload.acquire().await {
        Ok(media) => {
            let upload_id = Uuid::new_v4();
            let path = media.path.clone();
            state.uploads.write().await.insert(upload_id, media);

            info!("Upload {} staged at {}", upload_id, path.display());
            (StatusCode::CREATED, Json(UploadResponse { upload_id, path })).into_response()
        }
        Err(e) => {
            warn!("Upload rejected: {}", e);
            session_error_response(&SessionError::Acquisition(e))
        }
    }
}

/// POST /session/start
/// Start streaming a local file, a staged upload or a Drive link
pub async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> impl IntoResponse {
    let sources = [
        req.source_path.is_some(),
        req.upload_id.is_some(),
        req.drive_url.is_some(),
    ];
    if sources.iter().filter(|given| **given).count() != 1 {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Exactly one of source_path, upload_id or drive_url is required",
        );
    }

    let options = StreamOptions {
        stream_key: req.stream_key,
        vertical_mode: req.vertical_mode,
        air_date: req.air_date,
        air_time: req.air_time,
    };

    if let Some(url) = req.drive_url {
        let link = DriveLink::new(url, state.media_dir.clone())
            .with_endpoint(state.drive_endpoint.clone());
        let description = link.describe();
        return match state.controller.start_from(&link, options).await {
            Ok(session_id) => started(session_id, format!("Streaming {}", description)),
            Err(e) => {
                error!("Failed to start streaming: {}", e);
                session_error_response(&e)
            }
        };
    }

    let media = match (req.source_path, req.upload_id) {
        (Some(path), _) => {
            let path = PathBuf::from(path);
            let path = if path.is_relative() {
                state.media_dir.join(path)
            } else {
                path
            };
            MediaFile::local(path)
        }
        (None, Some(upload_id)) => match state.uploads.write().await.remove(&upload_id) {
            Some(media) => media,
            None => {
                return error_response(
                    StatusCode::NOT_FOUND,
                    format!("Upload {} not found", upload_id),
                )
            }
        },
        (None, None) => {
            return error_response(StatusCode::BAD_REQUEST, "A media source is required")
        }
    };

    let config = SessionConfig::from_options(media.clone(), options);

    match state.controller.start(config).await {
        Ok(session_id) => started(session_id, format!("Streaming {}", media.path.display())),
        Err(e) => {
            error!("Failed to start streaming: {}", e);
            // Keep the upload available for another attempt
            if let Some(upload_id) = req.upload_id {
                state.uploads.write().await.insert(upload_id, media);
            }
            session_error_response(&e)
        }
    }
}

fn started(session_id: Uuid, message: String) -> Response {
    info!("Streaming started: session {}", session_id);
    (
        StatusCode::OK,
        Json(StartSessionResponse {
            session_id,
            status: "running".to_string(),
            message,
        }),
    )
        .into_response()
}

/// DELETE /uploads/:id
/// Discard a staged upload that will not be streamed
pub async fn delete_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<Uuid>,
) -> Response {
    let Some(media) = state.uploads.write().await.remove(&upload_id) else {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("Upload {} not found", upload_id),
        );
    };

    match media.discard() {
        Ok(_) => {
            info!("Upload {} discarded", upload_id);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => {
            error!("Failed to remove upload {}: {}", upload_id, e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to remove upload: {}", e),
            )
        }
    }
}

/// POST /session/stop
/// Stop streaming and remove temporary files
pub async fn stop_session(State(state): State<AppState>) -> impl IntoResponse {
    match state.controller.stop().await {
        Ok(result) => {
            let message = match result {
                StopOutcome::Stopped { .. } => "Streaming stopped".to_string(),
                StopOutcome::AlreadyStopped => "Streaming already stopped".to_string(),
                StopOutcome::Leaked { pid } => {
                    format!("Streaming stopped; encoder pid {} may still be running", pid)
                }
            };
            (
                StatusCode::OK,
                Json(StopSessionResponse {
                    status: "idle".to_string(),
                    message,
                    result,
                }),
            )
                .into_response()
        }
        Err(e) => session_error_response(&e),
    }
}

/// GET /session/status
pub async fn get_session_status(State(state): State<AppState>) -> Json<SessionStatus> {
    Json(state.controller.status().await)
}

/// GET /session/logs?tail=N
/// Most recent log lines of the current (or last) session
pub async fn get_session_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Json<Vec<LogLine>> {
    Json(state.controller.logs(query.tail).await)
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
