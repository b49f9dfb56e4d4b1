//! HTTP API server for operator control
//!
//! This module provides a REST API for controlling the streaming session:
//! - GET /media - List local media files
//! - PUT /media/:name - Stage an upload (raw body)
//! - DELETE /uploads/:id - Discard a staged upload
//! - POST /session/start - Start streaming a local file, staged upload or Drive link
//! - POST /session/stop - Stop streaming
//! - GET /session/status - Query session status
//! - GET /session/logs?tail=N - Most recent encoder log lines
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::{StartSessionRequest, StartSessionResponse, StopSessionResponse, UploadResponse};
pub use routes::create_router;
pub use state::AppState;
