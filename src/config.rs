use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Default config file, looked up relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/loopcast";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub encoder: EncoderConfig,
    pub session: SessionSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
    /// Maximum accepted upload body, in megabytes
    pub upload_limit_mb: usize,
}

impl HttpConfig {
    /// Upload limit in bytes, clamped to `usize::MAX`
    pub fn upload_limit_bytes(&self) -> usize {
        self.upload_limit_mb.saturating_mul(1024 * 1024)
    }
}

/// Where the encoder lives and where it publishes to
#[derive(Debug, Clone, Deserialize)]
pub struct EncoderConfig {
    /// Executable name or path (looked up on PATH when bare)
    pub program: String,

    /// Host part of `rtmp://<host>/live2/<key>`
    pub ingest_host: String,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            ingest_host: "a.rtmp.youtube.com".to_string(),
        }
    }
}

/// Session controller tuning
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    /// Time the encoder gets to exit after SIGTERM before it is killed
    pub grace_period_ms: u64,

    /// Time allowed for a killed encoder to be reaped
    pub kill_timeout_ms: u64,

    /// Time spent draining buffered output once the encoder is gone
    pub drain_timeout_ms: u64,

    /// Number of most-recent log lines shown to operators
    pub log_tail: usize,

    /// Directory holding local media, staged uploads and downloads
    pub media_dir: PathBuf,

    /// Google Drive download endpoint; the file id is appended as `id=`
    pub drive_endpoint: String,
}

impl SessionSettings {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            grace_period_ms: 5000,
            kill_timeout_ms: 2000,
            drain_timeout_ms: 1000,
            log_tail: 20,
            media_dir: PathBuf::from("."),
            drive_endpoint: crate::media::DRIVE_DOWNLOAD_ENDPOINT.to_string(),
        }
    }
}

impl Config {
    /// Load defaults, then the optional file at `path`, then `LOOPCAST__*` env overrides.
    pub fn load(path: &str) -> Result<Self> {
        let encoder = EncoderConfig::default();
        let session = SessionSettings::default();

        let settings = config::Config::builder()
            .set_default("service.name", "loopcast")?
            .set_default("service.http.bind", "127.0.0.1")?
            .set_default("service.http.port", 8080)?
            .set_default("service.http.upload_limit_mb", 2048)?
            .set_default("encoder.program", encoder.program)?
            .set_default("encoder.ingest_host", encoder.ingest_host)?
            .set_default("session.grace_period_ms", session.grace_period_ms)?
            .set_default("session.kill_timeout_ms", session.kill_timeout_ms)?
            .set_default("session.drain_timeout_ms", session.drain_timeout_ms)?
            .set_default("session.log_tail", session.log_tail as u64)?
            .set_default("session.media_dir", session.media_dir.to_string_lossy().into_owned())?
            .set_default("session.drive_endpoint", session.drive_endpoint)?
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("LOOPCAST").separator("__"))
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }
}
