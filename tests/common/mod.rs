// Shared fixtures for session tests
//
// The encoder is replaced by small shell scripts so tests never need ffmpeg
// or a network. Each script prints a banner and its arguments (including the
// destination URL) so redaction can be checked.

#![allow(dead_code)]

use anyhow::Result;
use loopcast::config::{EncoderConfig, SessionSettings};
use loopcast::{LogLine, LogSink, SessionController, SessionEvent};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

pub const STREAM_KEY: &str = "abcd1234";

/// Loops forever, printing ffmpeg-style progress until signalled
pub const LOOPING_ENCODER: &str = r#"#!/bin/sh
echo "ffmpeg version fake-encoder" >&2
echo "args: $*" >&2
echo "stdout is captured too"
i=0
while true; do
  i=$((i + 1))
  echo "frame=$i fps=30 q=28.0 size=1kB time=00:00:01.00 bitrate=2500.0kbits/s speed=1x" >&2
  sleep 0.1
done
"#;

/// Alternates stdout and stderr lines, then idles
pub const INTERLEAVING_ENCODER: &str = r#"#!/bin/sh
i=0
while [ $i -lt 200 ]; do
  if [ $((i % 2)) -eq 0 ]; then
    echo "seq $i"
  else
    echo "seq $i" >&2
  fi
  i=$((i + 1))
done
while true; do
  sleep 0.1
done
"#;

/// Ignores SIGTERM, so stopping it needs a forced kill
pub const STUBBORN_ENCODER: &str = r#"#!/bin/sh
trap '' TERM
echo "ffmpeg version fake-encoder (stubborn)" >&2
while true; do
  sleep 0.1
done
"#;

/// Fails right away, like an unreachable ingest server
pub const FAILING_ENCODER: &str = r#"#!/bin/sh
echo "ffmpeg version fake-encoder" >&2
echo "args: $*" >&2
echo "Connection to tcp://127.0.0.1:1935 failed: Connection refused" >&2
exit 1
"#;

pub fn write_script(dir: &Path, name: &str, body: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, body)?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

pub fn write_media(dir: &Path, name: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, b"\x00\x00\x00\x18ftypmp42 not really a video")?;
    Ok(path)
}

pub fn encoder_config(program: &Path) -> EncoderConfig {
    EncoderConfig {
        program: program.to_string_lossy().into_owned(),
        ingest_host: "127.0.0.1".to_string(),
    }
}

pub fn fast_settings(media_dir: &Path) -> SessionSettings {
    SessionSettings {
        grace_period_ms: 1000,
        kill_timeout_ms: 1000,
        drain_timeout_ms: 300,
        log_tail: 20,
        media_dir: media_dir.to_path_buf(),
        ..SessionSettings::default()
    }
}

pub fn controller(program: &Path, media_dir: &Path, sink: Arc<dyn LogSink>) -> SessionController {
    SessionController::new(encoder_config(program), fast_settings(media_dir), sink)
}

/// Wait for a log line containing `needle`
pub async fn wait_for_log(
    events: &mut broadcast::Receiver<SessionEvent>,
    needle: &str,
) -> Result<LogLine> {
    let found = timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Log(line)) if line.text.contains(needle) => return Ok(line),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => return Err(anyhow::anyhow!("event channel closed: {}", e)),
            }
        }
    })
    .await??;
    Ok(found)
}

/// Whether a process with this pid exists
pub fn process_exists(pid: u32) -> bool {
    // SAFETY: signal 0 only checks for existence and permissions
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}
