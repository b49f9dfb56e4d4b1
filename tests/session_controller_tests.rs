// Integration tests for the session controller
//
// These tests drive real child processes (shell scripts standing in for the
// encoder) through start, stop, crash and forced-kill paths.

#![cfg(unix)]

mod common;

use anyhow::Result;
use common::*;
use loopcast::config::SessionSettings;
use loopcast::error::ValidationError;
use loopcast::media::UPLOAD_PREFIX;
use loopcast::{
    ConsoleSink, LogSource, MediaFile, SessionConfig, SessionController, SessionError,
    SessionEvent, SessionState, StagedUpload, StopOutcome, StreamKey, StreamOptions,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;

fn session_for(media: MediaFile) -> SessionConfig {
    SessionConfig::new(media, StreamKey::new(STREAM_KEY), false)
}

struct Fixture {
    dir: TempDir,
    controller: SessionController,
}

fn fixture(script: &str) -> Result<Fixture> {
    let dir = TempDir::new()?;
    let program = write_script(dir.path(), "fake-encoder.sh", script)?;
    let controller = controller(&program, dir.path(), Arc::new(ConsoleSink));
    Ok(Fixture { dir, controller })
}

#[tokio::test]
async fn test_missing_source_is_rejected_before_launch() -> Result<()> {
    let f = fixture(LOOPING_ENCODER)?;
    let missing = f.dir.path().join("missing.mp4");

    let err = f
        .controller
        .start(session_for(MediaFile::local(&missing)))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::Validation(ValidationError::SourceMissing(_))
    ));
    assert_eq!(f.controller.state(), SessionState::Idle);
    assert!(f.controller.status().await.pid.is_none());
    Ok(())
}

#[tokio::test]
async fn test_blank_stream_key_is_rejected() -> Result<()> {
    let f = fixture(LOOPING_ENCODER)?;
    let media = write_media(f.dir.path(), "clip.mp4")?;

    let config = SessionConfig::new(MediaFile::local(media), StreamKey::new("   "), false);
    let err = f.controller.start(config).await.unwrap_err();

    assert!(matches!(
        err,
        SessionError::Validation(ValidationError::EmptyStreamKey)
    ));
    assert_eq!(f.controller.state(), SessionState::Idle);
    Ok(())
}

#[tokio::test]
async fn test_start_then_stop_terminates_encoder() -> Result<()> {
    let f = fixture(LOOPING_ENCODER)?;
    let media = write_media(f.dir.path(), "clip.mp4")?;
    let mut events = f.controller.subscribe();

    let session_id = f.controller.start(session_for(MediaFile::local(&media))).await?;
    assert_eq!(f.controller.state(), SessionState::Running);

    wait_for_log(&mut events, "ffmpeg version").await?;

    let status = f.controller.status().await;
    assert_eq!(status.session_id, Some(session_id));
    assert_eq!(status.source.as_deref(), Some(media.as_path()));
    assert_eq!(status.vertical_mode, Some(false));
    let pid = status.pid.expect("running session has a pid");
    assert!(process_exists(pid));

    let outcome = f.controller.stop().await?;
    match outcome {
        StopOutcome::Stopped { exit } => {
            assert!(exit.requested);
            assert!(!exit.is_anomalous());
        }
        other => panic!("unexpected stop outcome: {:?}", other),
    }

    assert_eq!(f.controller.state(), SessionState::Idle);
    assert!(!process_exists(pid));

    // Local media belongs to the operator
    assert!(media.exists());

    let status = f.controller.status().await;
    assert!(status.pid.is_none());
    assert_eq!(status.session_id, Some(session_id));

    let history = f.controller.history().await;
    assert_eq!(
        history.last().map(|l| l.text.as_str()),
        Some("Streaming finished or stopped")
    );
    Ok(())
}

#[tokio::test]
async fn test_second_stop_is_a_no_op() -> Result<()> {
    let f = fixture(LOOPING_ENCODER)?;
    let media = write_media(f.dir.path(), "clip.mp4")?;

    f.controller.start(session_for(MediaFile::local(media))).await?;
    assert!(matches!(
        f.controller.stop().await?,
        StopOutcome::Stopped { .. }
    ));
    assert_eq!(f.controller.stop().await?, StopOutcome::AlreadyStopped);
    assert_eq!(f.controller.state(), SessionState::Idle);
    Ok(())
}

#[tokio::test]
async fn test_stop_without_session_is_rejected() -> Result<()> {
    let f = fixture(LOOPING_ENCODER)?;

    let err = f.controller.stop().await.unwrap_err();
    assert!(err.is_rejected());
    assert_eq!(err.to_string(), "request rejected: no active session");
    Ok(())
}

#[tokio::test]
async fn test_start_while_running_is_rejected() -> Result<()> {
    let f = fixture(LOOPING_ENCODER)?;
    let media = write_media(f.dir.path(), "clip.mp4")?;

    let first = f.controller.start(session_for(MediaFile::local(&media))).await?;
    let err = f
        .controller
        .start(session_for(MediaFile::local(&media)))
        .await
        .unwrap_err();

    assert!(err.is_rejected());
    assert_eq!(f.controller.status().await.session_id, Some(first));

    f.controller.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_stream_key_never_reaches_logs() -> Result<()> {
    let f = fixture(LOOPING_ENCODER)?;
    let media = write_media(f.dir.path(), "clip.mp4")?;
    let mut events = f.controller.subscribe();

    f.controller.start(session_for(MediaFile::local(media))).await?;
    // The script echoes its full argv, destination URL included
    wait_for_log(&mut events, "args:").await?;
    wait_for_log(&mut events, "frame=").await?;
    f.controller.stop().await?;

    let history = f.controller.history().await;
    assert!(!history.is_empty());
    for line in &history {
        assert!(
            !line.text.contains(STREAM_KEY),
            "stream key leaked in {:?}",
            line.text
        );
    }

    let running = history
        .iter()
        .find(|l| l.text.starts_with("Running: "))
        .expect("command line is announced");
    assert!(running.text.contains("rtmp://.../live2/<redacted>"));

    let args = history
        .iter()
        .find(|l| l.text.starts_with("args: "))
        .expect("encoder output is captured");
    assert!(args.text.contains("<redacted>"));
    Ok(())
}

#[tokio::test]
async fn test_transient_media_is_removed_on_stop() -> Result<()> {
    let f = fixture(LOOPING_ENCODER)?;
    let media = write_media(f.dir.path(), "upload-test-clip.mp4")?;

    f.controller.start(session_for(MediaFile::transient(&media))).await?;
    assert!(media.exists());

    f.controller.stop().await?;
    assert!(!media.exists());

    let history = f.controller.history().await;
    assert!(history
        .iter()
        .any(|l| l.text.starts_with("Removed temporary file")));
    Ok(())
}

#[tokio::test]
async fn test_start_from_staged_upload() -> Result<()> {
    let f = fixture(LOOPING_ENCODER)?;
    let upload = StagedUpload::new(f.dir.path(), "clip.mp4", b"uploaded video bytes".to_vec());

    f.controller
        .start_from(&upload, StreamOptions::new(StreamKey::new(STREAM_KEY), true))
        .await?;

    let source = f.controller.status().await.source.expect("running source");
    let file_name = source.file_name().unwrap().to_string_lossy().into_owned();
    assert!(file_name.starts_with(UPLOAD_PREFIX));
    assert!(file_name.ends_with("-clip.mp4"));
    assert_eq!(f.controller.status().await.vertical_mode, Some(true));
    assert!(source.exists());

    f.controller.stop().await?;
    assert!(!source.exists());
    Ok(())
}

#[tokio::test]
async fn test_failed_start_discards_staged_upload() -> Result<()> {
    let f = fixture(LOOPING_ENCODER)?;
    let upload = StagedUpload::new(f.dir.path(), "clip.mp4", b"uploaded video bytes".to_vec());

    let err = f
        .controller
        .start_from(&upload, StreamOptions::new(StreamKey::new(""), false))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));

    let leftovers: Vec<_> = std::fs::read_dir(f.dir.path())?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(UPLOAD_PREFIX))
        .collect();
    assert!(leftovers.is_empty(), "staged upload was not removed");
    Ok(())
}

#[tokio::test]
async fn test_unexpected_exit_reports_anomaly_with_tail() -> Result<()> {
    let f = fixture(FAILING_ENCODER)?;
    let media = write_media(f.dir.path(), "clip.mp4")?;
    let mut events = f.controller.subscribe();
    let mut state = f.controller.watch_state();

    let session_id = f.controller.start(session_for(MediaFile::local(media))).await?;

    let anomaly = timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Anomaly { session_id, exit }) => return Ok((session_id, exit)),
                Ok(_) => continue,
                Err(e) => return Err(e),
            }
        }
    })
    .await??;

    let (anomaly_session, exit) = anomaly;
    assert_eq!(anomaly_session, session_id);
    assert_eq!(exit.exit.code, Some(1));
    assert!(!exit.exit.requested);
    assert!(exit.tail.len() <= 20);
    assert!(exit.tail.iter().any(|l| l.text.contains("Connection refused")));
    assert!(exit.tail.iter().all(|l| !l.text.contains(STREAM_KEY)));

    timeout(Duration::from_secs(5), state.wait_for(|s| s.is_idle())).await??;

    // Nobody asked for this stop, so there is nothing to stop
    assert!(f.controller.stop().await.unwrap_err().is_rejected());
    Ok(())
}

#[tokio::test]
async fn test_missing_encoder_returns_to_idle() -> Result<()> {
    let dir = TempDir::new()?;
    let media = write_media(dir.path(), "clip.mp4")?;
    let missing = dir.path().join("no-such-encoder");
    let controller = controller(&missing, dir.path(), Arc::new(ConsoleSink));

    let err = controller
        .start(session_for(MediaFile::local(media)))
        .await
        .unwrap_err();

    match err {
        SessionError::Launch(e) => assert!(e.is_not_found()),
        other => panic!("expected launch error, got {:?}", other),
    }
    assert_eq!(controller.state(), SessionState::Idle);

    let logs = controller.logs(None).await;
    assert!(logs.iter().any(|l| l.text.starts_with("Error: ")));
    Ok(())
}

#[tokio::test]
async fn test_encoder_ignoring_sigterm_is_killed() -> Result<()> {
    let dir = TempDir::new()?;
    let program = write_script(dir.path(), "stubborn.sh", STUBBORN_ENCODER)?;
    let media = write_media(dir.path(), "clip.mp4")?;
    let settings = SessionSettings {
        grace_period_ms: 300,
        ..fast_settings(dir.path())
    };
    let controller = SessionController::new(encoder_config(&program), settings, Arc::new(ConsoleSink));
    let mut events = controller.subscribe();

    controller.start(session_for(MediaFile::local(media))).await?;
    wait_for_log(&mut events, "stubborn").await?;
    let pid = controller.status().await.pid.expect("running session has a pid");

    match controller.stop().await? {
        StopOutcome::Stopped { exit } => {
            assert!(exit.forced);
            assert_eq!(exit.signal, Some(libc::SIGKILL));
        }
        other => panic!("unexpected stop outcome: {:?}", other),
    }
    assert!(!process_exists(pid));
    assert_eq!(controller.state(), SessionState::Idle);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_stops_terminate_once() -> Result<()> {
    let f = fixture(LOOPING_ENCODER)?;
    let media = write_media(f.dir.path(), "clip.mp4")?;

    f.controller.start(session_for(MediaFile::local(media))).await?;

    let other = f.controller.clone();
    let (a, b) = tokio::join!(f.controller.stop(), other.stop());
    let outcomes = [a?, b?];

    let stopped = outcomes
        .iter()
        .filter(|o| matches!(o, StopOutcome::Stopped { .. }))
        .count();
    assert_eq!(stopped, 1);
    assert!(outcomes.contains(&StopOutcome::AlreadyStopped));
    assert_eq!(f.controller.state(), SessionState::Idle);
    Ok(())
}

#[tokio::test]
async fn test_channel_sink_receives_ordered_output() -> Result<()> {
    let dir = TempDir::new()?;
    let program = write_script(dir.path(), "fake-encoder.sh", LOOPING_ENCODER)?;
    let media = write_media(dir.path(), "clip.mp4")?;
    let (sink, mut rx) = loopcast::ChannelSink::channel(1024);
    let controller = controller(&program, dir.path(), Arc::new(sink));

    controller.start(session_for(MediaFile::local(media))).await?;

    let mut seen = Vec::new();
    timeout(Duration::from_secs(5), async {
        while let Some(line) = rx.recv().await {
            let progress = line.text.contains("frame=");
            seen.push(line);
            if progress {
                break;
            }
        }
    })
    .await?;
    controller.stop().await?;

    assert!(seen[0].text.starts_with("Running: "));
    assert_eq!(seen[0].source, LogSource::Session);

    // stderr banner, stderr args, stdout line, stderr progress: one ordered stream
    let encoder: Vec<&str> = seen
        .iter()
        .filter(|l| l.source == LogSource::Encoder)
        .map(|l| l.text.as_str())
        .collect();
    assert_eq!(encoder.len(), 4, "{:?}", encoder);
    assert_eq!(encoder[0], "ffmpeg version fake-encoder");
    assert!(encoder[1].starts_with("args: "));
    assert_eq!(encoder[2], "stdout is captured too");
    assert!(encoder[3].starts_with("frame=1 "));
    Ok(())
}

#[tokio::test]
async fn test_interleaved_stdout_and_stderr_keep_order() -> Result<()> {
    let f = fixture(INTERLEAVING_ENCODER)?;
    let media = write_media(f.dir.path(), "clip.mp4")?;
    let mut events = f.controller.subscribe();

    f.controller.start(session_for(MediaFile::local(media))).await?;
    wait_for_log(&mut events, "seq 199").await?;
    f.controller.stop().await?;

    let seq: Vec<String> = f
        .controller
        .history()
        .await
        .into_iter()
        .filter(|l| l.text.starts_with("seq "))
        .map(|l| l.text)
        .collect();
    let expected: Vec<String> = (0..200).map(|i| format!("seq {}", i)).collect();
    assert_eq!(seq, expected);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_start_and_stop_serialize() -> Result<()> {
    let f = fixture(LOOPING_ENCODER)?;
    let media = write_media(f.dir.path(), "clip.mp4")?;

    let (started, stopped) = tokio::join!(
        f.controller.start(session_for(MediaFile::local(media))),
        f.controller.stop()
    );

    assert!(started.is_ok(), "{:?}", started);
    match stopped {
        // stop ran first and found nothing to stop
        Err(SessionError::Rejected(_)) => {
            assert_eq!(f.controller.state(), SessionState::Running);
            assert!(matches!(
                f.controller.stop().await?,
                StopOutcome::Stopped { .. }
            ));
        }
        Ok(outcome) => assert!(matches!(outcome, StopOutcome::Stopped { .. }), "{:?}", outcome),
        Err(e) => panic!("unexpected stop error: {}", e),
    }

    assert_eq!(f.controller.state(), SessionState::Idle);
    assert!(f.controller.status().await.pid.is_none());
    Ok(())
}
