//! Line decoding of the encoder's combined stdout/stderr.
//!
//! Both streams are written into one pipe by the child, so records come out in
//! the order the encoder wrote them.
//!
//! ffmpeg redraws its progress record with a bare `\r`, so `\r`, `\n` and
//! `\r\n` all terminate a record. Bytes are decoded as lossy UTF-8.

use std::borrow::Cow;
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

use super::redact::Redactor;

/// Records longer than this are split
const MAX_RECORD_BYTES: usize = 64 * 1024;

/// Buffered lines between the pipe reader and the consumer
const LINE_CHANNEL_CAPACITY: usize = 1024;

/// Where a log line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    /// The encoder's merged stdout and stderr
    Encoder,
    /// Emitted by the session controller itself
    Session,
}

/// One captured output record
#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    pub captured_at: DateTime<Utc>,
    pub source: LogSource,
    pub text: String,
}

impl LogLine {
    pub fn new(source: LogSource, text: impl Into<String>) -> Self {
        Self {
            captured_at: Utc::now(),
            source,
            text: text.into(),
        }
    }

    pub fn session(text: impl Into<String>) -> Self {
        Self::new(LogSource::Session, text)
    }
}

/// Single-pass stream of redacted log lines for one encoder process.
///
/// Ends once both output pipes have closed, which happens when the encoder
/// (and anything still holding its pipes) has exited.
pub struct LogStream {
    rx: mpsc::Receiver<LogLine>,
    redactor: Redactor,
}

impl LogStream {
    /// Decode one merged output pipe
    pub(crate) fn spawn<R>(output: R, redactor: Redactor) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        tokio::spawn(read_records(output, LogSource::Encoder, tx));
        Self { rx, redactor }
    }

    /// Decode stdout and stderr from separate pipes. Ordering between the two
    /// is by arrival only.
    #[cfg(not(unix))]
    pub(crate) fn spawn_split<O, E>(stdout: O, stderr: E, redactor: Redactor) -> Self
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        tokio::spawn(read_records(stdout, LogSource::Encoder, tx.clone()));
        tokio::spawn(read_records(stderr, LogSource::Encoder, tx));
        Self { rx, redactor }
    }
}

impl Stream for LogStream {
    type Item = LogLine;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<LogLine>> {
        let this = self.get_mut();
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(mut line)) => {
                let redacted = match this.redactor.redact(&line.text) {
                    Cow::Owned(clean) => Some(clean),
                    Cow::Borrowed(_) => None,
                };
                if let Some(clean) = redacted {
                    line.text = clean;
                }
                Poll::Ready(Some(line))
            }
            other => other,
        }
    }
}

/// Read `reader` to EOF, sending one `LogLine` per non-blank record.
///
/// Keeps draining after the receiver goes away so the child never blocks on a
/// full pipe.
pub(crate) async fn read_records<R>(reader: R, source: LogSource, tx: mpsc::Sender<LogLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut pending: Vec<u8> = Vec::with_capacity(256);
    let mut forwarding = true;

    loop {
        let chunk = match reader.fill_buf().await {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!("Encoder {:?} read failed: {}", source, e);
                break;
            }
        };
        if chunk.is_empty() {
            break;
        }

        let consumed = chunk.len();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                forwarding = emit(&mut pending, source, &tx, forwarding).await;
            } else {
                pending.push(byte);
                if pending.len() >= MAX_RECORD_BYTES {
                    forwarding = emit(&mut pending, source, &tx, forwarding).await;
                }
            }
        }
        reader.consume(consumed);
    }

    emit(&mut pending, source, &tx, forwarding).await;
    debug!("Encoder {:?} closed", source);
}

async fn emit(
    pending: &mut Vec<u8>,
    source: LogSource,
    tx: &mpsc::Sender<LogLine>,
    forwarding: bool,
) -> bool {
    if pending.is_empty() {
        return forwarding;
    }

    let text = String::from_utf8_lossy(pending).trim_end().to_string();
    pending.clear();

    if !forwarding || text.trim().is_empty() {
        return forwarding;
    }

    tx.send(LogLine::new(source, text)).await.is_ok()
}
