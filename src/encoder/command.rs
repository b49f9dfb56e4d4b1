//! Encoder command construction.
//!
//! The argument list is a pure function of the session config and the encoder
//! config. It is handed to the OS as a structured argv, never through a shell.

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;

use super::redact::{Redactor, StreamKey, REDACTED};
use crate::config::EncoderConfig;
use crate::session::SessionConfig;

/// Output dimensions forced in vertical mode
pub const VERTICAL_WIDTH: u32 = 720;
pub const VERTICAL_HEIGHT: u32 = 1280;

/// Fixed H.264/AAC profile for RTMP ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeProfile {
    pub video_codec: &'static str,
    pub preset: &'static str,
    pub video_bitrate_kbps: u32,
    pub max_rate_kbps: u32,
    pub buffer_size_kbps: u32,
    /// Keyframe interval in frames (about 2s at 30fps)
    pub gop_frames: u32,
    pub audio_codec: &'static str,
    pub audio_bitrate_kbps: u32,
    pub container: &'static str,
}

pub const LIVE_PROFILE: EncodeProfile = EncodeProfile {
    video_codec: "libx264",
    preset: "veryfast",
    video_bitrate_kbps: 2500,
    max_rate_kbps: 2500,
    buffer_size_kbps: 5000,
    gop_frames: 60,
    audio_codec: "aac",
    audio_bitrate_kbps: 128,
    container: "flv",
};

/// `rtmp://<host>/live2/<key>`. Displays redacted.
#[derive(Clone)]
pub struct IngestUrl {
    host: String,
    key: StreamKey,
}

impl IngestUrl {
    pub fn new(host: impl Into<String>, key: StreamKey) -> Self {
        Self {
            host: host.into(),
            key,
        }
    }

    /// The real destination, including the stream key.
    pub fn expose(&self) -> String {
        format!("rtmp://{}/live2/{}", self.host, self.key.expose())
    }

    pub fn redacted() -> String {
        format!("rtmp://.../live2/{}", REDACTED)
    }

    pub fn redactor(&self) -> Redactor {
        Redactor::new(self.expose(), Self::redacted(), self.key.clone())
    }
}

impl fmt::Display for IngestUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&Self::redacted())
    }
}

impl fmt::Debug for IngestUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestUrl")
            .field("host", &self.host)
            .field("key", &self.key)
            .finish()
    }
}

/// A ready-to-spawn encoder invocation.
///
/// `args` holds everything except the destination, which is kept apart so the
/// secret only ever reaches the OS.
#[derive(Debug, Clone)]
pub struct EncoderCommand {
    pub program: String,
    args: Vec<OsString>,
    destination: IngestUrl,
}

impl EncoderCommand {
    pub fn build(encoder: &EncoderConfig, config: &SessionConfig) -> Self {
        Self::with_profile(encoder, config, &LIVE_PROFILE)
    }

    fn with_profile(
        encoder: &EncoderConfig,
        config: &SessionConfig,
        profile: &EncodeProfile,
    ) -> Self {
        let source: PathBuf = config.media.path.clone();
        let mut args: Vec<OsString> = Vec::with_capacity(32);

        // Input: real-time pacing, looped forever
        push_all(&mut args, &["-re", "-stream_loop", "-1", "-i"]);
        args.push(source.into_os_string());

        let video_bitrate = format!("{}k", profile.video_bitrate_kbps);
        let max_rate = format!("{}k", profile.max_rate_kbps);
        let buffer_size = format!("{}k", profile.buffer_size_kbps);
        let gop = profile.gop_frames.to_string();
        let audio_bitrate = format!("{}k", profile.audio_bitrate_kbps);

        push_all(&mut args, &["-c:v", profile.video_codec, "-preset", profile.preset]);
        push_all(
            &mut args,
            &[
                "-b:v",
                video_bitrate.as_str(),
                "-maxrate",
                max_rate.as_str(),
                "-bufsize",
                buffer_size.as_str(),
            ],
        );
        push_all(&mut args, &["-g", gop.as_str(), "-keyint_min", gop.as_str()]);
        push_all(&mut args, &["-c:a", profile.audio_codec, "-b:a", audio_bitrate.as_str()]);
        push_all(&mut args, &["-f", profile.container]);

        if config.vertical_mode {
            let scale = format!("scale={}:{}", VERTICAL_WIDTH, VERTICAL_HEIGHT);
            push_all(&mut args, &["-vf", scale.as_str()]);
        }

        Self {
            program: encoder.program.clone(),
            args,
            destination: IngestUrl::new(encoder.ingest_host.clone(), config.stream_key.clone()),
        }
    }

    /// Full argv (minus program) as passed to the OS. Contains the stream key.
    pub fn argv(&self) -> Vec<OsString> {
        let mut argv = self.args.clone();
        argv.push(OsString::from(self.destination.expose()));
        argv
    }

    pub fn destination(&self) -> &IngestUrl {
        &self.destination
    }

    pub fn redactor(&self) -> Redactor {
        self.destination.redactor()
    }

    /// Video filter argument, if any
    pub fn video_filter(&self) -> Option<String> {
        self.args
            .iter()
            .position(|a| a == "-vf")
            .and_then(|i| self.args.get(i + 1))
            .map(|v| v.to_string_lossy().into_owned())
    }
}

fn push_all(args: &mut Vec<OsString>, values: &[&str]) {
    args.extend(values.iter().map(OsString::from));
}

/// Shell-like rendering with the destination redacted, for log lines.
impl fmt::Display for EncoderCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        write!(f, " {}", self.destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaFile;

    fn session(vertical_mode: bool) -> SessionConfig {
        SessionConfig::new(
            MediaFile::local("clip.mp4"),
            StreamKey::new("abcd1234"),
            vertical_mode,
        )
    }

    fn argv_strings(cmd: &EncoderCommand) -> Vec<String> {
        cmd.argv()
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_passthrough_has_no_scaling_filter() {
        let cmd = EncoderCommand::build(&EncoderConfig::default(), &session(false));
        let argv = argv_strings(&cmd);

        assert!(!argv.iter().any(|a| a == "-vf"));
        assert!(!argv.iter().any(|a| a.starts_with("scale=")));
        assert_eq!(cmd.video_filter(), None);
    }

    #[test]
    fn test_vertical_mode_forces_720x1280() {
        let cmd = EncoderCommand::build(&EncoderConfig::default(), &session(true));
        let argv = argv_strings(&cmd);

        assert_eq!(cmd.video_filter().as_deref(), Some("scale=720:1280"));
        // Filter sits before the output sink
        let vf = argv.iter().position(|a| a == "-vf").unwrap();
        assert_eq!(vf, argv.len() - 3);
    }

    #[test]
    fn test_fixed_profile_arguments() {
        let cmd = EncoderCommand::build(&EncoderConfig::default(), &session(false));
        let argv = argv_strings(&cmd);

        let expected = [
            "-re", "-stream_loop", "-1", "-i", "clip.mp4", "-c:v", "libx264", "-preset",
            "veryfast", "-b:v", "2500k", "-maxrate", "2500k", "-bufsize", "5000k", "-g", "60",
            "-keyint_min", "60", "-c:a", "aac", "-b:a", "128k", "-f", "flv",
            "rtmp://a.rtmp.youtube.com/live2/abcd1234",
        ];
        assert_eq!(argv, expected);
        assert_eq!(cmd.program, "ffmpeg");
    }

    #[test]
    fn test_display_redacts_destination() {
        let cmd = EncoderCommand::build(&EncoderConfig::default(), &session(true));
        let shown = cmd.to_string();

        assert!(!shown.contains("abcd1234"));
        assert!(shown.ends_with("rtmp://.../live2/<redacted>"));
        assert!(!format!("{:?}", cmd).contains("abcd1234"));
    }

    #[test]
    fn test_ingest_host_is_configurable() {
        let encoder = EncoderConfig {
            program: "/opt/ffmpeg/bin/ffmpeg".to_string(),
            ingest_host: "ingest.example.net".to_string(),
        };
        let cmd = EncoderCommand::build(&encoder, &session(false));

        assert_eq!(cmd.destination().expose(), "rtmp://ingest.example.net/live2/abcd1234");
        assert_eq!(cmd.program, "/opt/ffmpeg/bin/ffmpeg");
    }
}
