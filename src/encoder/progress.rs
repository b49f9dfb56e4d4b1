use serde::Serialize;

/// Latest progress record reported by the encoder
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Progress {
    pub frame: Option<u64>,
    pub fps: Option<f32>,
    /// Output timestamp, e.g. `00:01:23.45`
    pub time: Option<String>,
    pub bitrate: Option<String>,
    pub speed: Option<String>,
}

impl Progress {
    /// Parse a progress record. Video and audio records both carry `time=`
    /// and `bitrate=`; anything else is not progress.
    pub fn parse(line: &str) -> Option<Self> {
        if !(line.contains("time=") && line.contains("bitrate=")) {
            return None;
        }

        Some(Self {
            frame: extract_value(line, "frame=").and_then(|v| v.parse().ok()),
            fps: extract_value(line, "fps=").and_then(|v| v.parse().ok()),
            time: extract_value(line, "time="),
            bitrate: extract_value(line, "bitrate="),
            speed: extract_value(line, "speed="),
        })
    }
}

fn extract_value(line: &str, key: &str) -> Option<String> {
    let start = line.find(key)?;
    let after_key = line[start + key.len()..].trim_start();
    let end = after_key
        .find(char::is_whitespace)
        .unwrap_or(after_key.len());

    if end == 0 {
        return None;
    }
    Some(after_key[..end].to_string())
}
