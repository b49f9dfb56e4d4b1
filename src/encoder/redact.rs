use std::borrow::Cow;
use std::fmt;

use serde::Deserialize;

/// Placeholder written wherever the stream key would appear
pub const REDACTED: &str = "<redacted>";

/// Ingest credential. Never printed by `Debug` or `Display`.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct StreamKey(String);

impl StreamKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key. Only the command builder should need this.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StreamKey").field(&REDACTED).finish()
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

/// Scrubs a secret destination out of free text.
///
/// The full URL is replaced with its redacted form first, then any remaining
/// occurrence of the bare key.
#[derive(Debug, Clone)]
pub struct Redactor {
    secret_url: String,
    redacted_url: String,
    key: StreamKey,
}

impl Redactor {
    pub fn new(secret_url: String, redacted_url: String, key: StreamKey) -> Self {
        Self {
            secret_url,
            redacted_url,
            key,
        }
    }

    pub fn redact<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let key = self.key.expose();
        if key.is_empty() || !text.contains(key) {
            return Cow::Borrowed(text);
        }

        let scrubbed = text.replace(&self.secret_url, &self.redacted_url);
        Cow::Owned(scrubbed.replace(key, REDACTED))
    }
}
