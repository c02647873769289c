//! Capture configuration: timeouts and progress cadence.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_STREAM_IDLE_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_EXTRACTION_TIMEOUT_MS: u64 = 300_000;

/// Tunables shared by every component of a capture session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Abandon a streamed completion when no chunk arrives for this long.
    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_timeout_ms: u64,
    /// Abandon an assistant message still waiting for completion after this long.
    #[serde(default = "default_extraction_timeout")]
    pub extraction_timeout_ms: u64,
    /// Minimum growth (in chars) between two progressive assistant-response
    /// events. 0 emits after every delta.
    #[serde(default)]
    pub progress_every_chars: usize,
    /// Whether the interceptor hands streamed completions to the decoder.
    #[serde(default = "default_true")]
    pub decode_streams: bool,
}

fn default_stream_idle_timeout() -> u64 {
    DEFAULT_STREAM_IDLE_TIMEOUT_MS
}
fn default_extraction_timeout() -> u64 {
    DEFAULT_EXTRACTION_TIMEOUT_MS
}
fn default_true() -> bool {
    true
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            stream_idle_timeout_ms: DEFAULT_STREAM_IDLE_TIMEOUT_MS,
            extraction_timeout_ms: DEFAULT_EXTRACTION_TIMEOUT_MS,
            progress_every_chars: 0,
            decode_streams: true,
        }
    }
}

impl CaptureConfig {
    /// Load config from a JSON file, or return defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Ignoring malformed config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Defaults overridden by `CHATWIRE_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = env_number("CHATWIRE_STREAM_IDLE_TIMEOUT_MS") {
            config.stream_idle_timeout_ms = ms;
        }
        if let Some(ms) = env_number("CHATWIRE_EXTRACTION_TIMEOUT_MS") {
            config.extraction_timeout_ms = ms;
        }
        if let Some(chars) = env_number("CHATWIRE_PROGRESS_EVERY_CHARS") {
            config.progress_every_chars = chars as usize;
        }
        config
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_idle_timeout_ms)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_millis(self.extraction_timeout_ms)
    }
}

fn env_number(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
