//! Session tuning knobs.
//!
//! Every timing constant of the engine lives here so embedders can load an
//! alternate profile from YAML without recompiling. Defaults match the
//! reference behavior of the engine (5 s join confirmation, 10 s minimum
//! play time, 3 retries with a 3 s backoff).

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_RECONNECT_GRACE_MS: u64 = 5_000;
const DEFAULT_MIN_PLAY_MS: u64 = 10_000;
const DEFAULT_MAX_TRACK_RETRIES: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 3_000;
const DEFAULT_REFILL_DELAY_MS: u64 = 1_000;
const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Timing and bound configuration for playback sessions.
///
/// All durations are kept as milliseconds in the serialized form; accessors
/// expose [`Duration`]s to the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Transport join must confirm "ready" within this window.
    pub connect_timeout_ms: u64,
    /// Window granted to transport resignalling after a connection loss.
    pub reconnect_grace_ms: u64,
    /// Playback ending earlier than this is a premature interruption.
    pub min_play_ms: u64,
    /// Replay attempts per track before giving up and advancing.
    pub max_track_retries: u32,
    /// Wait between replay attempts of the same track.
    pub retry_backoff_ms: u64,
    /// Wait after a queue refill before starting the next track.
    pub refill_delay_ms: u64,
    /// Most recently played tracks kept for `previous`.
    pub history_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            reconnect_grace_ms: DEFAULT_RECONNECT_GRACE_MS,
            min_play_ms: DEFAULT_MIN_PLAY_MS,
            max_track_retries: DEFAULT_MAX_TRACK_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            refill_delay_ms: DEFAULT_REFILL_DELAY_MS,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_millis(self.reconnect_grace_ms)
    }

    pub fn min_play(&self) -> Duration {
        Duration::from_millis(self.min_play_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn refill_delay(&self) -> Duration {
        Duration::from_millis(self.refill_delay_ms)
    }

    /// Parse a YAML document; absent keys fall back to defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&data)
    }
}
