use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, SearchError};

/// Control loop tick while the session is awake.
pub const TICK_MS: u64 = 20;

/// Control loop tick while asleep.
pub const SLEEP_TICK_MS: u64 = 1_000;

/// Idle time before the session goes to sleep.
pub const SLEEP_AFTER_SECS: u64 = 60;

/// Idle time before the session shuts itself down.
pub const SHUTDOWN_AFTER_SECS: u64 = 600;

/// Result cap unless the query is unbounded.
pub const MAX_RESULTS: usize = 50;

/// Result rows kept in view at once.
pub const VISIBLE_ROWS: usize = 20;

pub const CONFIG_FILE: &str = "config.json";
pub const LOG_FILE: &str = "rankfind.log";

/// Session tunables, read from `config.json` in the data directory.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub tick_ms: u64,
    pub sleep_tick_ms: u64,
    pub sleep_after_secs: u64,
    pub shutdown_after_secs: u64,
    pub max_results: usize,
    pub visible_rows: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_ms: TICK_MS,
            sleep_tick_ms: SLEEP_TICK_MS,
            sleep_after_secs: SLEEP_AFTER_SECS,
            shutdown_after_secs: SHUTDOWN_AFTER_SECS,
            max_results: MAX_RESULTS,
            visible_rows: VISIBLE_ROWS,
        }
    }
}

impl SessionConfig {
    /// Loads the config file if it exists, defaults otherwise.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| SearchError::corrupt(path, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(SearchError::io(path, e)),
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn sleep_tick(&self) -> Duration {
        Duration::from_millis(self.sleep_tick_ms)
    }

    pub fn sleep_after(&self) -> Duration {
        Duration::from_secs(self.sleep_after_secs)
    }

    pub fn shutdown_after(&self) -> Duration {
        Duration::from_secs(self.shutdown_after_secs)
    }
}

/// Default data directory.
pub fn data_dir() -> PathBuf {
    let mut p = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    p.push("rankfind");
    p
}
