//! Core runtime configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no
//! file at all) yields a working configuration.
//!
//! ```toml
//! reader_timeout_ms = 50
//! read_error_backoff_ms = 100
//! long_press_release_ms = 1000
//! strip_quadrants = 4
//! log_filter = "deckhand=debug"
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Upper bound on one blocking hardware read. Also bounds how long
    /// disposal waits for the reader loop to notice.
    pub reader_timeout_ms: u64,
    /// Pause after a failed read before trying again.
    pub read_error_backoff_ms: u64,
    /// Delay between a long-press and its synthesized release.
    pub long_press_release_ms: u64,
    /// Number of touch quadrants a display strip is split into.
    pub strip_quadrants: u8,
    /// `EnvFilter` directive used by binaries that install a subscriber.
    pub log_filter: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            reader_timeout_ms: 50,
            read_error_backoff_ms: 100,
            long_press_release_ms: 1000,
            strip_quadrants: 4,
            log_filter: "info".to_string(),
        }
    }
}

impl CoreConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn reader_timeout(&self) -> Duration {
        Duration::from_millis(self.reader_timeout_ms)
    }

    pub fn read_error_backoff(&self) -> Duration {
        Duration::from_millis(self.read_error_backoff_ms)
    }

    pub fn long_press_release(&self) -> Duration {
        Duration::from_millis(self.long_press_release_ms)
    }
}
