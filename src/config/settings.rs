//! Configuration settings and validation.

use std::path::PathBuf;
use std::time::Duration;

use crate::watcher::WatcherConfig;
use crate::{Error, Result};

/// Upper bound on the event channel between the notification source and a session.
const MAX_CHANNEL_CAPACITY: usize = 1 << 20;

/// How the binary prints observed events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum EventFormat {
    /// `<op> <path>` lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Main configuration for the treewatch binary.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directories to watch.
    pub watch_dirs: Vec<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON.
    pub log_json: bool,

    /// Stop watching after this many seconds; 0 watches until interrupted.
    pub timeout_secs: u64,

    /// Register subdirectories, including ones created while watching.
    pub recursive: bool,

    /// Capacity of the event channel feeding each session.
    pub channel_capacity: usize,

    /// Output format for observed events.
    pub event_format: EventFormat,
}

impl Default for Config {
    fn default() -> Self {
        let watcher = WatcherConfig::default();
        Self {
            watch_dirs: Vec::new(),
            log_level: "info".to_string(),
            log_json: false,
            timeout_secs: 10,
            recursive: watcher.recursive,
            channel_capacity: watcher.channel_capacity,
            event_format: EventFormat::default(),
        }
    }
}

impl Config {
    /// Create a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate configuration values.
    ///
    /// Only checks values in isolation; whether the watch directories exist
    /// is decided when the session is constructed.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.watch_dirs.is_empty() {
            return Err(Error::config("at least one watch directory is required"));
        }

        if self.watch_dirs.iter().any(|d| d.as_os_str().is_empty()) {
            return Err(Error::config("watch directory cannot be empty"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(Error::config(format!(
                "invalid log level '{}', must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.channel_capacity == 0 {
            return Err(Error::config("channel_capacity cannot be 0"));
        }

        if self.channel_capacity > MAX_CHANNEL_CAPACITY {
            return Err(Error::config(format!(
                "channel_capacity cannot exceed {MAX_CHANNEL_CAPACITY}"
            )));
        }

        Ok(())
    }

    /// Watch duration, or `None` to watch until interrupted.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        if self.timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.timeout_secs))
        }
    }

    /// Session configuration derived from these settings.
    #[must_use]
    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            watch_dirs: self.watch_dirs.clone(),
            recursive: self.recursive,
            channel_capacity: self.channel_capacity,
        }
    }
}
