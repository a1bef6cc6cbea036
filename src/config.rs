//! Configuration management for PollWatch
//!
//! This module provides configuration structures and defaults for the
//! polling watcher, plus loading from TOML files and environment variables.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// How created and deleted entries are detected between two scans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDetection {
    /// Compare entry counts only. Added or removed names are not resolved and
    /// a simultaneous add and remove goes unnoticed.
    #[default]
    EntryCount,
    /// Compare the listed names against the snapshot and report exact names.
    SetDifference,
}

impl FromStr for ChangeDetection {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "count" | "entry_count" => Ok(Self::EntryCount),
            "exact" | "set_difference" => Ok(Self::SetDifference),
            other => Err(format!("unknown change detection mode: {}", other)),
        }
    }
}

impl fmt::Display for ChangeDetection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EntryCount => write!(f, "count"),
            Self::SetDifference => write!(f, "exact"),
        }
    }
}

/// Global configuration for PollWatch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PollWatchConfig {
    /// Directory watcher configuration
    pub watcher: WatcherConfig,
}

/// Configuration for the polling loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Delay between two directory scans in milliseconds
    pub poll_interval_ms: u64,
    /// Created/deleted detection strategy
    pub detection: ChangeDetection,
    /// Consecutive failed scans before an error is logged
    pub failure_alert_threshold: u32,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            detection: ChangeDetection::EntryCount,
            failure_alert_threshold: 5,
        }
    }
}

impl WatcherConfig {
    /// Get poll interval duration, never shorter than 1 ms
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Sets the poll interval, rounded down to whole milliseconds but at least 1 ms
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = (interval.as_millis() as u64).max(1);
        self
    }

    pub fn with_detection(mut self, detection: ChangeDetection) -> Self {
        self.detection = detection;
        self
    }
}

/// Configuration loading and management
impl PollWatchConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields with environment variables if present
    pub fn apply_env(&mut self) {
        if let Ok(val) = std::env::var("POLLWATCH_POLL_INTERVAL_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                self.watcher.poll_interval_ms = ms;
            }
        }

        if let Ok(val) = std::env::var("POLLWATCH_DETECTION") {
            match val.parse::<ChangeDetection>() {
                Ok(detection) => self.watcher.detection = detection,
                Err(err) => tracing::warn!("Ignoring POLLWATCH_DETECTION: {}", err),
            }
        }

        if let Ok(val) = std::env::var("POLLWATCH_FAILURE_ALERT_THRESHOLD") {
            if let Ok(threshold) = val.parse::<u32>() {
                self.watcher.failure_alert_threshold = threshold;
            }
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.watcher.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".to_string());
        }

        if self.watcher.failure_alert_threshold == 0 {
            return Err("failure_alert_threshold must be greater than 0".to_string());
        }

        Ok(())
    }
}
