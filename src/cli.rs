use std::path::PathBuf;
use anyhow::Result;
use clap::{Parser, ValueEnum};
use crate::config::{ChangeDetection, PollWatchConfig};

#[derive(Parser)]
#[command(name = "pollwatch")]
#[command(author = "PollWatch Team")]
#[command(version = "0.1.0")]
#[command(about = "A polling directory watcher for filesystems without change notifications")]
#[command(long_about = "PollWatch lists a directory at a fixed interval and reports created, deleted and changed entries. Changed entries are reported when their timestamp first moves and again once it has settled.")]
pub struct Cli {
    /// Directory to watch for changes
    #[arg(value_name = "PATH", help = "Path to watch (defaults to current directory)")]
    pub path: Option<PathBuf>,

    /// Polling interval in milliseconds
    #[arg(long, help = "Polling interval in ms (default 1000)")]
    pub poll_interval: Option<u64>,

    /// How created and deleted entries are detected
    #[arg(long, value_enum, help = "Created/deleted detection: count or exact")]
    pub detection: Option<DetectionArg>,

    /// Optional TOML configuration file
    #[arg(short, long, value_name = "FILE", help = "Configuration file")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    /// Disable colors in output
    #[arg(long, help = "Disable colored output")]
    pub no_color: bool,

    /// Output format
    #[arg(long, default_value = "text", help = "Output format")]
    pub output: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DetectionArg {
    /// Compare entry counts only
    Count,
    /// Report exact added and removed names
    Exact,
}

impl From<DetectionArg> for ChangeDetection {
    fn from(arg: DetectionArg) -> Self {
        match arg {
            DetectionArg::Count => ChangeDetection::EntryCount,
            DetectionArg::Exact => ChangeDetection::SetDifference,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output (default)
    Text,
    /// JSON output for scripting
    Json,
    /// Compact single-line format
    Compact,
}

impl Cli {
    pub fn get_watch_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        })
    }

    /// Config file, then environment, then command line flags.
    pub fn resolve_config(&self) -> Result<PollWatchConfig> {
        let mut config = match &self.config {
            Some(path) => PollWatchConfig::from_file(path)?,
            None => PollWatchConfig::default(),
        };
        config.apply_env();

        if let Some(ms) = self.poll_interval {
            config.watcher.poll_interval_ms = ms;
        }
        if let Some(detection) = self.detection {
            config.watcher.detection = detection.into();
        }

        Ok(config)
    }

    pub fn setup_logging(&self) {
        let level = if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        };

        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }

    pub fn validate(&self) -> Result<(), String> {
        let path = self.get_watch_path();

        if !path.exists() {
            return Err(format!("Path does not exist: {}", path.display()));
        }

        if !path.is_dir() {
            return Err(format!("Path is not a directory: {}", path.display()));
        }

        if self.poll_interval == Some(0) {
            return Err("Poll interval must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            path: None,
            poll_interval: None,
            detection: None,
            config: None,
            verbose: false,
            no_color: false,
            output: OutputFormat::Text,
        }
    }
}
