//! Pipeline and session settings.
//!
//! Deserializable so the front-end can read them straight from the
//! `[pipeline]` / `[session]` tables of its TOML config. Durations are given
//! in milliseconds there.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Settings for the shared output pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Directory for per-batch log files, created on first write.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Number of file writer threads.
    #[serde(default = "default_file_workers")]
    pub file_workers: usize,
    /// Upper bound on waiting for queued batches to be written when the last
    /// session closes or the pipeline shuts down.
    #[serde(default = "default_drain_timeout", rename = "drain_timeout_ms", with = "millis")]
    pub drain_timeout: Duration,
    /// How long an idle worker blocks on its queue before re-checking the
    /// stop flag.
    #[serde(default = "default_idle_poll", rename = "idle_poll_ms", with = "millis")]
    pub idle_poll: Duration,
    /// Console backlog above which an idle file worker helps drain it.
    #[serde(default = "default_help_threshold")]
    pub help_threshold: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            file_workers: default_file_workers(),
            drain_timeout: default_drain_timeout(),
            idle_poll: default_idle_poll(),
            help_threshold: default_help_threshold(),
        }
    }
}

impl PipelineConfig {
    /// File worker count, never below one.
    pub fn effective_file_workers(&self) -> usize {
        self.file_workers.max(1)
    }
}

/// Per-session settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfig {
    /// Join a line split across two `feed` calls instead of treating each
    /// half as its own command.
    #[serde(default)]
    pub reassemble_lines: bool,
}

/// Everything the core needs to start.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("LOG")
}
fn default_file_workers() -> usize {
    2
}
fn default_drain_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_idle_poll() -> Duration {
    Duration::from_millis(50)
}
fn default_help_threshold() -> usize {
    16
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
