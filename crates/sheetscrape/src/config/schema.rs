use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime configuration for the job manager.
///
/// Directory fields are optional; when absent they are derived from
/// `data_directory` (see the `*_dir` accessors).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_data_directory")]
    pub data_directory: PathBuf,
    #[serde(default)]
    pub uploads_directory: Option<PathBuf>,
    #[serde(default)]
    pub outputs_directory: Option<PathBuf>,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Rows processed between durable checkpoints of a running job.
    #[serde(default = "default_checkpoint_rows")]
    pub checkpoint_rows: u64,
    /// Upper bound on how long `delete_job` waits for a running worker to stop.
    #[serde(default = "default_delete_timeout_ms")]
    pub delete_timeout_ms: u64,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default)]
    pub recovery: RecoveryMode,
    #[serde(default = "default_accepted_extensions")]
    pub accepted_extensions: Vec<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What to do with jobs that were in flight when the process last stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryMode {
    /// Re-schedule them from their last durable checkpoint.
    #[default]
    Resume,
    /// Mark them failed with error "interrupted".
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_data_directory() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".sheetscrape"))
        .unwrap_or_else(|| PathBuf::from(".sheetscrape"))
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_checkpoint_rows() -> u64 {
    25
}

fn default_delete_timeout_ms() -> u64 {
    10_000
}

fn default_event_capacity() -> usize {
    256
}

fn default_accepted_extensions() -> Vec<String> {
    vec!["xlsx".to_string(), "xls".to_string()]
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Builds a default configuration rooted at `data_directory`.
    pub fn with_data_directory<P: Into<PathBuf>>(data_directory: P) -> Self {
        Self {
            version: default_version(),
            data_directory: data_directory.into(),
            uploads_directory: None,
            outputs_directory: None,
            database_path: None,
            worker_count: default_worker_count(),
            checkpoint_rows: default_checkpoint_rows(),
            delete_timeout_ms: default_delete_timeout_ms(),
            event_capacity: default_event_capacity(),
            recovery: RecoveryMode::default(),
            accepted_extensions: default_accepted_extensions(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.uploads_directory
            .clone()
            .unwrap_or_else(|| self.data_directory.join("uploads"))
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.outputs_directory
            .clone()
            .unwrap_or_else(|| self.data_directory.join("outputs"))
    }

    /// Scratch directory for in-progress result journals.
    pub fn work_dir(&self) -> PathBuf {
        self.data_directory.join("work")
    }

    pub fn database_file(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.data_directory.join("jobs.db"))
    }

    pub fn delete_timeout(&self) -> Duration {
        Duration::from_millis(self.delete_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::with_data_directory(default_data_directory())
    }
}
