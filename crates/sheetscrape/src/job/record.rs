use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// Error recorded when a user stop lands a job in `failed`.
pub const STOPPED_BY_USER: &str = "stopped by user";

/// Error recorded when restart recovery fails a job that was in flight.
pub const INTERRUPTED: &str = "interrupted";

/// Observed state of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Paused,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// `completed` and `failed` admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "paused" => Ok(JobStatus::Paused),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Requested intent for a job. Independent of the observed [`JobStatus`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobControl {
    #[default]
    Run,
    Pause,
    Stop,
}

impl JobControl {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobControl::Run => "run",
            JobControl::Pause => "pause",
            JobControl::Stop => "stop",
        }
    }
}

impl fmt::Display for JobControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobControl {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "run" => Ok(JobControl::Run),
            "pause" => Ok(JobControl::Pause),
            "stop" => Ok(JobControl::Stop),
            other => Err(JobError::InvalidInput(format!(
                "unknown control signal '{}' (expected run, pause or stop)",
                other
            ))),
        }
    }
}

/// Counters reported to callers. Never decrease while a job runs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobProgress {
    pub sheets_processed: usize,
    pub rows_processed: u64,
    pub emails_found: u64,
}

/// Resume position of an execution.
///
/// `sheet_cursor` indexes into `selected_sheets`, `row_offset` counts the
/// rows of that sheet already handled and `results_written` the journal
/// lines that belong to the handled rows.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    pub sheet_cursor: usize,
    pub row_offset: usize,
    pub results_written: u64,
}

/// One extraction job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: String,
    /// Creation order; `list_jobs` sorts on it.
    pub seq: u64,
    pub source_filename: String,
    pub selected_sheets: Vec<usize>,
    pub status: JobStatus,
    pub control: JobControl,
    pub progress: JobProgress,
    pub checkpoint: Checkpoint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// A fresh `pending` record with `control = run`.
    pub fn new(id: String, seq: u64, source_filename: String, selected_sheets: Vec<usize>) -> Self {
        let now = Utc::now();
        Self {
            id,
            seq,
            source_filename,
            selected_sheets,
            status: JobStatus::Pending,
            control: JobControl::Run,
            progress: JobProgress::default(),
            checkpoint: Checkpoint::default(),
            output_filename: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Bumps `updated_at`, never moving it backwards.
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.touch();
    }

    pub fn mark_completed(&mut self, output_filename: String) {
        self.status = JobStatus::Completed;
        self.output_filename = Some(output_filename);
        self.error = None;
        self.touch();
    }

    /// Name of the workbook written on completion:
    /// `<source stem>_emails_<first 8 chars of id>.xlsx`.
    pub fn output_name(&self) -> String {
        let stem = Path::new(&self.source_filename)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());
        let short_id: String = self.id.chars().filter(|c| *c != '-').take(8).collect();
        format!("{}_emails_{}.xlsx", stem, short_id)
    }
}
