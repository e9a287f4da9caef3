//! Dashboard counters and health checks.

use serde::{Deserialize, Serialize};

use crate::job::{JobRecord, JobStatus};
use crate::storage::FileStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub uploaded_files: usize,
    pub output_files: usize,
    /// Pending, processing and paused jobs.
    pub active_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub total_jobs: usize,
}

impl JobStats {
    pub fn collect(jobs: &[JobRecord], uploaded_files: usize, output_files: usize) -> Self {
        let mut stats = Self {
            uploaded_files,
            output_files,
            total_jobs: jobs.len(),
            ..Default::default()
        };
        for job in jobs {
            match job.status {
                JobStatus::Completed => stats.completed_jobs += 1,
                JobStatus::Failed => stats.failed_jobs += 1,
                JobStatus::Pending | JobStatus::Processing | JobStatus::Paused => {
                    stats.active_jobs += 1
                }
            }
        }
        stats
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub uploads_directory: bool,
    pub outputs_directory: bool,
    pub work_directory: bool,
}

impl HealthReport {
    pub fn inspect(store: &FileStore) -> Self {
        Self {
            uploads_directory: store.uploads_directory().is_dir(),
            outputs_directory: store.outputs_directory().is_dir(),
            work_directory: store.work_directory().is_dir(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.uploads_directory && self.outputs_directory && self.work_directory
    }
}
