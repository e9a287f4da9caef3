//! The job manager: the single authority over job identity, status and
//! control.
//!
//! Each job lives in its own slot guarded by a mutex. A mutation writes the
//! new record to SQLite, swaps it into the slot and publishes its event, all
//! while that slot's lock is held, so observers see changes of one job in
//! the order they were made. Worker threads run the extraction itself and
//! go through the same slots.

pub(crate) mod context;
pub(crate) mod recovery;
pub(crate) mod slot;
pub mod stats;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{info, warn};
use tokio::sync::broadcast;

use crate::broadcast::{EventBroadcaster, EventSink, FanoutSink, JobEvent};
use crate::config::Config;
use crate::db::{job_repo, Database};
use crate::error::{JobError, SheetScrapeError};
use crate::extract::{EmailExtractor, RowExtractor};
use crate::job::{JobControl, JobRecord, JobStatus, STOPPED_BY_USER};
use crate::storage::{FileInfo, FileStore};
use crate::worker::{JobRunner, ResultJournal, WorkerPool};

use context::ManagerContext;
use slot::JobSlot;

pub use stats::{HealthReport, JobStats};

pub struct JobManager {
    ctx: Arc<ManagerContext>,
    pool: Mutex<Option<WorkerPool>>,
    broadcaster: EventBroadcaster,
    next_seq: AtomicU64,
}

impl JobManager {
    /// Opens the manager with the stock e-mail extractor.
    pub fn open(config: Config) -> Result<Self, SheetScrapeError> {
        Self::open_with(config, Arc::new(EmailExtractor::new()), None)
    }

    /// Opens the data directory, recovers stored jobs and starts the workers.
    ///
    /// Events always go to the manager's own broadcaster (see
    /// [`JobManager::subscribe`]) and, when given, to `sink` as well.
    pub fn open_with(
        config: Config,
        extractor: Arc<dyn RowExtractor>,
        sink: Option<Arc<dyn EventSink>>,
    ) -> Result<Self, SheetScrapeError> {
        crate::config::validate_config(&config)?;

        let store = FileStore::new(
            config.uploads_dir(),
            config.outputs_dir(),
            config.work_dir(),
            &config.accepted_extensions,
        )?;
        let db = Database::open(&config.database_file())?;

        let broadcaster = EventBroadcaster::new(config.event_capacity);
        let event_sink: Arc<dyn EventSink> = match sink {
            Some(extra) => Arc::new(FanoutSink::new(vec![
                Arc::new(broadcaster.clone()) as Arc<dyn EventSink>,
                extra,
            ])),
            None => Arc::new(broadcaster.clone()),
        };

        let worker_count = config.worker_count;
        let ctx = Arc::new(ManagerContext::new(config, db, store, event_sink, extractor));

        let records = job_repo::list_all(&ctx.db)?;
        let next_seq = records.iter().map(|r| r.seq).max().unwrap_or(0) + 1;
        let resumed = recovery::recover(&ctx, records)?;

        let pool = WorkerPool::new(worker_count, Arc::clone(&ctx) as Arc<dyn JobRunner>);

        let manager = Self {
            ctx,
            pool: Mutex::new(Some(pool)),
            broadcaster,
            next_seq: AtomicU64::new(next_seq),
        };

        for job_id in resumed {
            manager.schedule(&job_id);
        }

        info!(
            "Job manager ready ({} workers, data in {})",
            worker_count,
            manager.ctx.config.data_directory.display()
        );

        Ok(manager)
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    // ─── Jobs ───────────────────────────────────────────────────────────────

    /// Validates the request, stores a `pending` job and queues it.
    pub fn create_job(&self, filename: &str, selected_sheets: &[usize]) -> Result<String, JobError> {
        if !self.ctx.store.uploaded_exists(filename) {
            return Err(JobError::NotFound(format!("file '{}'", filename)));
        }
        if selected_sheets.is_empty() {
            return Err(JobError::InvalidInput("no sheets selected".to_string()));
        }
        for (i, index) in selected_sheets.iter().enumerate() {
            if selected_sheets[..i].contains(index) {
                return Err(JobError::InvalidInput(format!(
                    "sheet index {} selected twice",
                    index
                )));
            }
        }

        let sheet_names = self.ctx.store.read_sheet_names(filename)?;
        if let Some(index) = selected_sheets.iter().find(|i| **i >= sheet_names.len()) {
            return Err(JobError::InvalidInput(format!(
                "sheet index {} out of range ('{}' has {} sheets)",
                index,
                filename,
                sheet_names.len()
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let record = JobRecord::new(
            id.clone(),
            seq,
            filename.to_string(),
            selected_sheets.to_vec(),
        );

        job_repo::upsert(&self.ctx.db, &record)?;

        let slot = Arc::new(JobSlot::new(record, true));
        {
            let state = slot.lock();
            self.ctx.insert_slot(id.clone(), Arc::clone(&slot));
            self.ctx.sink.publish(JobEvent::JobCreated(state.record.clone()));
        }

        info!(
            "Created job {} for '{}' (sheets {:?})",
            id, filename, selected_sheets
        );
        self.schedule(&id);

        Ok(id)
    }

    pub fn get_job(&self, job_id: &str) -> Result<JobRecord, JobError> {
        let slot = self.find_slot(job_id)?;
        let state = slot.lock();
        if state.removed {
            return Err(not_found(job_id));
        }
        Ok(state.record.clone())
    }

    /// All jobs in creation order.
    pub fn list_jobs(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self
            .ctx
            .slots()
            .iter()
            .filter_map(|slot| {
                let state = slot.lock();
                (!state.removed).then(|| state.record.clone())
            })
            .collect();
        jobs.sort_by_key(|job| job.seq);
        jobs
    }

    /// Jobs that are not yet completed or failed, in creation order.
    pub fn active_jobs(&self) -> Vec<JobRecord> {
        self.list_jobs()
            .into_iter()
            .filter(|job| !job.is_terminal())
            .collect()
    }

    /// Records a control signal and returns the updated job.
    ///
    /// `run` on a paused job queues an execution that resumes it. `stop` on
    /// a job with no running execution fails it right away; a running one
    /// observes the signal at its next row.
    pub fn set_control(&self, job_id: &str, signal: JobControl) -> Result<JobRecord, JobError> {
        let slot = self.find_slot(job_id)?;
        let mut state = slot.lock();
        if state.removed {
            return Err(not_found(job_id));
        }
        if state.record.is_terminal() {
            return Err(JobError::InvalidInput(format!(
                "job {} is already {}",
                job_id, state.record.status
            )));
        }
        if state.record.control == JobControl::Stop && signal != JobControl::Stop {
            return Err(JobError::InvalidInput(format!(
                "job {} has been stopped and cannot {}",
                job_id, signal
            )));
        }

        let mut record = state.record.clone();
        record.control = signal;
        record.touch();

        let stop_now = signal == JobControl::Stop && !state.running;
        let resume = signal == JobControl::Run
            && record.status == JobStatus::Paused
            && state.is_idle();
        if stop_now {
            record.mark_failed(STOPPED_BY_USER);
        }

        self.ctx
            .commit(&mut state, record, Some(JobEvent::JobControl))?;
        if stop_now {
            self.ctx
                .sink
                .publish(JobEvent::JobStatusChanged(state.record.clone()));
        }
        if resume {
            state.queued = true;
        }
        let updated = state.record.clone();
        drop(state);

        info!("Job {} control set to {}", job_id, signal);
        if stop_now {
            ResultJournal::remove(self.ctx.store.work_directory(), job_id);
        }
        if resume {
            self.schedule(job_id);
        }
        Ok(updated)
    }

    /// Stops the job if needed, waits for its execution to exit, then
    /// removes the record. Output files are kept.
    ///
    /// Fails with `Busy` if the execution does not stop within
    /// `delete_timeout_ms`; the stop signal stays in place and the caller
    /// may retry.
    pub fn delete_job(&self, job_id: &str) -> Result<(), JobError> {
        let slot = self.find_slot(job_id)?;
        let mut state = slot.lock();
        if state.removed {
            return Err(not_found(job_id));
        }

        if !state.record.is_terminal() && state.record.control != JobControl::Stop {
            let mut record = state.record.clone();
            record.control = JobControl::Stop;
            record.touch();
            let stop_now = !state.running;
            if stop_now {
                record.mark_failed(STOPPED_BY_USER);
            }
            self.ctx
                .commit(&mut state, record, Some(JobEvent::JobControl))?;
            if stop_now {
                self.ctx
                    .sink
                    .publish(JobEvent::JobStatusChanged(state.record.clone()));
            }
        }

        let timeout = self.ctx.config.delete_timeout();
        let (guard, stopped) = slot.wait_until_stopped(state, Instant::now() + timeout);
        state = guard;
        if !stopped {
            warn!("Job {} did not stop within {:?}", job_id, timeout);
            return Err(JobError::Busy(format!(
                "job {} is still running; retry the delete",
                job_id
            )));
        }

        job_repo::delete(&self.ctx.db, job_id)?;
        state.removed = true;
        self.ctx.remove_slot(job_id);
        self.ctx.sink.publish(JobEvent::JobDeleted {
            job_id: job_id.to_string(),
        });
        drop(state);

        ResultJournal::remove(self.ctx.store.work_directory(), job_id);
        info!("Deleted job {}", job_id);
        Ok(())
    }

    // ─── Files ──────────────────────────────────────────────────────────────

    pub fn upload_file(&self, filename: &str, content: &[u8]) -> Result<FileInfo, JobError> {
        let info = self.ctx.store.save(filename, content)?;
        info!("Uploaded '{}' ({} bytes)", info.name, info.size);
        self.ctx.sink.publish(JobEvent::FileUploaded(info.clone()));
        Ok(info)
    }

    /// Removes an upload. Jobs still reading it fail at their next row.
    pub fn delete_uploaded(&self, filename: &str) -> Result<(), JobError> {
        self.ctx.store.delete_uploaded(filename)?;
        info!("Deleted upload '{}'", filename);
        self.ctx.sink.publish(JobEvent::FileDeleted {
            filename: filename.to_string(),
        });
        Ok(())
    }

    pub fn delete_output(&self, filename: &str) -> Result<(), JobError> {
        self.ctx.store.delete_output(filename)?;
        info!("Deleted output '{}'", filename);
        self.ctx.sink.publish(JobEvent::OutputDeleted {
            filename: filename.to_string(),
        });
        Ok(())
    }

    pub fn list_uploaded(&self) -> Result<Vec<FileInfo>, JobError> {
        Ok(self.ctx.store.list_uploaded()?)
    }

    pub fn list_output(&self) -> Result<Vec<FileInfo>, JobError> {
        Ok(self.ctx.store.list_output()?)
    }

    pub fn sheet_names(&self, filename: &str) -> Result<Vec<String>, JobError> {
        Ok(self.ctx.store.read_sheet_names(filename)?)
    }

    /// On-disk location of an upload, for streaming it back to a client.
    pub fn uploaded_path(&self, filename: &str) -> Result<PathBuf, JobError> {
        Ok(self.ctx.store.uploaded_path(filename)?)
    }

    /// On-disk location of an output, for streaming it back to a client.
    pub fn output_path(&self, filename: &str) -> Result<PathBuf, JobError> {
        Ok(self.ctx.store.output_path(filename)?)
    }

    // ─── Observability ──────────────────────────────────────────────────────

    pub fn stats(&self) -> Result<JobStats, JobError> {
        let uploaded = self.ctx.store.list_uploaded()?.len();
        let output = self.ctx.store.list_output()?.len();
        Ok(JobStats::collect(&self.list_jobs(), uploaded, output))
    }

    pub fn health(&self) -> HealthReport {
        HealthReport::inspect(&self.ctx.store)
    }

    /// A new receiver for every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.broadcaster.subscribe()
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────────

    /// Stops the workers. Running jobs checkpoint at their next row and keep
    /// status `processing`, so the next [`JobManager::open`] resumes them.
    pub fn shutdown(&self) {
        let pool = match self.pool.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => {
                warn!("Worker pool lock was poisoned, recovering");
                poisoned.into_inner().take()
            }
        };
        if let Some(pool) = pool {
            pool.shutdown();
            pool.wait();
            info!("Job manager stopped");
        }
    }

    fn schedule(&self, job_id: &str) {
        let guard = match self.pool.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Worker pool lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        let result = match guard.as_ref() {
            Some(pool) => pool.submit(job_id.to_string()),
            None => Err(crate::error::WorkerError::ShuttingDown),
        };
        if let Err(e) = result {
            warn!("Job {} not scheduled ({}); it resumes on next start", job_id, e);
        }
    }

    fn find_slot(&self, job_id: &str) -> Result<Arc<JobSlot>, JobError> {
        self.ctx.slot(job_id).ok_or_else(|| not_found(job_id))
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn not_found(job_id: &str) -> JobError {
    JobError::NotFound(format!("job {}", job_id))
}
