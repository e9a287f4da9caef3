//! One worker execution of one job.
//!
//! An execution claims the job, walks the selected sheets row by row and
//! stops at the first row boundary where the control signal, a shutdown or a
//! missing source file says so. Pause and shutdown leave a checkpoint the
//! next execution resumes from; rows past the checkpoint are re-read, and
//! their journal lines discarded, so a resumed job writes exactly what an
//! uninterrupted one would.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, warn};

use crate::broadcast::JobEvent;
use crate::error::{JobError, SpreadsheetError};
use crate::extract::RowContext;
use crate::job::{Checkpoint, JobControl, JobProgress, JobRecord, JobStatus, STOPPED_BY_USER};
use crate::manager::context::ManagerContext;
use crate::manager::slot::JobSlot;
use crate::spreadsheet::{write_workbook, Row, SheetData, Workbook};
use crate::worker::partial::{Finding, ResultJournal};
use crate::worker::pool::panic_message;

/// Name of the single sheet in every output workbook.
pub const OUTPUT_SHEET: &str = "emails";

/// Runs `job_id` until it completes, fails, pauses, stops or the pool shuts down.
pub(crate) fn run_job(ctx: &ManagerContext, job_id: &str, shutdown: &AtomicBool) {
    let Some(slot) = ctx.slot(job_id) else {
        debug!("Job {} no longer exists, skipping", job_id);
        return;
    };

    let Some(record) = claim(ctx, &slot) else {
        return;
    };

    let span = tracing::info_span!(
        "job",
        job_id = %record.id,
        file = %record.source_filename
    );
    let _entered = span.enter();

    info!(
        "Processing job {} ({} sheets, resuming at sheet {} row {})",
        record.id,
        record.selected_sheets.len(),
        record.checkpoint.sheet_cursor,
        record.checkpoint.row_offset
    );

    let mut execution = Execution::new(ctx, &slot, shutdown, &record);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| execution.execute()));
    match outcome {
        Ok(Ok(None)) => {}
        Ok(Ok(Some(output))) => {
            info!("Job {} completed, output {}", record.id, output);
            execution.finish(|job| job.mark_completed(output));
        }
        Ok(Err(e)) => {
            warn!("Job {} failed: {}", record.id, e);
            let diagnostic = e.to_string();
            execution.finish(|job| job.mark_failed(diagnostic));
        }
        Err(payload) => {
            let diagnostic = format!("worker panicked: {}", panic_message(payload.as_ref()));
            error!("Job {} aborted: {}", record.id, diagnostic);
            execution.finish(|job| job.mark_failed(diagnostic));
        }
    }
    drop(execution);

    if slot.snapshot().is_terminal() {
        ResultJournal::remove(ctx.store.work_directory(), &record.id);
    }
}

/// Takes ownership of the job for this execution.
///
/// Returns `None` when there is nothing to do: the job was deleted, already
/// finished, or is meant to be paused.
fn claim(ctx: &ManagerContext, slot: &JobSlot) -> Option<JobRecord> {
    let mut state = slot.lock();
    state.queued = false;

    if state.removed || state.record.is_terminal() {
        debug!("Job {} needs no execution", state.record.id);
        drop(state);
        slot.notify_stopped();
        return None;
    }

    let mut record = state.record.clone();
    match record.control {
        JobControl::Pause => {
            if record.status != JobStatus::Paused {
                record.status = JobStatus::Paused;
                record.touch();
                if let Err(e) = ctx.commit(&mut state, record, Some(JobEvent::JobStatusChanged)) {
                    error!("Failed to persist pause of job {}: {}", state.record.id, e);
                }
            }
            None
        }
        // Stops are applied directly while no execution runs; seeing one
        // here means it raced the queue.
        JobControl::Stop => {
            record.mark_failed(STOPPED_BY_USER);
            if let Err(e) = ctx.commit(&mut state, record, Some(JobEvent::JobStatusChanged)) {
                error!("Failed to persist stop of job {}: {}", state.record.id, e);
            }
            None
        }
        JobControl::Run => {
            record.status = JobStatus::Processing;
            record.error = None;
            record.touch();
            match ctx.commit(&mut state, record, Some(JobEvent::JobStatusChanged)) {
                Ok(()) => {
                    state.running = true;
                    Some(state.record.clone())
                }
                Err(e) => {
                    error!("Failed to start job {}: {}", state.record.id, e);
                    None
                }
            }
        }
    }
}

struct Execution<'a> {
    ctx: &'a ManagerContext,
    slot: &'a JobSlot,
    shutdown: &'a AtomicBool,
    job_id: String,
    source_path: PathBuf,
    output_name: String,
    sheets: Vec<usize>,
    progress: JobProgress,
    checkpoint: Checkpoint,
    rows_since_checkpoint: u64,
    force_checkpoint: bool,
}

impl<'a> Execution<'a> {
    fn new(
        ctx: &'a ManagerContext,
        slot: &'a JobSlot,
        shutdown: &'a AtomicBool,
        record: &JobRecord,
    ) -> Self {
        Self {
            ctx,
            slot,
            shutdown,
            job_id: record.id.clone(),
            source_path: ctx.store.uploads_directory().join(&record.source_filename),
            output_name: record.output_name(),
            sheets: record.selected_sheets.clone(),
            progress: record.progress,
            checkpoint: record.checkpoint,
            rows_since_checkpoint: 0,
            force_checkpoint: false,
        }
    }

    /// Returns the output name once every row is consumed and the output
    /// written, or `None` if the execution already stopped at a boundary.
    fn execute(&mut self) -> Result<Option<String>, JobError> {
        let work_directory = self.ctx.store.work_directory().to_path_buf();
        let mut journal =
            ResultJournal::open(&work_directory, &self.job_id, self.checkpoint.results_written)?;

        if !self.boundary(&mut journal)? {
            return Ok(None);
        }

        let mut workbook = Workbook::open(&self.source_path)?;

        while self.checkpoint.sheet_cursor < self.sheets.len() {
            let sheet_index = self.sheets[self.checkpoint.sheet_cursor];
            let sheet_name = workbook
                .sheet_names()
                .get(sheet_index)
                .cloned()
                .ok_or(SpreadsheetError::SheetOutOfRange {
                    index: sheet_index,
                    count: workbook.sheet_count(),
                })?;

            let span = tracing::info_span!("sheet", index = sheet_index, name = %sheet_name);
            let _entered = span.enter();

            let rows = workbook.read_sheet(sheet_index)?;
            debug!(
                "Sheet '{}' has {} rows, starting at {}",
                sheet_name,
                rows.len(),
                self.checkpoint.row_offset
            );

            for (row_index, cells) in rows.iter().enumerate().skip(self.checkpoint.row_offset) {
                self.checkpoint.row_offset = row_index;
                if !self.boundary(&mut journal)? {
                    return Ok(None);
                }
                self.process_row(&mut journal, &sheet_name, sheet_index, row_index, cells)?;
            }

            self.progress.sheets_processed += 1;
            self.checkpoint.sheet_cursor += 1;
            self.checkpoint.row_offset = 0;
            self.force_checkpoint = true;
            if !self.boundary(&mut journal)? {
                return Ok(None);
            }
        }

        let findings = journal.read_all()?;
        let mut rows: Vec<Row> = Vec::with_capacity(findings.len() + 1);
        rows.push(vec!["sheet".to_string(), "row".to_string(), "email".to_string()]);
        rows.extend(
            findings
                .into_iter()
                .map(|f| vec![f.sheet, f.row.to_string(), f.email]),
        );

        let bytes = write_workbook(&[SheetData::new(OUTPUT_SHEET, rows)])?;
        self.ctx.store.save_output(&self.output_name, &bytes)?;

        Ok(Some(self.output_name.clone()))
    }

    fn process_row(
        &mut self,
        journal: &mut ResultJournal,
        sheet_name: &str,
        sheet_index: usize,
        row_index: usize,
        cells: &[String],
    ) -> Result<(), JobError> {
        let row = RowContext {
            sheet_name,
            sheet_index,
            row_index,
            cells,
        };
        let found = self.ctx.extractor.extract(&row).map_err(|e| {
            JobError::ExtractionFailure(format!(
                "sheet '{}' row {}: {}",
                sheet_name,
                row_index + 1,
                e
            ))
        })?;

        let findings: Vec<Finding> = found
            .into_iter()
            .map(|email| Finding {
                sheet: sheet_name.to_string(),
                row: row_index + 1,
                email,
            })
            .collect();
        journal.append(&findings)?;

        self.progress.rows_processed += 1;
        self.progress.emails_found += findings.len() as u64;
        self.rows_since_checkpoint += 1;
        Ok(())
    }

    /// Checks control, shutdown and the source file between units of work,
    /// committing a checkpoint when one is due or the execution must exit.
    ///
    /// Returns whether to keep going. On `false` the exit has already been
    /// recorded and the slot released.
    fn boundary(&mut self, journal: &mut ResultJournal) -> Result<bool, JobError> {
        if !self.source_path.is_file() {
            return Err(JobError::NotFound(format!(
                "source file '{}' no longer exists",
                self.source_path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default()
            )));
        }

        let stopping = self.shutdown.load(Ordering::SeqCst);
        let due = self.force_checkpoint
            || self.rows_since_checkpoint >= self.ctx.config.checkpoint_rows;
        let control = self.slot.lock().record.control;
        if control == JobControl::Run && !stopping && !due {
            return Ok(true);
        }

        journal.sync()?;
        self.checkpoint.results_written = journal.written();

        // Control is read again under the same lock that records the outcome.
        let mut state = self.slot.lock();
        let mut record = state.record.clone();
        record.progress = self.progress;
        record.checkpoint = self.checkpoint;
        record.touch();

        let keep_going = match record.control {
            JobControl::Pause => {
                info!(
                    "Job {} paused at sheet {} row {}",
                    self.job_id, self.checkpoint.sheet_cursor, self.checkpoint.row_offset
                );
                record.status = JobStatus::Paused;
                false
            }
            JobControl::Stop => {
                info!("Job {} stopped by user", self.job_id);
                record.mark_failed(STOPPED_BY_USER);
                false
            }
            JobControl::Run if stopping => {
                info!("Job {} checkpointed for shutdown", self.job_id);
                false
            }
            JobControl::Run => true,
        };

        self.ctx
            .commit(&mut state, record, Some(JobEvent::JobStatusChanged))?;
        self.rows_since_checkpoint = 0;
        self.force_checkpoint = false;

        if !keep_going {
            state.running = false;
            drop(state);
            self.slot.notify_stopped();
        }
        Ok(keep_going)
    }

    /// Records a terminal outcome and releases the slot.
    fn finish(&mut self, apply: impl FnOnce(&mut JobRecord)) {
        let mut state = self.slot.lock();
        let mut record = state.record.clone();
        record.progress = self.progress;
        record.checkpoint = self.checkpoint;
        apply(&mut record);

        if let Err(e) = self
            .ctx
            .commit(&mut state, record, Some(JobEvent::JobStatusChanged))
        {
            error!("Failed to record outcome of job {}: {}", self.job_id, e);
        }

        state.running = false;
        drop(state);
        self.slot.notify_stopped();
    }
}
