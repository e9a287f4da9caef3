//! Restart recovery.
//!
//! Jobs that were `pending` or `processing` when the previous process
//! stopped have no live worker. Depending on [`RecoveryMode`] they are
//! re-scheduled from their checkpoint or failed as interrupted.

use std::sync::Arc;

use log::{info, warn};

use crate::broadcast::JobEvent;
use crate::config::RecoveryMode;
use crate::error::JobError;
use crate::job::{JobControl, JobRecord, JobStatus, INTERRUPTED, STOPPED_BY_USER};
use crate::worker::ResultJournal;

use super::context::ManagerContext;
use super::slot::JobSlot;

/// What recovery decided for one stored job.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Recovery {
    /// Already settled; load as is.
    Keep,
    /// Queue an execution that resumes from the checkpoint.
    Resume,
    /// Rewrite the record, which is now idle.
    Rewrite(JobRecord),
}

pub(crate) fn plan(record: &JobRecord, mode: RecoveryMode) -> Recovery {
    if !matches!(record.status, JobStatus::Pending | JobStatus::Processing) {
        return Recovery::Keep;
    }

    let mut next = record.clone();
    match (mode, record.control) {
        (RecoveryMode::Fail, _) => next.mark_failed(INTERRUPTED),
        (RecoveryMode::Resume, JobControl::Run) => return Recovery::Resume,
        (RecoveryMode::Resume, JobControl::Pause) => {
            next.status = JobStatus::Paused;
            next.touch();
        }
        (RecoveryMode::Resume, JobControl::Stop) => next.mark_failed(STOPPED_BY_USER),
    }
    Recovery::Rewrite(next)
}

/// Loads stored records into slots. Returns the ids to schedule, in
/// creation order.
pub(crate) fn recover(
    ctx: &ManagerContext,
    records: Vec<JobRecord>,
) -> Result<Vec<String>, JobError> {
    let mode = ctx.config.recovery;
    let mut resumed = Vec::new();
    let mut rewritten = 0usize;

    for record in records {
        let id = record.id.clone();
        match plan(&record, mode) {
            Recovery::Keep => {
                ctx.insert_slot(id, Arc::new(JobSlot::new(record, false)));
            }
            Recovery::Resume => {
                info!(
                    "Resuming job {} at sheet {} row {}",
                    id, record.checkpoint.sheet_cursor, record.checkpoint.row_offset
                );
                ctx.insert_slot(id.clone(), Arc::new(JobSlot::new(record, true)));
                resumed.push(id);
            }
            Recovery::Rewrite(next) => {
                warn!(
                    "Job {} was {} at shutdown, now {}",
                    id, record.status, next.status
                );
                let terminal = next.is_terminal();
                let slot = Arc::new(JobSlot::new(record, false));
                {
                    let mut state = slot.lock();
                    ctx.commit(&mut state, next, Some(JobEvent::JobStatusChanged))?;
                }
                if terminal {
                    ResultJournal::remove(ctx.store.work_directory(), &id);
                }
                ctx.insert_slot(id, slot);
                rewritten += 1;
            }
        }
    }

    info!(
        "Recovery ({:?}): {} jobs resumed, {} rewritten",
        mode,
        resumed.len(),
        rewritten
    );
    Ok(resumed)
}
