use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};

use crate::broadcast::{EventSink, JobEvent};
use crate::config::Config;
use crate::db::{job_repo, Database};
use crate::error::JobError;
use crate::extract::RowExtractor;
use crate::job::JobRecord;
use crate::storage::FileStore;
use crate::worker::{execution, JobRunner};

use super::slot::{JobSlot, SlotState};

/// Builds the event announcing a committed record.
pub(crate) type EventFn = fn(JobRecord) -> JobEvent;

/// State shared by the manager facade and the worker threads.
pub(crate) struct ManagerContext {
    pub config: Config,
    pub db: Database,
    pub store: FileStore,
    pub sink: Arc<dyn EventSink>,
    pub extractor: Arc<dyn RowExtractor>,
    slots: RwLock<HashMap<String, Arc<JobSlot>>>,
}

impl ManagerContext {
    pub fn new(
        config: Config,
        db: Database,
        store: FileStore,
        sink: Arc<dyn EventSink>,
        extractor: Arc<dyn RowExtractor>,
    ) -> Self {
        Self {
            config,
            db,
            store,
            sink,
            extractor,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn slot(&self, job_id: &str) -> Option<Arc<JobSlot>> {
        let slots = match self.slots.read() {
            Ok(s) => s,
            Err(poisoned) => {
                log::warn!("Job slot map lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        slots.get(job_id).cloned()
    }

    /// Every slot, in no particular order.
    pub fn slots(&self) -> Vec<Arc<JobSlot>> {
        let slots = match self.slots.read() {
            Ok(s) => s,
            Err(poisoned) => {
                log::warn!("Job slot map lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        slots.values().cloned().collect()
    }

    pub fn insert_slot(&self, job_id: String, slot: Arc<JobSlot>) {
        let mut slots = match self.slots.write() {
            Ok(s) => s,
            Err(poisoned) => {
                log::warn!("Job slot map lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        slots.insert(job_id, slot);
    }

    pub fn remove_slot(&self, job_id: &str) {
        let mut slots = match self.slots.write() {
            Ok(s) => s,
            Err(poisoned) => {
                log::warn!("Job slot map lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        slots.remove(job_id);
    }

    /// Applies a new version of a record.
    ///
    /// The caller holds the slot lock. The row is written first, then the
    /// in-memory record is swapped and the event published; on a storage
    /// failure nothing changes.
    pub fn commit(
        &self,
        state: &mut SlotState,
        record: JobRecord,
        event: Option<EventFn>,
    ) -> Result<(), JobError> {
        job_repo::upsert(&self.db, &record)?;
        state.record = record;
        if let Some(make_event) = event {
            self.sink.publish(make_event(state.record.clone()));
        }
        Ok(())
    }
}

impl JobRunner for ManagerContext {
    fn run(&self, job_id: &str, shutdown: &AtomicBool) {
        execution::run_job(self, job_id, shutdown);
    }
}
