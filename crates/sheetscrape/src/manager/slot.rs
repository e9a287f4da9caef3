//! Per-job lock.
//!
//! Every read and write of one job record goes through its slot's mutex.
//! Different jobs never contend.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Instant;

use crate::job::JobRecord;

pub(crate) struct SlotState {
    pub record: JobRecord,
    /// An id for this job sits in the worker queue.
    pub queued: bool,
    /// A worker execution currently owns the job.
    pub running: bool,
    /// Deleted; any execution still holding the slot must not touch it.
    pub removed: bool,
}

impl SlotState {
    /// No execution is queued or running.
    pub fn is_idle(&self) -> bool {
        !self.queued && !self.running
    }
}

pub(crate) struct JobSlot {
    state: Mutex<SlotState>,
    stopped: Condvar,
}

impl JobSlot {
    pub fn new(record: JobRecord, queued: bool) -> Self {
        Self {
            state: Mutex::new(SlotState {
                record,
                queued,
                running: false,
                removed: false,
            }),
            stopped: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, SlotState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job slot lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn snapshot(&self) -> JobRecord {
        self.lock().record.clone()
    }

    /// Wakes anyone waiting in [`JobSlot::wait_until_stopped`].
    pub fn notify_stopped(&self) {
        self.stopped.notify_all();
    }

    /// Blocks until no execution is running or `deadline` passes.
    ///
    /// Returns the guard and whether the execution stopped in time.
    pub fn wait_until_stopped<'a>(
        &'a self,
        mut guard: MutexGuard<'a, SlotState>,
        deadline: Instant,
    ) -> (MutexGuard<'a, SlotState>, bool) {
        while guard.running {
            let now = Instant::now();
            if now >= deadline {
                return (guard, false);
            }
            guard = match self.stopped.wait_timeout(guard, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => {
                    log::warn!("Job slot lock was poisoned while waiting, recovering");
                    poisoned.into_inner().0
                }
            };
        }
        (guard, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn slot() -> JobSlot {
        JobSlot::new(
            JobRecord::new("j".to_string(), 1, "a.xlsx".to_string(), vec![0]),
            true,
        )
    }

    #[test]
    fn test_new_slot_state() {
        let slot = slot();
        let state = slot.lock();
        assert!(state.queued);
        assert!(!state.running);
        assert!(!state.removed);
        assert!(!state.is_idle());
    }

    #[test]
    fn test_wait_returns_immediately_when_idle() {
        let slot = slot();
        let guard = slot.lock();
        let (_guard, stopped) = slot.wait_until_stopped(guard, Instant::now());
        assert!(stopped);
    }

    #[test]
    fn test_wait_times_out() {
        let slot = slot();
        let mut guard = slot.lock();
        guard.running = true;
        let started = Instant::now();
        let (_guard, stopped) =
            slot.wait_until_stopped(guard, Instant::now() + Duration::from_millis(50));
        assert!(!stopped);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_wait_wakes_on_notify() {
        let slot = Arc::new(slot());
        slot.lock().running = true;

        let other = Arc::clone(&slot);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            other.lock().running = false;
            other.notify_stopped();
        });

        let guard = slot.lock();
        let (_guard, stopped) =
            slot.wait_until_stopped(guard, Instant::now() + Duration::from_secs(5));
        assert!(stopped);
        handle.join().unwrap();
    }
}
