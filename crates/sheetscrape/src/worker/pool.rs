use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info};

use crate::error::WorkerError;

/// Runs one scheduled job execution to its next exit point.
///
/// `shutdown` flips when the pool is stopping; executions are expected to
/// checkpoint and return at their next unit boundary once it is set.
pub trait JobRunner: Send + Sync {
    fn run(&self, job_id: &str, shutdown: &AtomicBool);
}

/// Fixed set of OS threads pulling job ids from a shared queue.
pub struct WorkerPool {
    job_sender: Sender<String>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(worker_count: usize, runner: Arc<dyn JobRunner>) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        // Unbounded so scheduling never blocks a caller that holds a job lock.
        let (job_sender, job_receiver) = unbounded::<String>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_runner = Arc::clone(&runner);

            let spawned = thread::Builder::new()
                .name(format!("sheetscrape-worker-{}", worker_id))
                .spawn(move || run_worker(worker_id, job_rx, shutdown_flag, worker_runner));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => error!("Failed to spawn worker {}: {}", worker_id, e),
            }
        }

        info!("Started {} workers", workers.len());

        Self {
            job_sender,
            workers,
            shutdown,
        }
    }

    pub fn submit(&self, job_id: String) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(WorkerError::ShuttingDown);
        }

        self.job_sender
            .send(job_id)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn wait(self) {
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<String>,
    shutdown: Arc<AtomicBool>,
    runner: Arc<dyn JobRunner>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::SeqCst) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(job_id) => {
                debug!("Worker {} picked up job {}", worker_id, job_id);
                let run =
                    panic::catch_unwind(AssertUnwindSafe(|| runner.run(&job_id, &shutdown)));
                if let Err(payload) = run {
                    error!(
                        "Worker {} recovered from a panic in job {}: {}",
                        worker_id,
                        job_id,
                        panic_message(payload.as_ref())
                    );
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
