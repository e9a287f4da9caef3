//! Test harness for isolated job manager runs.
//!
//! Every `TestHarness` owns a temporary data directory, so managers opened
//! from it never share uploads, outputs or the job database with another
//! test. Reopening a manager on the same harness simulates a restart.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use sheetscrape::spreadsheet::{write_workbook, Row, SheetData, Workbook};
use sheetscrape::{
    Config, EmailExtractor, EventSink, ExtractionError, JobManager, JobRecord, JobStatus,
    RecordingSink, RowContext, RowExtractor,
};

/// Default time to wait for a job to reach a state.
pub const WAIT: Duration = Duration::from_secs(10);

/// Isolated environment for integration tests.
pub struct TestHarness {
    temp_dir: TempDir,
    /// Root data directory handed to the manager.
    pub data_dir: PathBuf,
    /// Config used by `open_*`; tests may tweak it before opening.
    pub config: Config,
    /// Receives every event of every manager opened through the harness.
    pub events: Arc<RecordingSink>,
}

impl TestHarness {
    /// Creates a harness with two workers and a checkpoint after every row.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let data_dir = temp_dir.path().join("data");

        let mut config = Config::with_data_directory(&data_dir);
        config.worker_count = 2;
        config.checkpoint_rows = 1;
        config.delete_timeout_ms = 5_000;

        Self {
            temp_dir,
            data_dir,
            config,
            events: Arc::new(RecordingSink::new()),
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Opens a manager with the stock e-mail extractor.
    pub fn open(&self) -> JobManager {
        self.open_with(Arc::new(EmailExtractor::new()))
    }

    pub fn open_with(&self, extractor: Arc<dyn RowExtractor>) -> JobManager {
        let sink: Arc<dyn EventSink> = self.events.clone();
        JobManager::open_with(self.config.clone(), extractor, Some(sink))
            .expect("Failed to open job manager")
    }

    /// Writes a workbook with the given sheets into the upload area.
    pub fn upload(&self, manager: &JobManager, name: &str, sheets: &[SheetData]) {
        let bytes = write_workbook(sheets).expect("Failed to build workbook");
        manager
            .upload_file(name, &bytes)
            .expect("Failed to upload workbook");
    }

    /// Events recorded so far for one job, as `kind` strings.
    pub fn event_kinds(&self, job_id: &str) -> Vec<&'static str> {
        self.events
            .events()
            .iter()
            .filter(|e| e.job_id() == Some(job_id))
            .map(|e| e.kind())
            .collect()
    }

    /// Statuses carried by the job's events, with consecutive repeats collapsed.
    pub fn status_trail(&self, job_id: &str) -> Vec<JobStatus> {
        let mut trail: Vec<JobStatus> = Vec::new();
        for event in self.events.events() {
            if event.job_id() != Some(job_id) {
                continue;
            }
            if let Some(status) = event_status(&event) {
                if trail.last() != Some(&status) {
                    trail.push(status);
                }
            }
        }
        trail
    }
}

fn event_status(event: &sheetscrape::JobEvent) -> Option<JobStatus> {
    use sheetscrape::JobEvent;
    match event {
        JobEvent::JobCreated(r) | JobEvent::JobControl(r) | JobEvent::JobStatusChanged(r) => {
            Some(r.status)
        }
        _ => None,
    }
}

/// Polls until the job satisfies `pred`, panicking with the last record on timeout.
pub fn wait_until<F>(manager: &JobManager, job_id: &str, what: &str, pred: F) -> JobRecord
where
    F: Fn(&JobRecord) -> bool,
{
    let deadline = Instant::now() + WAIT;
    loop {
        let record = manager.get_job(job_id).expect("Failed to read job");
        if pred(&record) {
            return record;
        }
        if Instant::now() >= deadline {
            panic!("Timed out waiting for {}: {:?}", what, record);
        }
        thread::sleep(Duration::from_millis(5));
    }
}

pub fn wait_for_status(manager: &JobManager, job_id: &str, status: JobStatus) -> JobRecord {
    wait_until(manager, job_id, status.as_str(), |r| r.status == status)
}

/// Reads the single sheet of a job's output workbook.
pub fn read_output(manager: &JobManager, output_name: &str) -> Vec<Row> {
    let path = manager
        .output_path(output_name)
        .expect("Failed to resolve output path");
    let mut workbook = Workbook::open(&path).expect("Failed to open output workbook");
    assert_eq!(workbook.sheet_count(), 1);
    workbook.read_sheet(0).expect("Failed to read output sheet")
}

pub fn read_output_bytes(manager: &JobManager, output_name: &str) -> Vec<u8> {
    let path = manager
        .output_path(output_name)
        .expect("Failed to resolve output path");
    std::fs::read(path).expect("Failed to read output file")
}

// ─── Extractors ─────────────────────────────────────────────────────────────

/// E-mail extraction that sleeps before every row.
pub struct SlowExtractor {
    inner: EmailExtractor,
    delay: Duration,
}

impl SlowExtractor {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: EmailExtractor::new(),
            delay,
        }
    }
}

impl RowExtractor for SlowExtractor {
    fn extract(&self, row: &RowContext<'_>) -> Result<Vec<String>, ExtractionError> {
        thread::sleep(self.delay);
        self.inner.extract(row)
    }
}

/// E-mail extraction that blocks every row until the gate is opened.
///
/// `entered` reports whether some worker is parked inside `extract`.
pub struct GateExtractor {
    inner: EmailExtractor,
    state: Mutex<GateState>,
    cond: Condvar,
}

#[derive(Default)]
struct GateState {
    open: bool,
    entered: bool,
}

impl GateExtractor {
    pub fn new() -> Self {
        Self {
            inner: EmailExtractor::new(),
            state: Mutex::new(GateState::default()),
            cond: Condvar::new(),
        }
    }

    pub fn open(&self) {
        let mut state = self.state.lock().expect("gate lock");
        state.open = true;
        self.cond.notify_all();
    }

    /// Blocks until a worker is parked at the gate.
    pub fn wait_entered(&self) {
        let deadline = Instant::now() + WAIT;
        let mut state = self.state.lock().expect("gate lock");
        while !state.entered {
            let now = Instant::now();
            assert!(now < deadline, "no worker reached the gate");
            state = self
                .cond
                .wait_timeout(state, deadline - now)
                .expect("gate lock")
                .0;
        }
    }
}

impl RowExtractor for GateExtractor {
    fn extract(&self, row: &RowContext<'_>) -> Result<Vec<String>, ExtractionError> {
        {
            let mut state = self.state.lock().expect("gate lock");
            state.entered = true;
            self.cond.notify_all();
            let deadline = Instant::now() + WAIT;
            while !state.open && Instant::now() < deadline {
                state = self
                    .cond
                    .wait_timeout(state, Duration::from_millis(50))
                    .expect("gate lock")
                    .0;
            }
        }
        self.inner.extract(row)
    }
}

/// Fails at one row of one sheet; extracts e-mails elsewhere.
pub struct FailingExtractor {
    inner: EmailExtractor,
    sheet_index: usize,
    row_index: usize,
}

impl FailingExtractor {
    pub fn new(sheet_index: usize, row_index: usize) -> Self {
        Self {
            inner: EmailExtractor::new(),
            sheet_index,
            row_index,
        }
    }
}

impl RowExtractor for FailingExtractor {
    fn extract(&self, row: &RowContext<'_>) -> Result<Vec<String>, ExtractionError> {
        if row.sheet_index == self.sheet_index && row.row_index == self.row_index {
            return Err(ExtractionError::new("cell value could not be decoded"));
        }
        self.inner.extract(row)
    }
}

/// Panics at one row of one sheet; extracts e-mails elsewhere.
pub struct PanickingExtractor {
    inner: EmailExtractor,
    sheet_index: usize,
    row_index: usize,
}

impl PanickingExtractor {
    pub fn new(sheet_index: usize, row_index: usize) -> Self {
        Self {
            inner: EmailExtractor::new(),
            sheet_index,
            row_index,
        }
    }
}

impl RowExtractor for PanickingExtractor {
    fn extract(&self, row: &RowContext<'_>) -> Result<Vec<String>, ExtractionError> {
        if row.sheet_index == self.sheet_index && row.row_index == self.row_index {
            panic!("extractor tripped over row {}", row.row_index);
        }
        self.inner.extract(row)
    }
}
