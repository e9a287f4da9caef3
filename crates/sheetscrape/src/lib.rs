pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod job;
pub mod logging;
pub mod manager;
pub mod spreadsheet;
pub mod storage;
pub mod worker;

pub use broadcast::{EventBroadcaster, EventSink, JobEvent, RecordingSink};
pub use config::{load_config, Config, RecoveryMode};
pub use error::{
    ConfigError, JobError, Result, SheetScrapeError, SpreadsheetError, StorageError, WorkerError,
};
pub use extract::{EmailExtractor, ExtractionError, RowContext, RowExtractor};
pub use job::{Checkpoint, JobControl, JobProgress, JobRecord, JobStatus};
pub use logging::init_logging;
pub use manager::{HealthReport, JobManager, JobStats};
pub use storage::{FileInfo, FileStore};
