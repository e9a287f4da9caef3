use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SheetScrapeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] SpreadsheetError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Logging error: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Caller-facing failures of the job manager.
///
/// `NotFound` and `InvalidInput` are validation failures and never mutate
/// state. `Corrupt` and `ExtractionFailure` normally surface on the job
/// record as `failed`; they are returned directly only when a synchronous
/// operation (e.g. reading sheet names during `create_job`) hits them.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Corrupt spreadsheet: {0}")]
    Corrupt(String),

    #[error("Busy: {0}")]
    Busy(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailure(String),

    #[error("Storage failure: {0}")]
    Storage(StorageError),

    #[error("Persistence failure: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker pool is shutting down")]
    ShuttingDown,

    #[error("Job channel closed")]
    ChannelClosed,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete file '{path}': {source}")]
    DeleteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid file name '{name}': {reason}")]
    InvalidName { name: String, reason: String },
}

#[derive(Error, Debug)]
pub enum SpreadsheetError {
    #[error("Failed to open workbook '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported workbook format: {0}")]
    Unsupported(String),

    #[error("Invalid workbook archive: {0}")]
    Archive(String),

    #[error("Malformed workbook XML in '{part}': {reason}")]
    Xml { part: String, reason: String },

    #[error("Sheet index {index} out of range (workbook has {count} sheets)")]
    SheetOutOfRange { index: usize, count: usize },

    #[error("Failed to write workbook: {0}")]
    Write(String),
}

impl SpreadsheetError {
    /// Whether the failure means the file itself is missing rather than unreadable.
    pub fn is_missing(&self) -> bool {
        matches!(self, SpreadsheetError::Open { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

impl From<SpreadsheetError> for JobError {
    fn from(err: SpreadsheetError) -> Self {
        if err.is_missing() {
            JobError::NotFound(err.to_string())
        } else {
            JobError::Corrupt(err.to_string())
        }
    }
}

impl From<StorageError> for JobError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(name) => JobError::NotFound(format!("file '{}'", name)),
            StorageError::InvalidName { .. } => JobError::InvalidInput(err.to_string()),
            other => JobError::Storage(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SheetScrapeError>;
