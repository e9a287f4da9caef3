use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Job database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Cannot prepare database location '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The stored schema is newer than this build understands, or a step failed.
    #[error("Schema version {version}: {reason}")]
    Migration { version: u32, reason: String },

    #[error("Stored job '{id}' is unreadable: {reason}")]
    InvalidRow { id: String, reason: String },
}
