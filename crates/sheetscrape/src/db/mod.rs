//! Durable job records in SQLite.
//!
//! One connection serves the whole process. Writes are single statements,
//! so each record update replaces the row atomically. The journal runs in
//! WAL mode with `synchronous=FULL`, so a committed update survives power
//! loss as well as a process crash.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;

pub mod error;
pub mod job_repo;
pub mod migrations;

pub use error::DatabaseError;

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens the job database at `path`, creating it and its directory if
    /// needed, and upgrades the schema.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| DatabaseError::Io {
                path: dir.to_path_buf(),
                source: e,
            })?;
        }

        let mut conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |r| r.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            log::warn!("Job database is using journal mode {}", mode);
        }
        conn.pragma_update(None, "synchronous", "FULL")?;
        migrations::upgrade(&mut conn)?;

        log::info!(
            "Job database at {} (schema v{})",
            path.display(),
            migrations::schema_version(&conn)?
        );
        Ok(Self::wrap(conn))
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let mut conn = Connection::open_in_memory()?;
        migrations::upgrade(&mut conn)?;
        Ok(Self::wrap(conn))
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job database lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Runs `f` with exclusive use of the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        f(&self.lock())
    }
}
