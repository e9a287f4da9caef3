//! Schema upgrades.
//!
//! The applied schema version lives in SQLite's `user_version` header field.
//! Each step runs in its own transaction together with the version bump, so
//! a crash mid-upgrade leaves the previous version intact.

use rusqlite::Connection;

use super::error::DatabaseError;

/// Ordered schema steps; step `i` upgrades from version `i` to `i + 1`.
const STEPS: &[(&str, &str)] = &[("jobs table", include_str!("sql/001_create_jobs.sql"))];

pub fn latest_version() -> u32 {
    STEPS.len() as u32
}

pub fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.pragma_query_value(None, "user_version", |r| r.get(0))?)
}

/// Brings the schema up to [`latest_version`].
pub fn upgrade(conn: &mut Connection) -> Result<(), DatabaseError> {
    let current = schema_version(conn)?;
    let latest = latest_version();
    if current > latest {
        return Err(DatabaseError::Migration {
            version: current,
            reason: format!("database was written by a newer build (knows up to {})", latest),
        });
    }

    for (index, (name, sql)) in STEPS.iter().enumerate().skip(current as usize) {
        let version = index as u32 + 1;
        log::info!("Upgrading job database to v{} ({})", version, name);

        let step = |conn: &mut Connection| -> rusqlite::Result<()> {
            let tx = conn.transaction()?;
            tx.execute_batch(sql)?;
            tx.pragma_update(None, "user_version", version)?;
            tx.commit()
        };
        step(conn).map_err(|e| DatabaseError::Migration {
            version,
            reason: e.to_string(),
        })?;
    }

    Ok(())
}
