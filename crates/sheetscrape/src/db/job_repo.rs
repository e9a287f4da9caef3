//! Job repository: persistence for the `jobs` table.
//!
//! Every write replaces the whole row in one statement, so a record is
//! never observed with fields from two different versions.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::{Database, DatabaseError};
use crate::job::{Checkpoint, JobControl, JobProgress, JobRecord, JobStatus};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub seq: i64,
    pub source_filename: String,
    pub selected_sheets: String,
    pub status: String,
    pub control: String,
    pub sheets_processed: i64,
    pub rows_processed: i64,
    pub emails_found: i64,
    pub sheet_cursor: i64,
    pub row_offset: i64,
    pub results_written: i64,
    pub output_filename: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            seq: row.get("seq")?,
            source_filename: row.get("source_filename")?,
            selected_sheets: row.get("selected_sheets")?,
            status: row.get("status")?,
            control: row.get("control")?,
            sheets_processed: row.get("sheets_processed")?,
            rows_processed: row.get("rows_processed")?,
            emails_found: row.get("emails_found")?,
            sheet_cursor: row.get("sheet_cursor")?,
            row_offset: row.get("row_offset")?,
            results_written: row.get("results_written")?,
            output_filename: row.get("output_filename")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    pub fn from_record(job: &JobRecord) -> Self {
        Self {
            id: job.id.clone(),
            seq: job.seq as i64,
            source_filename: job.source_filename.clone(),
            selected_sheets: serde_json::to_string(&job.selected_sheets)
                .unwrap_or_else(|_| "[]".to_string()),
            status: job.status.as_str().to_string(),
            control: job.control.as_str().to_string(),
            sheets_processed: job.progress.sheets_processed as i64,
            rows_processed: job.progress.rows_processed as i64,
            emails_found: job.progress.emails_found as i64,
            sheet_cursor: job.checkpoint.sheet_cursor as i64,
            row_offset: job.checkpoint.row_offset as i64,
            results_written: job.checkpoint.results_written as i64,
            output_filename: job.output_filename.clone(),
            error: job.error.clone(),
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
        }
    }

    pub fn into_record(self) -> Result<JobRecord, DatabaseError> {
        let invalid = |reason: String| DatabaseError::InvalidRow {
            id: self.id.clone(),
            reason,
        };

        let selected_sheets: Vec<usize> = serde_json::from_str(&self.selected_sheets)
            .map_err(|e| invalid(format!("selected_sheets: {}", e)))?;
        let status: JobStatus = self.status.parse().map_err(invalid)?;
        let control: JobControl = self
            .control
            .parse()
            .map_err(|e: crate::error::JobError| invalid(e.to_string()))?;
        let created_at = parse_timestamp(&self.created_at).map_err(invalid)?;
        let updated_at = parse_timestamp(&self.updated_at).map_err(invalid)?;

        Ok(JobRecord {
            seq: self.seq.max(0) as u64,
            selected_sheets,
            status,
            control,
            progress: JobProgress {
                sheets_processed: self.sheets_processed.max(0) as usize,
                rows_processed: self.rows_processed.max(0) as u64,
                emails_found: self.emails_found.max(0) as u64,
            },
            checkpoint: Checkpoint {
                sheet_cursor: self.sheet_cursor.max(0) as usize,
                row_offset: self.row_offset.max(0) as usize,
                results_written: self.results_written.max(0) as u64,
            },
            created_at,
            updated_at,
            id: self.id,
            source_filename: self.source_filename,
            output_filename: self.output_filename,
            error: self.error,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{}': {}", s, e))
}

/// Inserts the record, or replaces every column of the existing row.
pub fn upsert(db: &Database, job: &JobRecord) -> Result<(), DatabaseError> {
    let row = JobRow::from_record(job);
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, seq, source_filename, selected_sheets, status, control,
             sheets_processed, rows_processed, emails_found, sheet_cursor, row_offset,
             results_written, output_filename, error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             ON CONFLICT(id) DO UPDATE SET
             seq=excluded.seq, source_filename=excluded.source_filename,
             selected_sheets=excluded.selected_sheets, status=excluded.status,
             control=excluded.control, sheets_processed=excluded.sheets_processed,
             rows_processed=excluded.rows_processed, emails_found=excluded.emails_found,
             sheet_cursor=excluded.sheet_cursor, row_offset=excluded.row_offset,
             results_written=excluded.results_written, output_filename=excluded.output_filename,
             error=excluded.error, updated_at=excluded.updated_at",
            params![
                row.id,
                row.seq,
                row.source_filename,
                row.selected_sheets,
                row.status,
                row.control,
                row.sheets_processed,
                row.rows_processed,
                row.emails_found,
                row.sheet_cursor,
                row.row_offset,
                row.results_written,
                row.output_filename,
                row.error,
                row.created_at,
                row.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// All jobs in creation order.
pub fn list_all(db: &Database) -> Result<Vec<JobRecord>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs ORDER BY seq ASC")?;
        let rows: Vec<JobRow> = stmt
            .query_map([], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(JobRow::into_record).collect()
}

/// Deletes a job. Returns whether a row was removed.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let removed = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    })
}
