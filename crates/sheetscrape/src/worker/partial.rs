//! Append-only journal of a job's findings.
//!
//! One JSON object per line in `<work dir>/<job id>.jsonl`. The job record's
//! checkpoint says how many lines are backed by committed progress; anything
//! past that is cut off when the journal is reopened.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{JobError, StorageError};

/// One extracted value and where it was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub sheet: String,
    /// 1-based, as shown by spreadsheet applications.
    pub row: usize,
    pub email: String,
}

pub struct ResultJournal {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
}

impl ResultJournal {
    pub fn path_for(work_directory: &Path, job_id: &str) -> PathBuf {
        work_directory.join(format!("{}.jsonl", job_id))
    }

    /// Opens the journal keeping only its first `committed` lines.
    pub fn open(work_directory: &Path, job_id: &str, committed: u64) -> Result<Self, JobError> {
        let path = Self::path_for(work_directory, job_id);

        let keep_bytes = if path.exists() {
            committed_length(&path, committed)?
        } else if committed > 0 {
            return Err(JobError::Corrupt(format!(
                "result journal for job {} is missing ({} results expected)",
                job_id, committed
            )));
        } else {
            0
        };

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| write_error(&path, e))?;
        file.set_len(keep_bytes).map_err(|e| write_error(&path, e))?;
        file.seek(SeekFrom::End(0))
            .map_err(|e| write_error(&path, e))?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            written: committed,
        })
    }

    pub fn append(&mut self, findings: &[Finding]) -> Result<(), JobError> {
        for finding in findings {
            let line = serde_json::to_string(finding)
                .map_err(|e| write_error(&self.path, std::io::Error::other(e)))?;
            self.writer
                .write_all(line.as_bytes())
                .and_then(|_| self.writer.write_all(b"\n"))
                .map_err(|e| write_error(&self.path, e))?;
            self.written += 1;
        }
        Ok(())
    }

    /// Flushes and fsyncs, so a checkpoint may safely reference `written()`.
    pub fn sync(&mut self) -> Result<(), JobError> {
        self.writer.flush().map_err(|e| write_error(&self.path, e))?;
        self.writer
            .get_ref()
            .sync_data()
            .map_err(|e| write_error(&self.path, e))
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads back every finding in append order.
    pub fn read_all(&mut self) -> Result<Vec<Finding>, JobError> {
        self.sync()?;
        let file = File::open(&self.path).map_err(|e| read_error(&self.path, e))?;

        let mut findings = Vec::with_capacity(self.written as usize);
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| read_error(&self.path, e))?;
            if line.is_empty() {
                continue;
            }
            let finding = serde_json::from_str(&line).map_err(|e| {
                JobError::Corrupt(format!(
                    "result journal {} line {}: {}",
                    self.path.display(),
                    n + 1,
                    e
                ))
            })?;
            findings.push(finding);
        }
        Ok(findings)
    }

    /// Deletes a job's journal if there is one.
    pub fn remove(work_directory: &Path, job_id: &str) {
        let path = Self::path_for(work_directory, job_id);
        match std::fs::remove_file(&path) {
            Ok(()) => log::debug!("Removed result journal {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove result journal {}: {}", path.display(), e),
        }
    }
}

/// Byte length of the first `lines` complete lines of the file.
fn committed_length(path: &Path, lines: u64) -> Result<u64, JobError> {
    let file = File::open(path).map_err(|e| read_error(path, e))?;
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut length = 0u64;

    for _ in 0..lines {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| read_error(path, e))?;
        if n == 0 || buf.last() != Some(&b'\n') {
            return Err(JobError::Corrupt(format!(
                "result journal {} holds fewer than {} results",
                path.display(),
                lines
            )));
        }
        length += n as u64;
    }

    Ok(length)
}

fn write_error(path: &Path, source: std::io::Error) -> JobError {
    JobError::Storage(StorageError::WriteFile {
        path: path.to_path_buf(),
        source,
    })
}

fn read_error(path: &Path, source: std::io::Error) -> JobError {
    JobError::Storage(StorageError::ReadFile {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn finding(row: usize) -> Finding {
        Finding {
            sheet: "Sheet1".to_string(),
            row,
            email: format!("user{}@example.com", row),
        }
    }

    #[test]
    fn test_append_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let mut journal = ResultJournal::open(temp_dir.path(), "job-1", 0).unwrap();
        journal.append(&[finding(1), finding(2)]).unwrap();
        journal.append(&[finding(5)]).unwrap();

        assert_eq!(journal.written(), 3);
        assert_eq!(
            journal.read_all().unwrap(),
            vec![finding(1), finding(2), finding(5)]
        );
    }

    #[test]
    fn test_reopen_truncates_uncommitted_lines() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut journal = ResultJournal::open(temp_dir.path(), "job-2", 0).unwrap();
            journal
                .append(&[finding(1), finding(2), finding(3), finding(4)])
                .unwrap();
            journal.sync().unwrap();
        }

        let mut journal = ResultJournal::open(temp_dir.path(), "job-2", 2).unwrap();
        assert_eq!(journal.written(), 2);
        journal.append(&[finding(9)]).unwrap();
        assert_eq!(
            journal.read_all().unwrap(),
            vec![finding(1), finding(2), finding(9)]
        );
    }

    #[test]
    fn test_short_journal_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut journal = ResultJournal::open(temp_dir.path(), "job-3", 0).unwrap();
            journal.append(&[finding(1)]).unwrap();
            journal.sync().unwrap();
        }

        assert!(matches!(
            ResultJournal::open(temp_dir.path(), "job-3", 5),
            Err(JobError::Corrupt(_))
        ));
        assert!(matches!(
            ResultJournal::open(temp_dir.path(), "never-written", 1),
            Err(JobError::Corrupt(_))
        ));
    }

    #[test]
    fn test_remove() {
        let temp_dir = TempDir::new().unwrap();
        let journal = ResultJournal::open(temp_dir.path(), "job-4", 0).unwrap();
        let path = journal.path().to_path_buf();
        drop(journal);
        assert!(path.exists());

        ResultJournal::remove(temp_dir.path(), "job-4");
        assert!(!path.exists());
        // Removing twice is harmless.
        ResultJournal::remove(temp_dir.path(), "job-4");
    }
}
