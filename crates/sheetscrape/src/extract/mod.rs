//! The per-row unit of work a job runs.
//!
//! The worker hands every row of every selected sheet to a [`RowExtractor`]
//! and journals whatever it returns. [`EmailExtractor`] is the stock
//! implementation.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static RE_EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?)*\.[A-Za-z]{2,}").unwrap()
});

/// Raised by an extractor; fails the job with the message as diagnostic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ExtractionError {
    pub message: String,
}

impl ExtractionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One row handed to an extractor.
#[derive(Debug, Clone, Copy)]
pub struct RowContext<'a> {
    pub sheet_name: &'a str,
    /// Position of the sheet in the workbook.
    pub sheet_index: usize,
    /// 0-based row position within the sheet.
    pub row_index: usize,
    pub cells: &'a [String],
}

pub trait RowExtractor: Send + Sync {
    /// Returns the findings of one row, in the order they should be written.
    fn extract(&self, row: &RowContext<'_>) -> Result<Vec<String>, ExtractionError>;
}

/// Finds e-mail addresses in every cell of a row.
///
/// Addresses are lowercased and reported once per row, in first-seen order.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmailExtractor;

impl EmailExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl RowExtractor for EmailExtractor {
    fn extract(&self, row: &RowContext<'_>) -> Result<Vec<String>, ExtractionError> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for cell in row.cells {
            for m in RE_EMAIL.find_iter(cell) {
                let email = m
                    .as_str()
                    .trim_matches(|c: char| c == '.' || c == '-')
                    .to_lowercase();
                if seen.insert(email.clone()) {
                    found.push(email);
                }
            }
        }
        Ok(found)
    }
}
