//! Minimal OOXML spreadsheet codec.
//!
//! A workbook is an ordered list of named sheets, each an ordered list of
//! rows of cell strings. Only what the extraction jobs need is supported:
//! reading cell values (shared, inline, numeric, boolean, formula results)
//! and writing inline-string workbooks.

pub mod reader;
pub mod writer;

pub use reader::Workbook;
pub use writer::{write_workbook, SheetData};

/// Row of cell values; missing cells inside a row are empty strings.
pub type Row = Vec<String>;

/// Converts a zero-based column index to spreadsheet letters (0 -> "A", 27 -> "AB").
pub fn column_name(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push((b'A' + (index % 26) as u8) as char);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.iter().rev().collect()
}

/// Widest sheet the xlsx format allows (column XFD).
pub const MAX_COLUMNS: usize = 16_384;

/// Tallest sheet the xlsx format allows.
pub const MAX_ROWS: usize = 1_048_576;

/// Parses the column part of a cell reference ("AB12" -> 27).
///
/// Returns `None` when there are no letters or the column lies past
/// [`MAX_COLUMNS`].
pub fn column_index(cell_ref: &str) -> Option<usize> {
    let mut index = 0usize;
    let mut seen = false;
    for c in cell_ref.chars().take_while(|c| c.is_ascii_alphabetic()) {
        let digit = c.to_ascii_uppercase() as usize - 'A' as usize + 1;
        index = index.checked_mul(26)?.checked_add(digit)?;
        if index > MAX_COLUMNS {
            return None;
        }
        seen = true;
    }
    if seen {
        Some(index - 1)
    } else {
        None
    }
}
