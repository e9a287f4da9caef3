use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesRef, BytesStart, Event};
use quick_xml::Reader;

use super::{column_index, Row, MAX_COLUMNS, MAX_ROWS};
use crate::error::SpreadsheetError;

struct SheetEntry {
    name: String,
    part: String,
}

/// An opened xlsx workbook. Holds a read-only handle on the file for as
/// long as it lives.
pub struct Workbook {
    path: PathBuf,
    archive: zip::ZipArchive<File>,
    sheets: Vec<SheetEntry>,
    names: Vec<String>,
    shared_strings: Vec<String>,
}

impl Workbook {
    pub fn open(path: &Path) -> Result<Self, SpreadsheetError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if extension == "xls" {
            return Err(SpreadsheetError::Unsupported(
                "legacy binary .xls workbooks cannot be read; re-save as .xlsx".to_string(),
            ));
        }

        let file = File::open(path).map_err(|e| SpreadsheetError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| SpreadsheetError::Archive(format!("{}: {}", path.display(), e)))?;

        let workbook_xml = read_part(&mut archive, "xl/workbook.xml")?.ok_or_else(|| {
            SpreadsheetError::Archive("missing xl/workbook.xml".to_string())
        })?;
        let declared = parse_workbook(&workbook_xml)?;

        let rels_xml = read_part(&mut archive, "xl/_rels/workbook.xml.rels")?
            .ok_or_else(|| {
                SpreadsheetError::Archive("missing xl/_rels/workbook.xml.rels".to_string())
            })?;
        let targets = parse_relationships(&rels_xml)?;

        let mut sheets = Vec::with_capacity(declared.len());
        for (name, rel_id) in declared {
            let target = targets.get(&rel_id).ok_or_else(|| {
                SpreadsheetError::Archive(format!(
                    "sheet '{}' references unknown relationship '{}'",
                    name, rel_id
                ))
            })?;
            sheets.push(SheetEntry {
                name,
                part: resolve_target(target),
            });
        }

        let shared_strings = match read_part(&mut archive, "xl/sharedStrings.xml")? {
            Some(xml) => parse_shared_strings(&xml)?,
            None => Vec::new(),
        };

        let names = sheets.iter().map(|s| s.name.clone()).collect();

        Ok(Self {
            path: path.to_path_buf(),
            archive,
            sheets,
            names,
            shared_strings,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sheet_names(&self) -> &[String] {
        &self.names
    }

    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    /// Reads every row of the sheet at `index` (workbook order).
    pub fn read_sheet(&mut self, index: usize) -> Result<Vec<Row>, SpreadsheetError> {
        let entry = self
            .sheets
            .get(index)
            .ok_or(SpreadsheetError::SheetOutOfRange {
                index,
                count: self.sheets.len(),
            })?;
        let part = entry.part.clone();

        let xml = read_part(&mut self.archive, &part)?
            .ok_or_else(|| SpreadsheetError::Archive(format!("missing {}", part)))?;
        parse_sheet(&xml, &part, &self.shared_strings)
    }
}

fn read_part<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, SpreadsheetError> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(SpreadsheetError::Archive(format!("{}: {}", name, e))),
    };

    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .map_err(|e| SpreadsheetError::Archive(format!("failed to read {}: {}", name, e)))?;
    Ok(Some(content))
}

fn xml_error(part: &str, reason: impl std::fmt::Display) -> SpreadsheetError {
    SpreadsheetError::Xml {
        part: part.to_string(),
        reason: reason.to_string(),
    }
}

fn attribute(e: &BytesStart<'_>, local: &[u8], part: &str) -> Result<Option<String>, SpreadsheetError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| xml_error(part, err))?;
        if attr.key.local_name().as_ref() == local {
            let value = attr.unescape_value().map_err(|err| xml_error(part, err))?;
            return Ok(Some(value.to_string()));
        }
    }
    Ok(None)
}

/// Appends the text of an entity or character reference.
fn push_reference(buf: &mut String, e: &BytesRef<'_>, part: &str) -> Result<(), SpreadsheetError> {
    if let Some(ch) = e.resolve_char_ref().map_err(|err| xml_error(part, err))? {
        buf.push(ch);
        return Ok(());
    }
    let name = e.decode().map_err(|err| xml_error(part, err))?;
    match quick_xml::escape::resolve_predefined_entity(&name) {
        Some(text) => buf.push_str(text),
        None => return Err(xml_error(part, format!("unknown entity &{};", name))),
    }
    Ok(())
}

/// Returns `(sheet name, relationship id)` pairs in workbook order.
fn parse_workbook(xml: &str) -> Result<Vec<(String, String)>, SpreadsheetError> {
    const PART: &str = "xl/workbook.xml";
    let mut reader = Reader::from_str(xml);
    let mut sheets = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) if e.local_name().as_ref() == b"sheet" => {
                let name = attribute(e, b"name", PART)?
                    .ok_or_else(|| xml_error(PART, "sheet without a name"))?;
                let rel_id = attribute(e, b"id", PART)?
                    .ok_or_else(|| xml_error(PART, format!("sheet '{}' without r:id", name)))?;
                sheets.push((name, rel_id));
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(PART, e)),
            _ => {}
        }
    }

    Ok(sheets)
}

fn parse_relationships(xml: &str) -> Result<HashMap<String, String>, SpreadsheetError> {
    const PART: &str = "xl/_rels/workbook.xml.rels";
    let mut reader = Reader::from_str(xml);
    let mut targets = HashMap::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) =
                    (attribute(e, b"Id", PART)?, attribute(e, b"Target", PART)?)
                {
                    targets.insert(id, target);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(PART, e)),
            _ => {}
        }
    }

    Ok(targets)
}

fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target.trim_start_matches("./")),
    }
}

fn parse_shared_strings(xml: &str) -> Result<Vec<String>, SpreadsheetError> {
    const PART: &str = "xl/sharedStrings.xml";
    let mut reader = Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    // Phonetic runs repeat the reading of the string and are not part of its value.
    let mut in_phonetic = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" if !in_phonetic => in_text = true,
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Ok(Event::Empty(ref e)) if e.local_name().as_ref() == b"si" => {
                strings.push(String::new());
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"si" => strings.push(std::mem::take(&mut current)),
                b"t" => in_text = false,
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            Ok(Event::Text(e)) if in_text => {
                let decoded = e.decode().map_err(|err| xml_error(PART, err))?;
                current.push_str(&decoded);
            }
            Ok(Event::GeneralRef(ref e)) if in_text => push_reference(&mut current, e, PART)?,
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(PART, e)),
            _ => {}
        }
    }

    Ok(strings)
}

#[derive(Default)]
struct CellState {
    column: usize,
    kind: Option<String>,
    value: String,
    inline: String,
}

fn parse_sheet(xml: &str, part: &str, shared: &[String]) -> Result<Vec<Row>, SpreadsheetError> {
    let mut reader = Reader::from_str(xml);
    let mut rows = Vec::new();
    let mut row: Option<Row> = None;
    let mut cell: Option<CellState> = None;
    let mut in_value = false;
    let mut in_inline_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"row" => {
                    pad_to_row(&mut rows, e, part)?;
                    row = Some(Vec::new());
                }
                b"c" => cell = Some(start_cell(e, part, row.as_ref())?),
                b"v" => in_value = cell.is_some(),
                b"t" => in_inline_text = cell.is_some(),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"row" => {
                    pad_to_row(&mut rows, e, part)?;
                    rows.push(Vec::new());
                }
                // A self-closing cell carries formatting only.
                b"c" => {}
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"row" => {
                    if let Some(done) = row.take() {
                        rows.push(done);
                    }
                }
                b"c" => {
                    if let (Some(done), Some(current_row)) = (cell.take(), row.as_mut()) {
                        let value = finish_cell(&done, part, shared)?;
                        if current_row.len() <= done.column {
                            current_row.resize(done.column + 1, String::new());
                        }
                        current_row[done.column] = value;
                    }
                }
                b"v" => in_value = false,
                b"t" => in_inline_text = false,
                _ => {}
            },
            Ok(Event::Text(e)) if in_value || in_inline_text => {
                let decoded = e.decode().map_err(|err| xml_error(part, err))?;
                if let Some(c) = cell.as_mut() {
                    if in_value {
                        c.value.push_str(&decoded);
                    } else {
                        c.inline.push_str(&decoded);
                    }
                }
            }
            Ok(Event::GeneralRef(ref e)) if in_value || in_inline_text => {
                if let Some(c) = cell.as_mut() {
                    let target = if in_value { &mut c.value } else { &mut c.inline };
                    push_reference(target, e, part)?;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(part, e)),
            _ => {}
        }
    }

    Ok(rows)
}

/// Inserts empty rows for any skipped before a `<row r="N">`.
fn pad_to_row(rows: &mut Vec<Row>, e: &BytesStart<'_>, part: &str) -> Result<(), SpreadsheetError> {
    if let Some(number) = attribute(e, b"r", part)? {
        let number: usize = number
            .trim()
            .parse()
            .map_err(|_| xml_error(part, format!("bad row number '{}'", number)))?;
        if number == 0 || number > MAX_ROWS {
            return Err(xml_error(part, format!("row number {} out of range", number)));
        }
        while rows.len() + 1 < number {
            rows.push(Vec::new());
        }
    }
    Ok(())
}

fn start_cell(e: &BytesStart<'_>, part: &str, row: Option<&Row>) -> Result<CellState, SpreadsheetError> {
    let column = match attribute(e, b"r", part)? {
        Some(reference) => column_index(&reference)
            .ok_or_else(|| xml_error(part, format!("bad cell reference '{}'", reference)))?,
        None => row.map(|r| r.len()).unwrap_or(0),
    };
    if column >= MAX_COLUMNS {
        return Err(xml_error(part, "too many cells in row"));
    }
    Ok(CellState {
        column,
        kind: attribute(e, b"t", part)?,
        ..Default::default()
    })
}

fn finish_cell(cell: &CellState, part: &str, shared: &[String]) -> Result<String, SpreadsheetError> {
    match cell.kind.as_deref() {
        Some("s") => {
            let index: usize = cell
                .value
                .trim()
                .parse()
                .map_err(|_| xml_error(part, format!("bad shared string index '{}'", cell.value)))?;
            shared.get(index).cloned().ok_or_else(|| {
                xml_error(part, format!("shared string {} out of range", index))
            })
        }
        Some("inlineStr") => Ok(cell.inline.clone()),
        Some("b") => Ok(if cell.value.trim() == "1" {
            "TRUE".to_string()
        } else {
            "FALSE".to_string()
        }),
        _ => Ok(cell.value.clone()),
    }
}
