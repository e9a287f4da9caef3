use std::io::{Cursor, Write};

use quick_xml::escape::escape;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{column_name, Row};
use crate::error::SpreadsheetError;

const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const PKG_REL_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

/// One sheet to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetData {
    pub name: String,
    pub rows: Vec<Row>,
}

impl SheetData {
    pub fn new(name: impl Into<String>, rows: Vec<Row>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }
}

/// Serializes sheets into an xlsx archive.
///
/// Entries carry a fixed timestamp, so the same sheets always produce the
/// same bytes.
pub fn write_workbook(sheets: &[SheetData]) -> Result<Vec<u8>, SpreadsheetError> {
    if sheets.is_empty() {
        return Err(SpreadsheetError::Write(
            "a workbook needs at least one sheet".to_string(),
        ));
    }

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    let mut put = |name: &str, body: String| -> Result<(), SpreadsheetError> {
        zip.start_file(name, options)
            .map_err(|e| SpreadsheetError::Write(format!("{}: {}", name, e)))?;
        zip.write_all(body.as_bytes())
            .map_err(|e| SpreadsheetError::Write(format!("{}: {}", name, e)))
    };

    put("[Content_Types].xml", content_types(sheets.len()))?;
    put("_rels/.rels", root_rels())?;
    put("xl/workbook.xml", workbook_xml(sheets))?;
    put("xl/_rels/workbook.xml.rels", workbook_rels(sheets.len()))?;
    for (i, sheet) in sheets.iter().enumerate() {
        put(
            &format!("xl/worksheets/sheet{}.xml", i + 1),
            worksheet_xml(&sheet.rows),
        )?;
    }

    let cursor = zip
        .finish()
        .map_err(|e| SpreadsheetError::Write(e.to_string()))?;
    Ok(cursor.into_inner())
}

fn content_types(sheet_count: usize) -> String {
    let mut xml = String::from(XML_DECL);
    xml.push_str(
        r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
    );
    xml.push_str(r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#);
    xml.push_str(r#"<Default Extension="xml" ContentType="application/xml"/>"#);
    xml.push_str(r#"<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#);
    for n in 1..=sheet_count {
        xml.push_str(&format!(
            r#"<Override PartName="/xl/worksheets/sheet{}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
            n
        ));
    }
    xml.push_str("</Types>");
    xml
}

fn root_rels() -> String {
    format!(
        r#"{}<Relationships xmlns="{}"><Relationship Id="rId1" Type="{}/officeDocument" Target="xl/workbook.xml"/></Relationships>"#,
        XML_DECL, PKG_REL_NS, REL_NS
    )
}

fn workbook_xml(sheets: &[SheetData]) -> String {
    let mut xml = format!(
        r#"{}<workbook xmlns="{}" xmlns:r="{}"><sheets>"#,
        XML_DECL, MAIN_NS, REL_NS
    );
    for (i, sheet) in sheets.iter().enumerate() {
        xml.push_str(&format!(
            r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
            escape(sheet.name.as_str()),
            i + 1,
            i + 1
        ));
    }
    xml.push_str("</sheets></workbook>");
    xml
}

fn workbook_rels(sheet_count: usize) -> String {
    let mut xml = format!(r#"{}<Relationships xmlns="{}">"#, XML_DECL, PKG_REL_NS);
    for n in 1..=sheet_count {
        xml.push_str(&format!(
            r#"<Relationship Id="rId{n}" Type="{}/worksheet" Target="worksheets/sheet{n}.xml"/>"#,
            REL_NS
        ));
    }
    xml.push_str("</Relationships>");
    xml
}

fn worksheet_xml(rows: &[Row]) -> String {
    let mut xml = format!(r#"{}<worksheet xmlns="{}">"#, XML_DECL, MAIN_NS);
    if rows.is_empty() {
        xml.push_str("<sheetData/>");
    } else {
        xml.push_str("<sheetData>");
        for (r, row) in rows.iter().enumerate() {
            xml.push_str(&format!(r#"<row r="{}">"#, r + 1));
            for (c, value) in row.iter().enumerate() {
                if value.is_empty() {
                    continue;
                }
                xml.push_str(&format!(
                    r#"<c r="{}{}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
                    column_name(c),
                    r + 1,
                    escape(value.as_str())
                ));
            }
            xml.push_str("</row>");
        }
        xml.push_str("</sheetData>");
    }
    xml.push_str("</worksheet>");
    xml
}
