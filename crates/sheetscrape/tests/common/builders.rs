//! Workbook fixtures built programmatically.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use sheetscrape::spreadsheet::{Row, SheetData};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

fn row(cells: &[&str]) -> Row {
    cells.iter().map(|c| c.to_string()).collect()
}

/// Three sheets: `Contacts`, `Notes` and `Vendors`.
///
/// `Notes` holds one address that must not show up when only sheets 0 and
/// 2 are selected.
pub fn report_workbook() -> Vec<SheetData> {
    vec![
        SheetData::new(
            "Contacts",
            vec![
                row(&["name", "contact"]),
                row(&["Ada", "ada@example.com"]),
                row(&["Grace", "Grace.Hopper@Navy.mil, grace@example.com"]),
                row(&["Linus", "no address"]),
            ],
        ),
        SheetData::new(
            "Notes",
            vec![row(&["note"]), row(&["ping hidden@notes.org later"])],
        ),
        SheetData::new(
            "Vendors",
            vec![
                row(&["vendor", "sales", "support"]),
                row(&["Acme", "sales@acme.io", "help@acme.io"]),
                row(&["Initech", "", "sales@acme.io"]),
            ],
        ),
    ]
}

/// Expected output rows of `report_workbook()` with sheets `[0, 2]`.
pub fn report_expected_output() -> Vec<Row> {
    vec![
        row(&["sheet", "row", "email"]),
        row(&["Contacts", "2", "ada@example.com"]),
        row(&["Contacts", "3", "grace.hopper@navy.mil"]),
        row(&["Contacts", "3", "grace@example.com"]),
        row(&["Vendors", "2", "sales@acme.io"]),
        row(&["Vendors", "2", "help@acme.io"]),
        row(&["Vendors", "3", "sales@acme.io"]),
    ]
}

/// A sheet of `rows` rows where every `every`th row carries an address.
pub fn numbered_sheet(name: &str, rows: usize, every: usize) -> SheetData {
    let data = (0..rows)
        .map(|i| {
            if every > 0 && i % every == 0 {
                vec![format!("row {}", i), format!("user{}@{}.example", i, name.to_lowercase())]
            } else {
                vec![format!("row {}", i), String::new()]
            }
        })
        .collect();
    SheetData::new(name, data)
}

/// Two sheets of `rows` rows each, an address on every row.
pub fn long_workbook(rows: usize) -> Vec<SheetData> {
    vec![numbered_sheet("First", rows, 1), numbered_sheet("Second", rows, 1)]
}

/// A one-sheet workbook (`Data`) whose worksheet part is `sheet_xml` verbatim.
pub fn raw_workbook(sheet_xml: &str) -> Vec<u8> {
    let parts = [
        (
            "xl/workbook.xml",
            r#"<workbook><sheets><sheet name="Data" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
        ),
        (
            "xl/_rels/workbook.xml.rels",
            r#"<Relationships><Relationship Id="rId1" Target="worksheets/sheet1.xml"/></Relationships>"#,
        ),
        ("xl/worksheets/sheet1.xml", sheet_xml),
    ];

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in parts {
        zip.start_file(name, SimpleFileOptions::default())
            .expect("Failed to start zip entry");
        zip.write_all(body.as_bytes())
            .expect("Failed to write zip entry");
    }
    zip.finish().expect("Failed to finish workbook").into_inner()
}
