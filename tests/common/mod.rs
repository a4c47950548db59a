#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use rust_xlsxwriter::Workbook;
use sheetdiff::table::{Cell, Table};
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents).expect("write temp file contents");
        path
    }
}

/// Builds a table from string literals; empty strings become nulls.
pub fn table(columns: &[&str], rows: &[&[&str]]) -> Table {
    Table::from_rows(
        columns.iter().map(|c| c.to_string()).collect(),
        rows.iter()
            .map(|row| row.iter().map(|value| Cell::from_raw(value)).collect())
            .collect(),
    )
    .expect("valid table")
}

/// Renders a table as CSV text with a header row.
pub fn csv_text(columns: &[&str], rows: &[&[&str]]) -> String {
    let mut text = columns.join(",");
    text.push('\n');
    for row in rows {
        text.push_str(&row.join(","));
        text.push('\n');
    }
    text
}

/// Builds an xlsx workbook with one worksheet per `(name, rows)` entry. The
/// first row of each sheet is its header.
pub fn xlsx_bytes(sheets: &[(&str, &[&[&str]])]) -> Vec<u8> {
    let mut workbook = Workbook::new();
    for (name, rows) in sheets {
        let sheet = workbook.add_worksheet();
        sheet.set_name(*name).expect("sheet name");
        for (row_idx, row) in rows.iter().enumerate() {
            for (col_idx, value) in row.iter().enumerate() {
                if value.is_empty() {
                    continue;
                }
                if let Ok(number) = value.parse::<f64>() {
                    sheet
                        .write_number(row_idx as u32, col_idx as u16, number)
                        .expect("write number");
                } else {
                    sheet
                        .write_string(row_idx as u32, col_idx as u16, *value)
                        .expect("write string");
                }
            }
        }
    }
    workbook.save_to_buffer().expect("serialize workbook")
}

/// Column values of `column` in row order, nulls rendered as empty strings.
pub fn column_values(table: &Table, column: &str) -> Vec<String> {
    (0..table.row_count())
        .map(|row| {
            table
                .get(row, column)
                .map(|cell| cell.display().to_string())
                .unwrap_or_default()
        })
        .collect()
}
