use anyhow::{Context, Result};
use encoding_rs::Encoding;
use rust_xlsxwriter::{Format, Formula, Workbook};
use std::path::Path;

use crate::{
    error::EngineResult,
    io_utils,
    table::{Cell, Table},
};

/// Worksheet name used for exported diff results.
pub const RESULT_SHEET: &str = "diff_result";

/// Serializes `table` into an xlsx workbook with a bold header row.
/// Null cells are left blank. A row with no values at all gets `=""` in its
/// first cell, so readers that stop at the last non-empty cell still see it.
pub fn to_xlsx(table: &Table, sheet_name: &str) -> EngineResult<Vec<u8>> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    let sheet = workbook.add_worksheet();
    sheet.set_name(sheet_name)?;
    sheet.set_formula_result_default("");

    for (col, header) in table.columns().iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, header, &header_format)?;
    }
    for (row_idx, row) in table.rows().iter().enumerate() {
        let excel_row = (row_idx + 1) as u32;
        if !row.is_empty() && row.iter().all(Cell::is_null) {
            sheet.write_formula(excel_row, 0, Formula::new("=\"\""))?;
            continue;
        }
        for (col, cell) in row.iter().enumerate() {
            if let Some(text) = cell.as_text() {
                sheet.write_string(excel_row, col as u16, text)?;
            }
        }
    }

    Ok(workbook.save_to_buffer()?)
}

/// Writes `table` as delimited text to `path` (`-` for stdout).
pub fn write_delimited(
    table: &Table,
    path: &Path,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<()> {
    let mut writer = io_utils::open_csv_writer(Some(path), delimiter, encoding)?;
    writer
        .write_record(table.columns())
        .context("Writing header row")?;
    for row in table.rows() {
        writer
            .write_record(row.iter().map(|cell| cell.display()))
            .context("Writing data row")?;
    }
    writer.flush().context("Flushing delimited output")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SourceFormat, SourceParser};

    #[test]
    fn xlsx_export_parses_back_with_same_shape() {
        let table = Table::from_rows(
            vec!["id".into(), "name".into(), "note".into()],
            vec![
                vec![Cell::from("1"), Cell::from("x"), Cell::Null],
                vec![Cell::from("2"), Cell::Null, Cell::from("late")],
            ],
        )
        .unwrap();
        let bytes = to_xlsx(&table, RESULT_SHEET).unwrap();
        let parser = SourceParser::default();
        assert_eq!(
            parser.sheet_names(&bytes, SourceFormat::Xlsx).unwrap(),
            vec![RESULT_SHEET.to_string()]
        );
        let parsed = parser
            .parse(&bytes, SourceFormat::Xlsx, Some(RESULT_SHEET), None)
            .unwrap();
        assert_eq!(parsed, table);
    }

    #[test]
    fn all_null_rows_survive_the_xlsx_round_trip() {
        let table = Table::from_rows(
            vec!["id".into(), "v".into()],
            vec![
                vec![Cell::from("1"), Cell::from("a")],
                vec![Cell::Null, Cell::Null],
                vec![Cell::from("3"), Cell::Null],
                vec![Cell::Null, Cell::Null],
            ],
        )
        .unwrap();
        let bytes = to_xlsx(&table, RESULT_SHEET).unwrap();
        let parsed = SourceParser::default()
            .parse(&bytes, SourceFormat::Xlsx, Some(RESULT_SHEET), None)
            .unwrap();
        assert_eq!(parsed.row_count(), 4);
        assert_eq!(parsed, table);
    }
}
