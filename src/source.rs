//! Source parsing: raw upload bytes into [`Table`]s.
//!
//! Delimited text (csv, tsv) and JSON documents carry a single implicit sheet
//! named [`DEFAULT_SHEET`]; workbooks (xls, xlsx) are read with `calamine`
//! and expose one table per worksheet. Every format goes through the same
//! header normalization in [`crate::table::normalize_headers`], and every
//! scalar is coerced to text at ingestion so that numbers and dates from a
//! workbook compare equal to the same values typed into a CSV file.

use std::{collections::HashMap, fmt, io::Cursor, path::Path};

use calamine::{Data, DataType, Reader, Sheets, Xls, Xlsx};
use chrono::{NaiveDateTime, Timelike};
use encoding_rs::{Encoding, GBK};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    error::{EngineError, EngineResult},
    io_utils,
    table::{Cell, Table, normalize_headers},
};

/// Sheet name used by single-table formats.
pub const DEFAULT_SHEET: &str = "data";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    Tsv,
    Xls,
    Xlsx,
    Json,
}

impl SourceFormat {
    pub fn from_filename(filename: &str) -> EngineResult<Self> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "csv" | "txt" => Ok(SourceFormat::Csv),
            "tsv" | "tab" => Ok(SourceFormat::Tsv),
            "xls" => Ok(SourceFormat::Xls),
            "xlsx" | "xlsm" => Ok(SourceFormat::Xlsx),
            "json" | "jsonl" | "ndjson" => Ok(SourceFormat::Json),
            "" => Err(EngineError::format(format!(
                "File '{filename}' has no extension; expected csv, tsv, xls, xlsx or json"
            ))),
            other => Err(EngineError::format(format!(
                "Unsupported file extension '.{other}'"
            ))),
        }
    }

    pub fn is_workbook(self) -> bool {
        matches!(self, SourceFormat::Xls | SourceFormat::Xlsx)
    }

    fn delimiter(self) -> u8 {
        match self {
            SourceFormat::Tsv => io_utils::DEFAULT_TSV_DELIMITER,
            _ => io_utils::DEFAULT_CSV_DELIMITER,
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SourceFormat::Csv => "csv",
            SourceFormat::Tsv => "tsv",
            SourceFormat::Xls => "xls",
            SourceFormat::Xlsx => "xlsx",
            SourceFormat::Json => "json",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SourceParser {
    fallback_encoding: &'static Encoding,
}

impl Default for SourceParser {
    fn default() -> Self {
        Self {
            fallback_encoding: GBK,
        }
    }
}

impl SourceParser {
    pub fn new(fallback_encoding: &'static Encoding) -> Self {
        Self { fallback_encoding }
    }

    pub fn sheet_names(&self, bytes: &[u8], format: SourceFormat) -> EngineResult<Vec<String>> {
        if !format.is_workbook() {
            return Ok(vec![DEFAULT_SHEET.to_string()]);
        }
        let workbook = open_workbook(bytes, format)?;
        let names = workbook.sheet_names();
        if names.is_empty() {
            return Err(EngineError::format("Workbook has no worksheets"));
        }
        Ok(names)
    }

    /// Parses one sheet. `sheet` is ignored for single-table formats and
    /// defaults to the first worksheet of a workbook.
    pub fn parse(
        &self,
        bytes: &[u8],
        format: SourceFormat,
        sheet: Option<&str>,
        row_limit: Option<usize>,
    ) -> EngineResult<Table> {
        match format {
            SourceFormat::Csv | SourceFormat::Tsv => {
                self.parse_delimited(bytes, format.delimiter(), row_limit)
            }
            SourceFormat::Json => self.parse_json(bytes, row_limit),
            SourceFormat::Xls | SourceFormat::Xlsx => {
                let mut workbook = open_workbook(bytes, format)?;
                let name = match sheet {
                    Some(name) => name.to_string(),
                    None => workbook
                        .sheet_names()
                        .into_iter()
                        .next()
                        .ok_or_else(|| EngineError::format("Workbook has no worksheets"))?,
                };
                parse_worksheet(&mut workbook, &name, row_limit)
            }
        }
    }

    /// Parses every sheet of a source in sheet order.
    pub fn parse_all(
        &self,
        bytes: &[u8],
        format: SourceFormat,
    ) -> EngineResult<Vec<(String, Table)>> {
        if !format.is_workbook() {
            let table = self.parse(bytes, format, None, None)?;
            return Ok(vec![(DEFAULT_SHEET.to_string(), table)]);
        }
        let mut workbook = open_workbook(bytes, format)?;
        let names = workbook.sheet_names();
        if names.is_empty() {
            return Err(EngineError::format("Workbook has no worksheets"));
        }
        names
            .into_iter()
            .map(|name| {
                let table = parse_worksheet(&mut workbook, &name, None)?;
                Ok((name, table))
            })
            .collect()
    }

    fn parse_delimited(
        &self,
        bytes: &[u8],
        delimiter: u8,
        row_limit: Option<usize>,
    ) -> EngineResult<Table> {
        let text = io_utils::decode_with_fallback(bytes, self.fallback_encoding)?;
        let mut reader = io_utils::open_csv_reader(text.as_bytes(), delimiter);
        let mut records = reader.records();
        let headers = match records.next() {
            Some(record) => {
                record.map_err(|e| EngineError::format(format!("Reading header row: {e}")))?
            }
            None => return Err(EngineError::format("No columns to parse from file")),
        };
        let mut table = Table::new(normalize_headers(headers.iter()))?;
        for (row_idx, record) in records.enumerate() {
            if let Some(limit) = row_limit
                && row_idx >= limit
            {
                break;
            }
            let record = record
                .map_err(|e| EngineError::format(format!("Reading row {}: {e}", row_idx + 2)))?;
            table.push_row(record.iter().map(Cell::from_raw).collect())?;
        }
        debug!(
            "Parsed delimited text: {} column(s), {} row(s)",
            table.column_count(),
            table.row_count()
        );
        Ok(table)
    }

    fn parse_json(&self, bytes: &[u8], row_limit: Option<usize>) -> EngineResult<Table> {
        let text = io_utils::decode_with_fallback(bytes, self.fallback_encoding)?;
        let content = text.trim();
        let mut records = match serde_json::from_str::<JsonValue>(content) {
            Ok(JsonValue::Array(items)) => items,
            Ok(object @ JsonValue::Object(_)) => vec![object],
            Ok(_) => {
                return Err(EngineError::format(
                    "JSON document must be an array or an object",
                ));
            }
            Err(_) => {
                let lines = content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .filter_map(|line| serde_json::from_str::<JsonValue>(line).ok())
                    .collect::<Vec<_>>();
                if lines.is_empty() {
                    return Err(EngineError::format(
                        "Invalid JSON; expected an array, an object, or JSON Lines",
                    ));
                }
                lines
            }
        };
        if records.is_empty() {
            return Err(EngineError::format("No JSON records found"));
        }
        if let Some(limit) = row_limit {
            records.truncate(limit);
        }

        let mut keys: Vec<String> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut flattened_rows = Vec::with_capacity(records.len());
        for (idx, record) in records.iter().enumerate() {
            if !record.is_object() {
                return Err(EngineError::format(format!(
                    "JSON record {} is not an object",
                    idx + 1
                )));
            }
            let mut fields = Vec::new();
            flatten_json("", record, &mut fields);
            let mut row = Vec::with_capacity(fields.len());
            for (key, cell) in fields {
                let position = *positions.entry(key.clone()).or_insert_with(|| {
                    keys.push(key);
                    keys.len() - 1
                });
                row.push((position, cell));
            }
            flattened_rows.push(row);
        }

        let mut table = Table::new(normalize_headers(&keys))?;
        for fields in flattened_rows {
            let mut row = vec![Cell::Null; keys.len()];
            for (position, cell) in fields {
                row[position] = cell;
            }
            table.push_exact(row);
        }
        Ok(table)
    }
}

fn flatten_json(prefix: &str, value: &JsonValue, out: &mut Vec<(String, Cell)>) {
    match value {
        JsonValue::Object(map) => {
            for (key, nested) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_json(&path, nested, out);
            }
        }
        JsonValue::Null => out.push((prefix.to_string(), Cell::Null)),
        JsonValue::String(s) => out.push((prefix.to_string(), Cell::from_raw(s))),
        other => out.push((prefix.to_string(), Cell::Text(other.to_string()))),
    }
}

fn open_workbook(bytes: &[u8], format: SourceFormat) -> EngineResult<Sheets<Cursor<&[u8]>>> {
    let cursor = Cursor::new(bytes);
    match format {
        SourceFormat::Xls => Xls::new(cursor)
            .map(Sheets::Xls)
            .map_err(|e| EngineError::format(format!("Opening xls workbook: {e}"))),
        SourceFormat::Xlsx => Xlsx::new(cursor)
            .map(Sheets::Xlsx)
            .map_err(|e| EngineError::format(format!("Opening xlsx workbook: {e}"))),
        other => Err(EngineError::format(format!("'{other}' is not a workbook format"))),
    }
}

fn parse_worksheet(
    workbook: &mut Sheets<Cursor<&[u8]>>,
    sheet: &str,
    row_limit: Option<usize>,
) -> EngineResult<Table> {
    if !workbook.sheet_names().iter().any(|name| name == sheet) {
        return Err(EngineError::not_found("sheet", sheet));
    }
    let range = workbook
        .worksheet_range(sheet)
        .map_err(|e| EngineError::format(format!("Reading sheet '{sheet}': {e}")))?;
    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        return Ok(Table::default());
    };
    let headers = header_row.iter().map(|cell| match spreadsheet_cell(cell) {
        Cell::Text(text) => text,
        Cell::Null => String::new(),
    });
    let mut table = Table::new(normalize_headers(headers))?;
    // The used range ends at the last non-empty cell, so blank rows inside it
    // are kept as all-null rows.
    let data_rows = rows.map(|row| row.iter().map(spreadsheet_cell).collect::<Vec<_>>());
    for (row_idx, row) in data_rows.enumerate() {
        if let Some(limit) = row_limit
            && row_idx >= limit
        {
            break;
        }
        table.push_row(row)?;
    }
    debug!(
        "Parsed sheet '{sheet}': {} column(s), {} row(s)",
        table.column_count(),
        table.row_count()
    );
    Ok(table)
}

fn spreadsheet_cell(cell: &Data) -> Cell {
    match cell {
        Data::Empty | Data::Error(_) => Cell::Null,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::from_raw(s),
        Data::Int(i) => Cell::Text(i.to_string()),
        Data::Float(f) => Cell::Text(format_number(*f)),
        Data::Bool(b) => Cell::Text(b.to_string()),
        Data::DateTime(excel) => match cell.as_datetime() {
            Some(value) if !excel.is_duration() => Cell::Text(format_datetime(value)),
            _ => Cell::Text(format_number(excel.as_f64())),
        },
    }
}

/// Integral floats print without a fractional part so `3.0` matches `3`.
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        (value as i64).to_string()
    } else {
        value.to_string()
    }
}

fn format_datetime(value: NaiveDateTime) -> String {
    if value.time().num_seconds_from_midnight() == 0 && value.time().nanosecond() == 0 {
        value.format("%Y-%m-%d").to_string()
    } else {
        value.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_filename_is_case_insensitive() {
        assert_eq!(SourceFormat::from_filename("A.CSV").unwrap(), SourceFormat::Csv);
        assert_eq!(
            SourceFormat::from_filename("book.xlsm").unwrap(),
            SourceFormat::Xlsx
        );
        assert!(matches!(
            SourceFormat::from_filename("notes.docx"),
            Err(EngineError::Format(_))
        ));
        assert!(SourceFormat::from_filename("README").is_err());
    }

    #[test]
    fn format_number_drops_integral_fraction() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-12.0), "-12");
        assert_eq!(format_number(2.5), "2.5");
    }

    #[test]
    fn spreadsheet_cells_coerce_to_text() {
        assert_eq!(spreadsheet_cell(&Data::Int(7)), Cell::from("7"));
        assert_eq!(spreadsheet_cell(&Data::Float(7.0)), Cell::from("7"));
        assert_eq!(spreadsheet_cell(&Data::Bool(true)), Cell::from("true"));
        assert_eq!(spreadsheet_cell(&Data::String(String::new())), Cell::Null);
        assert_eq!(spreadsheet_cell(&Data::Empty), Cell::Null);
    }

    #[test]
    fn flatten_json_joins_nested_keys() {
        let value: JsonValue =
            serde_json::from_str(r#"{"a": {"b": 1, "c": null}, "d": [1, 2], "e": "x"}"#).unwrap();
        let mut fields = Vec::new();
        flatten_json("", &value, &mut fields);
        assert_eq!(
            fields,
            vec![
                ("a.b".to_string(), Cell::from("1")),
                ("a.c".to_string(), Cell::Null),
                ("d".to_string(), Cell::from("[1,2]")),
                ("e".to_string(), Cell::from("x")),
            ]
        );
    }

    #[test]
    fn flatten_json_treats_empty_strings_as_missing() {
        let value: JsonValue = serde_json::from_str(r#"{"id": "", "v": " "}"#).unwrap();
        let mut fields = Vec::new();
        flatten_json("", &value, &mut fields);
        assert_eq!(
            fields,
            vec![
                ("id".to_string(), Cell::Null),
                ("v".to_string(), Cell::from(" ")),
            ]
        );
    }
}
