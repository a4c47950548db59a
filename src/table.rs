//! In-memory table model shared by every parsed sheet and every diff result.
//!
//! A [`Table`] owns an ordered list of unique column names and rows of
//! [`Cell`]s. Every row holds exactly one cell per column; values that were
//! missing in the source are stored as [`Cell::Null`]. Tables are immutable
//! once published to a cache and are shared behind `Arc`.
//!
//! The module also renders tables as fixed-width text for the CLI.

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Text(String),
    Null,
}

impl Cell {
    /// Builds a cell from raw source text; empty text is a missing value.
    pub fn from_raw(value: &str) -> Self {
        if value.is_empty() {
            Cell::Null
        } else {
            Cell::Text(value.to_string())
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s.as_str()),
            Cell::Null => None,
        }
    }

    /// Comparison form of the cell: trimmed text, or `None` for null.
    pub fn normalized(&self) -> Option<&str> {
        self.as_text().map(str::trim)
    }

    /// Equality form: trimmed text with integral decimals folded, so `"12.0"`
    /// from one source matches `"12"` from another.
    pub fn comparison_key(&self) -> Option<&str> {
        self.normalized().map(fold_integral_decimal)
    }

    pub fn display(&self) -> &str {
        self.as_text().unwrap_or("")
    }

    fn estimated_bytes(&self) -> usize {
        std::mem::size_of::<Cell>() + self.as_text().map_or(0, str::len)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<Option<&str>> for Cell {
    fn from(value: Option<&str>) -> Self {
        value.map_or(Cell::Null, Cell::from)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> EngineResult<Self> {
        let mut seen = HashSet::with_capacity(columns.len());
        for name in &columns {
            if !seen.insert(name.as_str()) {
                return Err(EngineError::format(format!("Duplicate column '{name}'")));
            }
        }
        Ok(Self {
            columns,
            rows: Vec::new(),
        })
    }

    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> EngineResult<Self> {
        let mut table = Self::new(columns)?;
        table.rows.reserve(rows.len());
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Appends a row, padding missing trailing cells with nulls.
    pub fn push_row(&mut self, mut row: Vec<Cell>) -> EngineResult<()> {
        if row.len() > self.columns.len() {
            return Err(EngineError::format(format!(
                "Expected {} field(s) in row {}, saw {}",
                self.columns.len(),
                self.rows.len() + 1,
                row.len()
            )));
        }
        row.resize(self.columns.len(), Cell::Null);
        self.rows.push(row);
        Ok(())
    }

    /// Appends a row already built against this table's columns.
    pub(crate) fn push_exact(&mut self, row: Vec<Cell>) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
    }

    pub(crate) fn retain_rows<F>(&mut self, mut keep: F)
    where
        F: FnMut(&[Cell]) -> bool,
    {
        self.rows.retain(|row| keep(row));
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Looks up a cell by row position and column name.
    pub fn get(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|cells| cells.get(idx))
    }

    /// Rows in `range`, clamped to the table bounds.
    pub fn slice(&self, range: Range<usize>) -> &[Vec<Cell>] {
        let end = range.end.min(self.rows.len());
        let start = range.start.min(end);
        &self.rows[start..end]
    }

    pub fn preview(&self, limit: usize) -> TablePreview {
        TablePreview {
            headers: self.columns.clone(),
            rows: self.slice(0..limit).to_vec(),
        }
    }

    /// Approximate heap footprint, used for cache capacity accounting.
    pub fn estimated_bytes(&self) -> usize {
        let headers: usize = self.columns.iter().map(String::len).sum();
        let cells: usize = self
            .rows
            .iter()
            .map(|row| row.iter().map(Cell::estimated_bytes).sum::<usize>())
            .sum();
        headers + cells
    }
}

fn fold_integral_decimal(text: &str) -> &str {
    if let Some((integer, fraction)) = text.split_once('.')
        && !fraction.is_empty()
        && fraction.bytes().all(|b| b == b'0')
    {
        let digits = integer.strip_prefix(['-', '+']).unwrap_or(integer);
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            return integer;
        }
    }
    text
}

/// Headers plus a bounded prefix of rows, as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePreview {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

/// Trims and stringifies raw header cells into unique column names.
///
/// Blank headers become `Unnamed: <index>`; repeats of an earlier header get
/// `.1`, `.2`, ... appended.
pub fn normalize_headers<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut headers = Vec::new();
    for (idx, header) in raw.into_iter().enumerate() {
        let trimmed = header.as_ref().trim();
        let base = if trimmed.is_empty() {
            format!("Unnamed: {idx}")
        } else {
            trimmed.to_string()
        };
        let mut candidate = base.clone();
        let mut counter = 1usize;
        while seen.contains(&candidate) {
            candidate = format!("{base}.{counter}");
            counter += 1;
        }
        seen.insert(candidate.clone());
        headers.push(candidate);
    }
    headers
}

pub fn render_table(headers: &[String], rows: &[Vec<Cell>]) -> String {
    let column_count = headers.len();
    let mut widths = headers.iter().map(|h| display_width(h)).collect::<Vec<_>>();

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(display_width(cell.display()));
        }
    }

    for width in &mut widths {
        *width = (*width).max(1);
    }

    let mut output = String::new();

    let header_line = format_row(headers.iter().map(String::as_str), &widths);
    let _ = writeln!(output, "{header_line}");

    let separator_widths = widths.iter().map(|w| (*w).max(3)).collect::<Vec<usize>>();
    let separator_cells = separator_widths
        .iter()
        .map(|w| "-".repeat(*w))
        .collect::<Vec<_>>();
    let separator_line = format_row(separator_cells.iter().map(String::as_str), &separator_widths);
    let _ = writeln!(output, "{separator_line}");

    for row in rows {
        let row_line = format_row(row.iter().map(Cell::display), &widths);
        let _ = writeln!(output, "{row_line}");
    }

    output
}

pub fn print_table(headers: &[String], rows: &[Vec<Cell>]) {
    let rendered = render_table(headers, rows);
    print!("{rendered}");
}

fn format_row<'a, I>(values: I, widths: &[usize]) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut cells = Vec::with_capacity(widths.len());
    for (idx, value) in values.into_iter().enumerate() {
        if idx >= widths.len() {
            break;
        }
        let sanitized = sanitize_cell(value);
        let display = display_width(sanitized.as_ref());
        let mut cell = sanitized.into_owned();
        let padding = widths[idx].saturating_sub(display);
        if padding > 0 {
            cell.push_str(&" ".repeat(padding));
        }
        cells.push(cell);
    }
    let mut line = cells.join("  ");
    while line.ends_with(' ') {
        line.pop();
    }
    line
}

fn display_width(value: &str) -> usize {
    let mut width = 0usize;
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch == '\u{1b}' {
            // Skip ANSI escape sequence (e.g. \x1b[31m)
            for next in chars.by_ref() {
                if next == 'm' {
                    break;
                }
            }
        } else {
            width += 1;
        }
    }
    width
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(
            value
                .chars()
                .map(|ch| match ch {
                    '\n' | '\r' | '\t' => ' ',
                    other => other,
                })
                .collect(),
        )
    } else {
        Cow::Borrowed(value)
    }
}
