//! Alignment engine: joins two tables on their `equals` conditions and
//! filters the aligned rows with the remaining conditions.
//!
//! Two independent entry points share the primitives in this module:
//!
//! - [`run_diff`] computes a final result. Every `equals` condition forms one
//!   multi-column key, both sides are aligned with a single full outer hash
//!   join, the requested [`DiffMode`] selects which existence partition
//!   survives, and refinements filter the intersection.
//! - [`diff_stats`] replays the conditions in the order they were authored
//!   and records how many rows survive each step, starting from an inner join
//!   on the first `equals` condition.
//!
//! Output columns are the left columns followed by the right columns. A name
//! present on both sides is renamed `<name>_A` / `<name>_B`; the rename is
//! recorded in a [`ColumnMap`] so conditions can name either the original
//! column of a side or the output column directly.

use std::collections::{HashMap, HashSet};

use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    condition::{self, Condition, DiffMode},
    error::{EngineError, EngineResult, Side},
    table::{Cell, Table},
};

/// Existence tag of an aligned row; never leaves the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Both,
    LeftOnly,
    RightOnly,
}

impl DiffMode {
    pub fn keeps(self, presence: Presence) -> bool {
        matches!(
            (self, presence),
            (DiffMode::Intersection, Presence::Both)
                | (DiffMode::DifferenceA, Presence::LeftOnly)
                | (DiffMode::DifferenceB, Presence::RightOnly)
        )
    }
}

/// Bijective mapping from (side, source column) to output column position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    left: HashMap<String, usize>,
    right: HashMap<String, usize>,
}

impl ColumnMap {
    /// Builds the output header for `left` ++ `right`, suffixing collisions.
    fn build(left: &[String], right: &[String]) -> (Vec<String>, Self) {
        let left_names: HashSet<&str> = left.iter().map(String::as_str).collect();
        let right_names: HashSet<&str> = right.iter().map(String::as_str).collect();
        let mut used: HashSet<String> = left_names
            .symmetric_difference(&right_names)
            .map(|name| name.to_string())
            .collect();

        let mut headers = Vec::with_capacity(left.len() + right.len());
        let mut map = Self::default();
        for (side, names, other) in [
            (Side::Left, left, &right_names),
            (Side::Right, right, &left_names),
        ] {
            for name in names {
                let output = if other.contains(name.as_str()) {
                    let base = format!("{name}{}", side.suffix());
                    let mut candidate = base.clone();
                    let mut counter = 2usize;
                    while used.contains(&candidate) {
                        candidate = format!("{base}{counter}");
                        counter += 1;
                    }
                    used.insert(candidate.clone());
                    candidate
                } else {
                    name.clone()
                };
                map.side_mut(side).insert(name.clone(), headers.len());
                headers.push(output);
            }
        }
        (headers, map)
    }

    fn side_mut(&mut self, side: Side) -> &mut HashMap<String, usize> {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    pub fn output_index(&self, side: Side, source_column: &str) -> Option<usize> {
        match side {
            Side::Left => self.left.get(source_column).copied(),
            Side::Right => self.right.get(source_column).copied(),
        }
    }
}

/// Aligned rows with their existence tags and the column rename map.
#[derive(Debug, Clone)]
pub struct AlignedTable {
    table: Table,
    presence: Vec<Presence>,
    columns: ColumnMap,
}

impl AlignedTable {
    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn presence(&self) -> &[Presence] {
        &self.presence
    }

    pub fn column_map(&self) -> &ColumnMap {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.table.row_count()
    }

    /// Resolves a condition column: the side's own (possibly renamed) column
    /// first, then an output column of that exact name.
    pub fn resolve(&self, side: Side, column: &str) -> Option<usize> {
        self.columns
            .output_index(side, column)
            .or_else(|| self.table.column_index(column))
    }

    /// Drops the existence tags.
    pub fn into_table(self) -> Table {
        self.table
    }

    fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&[Cell]) -> bool,
    {
        let flags = self
            .table
            .rows()
            .iter()
            .map(|row| keep(row))
            .collect::<Vec<_>>();
        let mut flag_iter = flags.iter();
        self.presence.retain(|_| *flag_iter.next().unwrap_or(&false));
        let mut flag_iter = flags.iter();
        self.table
            .retain_rows(|_| *flag_iter.next().unwrap_or(&false));
    }

    /// Keeps rows satisfying `condition`. Returns the surviving row count, or
    /// `None` when either column cannot be resolved (nothing is filtered).
    pub fn apply(&mut self, condition: &Condition) -> Option<usize> {
        let left = self.resolve(Side::Left, &condition.left_column)?;
        let right = self.resolve(Side::Right, &condition.right_column)?;
        let operator = condition.operator;
        self.retain(|row| operator.evaluate(&row[left], &row[right]));
        Some(self.row_count())
    }
}

/// Column positions of one `equals` condition in the left and right table.
pub type KeyColumns = (usize, usize);

fn key_columns(left: &Table, right: &Table, condition: &Condition) -> EngineResult<KeyColumns> {
    let left_idx = left.column_index(&condition.left_column).ok_or_else(|| {
        EngineError::MissingKeyColumn {
            column: condition.left_column.clone(),
            side: Side::Left,
        }
    })?;
    let right_idx = right.column_index(&condition.right_column).ok_or_else(|| {
        EngineError::MissingKeyColumn {
            column: condition.right_column.clone(),
            side: Side::Right,
        }
    })?;
    Ok((left_idx, right_idx))
}

fn row_key<'a>(row: &'a [Cell], columns: &[usize]) -> Vec<Option<&'a str>> {
    columns
        .iter()
        .map(|&idx| row[idx].comparison_key())
        .collect()
}

/// Copies a source row, replacing key cells with their normalized form.
fn normalized_row(row: &[Cell], key_columns: &[usize]) -> Vec<Cell> {
    let mut cells = row.to_vec();
    for &idx in key_columns {
        cells[idx] = Cell::from(row[idx].comparison_key());
    }
    cells
}

/// Full outer hash join of `left` and `right` on `keys`, materializing only
/// rows whose existence tag passes `include`.
///
/// Left rows come first in their original order, each followed by its
/// matches in right order; unmatched right rows follow in right order.
pub fn align<F>(
    left: &Table,
    right: &Table,
    keys: &[KeyColumns],
    include: F,
) -> EngineResult<AlignedTable>
where
    F: Fn(Presence) -> bool,
{
    let (headers, columns) = ColumnMap::build(left.columns(), right.columns());
    let mut table = Table::new(headers)?;
    let mut presence = Vec::new();

    let left_keys = keys.iter().map(|(l, _)| *l).collect::<Vec<_>>();
    let right_keys = keys.iter().map(|(_, r)| *r).collect::<Vec<_>>();

    let mut lookup: HashMap<Vec<Option<&str>>, Vec<usize>> = HashMap::new();
    for (idx, row) in right.rows().iter().enumerate() {
        lookup.entry(row_key(row, &right_keys)).or_default().push(idx);
    }

    let mut matched = vec![false; right.row_count()];
    let right_nulls = vec![Cell::Null; right.column_count()];
    let left_nulls = vec![Cell::Null; left.column_count()];

    for left_row in left.rows() {
        match lookup.get(&row_key(left_row, &left_keys)) {
            Some(bucket) => {
                for &right_idx in bucket {
                    matched[right_idx] = true;
                    if include(Presence::Both) {
                        let mut cells = normalized_row(left_row, &left_keys);
                        cells.extend(normalized_row(&right.rows()[right_idx], &right_keys));
                        table.push_exact(cells);
                        presence.push(Presence::Both);
                    }
                }
            }
            None => {
                if include(Presence::LeftOnly) {
                    let mut cells = normalized_row(left_row, &left_keys);
                    cells.extend(right_nulls.iter().cloned());
                    table.push_exact(cells);
                    presence.push(Presence::LeftOnly);
                }
            }
        }
    }

    if include(Presence::RightOnly) {
        for (right_row, _) in right
            .rows()
            .iter()
            .zip(&matched)
            .filter(|(_, matched)| !**matched)
        {
            let mut cells = left_nulls.clone();
            cells.extend(normalized_row(right_row, &right_keys));
            table.push_exact(cells);
            presence.push(Presence::RightOnly);
        }
    }

    Ok(AlignedTable {
        table,
        presence,
        columns,
    })
}

/// Computes the final diff of `left` against `right`.
///
/// Fails with [`EngineError::NoJoinKey`] when no `equals` condition is given
/// and with [`EngineError::MissingKeyColumn`] when a key column is absent.
/// Refinement conditions only apply to [`DiffMode::Intersection`]; one whose
/// columns cannot be resolved is skipped.
pub fn run_diff(
    left: &Table,
    right: &Table,
    conditions: &[Condition],
    mode: DiffMode,
) -> EngineResult<AlignedTable> {
    let (equals, refinements) = condition::partition(conditions);
    if equals.is_empty() {
        return Err(EngineError::NoJoinKey);
    }
    let keys = equals
        .iter()
        .map(|condition| key_columns(left, right, condition))
        .collect::<EngineResult<Vec<_>>>()?;

    let mut aligned = align(left, right, &keys, |presence| mode.keeps(presence))?;
    debug!(
        "Aligned {} x {} row(s) on {} key column(s): {} row(s) in {mode}",
        left.row_count(),
        right.row_count(),
        keys.len(),
        aligned.row_count()
    );

    if mode == DiffMode::Intersection {
        for condition in refinements {
            match aligned.apply(condition) {
                Some(count) => debug!("Refinement '{condition}' kept {count} row(s)"),
                None => warn!("Skipping '{condition}': column not found in aligned table"),
            }
        }
    } else if !refinements.is_empty() {
        debug!(
            "Ignoring {} refinement condition(s) in {mode} mode",
            refinements.len()
        );
    }

    info!("Diff complete: {} row(s) in {mode}", aligned.row_count());
    Ok(aligned)
}

/// Running row counts, one per condition in authored order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffStats {
    pub steps: Vec<usize>,
    pub total: usize,
}

impl DiffStats {
    pub fn zeroed(conditions: usize) -> Self {
        Self {
            steps: vec![0; conditions],
            total: 0,
        }
    }
}

/// Replays `conditions` in authored order and records the surviving row
/// count after each one. Never fails: unresolvable steps count as zero.
pub fn diff_stats(left: &Table, right: &Table, conditions: &[Condition]) -> DiffStats {
    let mut current: Option<AlignedTable> = None;
    let mut steps = Vec::with_capacity(conditions.len());

    for condition in conditions {
        let count = if let Some(aligned) = current.as_mut() {
            aligned.apply(condition).unwrap_or_else(|| {
                warn!("Statistics step '{condition}': column not found");
                0
            })
        } else if condition.operator.is_equality() {
            match key_columns(left, right, condition)
                .and_then(|key| align(left, right, &[key], |presence| presence == Presence::Both))
            {
                Ok(joined) => {
                    let count = joined.row_count();
                    current = Some(joined);
                    count
                }
                Err(err) => {
                    warn!("Statistics step '{condition}': {err}");
                    0
                }
            }
        } else {
            0
        };
        debug!("Statistics step '{condition}': {count} row(s)");
        steps.push(count);
    }

    let total = current.as_ref().map_or(0, AlignedTable::row_count);
    DiffStats { steps, total }
}
