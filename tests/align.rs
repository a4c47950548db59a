mod common;

use common::{column_values, table};
use proptest::prelude::*;
use sheetdiff::{
    DiffMode, EngineError, Operator,
    align::{Presence, run_diff},
    condition::Condition,
    error::Side,
    table::{Cell, Table},
};

fn scenario() -> (Table, Table) {
    (
        table(&["id", "name"], &[&["1", "x"], &["2", "y"]]),
        table(&["id", "name"], &[&["1", "x"], &["3", "z"]]),
    )
}

#[test]
fn modes_split_rows_by_key_presence() {
    let (a, b) = scenario();
    let conditions = [Condition::equals("id", "id")];

    let both = run_diff(&a, &b, &conditions, DiffMode::Intersection).unwrap();
    assert_eq!(
        both.table().columns(),
        &["id_A", "name_A", "id_B", "name_B"]
    );
    assert_eq!(column_values(both.table(), "id_A"), vec!["1"]);
    assert_eq!(column_values(both.table(), "id_B"), vec!["1"]);

    let only_a = run_diff(&a, &b, &conditions, DiffMode::DifferenceA).unwrap();
    assert_eq!(column_values(only_a.table(), "id_A"), vec!["2"]);
    assert_eq!(column_values(only_a.table(), "id_B"), vec![""]);
    assert_eq!(only_a.presence(), &[Presence::LeftOnly]);

    let only_b = run_diff(&a, &b, &conditions, DiffMode::DifferenceB).unwrap();
    assert_eq!(column_values(only_b.table(), "id_B"), vec!["3"]);
    assert_eq!(column_values(only_b.table(), "name_A"), vec![""]);
}

#[test]
fn keys_match_after_trimming_and_decimal_folding() {
    let a = table(&["code", "qty"], &[&[" 12 ", "1"], &["7.50", "2"]]);
    let b = table(&["ref", "amount"], &[&["12.0", "5"], &["7.5", "6"]]);
    let result = run_diff(
        &a,
        &b,
        &[Condition::equals("code", "ref")],
        DiffMode::Intersection,
    )
    .unwrap();
    assert_eq!(result.row_count(), 1);
    assert_eq!(column_values(result.table(), "code"), vec!["12"]);
    assert_eq!(column_values(result.table(), "ref"), vec!["12"]);
}

#[test]
fn duplicate_keys_produce_every_pair() {
    let a = table(&["k", "v"], &[&["1", "a1"], &["1", "a2"], &["2", "a3"]]);
    let b = table(&["k", "w"], &[&["1", "b1"], &["1", "b2"], &["1", "b3"]]);
    let result = run_diff(&a, &b, &[Condition::equals("k", "k")], DiffMode::Intersection).unwrap();
    assert_eq!(result.row_count(), 6);
    assert_eq!(
        column_values(result.table(), "w"),
        vec!["b1", "b2", "b3", "b1", "b2", "b3"]
    );
}

#[test]
fn composite_keys_require_every_column_to_match() {
    let a = table(&["id", "region"], &[&["1", "north"], &["1", "south"]]);
    let b = table(&["id", "area"], &[&["1", "south"], &["2", "north"]]);
    let conditions = [Condition::equals("id", "id"), Condition::equals("region", "area")];
    let result = run_diff(&a, &b, &conditions, DiffMode::Intersection).unwrap();
    assert_eq!(result.row_count(), 1);
    assert_eq!(column_values(result.table(), "region"), vec!["south"]);
}

#[test]
fn refinements_filter_the_intersection() {
    let a = table(
        &["id", "status", "title"],
        &[&["1", "open", "Quarterly report"], &["2", "closed", "Budget"], &["3", "open", "Plan"]],
    );
    let b = table(
        &["id", "status", "keyword"],
        &[&["1", "open", "report"], &["2", "open", "Budget"], &["3", "open", "draft"]],
    );

    let changed = run_diff(
        &a,
        &b,
        &[
            Condition::equals("id", "id"),
            Condition::new("status", Operator::NotEquals, "status"),
        ],
        DiffMode::Intersection,
    )
    .unwrap();
    assert_eq!(column_values(changed.table(), "id_A"), vec!["2"]);

    let mentions = run_diff(
        &a,
        &b,
        &[
            Condition::new("title", Operator::Contains, "keyword"),
            Condition::equals("id", "id"),
        ],
        DiffMode::Intersection,
    )
    .unwrap();
    assert_eq!(column_values(mentions.table(), "id_A"), vec!["1", "2"]);

    let missing = run_diff(
        &a,
        &b,
        &[
            Condition::equals("id", "id"),
            Condition::new("title", Operator::NotContains, "keyword"),
        ],
        DiffMode::Intersection,
    )
    .unwrap();
    assert_eq!(column_values(missing.table(), "id_A"), vec!["3"]);
}

#[test]
fn refinements_are_ignored_outside_intersection() {
    let (a, b) = scenario();
    let result = run_diff(
        &a,
        &b,
        &[
            Condition::equals("id", "id"),
            Condition::new("name", Operator::Contains, "name"),
        ],
        DiffMode::DifferenceA,
    )
    .unwrap();
    assert_eq!(result.row_count(), 1);
}

#[test]
fn unresolvable_refinement_is_skipped() {
    let (a, b) = scenario();
    let result = run_diff(
        &a,
        &b,
        &[
            Condition::equals("id", "id"),
            Condition::new("nope", Operator::NotEquals, "name"),
        ],
        DiffMode::Intersection,
    )
    .unwrap();
    assert_eq!(result.row_count(), 1);
}

#[test]
fn diff_without_equality_condition_fails() {
    let (a, b) = scenario();
    let err = run_diff(
        &a,
        &b,
        &[Condition::new("name", Operator::Contains, "name")],
        DiffMode::Intersection,
    )
    .unwrap_err();
    assert!(matches!(err, EngineError::NoJoinKey));
    assert!(matches!(
        run_diff(&a, &b, &[], DiffMode::Intersection),
        Err(EngineError::NoJoinKey)
    ));
}

#[test]
fn missing_key_column_names_the_side() {
    let (a, b) = scenario();
    let err = run_diff(
        &a,
        &b,
        &[Condition::equals("id", "identifier")],
        DiffMode::Intersection,
    )
    .unwrap_err();
    match err {
        EngineError::MissingKeyColumn { column, side } => {
            assert_eq!(column, "identifier");
            assert_eq!(side, Side::Right);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn null_keys_align_with_null_keys() {
    let a = table(&["k", "v"], &[&["", "a"]]);
    let b = table(&["k", "w"], &[&["", "b"], &["1", "c"]]);
    let result = run_diff(&a, &b, &[Condition::equals("k", "k")], DiffMode::Intersection).unwrap();
    assert_eq!(result.row_count(), 1);
    assert_eq!(result.table().rows()[0][0], Cell::Null);
}

fn keys_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(0u8..6, 0..12)
}

fn key_table(keys: &[u8]) -> Table {
    Table::from_rows(
        vec!["k".to_string(), "row".to_string()],
        keys.iter()
            .enumerate()
            .map(|(idx, key)| vec![Cell::Text(key.to_string()), Cell::Text(idx.to_string())])
            .collect(),
    )
    .unwrap()
}

proptest! {
    #[test]
    fn intersection_counts_equal_key_pairs(left in keys_strategy(), right in keys_strategy()) {
        let a = key_table(&left);
        let b = key_table(&right);
        let result =
            run_diff(&a, &b, &[Condition::equals("k", "k")], DiffMode::Intersection).unwrap();
        let expected = left
            .iter()
            .map(|l| right.iter().filter(|r| *r == l).count())
            .sum::<usize>();
        prop_assert_eq!(result.row_count(), expected);
    }

    #[test]
    fn modes_partition_both_sources(left in keys_strategy(), right in keys_strategy()) {
        let a = key_table(&left);
        let b = key_table(&right);
        let conditions = [Condition::equals("k", "k")];
        let only_a = run_diff(&a, &b, &conditions, DiffMode::DifferenceA).unwrap();
        let only_b = run_diff(&a, &b, &conditions, DiffMode::DifferenceB).unwrap();
        let both = run_diff(&a, &b, &conditions, DiffMode::Intersection).unwrap();

        let mut matched_a = column_values(both.table(), "row_A");
        matched_a.sort();
        matched_a.dedup();
        let mut matched_b = column_values(both.table(), "row_B");
        matched_b.sort();
        matched_b.dedup();

        prop_assert_eq!(only_a.row_count() + matched_a.len(), left.len());
        prop_assert_eq!(only_b.row_count() + matched_b.len(), right.len());
    }
}
