use std::{fmt, path::Path};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::table::Cell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
}

impl Operator {
    /// Evaluates `left <op> right` on the comparison form of both cells.
    ///
    /// Nulls are equal only to nulls; a null on either side never contains
    /// anything, so `NotContains` holds for it.
    pub fn evaluate(self, left: &Cell, right: &Cell) -> bool {
        match self {
            Operator::Equals => left.comparison_key() == right.comparison_key(),
            Operator::NotEquals => left.comparison_key() != right.comparison_key(),
            Operator::Contains => contains(left.normalized(), right.normalized()),
            Operator::NotContains => !contains(left.normalized(), right.normalized()),
        }
    }

    pub fn is_equality(self) -> bool {
        matches!(self, Operator::Equals)
    }

    fn symbol(self) -> &'static str {
        match self {
            Operator::Equals => "=",
            Operator::NotEquals => "!=",
            Operator::Contains => "contains",
            Operator::NotContains => "not contains",
        }
    }
}

fn contains(haystack: Option<&str>, needle: Option<&str>) -> bool {
    match (haystack, needle) {
        (Some(haystack), Some(needle)) => haystack.contains(needle),
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Condition {
    pub left_column: String,
    pub operator: Operator,
    pub right_column: String,
}

impl Condition {
    pub fn new(
        left_column: impl Into<String>,
        operator: Operator,
        right_column: impl Into<String>,
    ) -> Self {
        Self {
            left_column: left_column.into(),
            operator,
            right_column: right_column.into(),
        }
    }

    pub fn equals(left_column: impl Into<String>, right_column: impl Into<String>) -> Self {
        Self::new(left_column, Operator::Equals, right_column)
    }

    /// Parses `left=right`, `left!=right`, `left contains right` or
    /// `left not contains right` (keywords are case-insensitive).
    pub fn parse(expression: &str) -> Result<Self> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("Empty condition expression"));
        }

        let lowered = trimmed.to_ascii_lowercase();
        for (needle, operator) in [
            (" not contains ", Operator::NotContains),
            (" contains ", Operator::Contains),
        ] {
            if let Some(idx) = lowered.find(needle) {
                let left = trimmed[..idx].trim();
                let right = trimmed[idx + needle.len()..].trim();
                return Self::from_parts(trimmed, left, operator, right);
            }
        }

        for (needle, operator) in [("!=", Operator::NotEquals), ("=", Operator::Equals)] {
            if let Some(idx) = trimmed.find(needle) {
                let left = trimmed[..idx].trim();
                let right = trimmed[idx + needle.len()..].trim();
                return Self::from_parts(trimmed, left, operator, right);
            }
        }

        Err(anyhow!("Failed to parse condition '{trimmed}'"))
    }

    fn from_parts(expression: &str, left: &str, operator: Operator, right: &str) -> Result<Self> {
        let left = unquote(left);
        let right = unquote(right);
        if left.is_empty() || right.is_empty() {
            return Err(anyhow!(
                "Condition '{expression}' must name a column on both sides"
            ));
        }
        Ok(Self::new(left, operator, right))
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.left_column,
            self.operator.symbol(),
            self.right_column
        )
    }
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 {
        let bytes = value.as_bytes();
        if (bytes[0] == b'"' && bytes[value.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[value.len() - 1] == b'\'')
        {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Splits conditions into the join key (every `Equals`) and the refinements,
/// keeping the authored order inside each group.
pub fn partition(conditions: &[Condition]) -> (Vec<&Condition>, Vec<&Condition>) {
    conditions
        .iter()
        .partition(|condition| condition.operator.is_equality())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffMode {
    /// Rows whose key exists on both sides.
    #[default]
    Intersection,
    /// Rows whose key exists only in source A.
    DifferenceA,
    /// Rows whose key exists only in source B.
    DifferenceB,
}

impl fmt::Display for DiffMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DiffMode::Intersection => "intersection",
            DiffMode::DifferenceA => "difference_a",
            DiffMode::DifferenceB => "difference_b",
        };
        f.write_str(label)
    }
}

/// Loads a condition list in the wire shape from a JSON or YAML file.
pub fn load_conditions(path: &Path) -> Result<Vec<Condition>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Reading conditions from {path:?}"))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(&raw).with_context(|| format!("Parsing conditions JSON {path:?}"))
    } else {
        serde_yaml::from_str(&raw).with_context(|| format!("Parsing conditions YAML {path:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_supports_all_operators() {
        assert_eq!(
            Condition::parse("id = code").unwrap(),
            Condition::equals("id", "code")
        );
        assert_eq!(
            Condition::parse("name!=name").unwrap().operator,
            Operator::NotEquals
        );
        let contains = Condition::parse("full name CONTAINS 'last name'").unwrap();
        assert_eq!(contains.operator, Operator::Contains);
        assert_eq!(contains.left_column, "full name");
        assert_eq!(contains.right_column, "last name");
        assert_eq!(
            Condition::parse("note not contains tag").unwrap().operator,
            Operator::NotContains
        );
    }

    #[test]
    fn parse_rejects_incomplete_expressions() {
        assert!(Condition::parse("").is_err());
        assert!(Condition::parse("=b").is_err());
        assert!(Condition::parse("just_a_column").is_err());
    }

    #[test]
    fn null_semantics_follow_operator() {
        let null = Cell::Null;
        let text = Cell::from("abc");
        assert!(Operator::Equals.evaluate(&null, &null));
        assert!(!Operator::Equals.evaluate(&null, &text));
        assert!(Operator::NotEquals.evaluate(&text, &null));
        assert!(!Operator::Contains.evaluate(&null, &null));
        assert!(Operator::NotContains.evaluate(&text, &null));
    }

    #[test]
    fn contains_is_left_contains_right_and_case_sensitive() {
        let left = Cell::from("Hello World");
        assert!(Operator::Contains.evaluate(&left, &Cell::from("World")));
        assert!(!Operator::Contains.evaluate(&Cell::from("World"), &left));
        assert!(!Operator::Contains.evaluate(&left, &Cell::from("world")));
    }

    #[test]
    fn equality_compares_trimmed_text() {
        assert!(Operator::Equals.evaluate(&Cell::from(" 42 "), &Cell::from("42")));
    }

    #[test]
    fn wire_shape_uses_snake_case() {
        let json = r#"{"left_column":"a","operator":"not_contains","right_column":"b"}"#;
        let condition: Condition = serde_json::from_str(json).unwrap();
        assert_eq!(condition.operator, Operator::NotContains);
        let mode: DiffMode = serde_json::from_str(r#""difference_b""#).unwrap();
        assert_eq!(mode, DiffMode::DifferenceB);
        assert_eq!(DiffMode::default(), DiffMode::Intersection);
    }

    #[test]
    fn partition_preserves_order_within_groups() {
        let conditions = vec![
            Condition::parse("a contains b").unwrap(),
            Condition::equals("k2", "k2"),
            Condition::equals("k1", "k1"),
        ];
        let (equals, others) = partition(&conditions);
        assert_eq!(equals[0].left_column, "k2");
        assert_eq!(equals[1].left_column, "k1");
        assert_eq!(others.len(), 1);
    }
}
