use std::fmt;

use thiserror::Error;

/// Which input of an alignment a column or row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn suffix(self) -> &'static str {
        match self {
            Side::Left => "_A",
            Side::Right => "_B",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "source A"),
            Side::Right => write!(f, "source B"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unable to parse source: {0}")]
    Format(String),
    #[error("At least one 'equals' condition is required to align two tables")]
    NoJoinKey,
    #[error("Column '{column}' not found in {side}")]
    MissingKeyColumn { column: String, side: Side },
    #[error("Unknown {kind} '{id}'")]
    NotFound { kind: &'static str, id: String },
    #[error("Invalid page request (page {page}, size {size}); both must be at least 1")]
    InvalidPage { page: usize, size: usize },
    #[error("Failed to write spreadsheet: {0}")]
    Export(#[from] rust_xlsxwriter::XlsxError),
}

impl EngineError {
    pub fn format(message: impl Into<String>) -> Self {
        EngineError::Format(message.into())
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
