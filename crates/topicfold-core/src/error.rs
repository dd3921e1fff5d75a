use thiserror::Error;

use crate::RowId;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("dataset does not contain column {0:?}")]
    MissingColumn(String),

    #[error("column {0:?} is reserved for row identifiers")]
    ReservedColumn(String),

    #[error("duplicate row id {0}")]
    DuplicateRow(RowId),

    #[error("unknown row id {0}")]
    UnknownRow(RowId),

    #[error("column {column:?} has {actual} values, dataset has {expected} rows")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("column {column:?} left {missing} rows unset")]
    IncompleteColumn { column: String, missing: usize },

    #[error("id column {column:?} has unsupported type {data_type}")]
    UnsupportedIdType { column: String, data_type: String },

    #[error("null or negative row id in column {column:?} at row {row}")]
    InvalidRowId { column: String, row: usize },

    #[error("category must be \"topic\" or \"subtopic\", got {0:?}")]
    InvalidCategory(String),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
