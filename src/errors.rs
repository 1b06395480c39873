//src/errors.rs

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AmrError>;

/// Fatal errors. Unparsed identifiers and auto-corrected configuration are
/// not errors; they are counted on the run summary instead.
#[derive(Debug, Error)]
pub enum AmrError {
    #[error("missing required column(s) {missing:?} in {source_name}")]
    Schema {
        missing: Vec<String>,
        source_name: String,
    },
    #[error("classifier returned {actual} result(s) for {expected} segment(s)")]
    CountMismatch { expected: usize, actual: usize },
    #[error("invalid value {value:?} for column {column} at line {line}")]
    InvalidValue {
        line: usize,
        column: String,
        value: String,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("classifier failed: {0}")]
    Classifier(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
