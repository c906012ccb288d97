//! Error types shared by the parser and the command decoder

use thiserror::Error;

/// Errors raised while decoding wire lines or viewer messages.
///
/// None of these are fatal: callers log them and drop the offending input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("line has no TYPE:VALUE separator: {0:?}")]
    MissingSeparator(String),

    #[error("line has an empty type or value: {0:?}")]
    EmptyField(String),

    #[error("unrecognized telemetry type: {0}")]
    UnknownType(String),

    #[error("invalid number {value:?} for {tag}")]
    InvalidNumber { tag: String, value: String },

    #[error("{tag} value must be <name>:<state>, got {value:?}")]
    InvalidNested { tag: String, value: String },

    #[error("value does not fit the {0} channel")]
    ValueMismatch(String),

    #[error("malformed {tag} command: {message}")]
    MalformedCommand { tag: String, message: String },

    #[error("JSON error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> Self {
        ParseError::Json(err.to_string())
    }
}
