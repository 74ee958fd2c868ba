//! Parse error shared by the command, properties and update-request readers

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Invalid JSON in {context} at line {line}, column {column}: {message}")]
    Json {
        context: &'static str,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Missing field '{field}' in {context}")]
    MissingField {
        context: &'static str,
        field: &'static str,
    },

    #[error("Unexpected value in {context}: expected {expected}")]
    UnexpectedShape {
        context: &'static str,
        expected: &'static str,
    },
}

impl ParseError {
    /// Wrap a serde_json error, keeping the source offset
    pub fn json(context: &'static str, err: serde_json::Error) -> Self {
        Self::Json {
            context,
            line: err.line(),
            column: err.column(),
            message: err.to_string(),
        }
    }

    pub fn missing(context: &'static str, field: &'static str) -> Self {
        Self::MissingField { context, field }
    }
}
