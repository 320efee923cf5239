//! Parser port: build-file source to a flat rule list.

use thiserror::Error;

use crate::domain::Rule;

/// Syntax error reported as `file:line:column: reason`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{file}:{line}:{column}: {reason}")]
pub struct SyntaxError {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub reason: String,
}

impl SyntaxError {
    pub fn new(file: Option<&str>, line: usize, column: usize, reason: impl Into<String>) -> Self {
        Self {
            file: file.unwrap_or("(no source)").to_string(),
            line,
            column,
            reason: reason.into(),
        }
    }
}

pub trait Parser: Send + Sync {
    /// Parse `source`. `file` only labels errors.
    fn parse(&self, source: &str, file: Option<&str>) -> Result<Vec<Rule>, SyntaxError>;
}
