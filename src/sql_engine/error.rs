//! Errors and diagnostics produced while extracting lineage

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LineageError {
    #[error("query text is empty")]
    EmptyQuery,

    #[error("final table label is empty")]
    EmptyFinalTable,

    #[error("unknown SQL dialect: {0}")]
    UnknownDialect(String),

    #[error("failed to parse SQL: {source}")]
    SqlParse {
        query: String,
        #[source]
        source: sqlparser::parser::ParserError,
    },
}

impl LineageError {
    pub fn sql_parse(query: &str, source: sqlparser::parser::ParserError) -> Self {
        LineageError::SqlParse {
            query: query.to_string(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// No `AS (` boundary was found; the whole query is the outer query
    CteBoundaryNotFound,
    /// Table-reference extraction rejected the query text
    SqlParseFailure,
    /// Expansion reached a table already on the current path
    CycleDetected,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosticKind::CteBoundaryNotFound => "CteBoundaryNotFound",
            DiagnosticKind::SqlParseFailure => "SqlParseFailure",
            DiagnosticKind::CycleDetected => "CycleDetected",
        };
        f.write_str(name)
    }
}

/// A recovered condition, reported next to the result instead of raised
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub context: Option<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Forward the diagnostic to the `log` facade at a level matching its kind
    pub fn emit(&self) {
        match self.kind {
            DiagnosticKind::CteBoundaryNotFound => log::debug!("{}: {}", self.kind, self.message),
            DiagnosticKind::SqlParseFailure => log::warn!(
                "{}: {} (query: {})",
                self.kind,
                self.message,
                self.context.as_deref().unwrap_or("")
            ),
            DiagnosticKind::CycleDetected => log::warn!(
                "{}: {} (path: {})",
                self.kind,
                self.message,
                self.context.as_deref().unwrap_or("")
            ),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if let Some(context) = &self.context {
            write!(f, " ({})", context)?;
        }
        Ok(())
    }
}
