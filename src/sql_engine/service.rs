//! Lineage extraction for one `(query, final_table)` pair
use super::error::{Diagnostic, DiagnosticKind, LineageError};
use super::extractors::{SqlParserExtractor, TableReferenceExtractor};
use super::lineage::LineageResolver;
use super::segmenter::{CteSegmenter, Segmenter};
use super::tables::{LineageRecord, NameCase};

/// Runs segmentation and resolution, absorbing SQL failures into the record
pub struct LineageService {
    extractor: Box<dyn TableReferenceExtractor>,
    segmenter: Box<dyn Segmenter>,
    name_case: NameCase,
}

impl LineageService {
    pub fn new(
        extractor: Box<dyn TableReferenceExtractor>,
        segmenter: Box<dyn Segmenter>,
        name_case: NameCase,
    ) -> Self {
        Self {
            extractor,
            segmenter,
            name_case,
        }
    }

    /// The `sqlparser`-backed stack for a dialect name
    pub fn for_dialect(dialect_name: &str, name_case: NameCase) -> Result<Self, LineageError> {
        let extractor = SqlParserExtractor::new(dialect_name)?;
        Ok(Self::new(
            Box::new(extractor),
            Box::new(CteSegmenter::new(dialect_name)),
            name_case,
        ))
    }

    pub fn name_case(&self) -> NameCase {
        self.name_case
    }

    /// Extract the lineage of `query` under the label `final_table`.
    ///
    /// Only an empty query or label is an error. Malformed SQL yields a record
    /// whose lineage is the parse error, with a `SqlParseFailure` diagnostic.
    pub fn extract(&self, query: &str, final_table: &str) -> Result<LineageRecord, LineageError> {
        if query.trim().is_empty() {
            return Err(LineageError::EmptyQuery);
        }
        if final_table.trim().is_empty() {
            return Err(LineageError::EmptyFinalTable);
        }

        let normalized = self.name_case.apply(query);
        let segments = self.segmenter.segment(&normalized);
        let mut diagnostics = Vec::new();

        if !segments.has_ctes() {
            let diagnostic = Diagnostic::new(
                DiagnosticKind::CteBoundaryNotFound,
                "no CTE boundary found, using the whole query",
            );
            diagnostic.emit();
            diagnostics.push(diagnostic);
        }

        let resolver = LineageResolver::new(self.extractor.as_ref());
        let mut record = match resolver.resolve(&segments.outer_query, &segments.ctes) {
            Ok(resolution) => {
                log::info!(
                    "Resolved lineage for {}: {} root table(s), {} CTE(s)",
                    final_table,
                    resolution.roots.len(),
                    segments.ctes.len()
                );
                diagnostics.extend(resolution.diagnostics);
                LineageRecord::resolved(final_table, resolution.roots)
            }
            Err(err) => {
                let diagnostic = Diagnostic::new(DiagnosticKind::SqlParseFailure, err.to_string())
                    .with_context(failed_query(&err, &normalized));
                diagnostic.emit();
                diagnostics.push(diagnostic);
                LineageRecord::failed(final_table, err)
            }
        };

        record.diagnostics = diagnostics;
        Ok(record)
    }
}

impl Default for LineageService {
    fn default() -> Self {
        Self::new(
            Box::new(SqlParserExtractor::default()),
            Box::new(CteSegmenter::default()),
            NameCase::default(),
        )
    }
}

fn failed_query(err: &LineageError, fallback: &str) -> String {
    match err {
        LineageError::SqlParse { query, .. } => query.clone(),
        _ => fallback.to_string(),
    }
}
