//! SQL Engine module for CTE segmentation and table-level lineage

pub mod error;
pub mod extractors;
pub mod lineage;
pub mod segmenter;
pub mod service;
pub mod tables;

pub use error::{Diagnostic, DiagnosticKind, LineageError};
pub use extractors::{SqlParserExtractor, TableReferenceExtractor};
pub use lineage::{CteReferenceMap, LineageResolver, Resolution};
pub use segmenter::{CteSegmenter, Segmenter, Segments};
pub use service::LineageService;
pub use tables::{CteDefinition, LineageNode, LineageRecord, NameCase, TableReference};
