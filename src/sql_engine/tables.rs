//! Data model for table-level lineage

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

use super::error::{Diagnostic, LineageError};

/// A table as referenced in SQL text
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableReference {
    /// Possibly schema-qualified name, e.g. `sales.orders`
    pub full_name: String,
    /// Last dot-separated segment of `full_name`
    pub short_name: String,
}

impl TableReference {
    /// Create a reference from its full name, deriving the short name
    pub fn new(full_name: impl Into<String>) -> Self {
        let full_name = full_name.into();
        let short_name = full_name
            .rsplit('.')
            .next()
            .unwrap_or(full_name.as_str())
            .to_string();
        Self {
            full_name,
            short_name,
        }
    }

    /// Build a reference from identifier parts (`["sales", "orders"]`)
    pub fn from_parts<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let full_name = parts
            .into_iter()
            .map(|part| part.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(".");
        Self::new(full_name)
    }
}

impl fmt::Display for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name)
    }
}

/// One `name AS (body)` entry of a WITH clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CteDefinition {
    pub name: String,
    pub body: String,
}

impl CteDefinition {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
        }
    }
}

/// A node of the lineage tree.
///
/// `subtables` is only populated when `table` names a CTE; base tables are
/// leaves and serialize without the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageNode {
    pub table: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtables: Vec<LineageNode>,
}

impl LineageNode {
    /// A base table with nothing to expand
    pub fn leaf(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            subtables: Vec::new(),
        }
    }

    pub fn with_subtables(table: impl Into<String>, subtables: Vec<LineageNode>) -> Self {
        Self {
            table: table.into(),
            subtables,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.subtables.is_empty()
    }

    /// Number of nodes in this subtree, including `self`
    pub fn node_count(&self) -> usize {
        1 + self.subtables.iter().map(LineageNode::node_count).sum::<usize>()
    }

    /// Length of the longest root-to-leaf path, counting `self`
    pub fn depth(&self) -> usize {
        1 + self
            .subtables
            .iter()
            .map(LineageNode::depth)
            .max()
            .unwrap_or(0)
    }
}

/// How query text is case-normalized before segmentation.
///
/// Normalization applies to the whole text, so CTE keys and table names
/// end up in the same case and lookups between them are consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameCase {
    #[default]
    Upper,
    Lower,
    Preserve,
}

impl NameCase {
    pub fn apply(self, text: &str) -> String {
        match self {
            NameCase::Upper => text.to_uppercase(),
            NameCase::Lower => text.to_lowercase(),
            NameCase::Preserve => text.to_string(),
        }
    }
}

/// Lineage of one query, labelled with its final table.
///
/// Serializes as `{"<final_table>": [...]}`, or `{"<final_table>": ""}` when
/// the SQL could not be parsed.
#[derive(Debug)]
pub struct LineageRecord {
    pub final_table: String,
    pub lineage: Result<Vec<LineageNode>, LineageError>,
    pub diagnostics: Vec<Diagnostic>,
}

impl LineageRecord {
    pub fn resolved(final_table: impl Into<String>, roots: Vec<LineageNode>) -> Self {
        Self {
            final_table: final_table.into(),
            lineage: Ok(roots),
            diagnostics: Vec::new(),
        }
    }

    pub fn failed(final_table: impl Into<String>, error: LineageError) -> Self {
        Self {
            final_table: final_table.into(),
            lineage: Err(error),
            diagnostics: Vec::new(),
        }
    }

    /// Tree roots; empty when lineage could not be determined
    pub fn roots(&self) -> &[LineageNode] {
        match &self.lineage {
            Ok(roots) => roots,
            Err(_) => &[],
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.lineage.is_ok()
    }

    pub fn error(&self) -> Option<&LineageError> {
        self.lineage.as_ref().err()
    }

    /// Pretty-printed JSON using `indent` spaces per level
    pub fn to_json_pretty(&self, indent: usize) -> serde_json::Result<String> {
        to_json_pretty(self, indent)
    }
}

/// Pretty-print any serializable value with `indent` spaces per level
pub fn to_json_pretty<T: Serialize + ?Sized>(value: &T, indent: usize) -> serde_json::Result<String> {
    let indent = " ".repeat(indent);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    String::from_utf8(out).map_err(serde::ser::Error::custom)
}

impl Serialize for LineageRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match &self.lineage {
            Ok(roots) => map.serialize_entry(&self.final_table, roots)?,
            Err(_) => map.serialize_entry(&self.final_table, "")?,
        }
        map.end()
    }
}
