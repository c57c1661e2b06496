//! Task id -> `(query, final_table)` lookup
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// The query and final table registered for a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageRule {
    pub query: String,
    pub table: String,
}

pub trait RuleProvider {
    fn rule_values(&self, task_id: &str) -> Result<LineageRule>;
}

/// Rules loaded from a YAML file of the form
///
/// ```yaml
/// rules:
///   load_daily_report:
///     query: "WITH recent AS (SELECT * FROM orders) SELECT * FROM recent"
///     table: daily_report
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleBook {
    #[serde(default)]
    rules: BTreeMap<String, LineageRule>,
}

impl RuleBook {
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rules file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse rules from {}", path.display()))
    }

    pub fn insert(&mut self, task_id: impl Into<String>, rule: LineageRule) {
        self.rules.insert(task_id.into(), rule);
    }

    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl RuleProvider for RuleBook {
    fn rule_values(&self, task_id: &str) -> Result<LineageRule> {
        self.rules
            .get(task_id)
            .cloned()
            .ok_or_else(|| anyhow!("No lineage rule registered for task '{}'", task_id))
    }
}
