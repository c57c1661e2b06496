use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::sql_engine::extractors::DEFAULT_DIALECT;
use crate::sql_engine::{LineageError, LineageService, NameCase};

pub const DEFAULT_CONFIG_FILE: &str = "lineage.yaml";

/// Settings for lineage extraction, read from `lineage.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageConfig {
    /// SQL dialect used to tokenize and parse queries
    #[serde(default = "default_dialect")]
    pub dialect: String,

    /// Case normalization applied before CTE names are matched
    #[serde(default)]
    pub name_case: NameCase,

    /// Spaces per level in JSON output
    #[serde(default = "default_indent")]
    pub indent: usize,

    /// Rules file mapping task ids to `(query, table)` pairs
    #[serde(default)]
    pub rules_path: Option<PathBuf>,
}

fn default_dialect() -> String {
    DEFAULT_DIALECT.to_string()
}

fn default_indent() -> usize {
    4
}

impl Default for LineageConfig {
    fn default() -> Self {
        Self {
            dialect: default_dialect(),
            name_case: NameCase::default(),
            indent: default_indent(),
            rules_path: None,
        }
    }
}

impl LineageConfig {
    pub fn build_service(&self) -> Result<LineageService, LineageError> {
        LineageService::for_dialect(&self.dialect, self.name_case)
    }
}

/// Reads the configuration file from the specified path, or looks for
/// lineage.yaml in the current directory and falls back to defaults
pub fn read_config(config_path: Option<PathBuf>) -> Result<LineageConfig> {
    match config_path {
        Some(path) => {
            if !path.exists() {
                bail!("Configuration file not found at: {}", path.display());
            }
            load_config(&path)
        }
        None => {
            let current_dir = std::env::current_dir()?;
            let path = current_dir.join(DEFAULT_CONFIG_FILE);
            if path.exists() {
                load_config(&path)
            } else {
                log::debug!("No {} found, using default configuration", DEFAULT_CONFIG_FILE);
                Ok(LineageConfig::default())
            }
        }
    }
}

pub fn load_config(path: &Path) -> Result<LineageConfig> {
    let config_str = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;
    let config: LineageConfig = serde_yaml::from_str(&config_str)
        .with_context(|| format!("Failed to parse configuration from {}", path.display()))?;
    log::debug!("Loaded configuration from {}: {:?}", path.display(), config);
    Ok(config)
}
