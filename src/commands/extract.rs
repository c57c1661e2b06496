use anyhow::{anyhow, bail, Context, Result};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use walkdir::WalkDir;

use super::config::LineageConfig;
use super::rules::{RuleBook, RuleProvider};
use crate::display::{generate_lineage_graph, render_text_tree};
use crate::sql_engine::tables::to_json_pretty;
use crate::sql_engine::{DiagnosticKind, LineageRecord, LineageService};

/// Where the query to analyse comes from
#[derive(Debug, Clone)]
pub enum QuerySource {
    Text(String),
    File(PathBuf),
    /// Looked up in the rules file; the rule also supplies the final table
    Task(String),
}

#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub source: QuerySource,
    pub final_table: Option<String>,
    pub format: String,
    pub output: Option<PathBuf>,
}

/// Run the extract command for a single query
pub fn extract_command(request: &ExtractRequest, config: &LineageConfig) -> Result<()> {
    let service = config.build_service()?;
    let (query, final_table) = resolve_input(request, config)?;

    let record = service.extract(&query, &final_table)?;
    report_diagnostics(&record);

    let rendered = render(std::slice::from_ref(&record), &request.format, config.indent)?;
    write_output(&rendered, request.output.as_deref())
}

/// Resolve the `(query, final_table)` pair for a request
pub fn resolve_input(request: &ExtractRequest, config: &LineageConfig) -> Result<(String, String)> {
    match &request.source {
        QuerySource::Text(query) => Ok((query.clone(), required_table(request)?)),
        QuerySource::File(path) => {
            let query = fs::read_to_string(path)
                .with_context(|| format!("Failed to read SQL file: {}", path.display()))?;
            Ok((query, required_table(request)?))
        }
        QuerySource::Task(task_id) => {
            let rules_path = config
                .rules_path
                .as_ref()
                .ok_or_else(|| anyhow!("A rules file is required to look up task '{}'", task_id))?;
            let rule = RuleBook::from_path(rules_path)?.rule_values(task_id)?;
            let table = request.final_table.clone().unwrap_or(rule.table);
            Ok((rule.query, table))
        }
    }
}

fn required_table(request: &ExtractRequest) -> Result<String> {
    request
        .final_table
        .clone()
        .ok_or_else(|| anyhow!("--final-table is required unless --task-id is used"))
}

/// Run lineage extraction for every `.sql` file under `model_path`, using
/// each file stem as the final table
pub fn batch_command(
    model_path: &Path,
    format: &str,
    output: Option<&Path>,
    config: &LineageConfig,
) -> Result<()> {
    let start_time = Instant::now();

    eprintln!(
        "{}",
        format!("Extracting lineage from SQL files in: {}", model_path.display()).green()
    );

    let service = config.build_service()?;
    let records = extract_directory(&service, model_path)?;
    let resolved = records.iter().filter(|r| r.is_resolved()).count();

    for record in &records {
        report_diagnostics(record);
    }

    eprintln!(
        "Resolved lineage for {} out of {} SQL files in {:.2?}",
        resolved,
        records.len(),
        start_time.elapsed()
    );

    let rendered = render(&records, format, config.indent)?;
    write_output(&rendered, output)
}

/// Extract one record per SQL file, ordered by path
pub fn extract_directory(service: &LineageService, dir: &Path) -> Result<Vec<LineageRecord>> {
    let mut records = Vec::new();

    for file_path in find_sql_files(dir)? {
        let final_table = match file_path.file_stem() {
            Some(stem) => stem.to_string_lossy().to_string(),
            None => continue,
        };

        let query = fs::read_to_string(&file_path)
            .with_context(|| format!("Failed to read SQL file: {}", file_path.display()))?;

        if query.trim().is_empty() {
            log::warn!("Skipping empty SQL file: {}", file_path.display());
            continue;
        }

        records.push(service.extract(&query, &final_table)?);
    }

    Ok(records)
}

/// Render records as `json`, `text` or `dot`
pub fn render(records: &[LineageRecord], format: &str, indent: usize) -> Result<String> {
    match format {
        "json" => render_json(records, indent),
        "text" => Ok(records.iter().map(render_text_tree).collect::<Vec<_>>().join("\n")),
        "dot" => Ok(generate_lineage_graph(records)),
        _ => bail!("Unsupported output format: {} (expected json, text or dot)", format),
    }
}

/// A single record renders as itself; several are merged into one object
fn render_json(records: &[LineageRecord], indent: usize) -> Result<String> {
    if let [record] = records {
        return Ok(record.to_json_pretty(indent)?);
    }

    let mut merged = serde_json::Map::new();
    for record in records {
        if let serde_json::Value::Object(entry) = serde_json::to_value(record)? {
            if merged.contains_key(&record.final_table) {
                log::warn!("Duplicate final table {}, keeping the last one", record.final_table);
            }
            merged.extend(entry);
        }
    }

    Ok(to_json_pretty(&merged, indent)?)
}

fn report_diagnostics(record: &LineageRecord) {
    for diagnostic in &record.diagnostics {
        match diagnostic.kind {
            DiagnosticKind::CteBoundaryNotFound => {}
            _ => eprintln!(
                "{} {}: {}",
                "warning:".yellow(),
                record.final_table,
                diagnostic
            ),
        }
    }
}

fn write_output(rendered: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).with_context(|| {
                        format!("Error creating directory {}", parent.display())
                    })?;
                }
            }
            fs::write(path, rendered)
                .with_context(|| format!("Error writing to {}", path.display()))?;
            eprintln!("Saved lineage to: {}", path.display());
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

/// Find all SQL files in the given directory (recursively), sorted by path
pub fn find_sql_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("Not a directory: {}", dir.display());
    }

    let mut sql_files = Vec::new();

    for entry in WalkDir::new(dir).sort_by_file_name().into_iter().filter_map(Result::ok) {
        let path = entry.path();

        if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
            sql_files.push(path.to_path_buf());
        }
    }

    Ok(sql_files)
}
