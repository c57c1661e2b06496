//! Human-readable renderings of lineage records
use colored::*;

use crate::sql_engine::{LineageNode, LineageRecord};

/// Render a record as an indented tree, CTEs highlighted:
///
/// ```text
/// report
/// ├── ORDERS
/// └── RECENT
///     └── ORDERS
/// ```
pub fn render_text_tree(record: &LineageRecord) -> String {
    let mut out = format!("{}\n", record.final_table.bold());

    if let Err(err) = &record.lineage {
        out.push_str(&format!("└── {}\n", format!("lineage unavailable: {}", err).red()));
        return out;
    }

    let roots = record.roots();
    for (i, node) in roots.iter().enumerate() {
        write_node(&mut out, node, "", i + 1 == roots.len());
    }
    out
}

fn write_node(out: &mut String, node: &LineageNode, prefix: &str, last: bool) {
    let branch = if last { "└── " } else { "├── " };
    let name = if node.is_leaf() {
        node.table.normal()
    } else {
        node.table.bright_cyan()
    };
    out.push_str(&format!("{}{}{}\n", prefix, branch, name));

    let child_prefix = format!("{}{}", prefix, if last { "    " } else { "│   " });
    for (i, child) in node.subtables.iter().enumerate() {
        write_node(out, child, &child_prefix, i + 1 == node.subtables.len());
    }
}

/// Generate a graph representation of the lineage (dot format for Graphviz)
pub fn generate_lineage_graph(records: &[LineageRecord]) -> String {
    let mut result = String::from("digraph lineage {\n");
    result.push_str("  rankdir=LR;\n");
    result.push_str("  node [shape=box];\n");

    let mut edges = Vec::new();

    for record in records {
        result.push_str(&format!(
            "  \"{}\" [style=filled, fillcolor=lightblue];\n",
            record.final_table
        ));
        for root in record.roots() {
            collect_edges(root, &record.final_table, &mut edges);
        }
    }

    // A table shared by several branches is drawn once per edge pair
    let mut seen = std::collections::HashSet::new();
    for (source, target) in edges {
        if seen.insert((source.clone(), target.clone())) {
            result.push_str(&format!("  \"{}\" -> \"{}\";\n", source, target));
        }
    }

    result.push_str("}\n");
    result
}

fn collect_edges(node: &LineageNode, parent: &str, edges: &mut Vec<(String, String)>) {
    edges.push((node.table.clone(), parent.to_string()));
    for child in &node.subtables {
        collect_edges(child, &node.table, edges);
    }
}
