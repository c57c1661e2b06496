//! Table-level lineage resolution over CTE references
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

use super::error::{Diagnostic, DiagnosticKind, LineageError};
use super::extractors::TableReferenceExtractor;
use super::tables::{CteDefinition, LineageNode, TableReference};

/// Graph of CTE name -> referenced table names.
///
/// Each edge carries the position the extractor reported the reference at,
/// so children come back in extractor order.
#[derive(Debug, Clone, Default)]
pub struct CteReferenceMap {
    graph: DiGraph<String, usize>,
    nodes: HashMap<String, NodeIndex>,
    ctes: HashSet<NodeIndex>,
}

impl CteReferenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the map by extracting the references of every CTE body
    pub fn from_definitions<E>(ctes: &[CteDefinition], extractor: &E) -> Result<Self, LineageError>
    where
        E: TableReferenceExtractor + ?Sized,
    {
        let mut map = Self::new();
        for cte in ctes {
            let references = extractor.extract(&cte.body)?;
            log::debug!(
                "CTE {} references {:?}",
                cte.name,
                references.iter().map(|r| r.full_name.as_str()).collect::<Vec<_>>()
            );
            map.insert(&cte.name, &references);
        }
        Ok(map)
    }

    /// Record the references of a CTE, replacing any earlier definition of the same name
    pub fn insert(&mut self, name: &str, references: &[TableReference]) {
        let cte = self.node(name);

        if !self.ctes.insert(cte) {
            log::debug!("CTE {} defined more than once, keeping the last definition", name);
            while let Some(edge) = self.graph.first_edge(cte, Direction::Outgoing) {
                self.graph.remove_edge(edge);
            }
        }

        for (ordinal, reference) in references.iter().enumerate() {
            let target = self.node(&reference.full_name);
            self.graph.add_edge(cte, target, ordinal);
        }
    }

    fn node(&mut self, name: &str) -> NodeIndex {
        if let Some(&index) = self.nodes.get(name) {
            return index;
        }
        let index = self.graph.add_node(name.to_string());
        self.nodes.insert(name.to_string(), index);
        index
    }

    pub fn is_cte(&self, name: &str) -> bool {
        self.nodes
            .get(name)
            .is_some_and(|index| self.ctes.contains(index))
    }

    /// Tables referenced by a CTE, in extractor order; `None` for non-CTE names
    pub fn references(&self, name: &str) -> Option<Vec<&str>> {
        let index = *self.nodes.get(name)?;
        if !self.ctes.contains(&index) {
            return None;
        }

        let mut edges: Vec<(usize, &str)> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .map(|edge| (*edge.weight(), self.graph[edge.target()].as_str()))
            .collect();
        edges.sort_by_key(|(ordinal, _)| *ordinal);

        Some(edges.into_iter().map(|(_, table)| table).collect())
    }

    pub fn cte_count(&self) -> usize {
        self.ctes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ctes.is_empty()
    }

    /// CTE names taking part in a reference cycle, one sorted group per cycle
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        let mut cycles: Vec<Vec<String>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|&index| self.graph.contains_edge(index, index))
            })
            .map(|component| {
                let mut names: Vec<String> = component
                    .into_iter()
                    .map(|index| self.graph[index].clone())
                    .collect();
                names.sort();
                names
            })
            .collect();
        cycles.sort();
        cycles
    }
}

/// Lineage roots plus whatever was recovered from along the way
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub roots: Vec<LineageNode>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Expands the outer query's table references into a lineage tree
pub struct LineageResolver<'a, E: ?Sized> {
    extractor: &'a E,
}

impl<'a, E> LineageResolver<'a, E>
where
    E: TableReferenceExtractor + ?Sized,
{
    pub fn new(extractor: &'a E) -> Self {
        Self { extractor }
    }

    pub fn resolve(
        &self,
        outer_query: &str,
        ctes: &[CteDefinition],
    ) -> Result<Resolution, LineageError> {
        let map = CteReferenceMap::from_definitions(ctes, self.extractor)?;
        let roots = self.extractor.extract(outer_query)?;
        Ok(expand_roots(&roots, &map))
    }
}

/// Build one tree per root reference, expanding CTE names depth-first
pub fn expand_roots(roots: &[TableReference], map: &CteReferenceMap) -> Resolution {
    let mut resolution = Resolution::default();
    let mut path = Vec::new();

    for root in roots {
        let node = expand(&root.full_name, map, &mut path, &mut resolution.diagnostics);
        resolution.roots.push(node);
    }

    resolution
}

fn expand(
    table: &str,
    map: &CteReferenceMap,
    path: &mut Vec<String>,
    diagnostics: &mut Vec<Diagnostic>,
) -> LineageNode {
    let Some(references) = map.references(table) else {
        return LineageNode::leaf(table);
    };

    if path.iter().any(|seen| seen == table) {
        let diagnostic = Diagnostic::new(
            DiagnosticKind::CycleDetected,
            format!("{} references itself through its own lineage", table),
        )
        .with_context(format!("{} -> {}", path.join(" -> "), table));
        diagnostic.emit();
        diagnostics.push(diagnostic);
        return LineageNode::leaf(table);
    }

    path.push(table.to_string());
    let subtables = references
        .into_iter()
        .map(|reference| expand(reference, map, path, diagnostics))
        .collect();
    path.pop();

    LineageNode::with_subtables(table, subtables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn refs(names: &[&str]) -> Vec<TableReference> {
        names.iter().map(|name| TableReference::new(*name)).collect()
    }

    #[test]
    fn test_references_keep_extractor_order() {
        let mut map = CteReferenceMap::new();
        map.insert("A", &refs(&["T3", "T1", "T2"]));
        assert_eq!(map.references("A"), Some(vec!["T3", "T1", "T2"]));
        assert_eq!(map.references("T1"), None);
        assert!(map.is_cte("A"));
        assert!(!map.is_cte("T1"));
        assert!(!map.is_cte("MISSING"));
    }

    #[test]
    fn test_last_definition_wins() {
        let mut map = CteReferenceMap::new();
        map.insert("A", &refs(&["T1", "T2"]));
        map.insert("A", &refs(&["T3"]));
        assert_eq!(map.references("A"), Some(vec!["T3"]));
        assert_eq!(map.cte_count(), 1);
    }

    #[test]
    fn test_chained_expansion() {
        let mut map = CteReferenceMap::new();
        map.insert("A", &refs(&["T1"]));
        map.insert("B", &refs(&["A", "T2"]));

        let resolution = expand_roots(&refs(&["B"]), &map);
        assert_eq!(
            resolution.roots,
            vec![LineageNode::with_subtables(
                "B",
                vec![
                    LineageNode::with_subtables("A", vec![LineageNode::leaf("T1")]),
                    LineageNode::leaf("T2"),
                ]
            )]
        );
        assert!(resolution.diagnostics.is_empty());
    }

    #[test]
    fn test_mutual_cycle_terminates() {
        let mut map = CteReferenceMap::new();
        map.insert("A", &refs(&["B"]));
        map.insert("B", &refs(&["A"]));

        let resolution = expand_roots(&refs(&["A"]), &map);
        assert_eq!(
            resolution.roots,
            vec![LineageNode::with_subtables(
                "A",
                vec![LineageNode::with_subtables("B", vec![LineageNode::leaf("A")])]
            )]
        );
        assert_eq!(resolution.diagnostics.len(), 1);
        assert_eq!(resolution.diagnostics[0].kind, DiagnosticKind::CycleDetected);
        assert_eq!(resolution.diagnostics[0].context.as_deref(), Some("A -> B -> A"));
        assert_eq!(map.detect_cycles(), vec![vec!["A".to_string(), "B".to_string()]]);
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let mut map = CteReferenceMap::new();
        map.insert("T", &refs(&["T", "SEED"]));

        let resolution = expand_roots(&refs(&["T"]), &map);
        assert_eq!(
            resolution.roots,
            vec![LineageNode::with_subtables(
                "T",
                vec![LineageNode::leaf("T"), LineageNode::leaf("SEED")]
            )]
        );
        assert_eq!(map.detect_cycles(), vec![vec!["T".to_string()]]);
    }

    #[test]
    fn test_long_cycle_is_bounded() {
        let names: Vec<String> = (0..200).map(|i| format!("C{}", i)).collect();
        let mut map = CteReferenceMap::new();
        for (i, name) in names.iter().enumerate() {
            let next = &names[(i + 1) % names.len()];
            map.insert(name, &[TableReference::new(next.as_str())]);
        }

        let resolution = expand_roots(&[TableReference::new("C0")], &map);
        assert_eq!(resolution.roots[0].depth(), 201);
        assert_eq!(resolution.diagnostics.len(), 1);
    }

    #[test]
    fn test_diamond_expands_each_path() {
        let mut map = CteReferenceMap::new();
        map.insert("BASE", &refs(&["RAW.EVENTS"]));
        map.insert("LEFT_SIDE", &refs(&["BASE"]));
        map.insert("RIGHT_SIDE", &refs(&["BASE"]));
        map.insert("JOINED", &refs(&["LEFT_SIDE", "RIGHT_SIDE"]));

        let resolution = expand_roots(&refs(&["JOINED"]), &map);
        assert_eq!(resolution.roots[0].node_count(), 7);
        assert!(resolution.diagnostics.is_empty());
        assert!(map.detect_cycles().is_empty());
    }
}
