//! Global unit dependency graph.
//!
//! Nodes are unit names, edges point from a unit to what it depends on and
//! carry the dependency kind (public, private, dynamic). Names referenced by
//! a manifest but not found by the scan appear as external nodes.

use crate::cache::{read_json, write_json};
use crate::error::{StoreError, StoreResult};
use crate::types::{DependencyKind, DependencyRecord, Unit};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::Path;

pub const GRAPH_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitNode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Referenced but not part of the scan.
    #[serde(default)]
    pub external: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDoc {
    pub from: String,
    pub to: String,
    pub kind: DependencyKind,
}

/// Serialized form: nodes and edges sorted, so equal graphs produce equal
/// bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub format_version: u32,
    pub nodes: Vec<UnitNode>,
    pub edges: Vec<EdgeDoc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    pub unit: String,
    pub kind: DependencyKind,
    pub external: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: StableDiGraph<UnitNode, DependencyKind>,
    nodes: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from scratch: every scanned unit is a node, every record
    /// contributes its edges.
    pub fn from_records(units: &[Unit], records: &[DependencyRecord]) -> Self {
        let mut graph = Self::new();
        for unit in units {
            graph.add_unit(&unit.name, Some(unit.category.as_str()));
        }
        for record in records {
            graph.replace_unit_edges(record);
        }
        graph
    }

    /// Add a scanned unit, promoting an existing external node.
    pub fn add_unit(&mut self, name: &str, category: Option<&str>) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(name) {
            let node = &mut self.graph[idx];
            node.external = false;
            if category.is_some() {
                node.category = category.map(str::to_string);
            }
            return idx;
        }
        let idx = self.graph.add_node(UnitNode {
            name: name.to_string(),
            category: category.map(str::to_string),
            external: false,
        });
        self.nodes.insert(name.to_string(), idx);
        idx
    }

    fn ensure_node(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(UnitNode {
            name: name.to_string(),
            category: None,
            external: true,
        });
        self.nodes.insert(name.to_string(), idx);
        idx
    }

    /// Replace the outgoing edges of `record.unit`. Edges of other units
    /// are not touched.
    pub fn replace_unit_edges(&mut self, record: &DependencyRecord) {
        let from = match self.nodes.get(&record.unit) {
            Some(&idx) => idx,
            None => self.add_unit(&record.unit, None),
        };
        let outgoing: Vec<_> = self
            .graph
            .edges_directed(from, Direction::Outgoing)
            .map(|e| e.id())
            .collect();
        for edge in outgoing {
            self.graph.remove_edge(edge);
        }

        let mut seen = BTreeSet::new();
        for (dep, kind) in record.graph_edges() {
            if dep == record.unit || !seen.insert((dep.to_string(), kind)) {
                continue;
            }
            let to = self.ensure_node(dep);
            self.graph.add_edge(from, to, kind);
        }
        self.prune_externals();
    }

    /// Drop a unit. If other units still depend on it, it stays as an
    /// external node.
    pub fn remove_unit(&mut self, name: &str) -> bool {
        let Some(&idx) = self.nodes.get(name) else {
            return false;
        };
        let outgoing: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| e.id())
            .collect();
        for edge in outgoing {
            self.graph.remove_edge(edge);
        }
        let node = &mut self.graph[idx];
        node.external = true;
        node.category = None;
        self.prune_externals();
        true
    }

    fn prune_externals(&mut self) {
        let orphans: Vec<(String, NodeIndex)> = self
            .nodes
            .iter()
            .filter(|(_, idx)| {
                self.graph[**idx].external
                    && self.graph.edges_directed(**idx, Direction::Incoming).next().is_none()
            })
            .map(|(name, idx)| (name.clone(), *idx))
            .collect();
        for (name, idx) in orphans {
            self.graph.remove_node(idx);
            self.nodes.remove(&name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn node(&self, name: &str) -> Option<&UnitNode> {
        self.nodes.get(name).map(|idx| &self.graph[*idx])
    }

    pub fn unit_count(&self) -> usize {
        self.graph
            .node_indices()
            .filter(|idx| !self.graph[*idx].external)
            .count()
    }

    pub fn external_count(&self) -> usize {
        self.graph.node_count() - self.unit_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Scanned unit names, sorted.
    pub fn unit_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .graph
            .node_indices()
            .filter(|idx| !self.graph[*idx].external)
            .map(|idx| self.graph[idx].name.clone())
            .collect();
        names.sort();
        names
    }

    /// Direct dependencies of a unit, sorted by name then kind.
    pub fn dependencies(&self, name: &str) -> Option<Vec<Dependency>> {
        let idx = *self.nodes.get(name)?;
        let mut deps: Vec<Dependency> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| {
                let target = &self.graph[e.target()];
                Dependency {
                    unit: target.name.clone(),
                    kind: *e.weight(),
                    external: target.external,
                }
            })
            .collect();
        deps.sort_by(|a, b| a.unit.cmp(&b.unit).then(a.kind.cmp(&b.kind)));
        Some(deps)
    }

    /// Units that depend on `name`, sorted. With `transitive`, everything
    /// that reaches `name` through any path.
    pub fn dependents(&self, name: &str, transitive: bool) -> Option<Vec<String>> {
        let idx = *self.nodes.get(name)?;
        Some(self.walk(idx, Direction::Incoming, transitive))
    }

    /// Units reachable from `name`, sorted.
    pub fn dependencies_transitive(&self, name: &str) -> Option<Vec<String>> {
        let idx = *self.nodes.get(name)?;
        Some(self.walk(idx, Direction::Outgoing, true))
    }

    fn walk(&self, start: NodeIndex, direction: Direction, transitive: bool) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([start]);
        let mut visited = BTreeSet::from([start]);
        while let Some(current) = queue.pop_front() {
            for neighbor in self.graph.neighbors_directed(current, direction) {
                if visited.insert(neighbor) {
                    seen.insert(self.graph[neighbor].name.clone());
                    if transitive {
                        queue.push_back(neighbor);
                    }
                }
            }
        }
        seen.into_iter().collect()
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    pub fn to_document(&self) -> GraphDocument {
        let mut nodes: Vec<UnitNode> = self
            .graph
            .node_indices()
            .map(|idx| self.graph[idx].clone())
            .collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));

        let mut edges: Vec<EdgeDoc> = self
            .graph
            .edge_indices()
            .filter_map(|e| {
                let (from, to) = self.graph.edge_endpoints(e)?;
                Some(EdgeDoc {
                    from: self.graph[from].name.clone(),
                    to: self.graph[to].name.clone(),
                    kind: self.graph[e],
                })
            })
            .collect();
        edges.sort_by(|a, b| {
            a.from
                .cmp(&b.from)
                .then(a.to.cmp(&b.to))
                .then(a.kind.cmp(&b.kind))
        });

        GraphDocument {
            format_version: GRAPH_FORMAT_VERSION,
            nodes,
            edges,
        }
    }

    pub fn from_document(doc: GraphDocument) -> StoreResult<Self> {
        if doc.format_version != GRAPH_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                found: doc.format_version,
                expected: GRAPH_FORMAT_VERSION,
            });
        }
        let mut graph = Self::new();
        for node in doc.nodes {
            let idx = graph.graph.add_node(node.clone());
            graph.nodes.insert(node.name, idx);
        }
        for edge in doc.edges {
            let (Some(&from), Some(&to)) = (graph.nodes.get(&edge.from), graph.nodes.get(&edge.to))
            else {
                return Err(StoreError::Corruption(format!(
                    "dependency edge {} -> {} references an unknown node",
                    edge.from, edge.to
                )));
            };
            graph.graph.add_edge(from, to, edge.kind);
        }
        Ok(graph)
    }

    pub fn save(&self, path: &Path) -> StoreResult<()> {
        write_json(path, &self.to_document())
    }

    /// `None` when no graph has been written yet.
    pub fn load(path: &Path) -> StoreResult<Option<Self>> {
        match read_json::<GraphDocument>(path)? {
            Some(doc) => Self::from_document(doc).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn unit(name: &str) -> Unit {
        Unit {
            name: name.to_string(),
            manifest_path: format!("{name}/{name}.Build.cs"),
            dir: name.to_string(),
            category: "Runtime".to_string(),
            content_hash: String::new(),
            source_files: Vec::new(),
        }
    }

    fn record(name: &str, public: &[&str], private: &[&str]) -> DependencyRecord {
        let mut rec = DependencyRecord::empty(name);
        for dep in public {
            rec.push(DependencyKind::Public, dep);
        }
        for dep in private {
            rec.push(DependencyKind::Private, dep);
        }
        rec
    }

    fn sample() -> DependencyGraph {
        DependencyGraph::from_records(
            &[unit("Core"), unit("Engine"), unit("Game")],
            &[
                record("Core", &[], &[]),
                record("Engine", &["Core"], &["ThirdPartyLib"]),
                record("Game", &["Engine"], &[]),
            ],
        )
    }

    #[test]
    fn dependents_of_core_is_engine() {
        let graph = sample();
        assert_eq!(graph.dependents("Core", false), Some(vec!["Engine".to_string()]));
        assert_eq!(
            graph.dependents("Core", true),
            Some(vec!["Engine".to_string(), "Game".to_string()])
        );
        assert_eq!(graph.dependents("Missing", false), None);
    }

    #[test]
    fn unscanned_names_are_external() {
        let graph = sample();
        assert_eq!(graph.unit_count(), 3);
        assert_eq!(graph.external_count(), 1);
        assert!(graph.node("ThirdPartyLib").is_some_and(|n| n.external));
        let deps = graph.dependencies("Engine").expect("Engine");
        assert_eq!(
            deps,
            vec![
                Dependency {
                    unit: "Core".to_string(),
                    kind: DependencyKind::Public,
                    external: false
                },
                Dependency {
                    unit: "ThirdPartyLib".to_string(),
                    kind: DependencyKind::Private,
                    external: true
                },
            ]
        );
    }

    #[test]
    fn replacing_edges_leaves_other_units_alone() {
        let mut graph = sample();
        graph.replace_unit_edges(&record("Engine", &["Core"], &[]));
        assert_eq!(graph.external_count(), 0);
        assert_eq!(graph.dependents("Engine", false), Some(vec!["Game".to_string()]));
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn removed_unit_with_dependents_becomes_external() {
        let mut graph = sample();
        assert!(graph.remove_unit("Engine"));
        assert!(graph.node("Engine").is_some_and(|n| n.external));
        assert_eq!(graph.dependents("Core", false), Some(Vec::new()));
        assert!(!graph.contains("ThirdPartyLib"));

        assert!(graph.remove_unit("Game"));
        assert!(!graph.contains("Game"));
        assert!(!graph.contains("Engine"));
    }

    #[test]
    fn document_round_trip_is_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("dependencies.json");
        let graph = sample();
        graph.save(&path).expect("save");
        let first = std::fs::read(&path).expect("read");

        let loaded = DependencyGraph::load(&path).expect("load").expect("present");
        loaded.save(&path).expect("save again");
        let second = std::fs::read(&path).expect("read");
        assert_eq!(first, second);
        assert_eq!(loaded.dependents("Core", false), Some(vec!["Engine".to_string()]));
    }
}
