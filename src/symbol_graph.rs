//! Per-unit symbol graphs.
//!
//! Nodes are the unit's types, enums, callables, aliases and delegates, plus
//! stubs for base types declared elsewhere. Edges:
//! - `inherits`: type to its parent
//! - `implements`: type to each interface
//! - `declares`: type to its member callables
//! - `references`: callable or type to a type of the same unit named in a
//!   signature or property type
//! - `calls`: callable to each callable of the same unit its body calls by
//!   name; a callee with the caller's owner wins over other namesakes
//!
//! Serialized as adjacency lists keyed by stable ids (`type:AActor`,
//! `fn:AActor::Tick(float)`), sorted so equal records give equal bytes.

use crate::cache::{read_json, write_json};
use crate::error::{StoreError, StoreResult};
use crate::types::{Callable, SymbolRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

pub const SYMBOL_GRAPH_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolEdgeKind {
    Inherits,
    Implements,
    Declares,
    References,
    Calls,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolNode {
    pub kind: String,
    pub name: String,
    pub qualified_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    /// Stub for a symbol declared outside this unit.
    #[serde(default)]
    pub external: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolEdge {
    pub to: String,
    pub kind: SymbolEdgeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolGraph {
    pub format_version: u32,
    pub unit: String,
    pub nodes: BTreeMap<String, SymbolNode>,
    pub adjacency: BTreeMap<String, Vec<SymbolEdge>>,
}

pub fn type_id(qualified: &str) -> String {
    format!("type:{qualified}")
}

pub fn callable_id(callable: &Callable) -> String {
    format!("fn:{}({})", callable.qualified_name(), callable.param_types())
}

impl SymbolGraph {
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            format_version: SYMBOL_GRAPH_FORMAT_VERSION,
            unit: unit.into(),
            nodes: BTreeMap::new(),
            adjacency: BTreeMap::new(),
        }
    }

    /// Derive the graph of one unit. Pure and deterministic.
    pub fn from_record(record: &SymbolRecord) -> Self {
        let mut graph = Self::new(&record.unit);

        // Lookup of the unit's own types by simple and qualified name.
        let mut local_types: HashMap<String, String> = HashMap::new();
        for ty in &record.types {
            let qualified = ty.qualified_name();
            let id = type_id(&qualified);
            graph.add_node(
                &id,
                SymbolNode {
                    kind: ty.kind.as_str().to_string(),
                    name: ty.name.clone(),
                    qualified_name: qualified.clone(),
                    file: Some(ty.location.file.clone()),
                    line: Some(ty.location.line),
                    external: false,
                },
            );
            local_types.entry(ty.name.clone()).or_insert_with(|| id.clone());
            local_types.entry(qualified).or_insert(id);
        }

        for e in &record.enums {
            let qualified = e.qualified_name();
            graph.add_node(
                &format!("enum:{qualified}"),
                SymbolNode {
                    kind: "enum".to_string(),
                    name: e.name.clone(),
                    qualified_name: qualified,
                    file: Some(e.location.file.clone()),
                    line: Some(e.location.line),
                    external: false,
                },
            );
        }
        for alias in &record.aliases {
            let qualified = alias.qualified_name();
            graph.add_node(
                &format!("alias:{qualified}"),
                SymbolNode {
                    kind: "alias".to_string(),
                    name: alias.name.clone(),
                    qualified_name: qualified,
                    file: Some(alias.location.file.clone()),
                    line: Some(alias.location.line),
                    external: false,
                },
            );
        }
        for delegate in &record.delegates {
            let qualified = delegate.qualified_name();
            graph.add_node(
                &format!("delegate:{qualified}"),
                SymbolNode {
                    kind: "delegate".to_string(),
                    name: delegate.name.clone(),
                    qualified_name: qualified,
                    file: Some(delegate.location.file.clone()),
                    line: Some(delegate.location.line),
                    external: false,
                },
            );
        }

        // Inheritance.
        for ty in &record.types {
            let from = type_id(&ty.qualified_name());
            for base in &ty.bases {
                let kind = if ty.interfaces.contains(base) {
                    SymbolEdgeKind::Implements
                } else {
                    SymbolEdgeKind::Inherits
                };
                let to = match local_types.get(strip_template(base)) {
                    Some(id) => id.clone(),
                    None => graph.external_stub(strip_template(base)),
                };
                graph.add_edge(&from, &to, kind);
            }

            for prop in &ty.properties {
                for name in mentioned_types(&prop.type_name, &local_types) {
                    if name != from {
                        graph.add_edge(&from, &name, SymbolEdgeKind::References);
                    }
                }
            }
        }

        // Callables.
        for callable in &record.callables {
            let id = callable_id(callable);
            graph.add_node(
                &id,
                SymbolNode {
                    kind: callable_kind(callable).to_string(),
                    name: callable.name.clone(),
                    qualified_name: callable.qualified_name(),
                    file: Some(callable.declaration.file.clone()),
                    line: Some(callable.declaration.line),
                    external: false,
                },
            );
            if let Some(owner) = &callable.owner {
                let owner_qualified = crate::types::qualify(&callable.namespace, owner);
                if let Some(owner_id) = local_types.get(&owner_qualified) {
                    let owner_id = owner_id.clone();
                    graph.add_edge(&owner_id, &id, SymbolEdgeKind::Declares);
                }
            }
            let mut signature_types = mentioned_types(&callable.return_type, &local_types);
            for param in &callable.params {
                signature_types.extend(mentioned_types(&param.type_name, &local_types));
            }
            for target in signature_types {
                graph.add_edge(&id, &target, SymbolEdgeKind::References);
            }
        }

        // Calls, resolved by simple name within the unit.
        let mut by_name: HashMap<&str, Vec<&Callable>> = HashMap::new();
        for callable in &record.callables {
            by_name.entry(callable.name.as_str()).or_default().push(callable);
        }
        for caller in record.callables.iter().filter(|c| !c.calls.is_empty()) {
            let from = callable_id(caller);
            for name in &caller.calls {
                let Some(candidates) = by_name.get(name.as_str()) else {
                    continue;
                };
                let same_owner: Vec<&&Callable> = candidates
                    .iter()
                    .filter(|c| c.owner.is_some() && c.owner == caller.owner)
                    .collect();
                let targets: Vec<&&Callable> = if same_owner.is_empty() {
                    candidates.iter().collect()
                } else {
                    same_owner
                };
                for callee in targets {
                    graph.add_edge(&from, &callable_id(callee), SymbolEdgeKind::Calls);
                }
            }
        }

        graph.finish();
        graph
    }

    fn add_node(&mut self, id: &str, node: SymbolNode) {
        self.nodes.entry(id.to_string()).or_insert(node);
    }

    fn external_stub(&mut self, name: &str) -> String {
        let id = type_id(name);
        self.nodes.entry(id.clone()).or_insert_with(|| SymbolNode {
            kind: "type".to_string(),
            name: name.rsplit("::").next().unwrap_or(name).to_string(),
            qualified_name: name.to_string(),
            file: None,
            line: None,
            external: true,
        });
        id
    }

    fn add_edge(&mut self, from: &str, to: &str, kind: SymbolEdgeKind) {
        self.adjacency.entry(from.to_string()).or_default().push(SymbolEdge {
            to: to.to_string(),
            kind,
        });
    }

    fn finish(&mut self) {
        for edges in self.adjacency.values_mut() {
            edges.sort();
            edges.dedup();
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(Vec::len).sum()
    }

    pub fn edges_from(&self, id: &str) -> &[SymbolEdge] {
        self.adjacency.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Ids with an edge of `kind` into `id`, sorted.
    pub fn edges_into(&self, id: &str, kind: SymbolEdgeKind) -> Vec<String> {
        let set: BTreeSet<&String> = self
            .adjacency
            .iter()
            .filter(|(_, edges)| edges.iter().any(|e| e.to == id && e.kind == kind))
            .map(|(from, _)| from)
            .collect();
        set.into_iter().cloned().collect()
    }

    pub fn save(&self, path: &Path) -> StoreResult<()> {
        write_json(path, self)
    }

    pub fn load(path: &Path) -> StoreResult<Option<Self>> {
        match read_json::<SymbolGraph>(path)? {
            Some(graph) if graph.format_version != SYMBOL_GRAPH_FORMAT_VERSION => {
                Err(StoreError::VersionMismatch {
                    found: graph.format_version,
                    expected: SYMBOL_GRAPH_FORMAT_VERSION,
                })
            }
            other => Ok(other),
        }
    }
}

pub fn callable_kind(callable: &Callable) -> &'static str {
    if callable.owner.is_some() {
        "method"
    } else {
        "function"
    }
}

fn strip_template(name: &str) -> &str {
    name.split('<').next().unwrap_or(name).trim()
}

/// Ids of local types whose name appears as an identifier in `type_text`.
fn mentioned_types(type_text: &str, local_types: &HashMap<String, String>) -> BTreeSet<String> {
    type_text
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == ':'))
        .filter(|tok| !tok.is_empty())
        .filter_map(|tok| {
            local_types
                .get(tok)
                .or_else(|| local_types.get(tok.rsplit("::").next().unwrap_or(tok)))
        })
        .cloned()
        .collect()
}
