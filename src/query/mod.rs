//! Layered query engine.
//!
//! Every command answers with a JSON value. Misses are answers too:
//! `{"error": "not found: X", "fallback_command": "fuzzy_search X"}`. Only
//! store failures surface as `Err`.
//!
//! Detail levels:
//! - summary: identity, a few attributes, capped member lists and a `ref_id`
//! - details: every attribute plus a `source_ref`
//! - source: the text around one symbol, reached through a source id
//!
//! Result lists longer than the mask threshold are replaced by a sample and
//! a reference id that `expand` turns back into the full list.
//!
//! `references`, `callers` and `callees` walk the per-unit symbol graph of
//! each entry the name matches. Targets indexed under the same unit render
//! like lookups; the rest (external stubs, entries claimed by another unit)
//! render as the graph node.

pub mod cache;
pub mod command;
pub mod mask;
pub mod views;

pub use cache::{CacheStats, Cleanup, ResultCache, Retrieval};
pub use command::{DetailLevel, QueryCommand};

use crate::config::{KbConfig, QueryConfig};
use crate::error::StoreResult;
use crate::search;
use crate::store::index::base_simple_name;
use crate::store::{IndexEntry, Store};
use crate::symbol_graph::{SymbolEdgeKind, SymbolGraph};
use crate::types::{Callable, TypeAlias};
use serde_json::{Value, json};
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use tracing::debug;

/// Edge walked by the graph commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    References,
    Callers,
    Callees,
}

impl Relation {
    fn accepts(self, kind: &str) -> bool {
        match self {
            Self::References => kind != "unit",
            Self::Callers | Self::Callees => matches!(kind, "method" | "function"),
        }
    }

    fn targets(self, graph: &SymbolGraph, id: &str) -> Vec<String> {
        match self {
            Self::References => graph.edges_into(id, SymbolEdgeKind::References),
            Self::Callers => graph.edges_into(id, SymbolEdgeKind::Calls),
            Self::Callees => graph
                .edges_from(id)
                .iter()
                .filter(|e| e.kind == SymbolEdgeKind::Calls)
                .map(|e| e.to.clone())
                .collect(),
        }
    }
}

/// Answer for a name that matched nothing.
pub fn not_found(target: &str) -> Value {
    json!({
        "error": format!("not found: {target}"),
        "fallback_command": format!("fuzzy_search {target}"),
    })
}

pub struct QueryEngine {
    store: Store,
    cache: ResultCache,
    config: QueryConfig,
    source_root: PathBuf,
}

impl QueryEngine {
    /// Open the store named by `config` and the reference ids saved by the
    /// previous session.
    pub fn open(config: &KbConfig) -> StoreResult<Self> {
        let store = Store::open_existing(crate::cache::StoreLayout::new(config.store_dir()))?;
        let cache = ResultCache::load(&store.layout().query_cache(), config.query.cache_ttl_secs);
        Ok(Self::with_parts(store, cache, config))
    }

    /// Engine over an already open store with an empty cache.
    pub fn with_store(store: Store, config: &KbConfig) -> Self {
        let cache = ResultCache::new(config.query.cache_ttl_secs);
        Self::with_parts(store, cache, config)
    }

    fn with_parts(store: Store, cache: ResultCache, config: &KbConfig) -> Self {
        Self {
            store,
            cache,
            config: config.query.clone(),
            source_root: config.source_root.clone(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Persist live reference ids and release the store.
    pub fn close(self) -> StoreResult<()> {
        self.cache.cleanup();
        self.cache.save(&self.store.layout().query_cache())?;
        self.store.close()
    }

    pub fn execute(&self, command: &QueryCommand, detail: DetailLevel) -> StoreResult<Value> {
        debug!("Query `{}` at {} level", command, detail);
        let text = command.to_string();
        match command {
            QueryCommand::Lookup(name) => self.lookup(name, detail, &text),
            QueryCommand::FuzzySearch { query, limit } => {
                self.fuzzy_search(query, limit.unwrap_or(self.config.default_search_limit), detail, &text)
            }
            QueryCommand::Subtypes { name, transitive } => {
                self.subtypes(name, *transitive, detail, &text)
            }
            QueryCommand::Dependents { unit, transitive } => self.dependents(unit, *transitive, &text),
            QueryCommand::Dependencies { unit, transitive } => {
                self.dependencies(unit, *transitive, detail, &text)
            }
            QueryCommand::Resolve(name) => self.resolve(name, &text),
            QueryCommand::Expand(id) => self.expand(id),
            QueryCommand::Source(id) => self.source(id),
            QueryCommand::References(name) => {
                self.related(name, Relation::References, detail, &text)
            }
            QueryCommand::Callers(name) => self.related(name, Relation::Callers, detail, &text),
            QueryCommand::Callees(name) => self.related(name, Relation::Callees, detail, &text),
        }
    }

    // ------------------------------------------------------------------------
    // Symbols
    // ------------------------------------------------------------------------

    /// Entries for an exact name, qualified name or symbol key.
    fn find(&self, name: &str) -> StoreResult<Vec<IndexEntry>> {
        if let Some(entry) = self.store.get(name)? {
            return Ok(vec![entry]);
        }
        self.store.lookup(name)
    }

    /// Entry view; details add what only the index knows (member keys of a
    /// type, bookkeeping of a unit).
    fn render(&self, entry: &IndexEntry, detail: DetailLevel) -> StoreResult<Value> {
        let full = detail != DetailLevel::Summary;
        let mut view = views::entry_view(entry, full, self.config.summary_member_cap);
        if !full {
            return Ok(view);
        }
        if let Some(map) = view.as_object_mut() {
            match entry.kind.as_str() {
                "class" | "struct" | "union" => {
                    let members: Vec<String> = self
                        .store
                        .members_of(&entry.qualified_name)?
                        .into_iter()
                        .map(|m| m.key)
                        .collect();
                    map.insert("member_ids".into(), json!(members));
                }
                "unit" => {
                    if let Some(row) = self.store.unit_row(&entry.name)? {
                        map.insert("module_name".into(), json!(row.module_name));
                        map.insert("symbol_count".into(), json!(row.symbol_count));
                        map.insert("indexed_at".into(), json!(row.indexed_at));
                    }
                }
                _ => {}
            }
        }
        Ok(view)
    }

    fn render_list(
        &self,
        entries: &[IndexEntry],
        detail: DetailLevel,
        command: &str,
    ) -> StoreResult<Value> {
        let items = entries
            .iter()
            .map(|e| self.render(e, detail))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(self.mask(items, command))
    }

    fn mask(&self, items: Vec<Value>, command: &str) -> Value {
        mask::mask_list(items, self.config.mask_threshold, &self.cache, command)
    }

    fn lookup(&self, name: &str, detail: DetailLevel, command: &str) -> StoreResult<Value> {
        let entries = self.find(name)?;
        Ok(match entries.as_slice() {
            [] => not_found(name),
            [entry] if detail == DetailLevel::Source => {
                views::source_view(entry, &self.source_root, self.config.source_window_lines)
            }
            [entry] => self.render(entry, detail)?,
            many => self.render_list(many, detail, command)?,
        })
    }

    fn fuzzy_search(
        &self,
        query: &str,
        limit: usize,
        detail: DetailLevel,
        command: &str,
    ) -> StoreResult<Value> {
        let matcher = search::FuzzyMatcher::new(query);
        if matcher.is_empty() || limit == 0 {
            return Ok(Value::Array(Vec::new()));
        }
        let candidate_cap = limit.saturating_mul(20).max(2000);
        let candidates = self.store.name_contains(matcher.needle(), candidate_cap)?;
        let ranked: Vec<IndexEntry> = search::rank(query, candidates, |e| e.name.as_str())
            .into_iter()
            .take(limit)
            .map(|(_, entry)| entry)
            .collect();
        debug!("fuzzy_search {}: {} results", query, ranked.len());
        self.render_list(&ranked, detail, command)
    }

    fn subtypes(
        &self,
        name: &str,
        transitive: bool,
        detail: DetailLevel,
        command: &str,
    ) -> StoreResult<Value> {
        let mut found = Vec::new();
        let mut seen_keys = HashSet::new();
        let mut visited = HashSet::from([base_simple_name(name)]);
        let mut queue = VecDeque::from([name.to_string()]);

        while let Some(current) = queue.pop_front() {
            for entry in self.store.direct_subtypes(&current)? {
                if !seen_keys.insert(entry.key.clone()) {
                    continue;
                }
                if transitive && visited.insert(entry.name.clone()) {
                    queue.push_back(entry.name.clone());
                }
                found.push(entry);
            }
        }

        if found.is_empty() && self.find(name)?.is_empty() {
            return Ok(not_found(name));
        }
        self.render_list(&found, detail, command)
    }

    /// Definition sites for declarations named `name`. Callables map to
    /// their out-of-line body, aliases to the entities their target names,
    /// everything else to its own declaration.
    fn resolve(&self, name: &str, command: &str) -> StoreResult<Value> {
        let entries = self.find(name)?;
        if entries.is_empty() {
            return Ok(not_found(name));
        }
        let mut items = Vec::with_capacity(entries.len());
        for entry in &entries {
            items.push(self.resolution(entry)?);
        }
        Ok(self.mask(items, command))
    }

    fn resolution(&self, entry: &IndexEntry) -> StoreResult<Value> {
        let declaration = json!({ "file": entry.file, "line": entry.line });
        match entry.kind.as_str() {
            "method" | "function" => {
                let definition = serde_json::from_str::<Callable>(&entry.payload)
                    .ok()
                    .and_then(|c| c.definition);
                Ok(json!({
                    "id": entry.key,
                    "qualified_name": entry.qualified_name,
                    "signature": entry.signature,
                    "declaration": declaration,
                    "definition": definition,
                    "resolved": definition.is_some(),
                }))
            }
            "alias" => {
                let target = serde_json::from_str::<TypeAlias>(&entry.payload)
                    .map(|a| a.target)
                    .unwrap_or_default();
                let targets: Vec<String> = self
                    .store
                    .lookup(&base_simple_name(&target))?
                    .into_iter()
                    .filter(|t| t.key != entry.key && t.kind != "alias")
                    .map(|t| t.key)
                    .collect();
                Ok(json!({
                    "id": entry.key,
                    "qualified_name": entry.qualified_name,
                    "declaration": declaration,
                    "target": target,
                    "resolved_to": targets,
                    "resolved": !targets.is_empty(),
                }))
            }
            _ => Ok(json!({
                "id": entry.key,
                "qualified_name": entry.qualified_name,
                "kind": entry.kind,
                "declaration": declaration,
                "definition": declaration,
                "resolved": true,
            })),
        }
    }

    /// Graph neighbours of every entry `name` matches, deduplicated.
    fn related(
        &self,
        name: &str,
        relation: Relation,
        detail: DetailLevel,
        command: &str,
    ) -> StoreResult<Value> {
        let entries = self.find(name)?;
        if entries.is_empty() {
            return Ok(not_found(name));
        }
        let mut graphs: HashMap<String, Option<SymbolGraph>> = HashMap::new();
        let mut seen = HashSet::new();
        let mut items = Vec::new();
        for entry in entries.iter().filter(|e| relation.accepts(&e.kind)) {
            let graph = match graphs.entry(entry.unit.clone()) {
                Entry::Occupied(slot) => slot.into_mut(),
                Entry::Vacant(slot) => slot.insert(self.store.symbol_graph(&entry.unit)?),
            };
            let Some(graph) = graph.as_ref() else {
                continue;
            };
            for id in relation.targets(graph, &entry.key) {
                if seen.insert((graph.unit.clone(), id.clone())) {
                    items.push(self.graph_item(graph, &id, detail)?);
                }
            }
        }
        debug!("{} {}: {} results", command, name, items.len());
        Ok(self.mask(items, command))
    }

    fn graph_item(&self, graph: &SymbolGraph, id: &str, detail: DetailLevel) -> StoreResult<Value> {
        if let Some(entry) = self.store.get(id)? {
            if entry.unit == graph.unit {
                return self.render(&entry, detail);
            }
        }
        Ok(match graph.nodes.get(id) {
            Some(node) => json!({
                "id": id,
                "kind": node.kind,
                "name": node.name,
                "qualified_name": node.qualified_name,
                "unit": graph.unit,
                "file": node.file,
                "line": node.line,
                "external": node.external,
            }),
            None => json!({ "id": id, "unit": graph.unit }),
        })
    }

    // ------------------------------------------------------------------------
    // Units
    // ------------------------------------------------------------------------

    fn dependents(&self, unit: &str, transitive: bool, command: &str) -> StoreResult<Value> {
        let names = self
            .store
            .dependency_graph()?
            .and_then(|graph| graph.dependents(unit, transitive));
        Ok(match names {
            Some(names) => self.mask(names.into_iter().map(Value::String).collect(), command),
            None => not_found(unit),
        })
    }

    fn dependencies(
        &self,
        unit: &str,
        transitive: bool,
        detail: DetailLevel,
        command: &str,
    ) -> StoreResult<Value> {
        let Some(graph) = self.store.dependency_graph()? else {
            return Ok(not_found(unit));
        };
        let items: Vec<Value> = if transitive {
            match graph.dependencies_transitive(unit) {
                Some(names) => names.into_iter().map(Value::String).collect(),
                None => return Ok(not_found(unit)),
            }
        } else {
            match graph.dependencies(unit) {
                Some(deps) if detail == DetailLevel::Summary => {
                    let names: BTreeSet<String> = deps.into_iter().map(|d| d.unit).collect();
                    names.into_iter().map(Value::String).collect()
                }
                Some(deps) => deps
                    .iter()
                    .map(|d| serde_json::to_value(d).unwrap_or(Value::Null))
                    .collect(),
                None => return Ok(not_found(unit)),
            }
        };
        Ok(self.mask(items, command))
    }

    // ------------------------------------------------------------------------
    // Reference ids
    // ------------------------------------------------------------------------

    /// Full list behind a reference id, or the details view of a symbol key.
    fn expand(&self, id: &str) -> StoreResult<Value> {
        if id.starts_with("ref_") {
            return Ok(match self.cache.retrieve(id) {
                Retrieval::Hit(items) => Value::Array(items),
                Retrieval::Expired { command } => json!({
                    "error": format!("expired: {id}"),
                    "fallback_command": command,
                }),
                Retrieval::Unknown => json!({ "error": format!("not found: {id}") }),
            });
        }
        Ok(match self.store.get(id)? {
            Some(entry) => self.render(&entry, DetailLevel::Details)?,
            None => not_found(views::search_term(id)),
        })
    }

    fn source(&self, id: &str) -> StoreResult<Value> {
        let key = views::key_from_source_id(id);
        Ok(match self.store.get(key)? {
            Some(entry) => {
                views::source_view(&entry, &self.source_root, self.config.source_window_lines)
            }
            None => not_found(views::search_term(id)),
        })
    }
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("store", &self.store)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StoreLayout;
    use crate::store::index;
    use crate::types::{DependencyRecord, Location, Specifiers, SymbolRecord, TypeDecl, TypeKind, Unit};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn class(name: &str, bases: &[&str]) -> TypeDecl {
        TypeDecl {
            name: name.to_string(),
            namespace: String::new(),
            kind: TypeKind::Class,
            bases: bases.iter().map(|b| b.to_string()).collect(),
            parent: bases.first().map(|b| b.to_string()),
            interfaces: Vec::new(),
            methods: Vec::new(),
            properties: Vec::new(),
            doc: None,
            location: Location::new(format!("Game/{name}.h"), 1),
            macro_name: None,
            specifiers: Specifiers::new(),
        }
    }

    fn engine(types: Vec<TypeDecl>) -> (QueryEngine, TempDir) {
        let temp = TempDir::new().expect("tempdir");
        let config = KbConfig::new(temp.path());
        let store = Store::open(StoreLayout::new(config.store_dir())).expect("store");
        let unit = Unit {
            name: "Game".to_string(),
            manifest_path: "Game/Game.Build.cs".to_string(),
            dir: "Game".to_string(),
            category: "Runtime".to_string(),
            content_hash: "h".to_string(),
            source_files: Vec::new(),
        };
        let deps = DependencyRecord::empty("Game");
        let record = SymbolRecord {
            unit: "Game".to_string(),
            types,
            ..Default::default()
        };
        index::insert_unit(store.conn(), &unit, None, &deps, record.symbol_count(), "now")
            .expect("unit");
        index::insert_entries(store.conn(), &index::entries_for_record(&record)).expect("insert");
        (QueryEngine::with_store(store, &config), temp)
    }

    #[test]
    fn miss_answers_with_fuzzy_fallback() {
        let (engine, _temp) = engine(Vec::new());
        let value = engine
            .execute(&QueryCommand::Lookup("Foo".to_string()), DetailLevel::Summary)
            .expect("query");
        assert_eq!(
            value,
            json!({"error": "not found: Foo", "fallback_command": "fuzzy_search Foo"})
        );
    }

    #[test]
    fn transitive_subtypes_follow_the_chain() {
        let (engine, _temp) = engine(vec![
            class("AActor", &["UObject"]),
            class("APawn", &["AActor"]),
            class("ACharacter", &["APawn"]),
        ]);
        let direct = engine
            .execute(
                &QueryCommand::Subtypes {
                    name: "UObject".to_string(),
                    transitive: false,
                },
                DetailLevel::Summary,
            )
            .expect("direct");
        assert_eq!(direct.as_array().map(Vec::len), Some(1));

        let all = engine
            .execute(
                &QueryCommand::Subtypes {
                    name: "UObject".to_string(),
                    transitive: true,
                },
                DetailLevel::Summary,
            )
            .expect("transitive");
        let names: Vec<&str> = all
            .as_array()
            .expect("list")
            .iter()
            .filter_map(|v| v["name"].as_str())
            .collect();
        assert_eq!(names, vec!["AActor", "APawn", "ACharacter"]);
    }

    #[test]
    fn unknown_type_without_subtypes_is_a_miss() {
        let (engine, _temp) = engine(vec![class("AActor", &["UObject"])]);
        let value = engine
            .execute(
                &QueryCommand::Subtypes {
                    name: "UNothing".to_string(),
                    transitive: false,
                },
                DetailLevel::Summary,
            )
            .expect("query");
        assert_eq!(value["fallback_command"], json!("fuzzy_search UNothing"));

        let leaf = engine
            .execute(
                &QueryCommand::Subtypes {
                    name: "AActor".to_string(),
                    transitive: false,
                },
                DetailLevel::Summary,
            )
            .expect("query");
        assert_eq!(leaf, json!([]));
    }

    #[test]
    fn expired_reference_returns_original_command() {
        let temp = TempDir::new().expect("tempdir");
        let mut config = KbConfig::new(temp.path());
        config.query.cache_ttl_secs = 0;
        let store = Store::open(StoreLayout::new(config.store_dir())).expect("store");
        let engine = QueryEngine::with_store(store, &config);

        let id = engine.cache().store(vec![json!("x")], "fuzzy_search Actor");
        let value = engine
            .execute(&QueryCommand::Expand(id.clone()), DetailLevel::Summary)
            .expect("expand");
        assert_eq!(
            value,
            json!({"error": format!("expired: {id}"), "fallback_command": "fuzzy_search Actor"})
        );
    }

    #[test]
    fn symbol_keys_expand_to_details() {
        let (engine, _temp) = engine(vec![class("AActor", &["UObject"])]);
        let value = engine
            .execute(&QueryCommand::Expand("type:AActor".to_string()), DetailLevel::Summary)
            .expect("expand");
        assert_eq!(value["source_ref"], json!("src:type:AActor"));

        let miss = engine
            .execute(&QueryCommand::Source("src:type:AMissing".to_string()), DetailLevel::Source)
            .expect("source");
        assert_eq!(miss["fallback_command"], json!("fuzzy_search AMissing"));
    }
}
