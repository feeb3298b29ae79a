//! Graph and index builder.
//!
//! Merges per-unit dependency and symbol records into the global
//! dependency graph, per-unit symbol graphs and the flat SQLite index.
//!
//! Derivation (symbol graphs and index rows) runs on the worker pool. All
//! writes happen on the calling thread: index rows in one transaction, then
//! graph files. Units are written in name order, so on a full build the
//! earliest unit wins every key collision. On an incremental build the row
//! already stored wins.

use crate::config::BuildMode;
use crate::error::{MergeCollision, StageResult, StoreError};
use crate::pipeline::parallel::WorkerPool;
use crate::store::index::{self, IndexEntry};
use crate::store::Store;
use crate::symbol_graph::SymbolGraph;
use crate::topology::DependencyGraph;
use crate::types::{DependencyRecord, SymbolRecord, Unit};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Everything known about one unit going into the build.
#[derive(Debug, Clone)]
pub struct UnitInput {
    pub unit: Unit,
    pub module_name: Option<String>,
    pub dependencies: DependencyRecord,
    pub symbols: SymbolRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub mode: Option<BuildMode>,
    /// Units whose rows and graph files were (re)written.
    pub rebuilt: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: usize,
    pub symbols_indexed: usize,
    pub collisions: Vec<MergeCollision>,
    pub graph_units: usize,
    pub graph_externals: usize,
    pub graph_edges: usize,
    /// Units whose derivation panicked; their previous rows were removed.
    pub failed: Vec<(String, String)>,
}

struct Derived {
    unit: String,
    graph: SymbolGraph,
    entries: Vec<IndexEntry>,
}

pub struct IndexBuilder<'a> {
    store: &'a mut Store,
    pool: &'a WorkerPool,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(store: &'a mut Store, pool: &'a WorkerPool) -> Self {
        Self { store, pool }
    }

    /// Build from `inputs` (every unit of the current scan).
    ///
    /// Full mode drops all rows and graph files first. Incremental mode
    /// rewrites only `changed` units, deletes units that are stored but no
    /// longer scanned, and leaves everything else untouched. Units that
    /// lost a collision to a changed or removed unit are rebuilt as well so
    /// they can take the key over.
    pub fn build(
        &mut self,
        inputs: &[UnitInput],
        changed: &BTreeSet<String>,
        mode: BuildMode,
    ) -> StageResult<BuildReport> {
        let by_name: BTreeMap<&str, &UnitInput> =
            inputs.iter().map(|input| (input.unit.name.as_str(), input)).collect();

        let existing_graph = match mode {
            BuildMode::Full => None,
            BuildMode::Incremental => self.store.dependency_graph()?,
        };
        let effective_mode = match (&existing_graph, mode) {
            (None, BuildMode::Incremental) => {
                debug!("No dependency graph on disk; building everything");
                BuildMode::Full
            }
            _ => mode,
        };

        let stored_units: BTreeSet<String> = self.store.unit_names()?.into_iter().collect();
        let removed: Vec<String> = match effective_mode {
            BuildMode::Full => Vec::new(),
            BuildMode::Incremental => stored_units
                .iter()
                .filter(|name| !by_name.contains_key(name.as_str()))
                .cloned()
                .collect(),
        };

        let rebuild: BTreeSet<String> = match effective_mode {
            BuildMode::Full => by_name.keys().map(|name| name.to_string()).collect(),
            BuildMode::Incremental => {
                let mut set: BTreeSet<String> = changed
                    .iter()
                    .filter(|name| by_name.contains_key(name.as_str()))
                    .cloned()
                    .collect();
                for name in by_name.keys() {
                    if !stored_units.contains(*name) {
                        set.insert(name.to_string());
                    }
                }
                let mut shadowed = BTreeSet::new();
                for name in set.iter().chain(removed.iter()) {
                    for loser in index::units_shadowed_by(self.store.conn(), name)? {
                        if by_name.contains_key(loser.as_str()) {
                            shadowed.insert(loser);
                        }
                    }
                }
                set.extend(shadowed);
                set
            }
        };

        info!(
            "Building index ({:?}): {} to rebuild, {} removed, {} total",
            effective_mode,
            rebuild.len(),
            removed.len(),
            inputs.len()
        );

        let to_derive: Vec<&UnitInput> = rebuild
            .iter()
            .filter_map(|name| by_name.get(name.as_str()).copied())
            .collect();
        let derived = self.pool.map_units(&to_derive, |input| Derived {
            unit: input.unit.name.clone(),
            graph: SymbolGraph::from_record(&input.symbols),
            entries: index::entries_for_record(&input.symbols),
        });

        let mut report = BuildReport {
            mode: Some(effective_mode),
            removed: removed.clone(),
            unchanged: inputs.len().saturating_sub(rebuild.len()),
            ..BuildReport::default()
        };

        let mut ready = Vec::with_capacity(derived.len());
        for (input, result) in to_derive.iter().zip(derived) {
            match result {
                Ok(d) => ready.push((*input, d)),
                Err(message) => {
                    warn!("Derivation failed for {}: {}", input.unit.name, message);
                    report.failed.push((input.unit.name.clone(), message));
                }
            }
        }

        // Index rows: one transaction.
        let indexed_at = Utc::now().to_rfc3339();
        {
            let tx = self.store.transaction()?;
            if effective_mode == BuildMode::Full {
                index::clear_all(&tx)?;
            }
            for name in &removed {
                index::delete_unit(&tx, name)?;
            }
            for name in &rebuild {
                index::delete_unit(&tx, name)?;
            }
            for (input, derived) in &ready {
                index::insert_unit(
                    &tx,
                    &input.unit,
                    input.module_name.as_deref(),
                    &input.dependencies,
                    input.symbols.symbol_count(),
                    &indexed_at,
                )?;
                let mut entries = Vec::with_capacity(derived.entries.len() + 1);
                entries.push(index::unit_entry(&input.unit, &input.dependencies));
                entries.extend(derived.entries.iter().cloned());
                let lost = index::insert_entries(&tx, &entries)?;
                for collision in &lost {
                    debug!("{}", collision);
                }
                report.collisions.extend(lost);
                report.symbols_indexed += derived.entries.len();
                report.rebuilt.push(derived.unit.clone());
            }
            tx.commit().map_err(StoreError::from)?;
        }

        // Graph files.
        let layout = self.store.layout().clone();
        if effective_mode == BuildMode::Full {
            crate::cache::remove_dir(&layout.unit_graphs_dir())?;
        }
        for name in removed.iter().chain(report.failed.iter().map(|(name, _)| name)) {
            crate::cache::remove_file(&layout.unit_graph(name))?;
        }
        for (_, derived) in &ready {
            derived.graph.save(&layout.unit_graph(&derived.unit))?;
        }

        let graph = match existing_graph {
            Some(mut graph) if effective_mode == BuildMode::Incremental => {
                for name in &removed {
                    graph.remove_unit(name);
                }
                for name in &rebuild {
                    if let Some(input) = by_name.get(name.as_str()) {
                        graph.add_unit(name, Some(input.unit.category.as_str()));
                        graph.replace_unit_edges(&input.dependencies);
                    }
                }
                graph
            }
            _ => {
                let units: Vec<Unit> = inputs.iter().map(|i| i.unit.clone()).collect();
                let records: Vec<DependencyRecord> =
                    inputs.iter().map(|i| i.dependencies.clone()).collect();
                DependencyGraph::from_records(&units, &records)
            }
        };
        graph.save(&layout.dependency_graph())?;

        report.graph_units = graph.unit_count();
        report.graph_externals = graph.external_count();
        report.graph_edges = graph.edge_count();

        info!(
            "Index built: {} units rebuilt, {} symbols, {} collisions, graph {} units / {} edges",
            report.rebuilt.len(),
            report.symbols_indexed,
            report.collisions.len(),
            report.graph_units,
            report.graph_edges
        );
        Ok(report)
    }
}
