//! The four pipeline stages.
//!
//! Each stage reads the previous stages' artifacts, fans per-unit work out
//! to the worker pool and writes its own artifacts and the build manifest
//! from the calling thread. Issues recorded in a reused artifact are
//! replayed into the summary, so a rerun reports the same counts as the run
//! that produced the artifact.
//!
//! Extract and symbols can be limited to a [`Partition`]; units outside it
//! are neither run nor counted.

use super::parallel::WorkerPool;
use super::partition::Partition;
use super::progress::ProgressTracker;
use crate::builder::{IndexBuilder, UnitInput};
use crate::cache::{self, read_json, write_json, StoreLayout};
use crate::config::{BuildMode, KbConfig};
use crate::discovery::UnitScanner;
use crate::error::{ManifestParseError, StageResult};
use crate::incremental::ChangeSet;
use crate::parsing::{CppExtractor, ManifestExtractor};
use crate::state::{BuildManifest, Stage, StageSummary};
use crate::store::Store;
use crate::types::{DependencyRecord, FileFailure, SymbolRecord, Unit};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// A per-unit error kept in an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredIssue {
    pub kind: String,
    pub message: String,
}

/// Output of the extract stage for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractArtifact {
    pub unit: String,
    pub module_name: Option<String>,
    pub dependencies: DependencyRecord,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unsupported: Vec<String>,
    /// Set when the manifest could not be parsed; `dependencies` is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StoredIssue>,
}

pub(crate) struct StageContext<'a> {
    pub config: &'a KbConfig,
    pub layout: &'a StoreLayout,
    pub pool: &'a WorkerPool,
    pub force: bool,
    pub partition: Option<&'a Partition>,
}

impl StageContext<'_> {
    /// Whether a unit's previous output for `stage` can be reused.
    fn reusable(&self, manifest: &BuildManifest, stage: Stage, unit: &str) -> bool {
        !self.force
            && self.config.build_mode == BuildMode::Incremental
            && !manifest.needs(unit, stage)
            && self.layout.stage_artifact(stage, unit).exists()
    }

    fn root(&self) -> &std::path::Path {
        &self.config.source_root
    }
}

/// Units recorded by the last discover run, in name order. Names whose
/// artifact is missing are returned separately.
fn load_units(layout: &StoreLayout, manifest: &BuildManifest) -> StageResult<(Vec<Unit>, Vec<String>)> {
    let mut units = Vec::with_capacity(manifest.units.len());
    let mut missing = Vec::new();
    for name in manifest.units.keys() {
        match read_json::<Unit>(&layout.stage_artifact(Stage::Discover, name))? {
            Some(unit) => units.push(unit),
            None => missing.push(name.clone()),
        }
    }
    Ok((units, missing))
}

/// Units recorded by discover that fall in `partition`.
pub(crate) fn partition_units(
    layout: &StoreLayout,
    manifest: &BuildManifest,
    partition: &Partition,
) -> StageResult<Vec<Unit>> {
    let (units, _) = load_units(layout, manifest)?;
    Ok(units
        .into_iter()
        .filter(|u| partition.matches(&u.category))
        .collect())
}

/// Units the stage works on. A partitioned run drops units outside the
/// partition and those whose category is unknown for lack of an artifact.
fn select_units(ctx: &StageContext<'_>, manifest: &BuildManifest) -> StageResult<(Vec<Unit>, Vec<String>)> {
    match ctx.partition {
        Some(partition) => Ok((partition_units(ctx.layout, manifest, partition)?, Vec::new())),
        None => load_units(ctx.layout, manifest),
    }
}

fn count_partitions(ctx: &StageContext<'_>, tracker: &ProgressTracker, units: &[Unit]) {
    if ctx.partition.is_none() {
        return;
    }
    for unit in units {
        tracker.add_count(&format!("partition.{}", unit.category), 1);
    }
}

fn report_missing(tracker: &ProgressTracker, missing: &[String]) {
    for name in missing {
        tracker.failure(name, None, "missing_artifact", "no discover artifact for unit");
    }
}

// ============================================================================
// discover
// ============================================================================

pub(crate) fn discover(ctx: &StageContext<'_>) -> StageResult<StageSummary> {
    let scan = UnitScanner::from_config(ctx.config)
        .with_exclude(&store_exclude(ctx.config))
        .scan()?;
    let tracker = ProgressTracker::new(Stage::Discover, scan.units.len());

    for issue in &scan.issues {
        let file = issue.file().map(|p| p.to_string_lossy().into_owned());
        tracker.warning("", file.as_deref(), issue.kind(), &issue.to_string());
    }

    let mut manifest = cache::load_manifest(ctx.layout)?;
    let changes = ChangeSet::detect(&manifest, &scan.units);

    for name in &changes.removed {
        debug!("Unit {} disappeared; dropping its artifacts", name);
        manifest.remove(name);
        for stage in [Stage::Discover, Stage::Extract, Stage::Symbols] {
            cache::remove_file(&ctx.layout.stage_artifact(stage, name))?;
        }
    }

    let changed: HashSet<&String> = changes.changed().collect();
    let mut source_files = 0u64;
    for unit in &scan.units {
        source_files += unit.source_files.len() as u64;
        let artifact = ctx.layout.stage_artifact(Stage::Discover, &unit.name);
        manifest.record_hash(&unit.name, &unit.content_hash);
        if ctx.force || changed.contains(&unit.name) || !artifact.exists() {
            write_json(&artifact, unit)?;
            tracker.processed();
        } else {
            tracker.skipped();
        }
        tracker.add_count(&format!("category.{}", unit.category), 1);
    }
    cache::save_manifest(ctx.layout, &manifest)?;

    tracker.add_count("units", scan.units.len() as u64);
    tracker.add_count("source_files", source_files);
    tracker.add_count("files_seen", scan.files_seen as u64);
    tracker.add_count("added", changes.added.len() as u64);
    tracker.add_count("modified", changes.modified.len() as u64);
    tracker.add_count("removed", changes.removed.len() as u64);
    tracker.add_count("unchanged", changes.unchanged.len() as u64);

    info!(
        "Discover: {} units ({} added, {} modified, {} removed)",
        scan.units.len(),
        changes.added.len(),
        changes.modified.len(),
        changes.removed.len()
    );
    Ok(tracker.summary())
}

/// Exclude pattern for a store directory that lives inside the source tree.
fn store_exclude(config: &KbConfig) -> String {
    let store = config.store_dir();
    match store.strip_prefix(&config.source_root) {
        Ok(rel) if !rel.as_os_str().is_empty() => {
            format!("{}/**", rel.to_string_lossy().replace('\\', "/"))
        }
        _ => format!("{}/**", crate::cache::STORE_DIR),
    }
}

// ============================================================================
// extract
// ============================================================================

fn replay_extract(tracker: &ProgressTracker, unit: &Unit, artifact: &ExtractArtifact) {
    if let Some(error) = &artifact.error {
        tracker.failure(&unit.name, Some(&unit.manifest_path), &error.kind, &error.message);
    }
    for directive in &artifact.unsupported {
        tracker.warning(&unit.name, Some(&unit.manifest_path), "unsupported", directive);
    }
    let edges = artifact.dependencies.public.len()
        + artifact.dependencies.private.len()
        + artifact.dependencies.dynamic.len()
        + artifact.dependencies.weak.len()
        + artifact.dependencies.circular.len();
    tracker.add_count("dependencies", edges as u64);
}

fn extract_one(extractor: &ManifestExtractor, ctx: &StageContext<'_>, unit: &Unit) -> ExtractArtifact {
    match extractor.extract_unit(ctx.root(), unit) {
        Ok(extraction) => ExtractArtifact {
            unit: unit.name.clone(),
            module_name: Some(extraction.module_name),
            dependencies: extraction.record,
            unsupported: extraction.unsupported.iter().map(ManifestParseError::to_string).collect(),
            error: None,
        },
        Err(err) => {
            warn!("Failed to parse manifest {}: {}", unit.manifest_path, err);
            failed_extract(unit, err.kind(), err.to_string())
        }
    }
}

fn failed_extract(unit: &Unit, kind: &str, message: String) -> ExtractArtifact {
    ExtractArtifact {
        unit: unit.name.clone(),
        module_name: None,
        dependencies: DependencyRecord::empty(&unit.name),
        unsupported: Vec::new(),
        error: Some(StoredIssue {
            kind: kind.to_string(),
            message,
        }),
    }
}

pub(crate) fn extract(ctx: &StageContext<'_>) -> StageResult<StageSummary> {
    let mut manifest = cache::load_manifest(ctx.layout)?;
    let (units, missing) = select_units(ctx, &manifest)?;
    let tracker = ProgressTracker::new(Stage::Extract, units.len() + missing.len());
    report_missing(&tracker, &missing);
    count_partitions(ctx, &tracker, &units);

    let extractor = ManifestExtractor::new()?;
    let mut work = Vec::new();
    for unit in units {
        let path = ctx.layout.stage_artifact(Stage::Extract, &unit.name);
        let reused = if ctx.reusable(&manifest, Stage::Extract, &unit.name) {
            read_json::<ExtractArtifact>(&path).ok().flatten()
        } else {
            None
        };
        match reused {
            Some(artifact) => {
                tracker.skipped();
                replay_extract(&tracker, &unit, &artifact);
            }
            None => work.push(unit),
        }
    }

    debug!("Extract: {} units to parse", work.len());
    let results = ctx.pool.map_units(&work, |unit| extract_one(&extractor, ctx, unit));

    for (unit, result) in work.iter().zip(results) {
        let artifact = result.unwrap_or_else(|panic| failed_extract(unit, "panicked", panic));
        write_json(&ctx.layout.stage_artifact(Stage::Extract, &unit.name), &artifact)?;
        manifest.complete(&unit.name, Stage::Extract);
        tracker.processed();
        replay_extract(&tracker, unit, &artifact);
    }
    cache::save_manifest(ctx.layout, &manifest)?;

    let summary = tracker.summary();
    info!(
        "Extract: {} parsed, {} reused, {} failed",
        summary.processed, summary.skipped, summary.failed
    );
    Ok(summary)
}

// ============================================================================
// symbols
// ============================================================================

/// A unit fails when its extraction panicked or when it has sources and not
/// one of them could be extracted.
fn unit_failure(record: &SymbolRecord) -> Option<(&str, String)> {
    if let Some(panic) = record.failures.iter().find(|f| f.kind == "panicked") {
        return Some(("panicked", panic.error.clone()));
    }
    if record.files_parsed == 0 && !record.failures.is_empty() {
        return Some((
            "no_files_extracted",
            format!("all {} source files failed", record.failures.len()),
        ));
    }
    None
}

fn replay_symbols(tracker: &ProgressTracker, record: &SymbolRecord) {
    for failure in record.failures.iter().filter(|f| f.kind != "panicked") {
        tracker.warning(&record.unit, Some(&failure.file), &failure.kind, &failure.error);
    }
    if let Some((kind, message)) = unit_failure(record) {
        tracker.failure(&record.unit, None, kind, &message);
    }
    tracker.add_count("files_parsed", record.files_parsed as u64);
    tracker.add_count("types", record.types.len() as u64);
    tracker.add_count("enums", record.enums.len() as u64);
    tracker.add_count("callables", record.callables.len() as u64);
    tracker.add_count("aliases", record.aliases.len() as u64);
    tracker.add_count("delegates", record.delegates.len() as u64);
}

pub(crate) fn symbols(ctx: &StageContext<'_>) -> StageResult<StageSummary> {
    let mut manifest = cache::load_manifest(ctx.layout)?;
    let (units, missing) = select_units(ctx, &manifest)?;
    let tracker = ProgressTracker::new(Stage::Symbols, units.len() + missing.len());
    report_missing(&tracker, &missing);
    count_partitions(ctx, &tracker, &units);

    let extractor = CppExtractor::from_config(ctx.config);
    let mut work = Vec::new();
    for unit in units {
        let path = ctx.layout.stage_artifact(Stage::Symbols, &unit.name);
        let reused = if ctx.reusable(&manifest, Stage::Symbols, &unit.name) {
            read_json::<SymbolRecord>(&path).ok().flatten()
        } else {
            None
        };
        match reused {
            Some(record) => {
                tracker.skipped();
                replay_symbols(&tracker, &record);
            }
            None => work.push(unit),
        }
    }

    debug!("Symbols: {} units to extract", work.len());
    let results = ctx
        .pool
        .map_units(&work, |unit| extractor.extract_unit(ctx.root(), unit));

    for (unit, result) in work.iter().zip(results) {
        let record = result.unwrap_or_else(|panic| {
            warn!("Symbol extraction panicked for {}: {}", unit.name, panic);
            let mut record = SymbolRecord::new(&unit.name);
            record.failures.push(FileFailure {
                file: unit.dir.clone(),
                kind: "panicked".to_string(),
                error: panic,
            });
            record
        });
        write_json(&ctx.layout.stage_artifact(Stage::Symbols, &unit.name), &record)?;
        manifest.complete(&unit.name, Stage::Symbols);
        tracker.processed();
        replay_symbols(&tracker, &record);
    }
    cache::save_manifest(ctx.layout, &manifest)?;

    let summary = tracker.summary();
    info!(
        "Symbols: {} extracted, {} reused, {} failed, {} file issues",
        summary.processed, summary.skipped, summary.failed, summary.warnings
    );
    Ok(summary)
}

// ============================================================================
// build
// ============================================================================

/// Remove per-unit artifacts of `stage` that belong to no scanned unit.
fn drop_stale_artifacts(
    ctx: &StageContext<'_>,
    stage: Stage,
    units: &[Unit],
    tracker: &ProgressTracker,
) -> StageResult<()> {
    let dir = ctx.layout.stage_dir(stage);
    let Ok(entries) = fs::read_dir(&dir) else {
        return Ok(());
    };
    let expected: HashSet<PathBuf> = units
        .iter()
        .map(|u| ctx.layout.stage_artifact(stage, &u.name))
        .chain(std::iter::once(ctx.layout.stage_summary(stage)))
        .collect();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") || expected.contains(&path) {
            continue;
        }
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        warn!("Dropping {} record for unit {} that is no longer scanned", stage, name);
        tracker.warning(
            &name,
            None,
            "stale_record",
            &format!("{stage} record for unscanned unit dropped"),
        );
        cache::remove_file(&path)?;
    }
    Ok(())
}

pub(crate) fn build(ctx: &StageContext<'_>) -> StageResult<StageSummary> {
    let mut manifest = cache::load_manifest(ctx.layout)?;
    let (units, missing) = load_units(ctx.layout, &manifest)?;
    let tracker = ProgressTracker::new(Stage::Build, units.len() + missing.len());
    report_missing(&tracker, &missing);

    drop_stale_artifacts(ctx, Stage::Extract, &units, &tracker)?;
    drop_stale_artifacts(ctx, Stage::Symbols, &units, &tracker)?;

    let mode = if ctx.force {
        BuildMode::Full
    } else {
        ctx.config.build_mode
    };

    let mut inputs = Vec::with_capacity(units.len());
    let mut changed = BTreeSet::new();
    for unit in units {
        let extract: Option<ExtractArtifact> =
            read_json(&ctx.layout.stage_artifact(Stage::Extract, &unit.name))?;
        let symbols: Option<SymbolRecord> =
            read_json(&ctx.layout.stage_artifact(Stage::Symbols, &unit.name))?;

        let (module_name, dependencies) = match extract {
            Some(a) => (a.module_name, a.dependencies),
            None => {
                tracker.failure(&unit.name, None, "missing_artifact", "no extract artifact for unit");
                (None, DependencyRecord::empty(&unit.name))
            }
        };
        let symbols = symbols.unwrap_or_else(|| {
            tracker.failure(&unit.name, None, "missing_artifact", "no symbols artifact for unit");
            SymbolRecord::new(&unit.name)
        });

        if manifest.needs(&unit.name, Stage::Build) {
            changed.insert(unit.name.clone());
        }
        inputs.push(UnitInput {
            unit,
            module_name,
            dependencies,
            symbols,
        });
    }

    let mut store = Store::open(ctx.layout.clone())?;
    let report = IndexBuilder::new(&mut store, ctx.pool).build(&inputs, &changed, mode)?;
    store.close()?;

    for collision in &report.collisions {
        tracker.warning(
            &collision.dropped_unit,
            Some(&collision.dropped_file),
            "collision",
            &collision.to_string(),
        );
    }
    for (unit, message) in &report.failed {
        tracker.failure(unit, None, "panicked", message);
    }

    let failed: HashSet<&str> = report.failed.iter().map(|(u, _)| u.as_str()).collect();
    let rebuilt: HashSet<&str> = report.rebuilt.iter().map(String::as_str).collect();
    for input in &inputs {
        let name = input.unit.name.as_str();
        if rebuilt.contains(name) {
            tracker.processed();
            manifest.complete(name, Stage::Build);
        } else if !failed.contains(name) {
            tracker.skipped();
        }
    }
    cache::save_manifest(ctx.layout, &manifest)?;

    tracker.add_count("symbols_indexed", report.symbols_indexed as u64);
    tracker.add_count("collisions", report.collisions.len() as u64);
    tracker.add_count("removed", report.removed.len() as u64);
    tracker.add_count("graph_units", report.graph_units as u64);
    tracker.add_count("graph_externals", report.graph_externals as u64);
    tracker.add_count("graph_edges", report.graph_edges as u64);
    Ok(tracker.summary())
}
