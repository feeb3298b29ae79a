//! Checkpointed pipeline coordinator.
//!
//! Stages run in the order `discover → extract → symbols → build`. Each
//! stage has a persisted status marker (`pending`, `running`, `completed`,
//! `failed`) in `pipeline_state.json`:
//!
//! - A stage runs only when the stages it consumes are completed, unless
//!   forced.
//! - A completed stage is not run again without `force`; its stored summary
//!   is returned instead.
//! - Success stores the summary and resets every downstream marker to
//!   pending. Failure stores the error and leaves other markers alone.
//!
//! Inside a stage, units whose checkpoint in `manifest.json` covers the
//! stage reuse their previous artifact (incremental mode only).
//!
//! Extract and symbols also run on a partition of the units. A partitioned
//! run needs its own units, not the whole tree, to have passed the earlier
//! stages. It completes the stage only once no unit anywhere still needs it;
//! until then the marker stays pending with the partition's summary.

pub mod parallel;
pub mod partition;
pub mod progress;
mod stages;

pub use parallel::WorkerPool;
pub use partition::Partition;
pub use progress::ProgressTracker;
pub use stages::{ExtractArtifact, StoredIssue};

use crate::cache::{self, StoreLayout};
use crate::config::KbConfig;
use crate::error::{StageError, StageResult};
use crate::state::{Stage, StageRecord, StageSummary};
use crate::store::Store;
use crate::types::Unit;
use serde::{Deserialize, Serialize};
use stages::StageContext;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Units of one category and how many have passed each stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionStatus {
    pub units: usize,
    pub completed: BTreeMap<Stage, usize>,
}

/// Snapshot returned by [`Pipeline::status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub store: String,
    pub units: usize,
    /// Indexed symbols, once an index exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbols: Option<usize>,
    pub stages: BTreeMap<Stage, StageRecord>,
    /// Per category, limited to the requested partition.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub partitions: BTreeMap<String, PartitionStatus>,
}

pub struct Pipeline {
    config: KbConfig,
    layout: StoreLayout,
    pool: WorkerPool,
}

impl Pipeline {
    pub fn new(config: KbConfig) -> StageResult<Self> {
        let layout = StoreLayout::new(config.store_dir());
        let pool = WorkerPool::new(config.effective_workers())?;
        Ok(Self {
            config,
            layout,
            pool,
        })
    }

    pub fn config(&self) -> &KbConfig {
        &self.config
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Run one stage by name.
    pub fn run_stage(&self, name: &str, force: bool) -> StageResult<StageSummary> {
        let stage: Stage = name.parse()?;
        self.run(stage, force)
    }

    pub fn run(&self, stage: Stage, force: bool) -> StageResult<StageSummary> {
        self.layout.ensure()?;
        let mut state = cache::load_pipeline_state(&self.layout)?;

        if !force && state.is_completed(stage) {
            if let Some(summary) = state.record(stage).summary {
                info!("Stage {} already completed; returning stored summary", stage);
                return Ok(summary);
            }
        }
        if !force {
            if let Some(missing) = stage.requires().iter().find(|req| !state.is_completed(**req)) {
                return Err(StageError::Dependency {
                    stage,
                    missing: *missing,
                });
            }
        }

        state.mark_running(stage);
        cache::save_pipeline_state(&self.layout, &state)?;
        info!("Running stage {}{}", stage, if force { " (forced)" } else { "" });

        match self.execute(stage, force, None) {
            Ok(summary) => {
                cache::write_json(&self.layout.stage_summary(stage), &summary)?;
                state.mark_completed(stage, summary.clone());
                cache::save_pipeline_state(&self.layout, &state)?;
                info!(
                    "Stage {} completed: {} processed, {} reused, {} failed in {} ms",
                    stage, summary.processed, summary.skipped, summary.failed, summary.duration_ms
                );
                Ok(summary)
            }
            Err(err) => {
                warn!("Stage {} failed: {}", stage, err);
                state.mark_failed(stage, &err.to_string());
                cache::save_pipeline_state(&self.layout, &state)?;
                Err(err)
            }
        }
    }

    /// Run one stage by name, on `partition` when given.
    pub fn run_stage_in(
        &self,
        name: &str,
        force: bool,
        partition: Option<&Partition>,
    ) -> StageResult<StageSummary> {
        let stage: Stage = name.parse()?;
        match partition {
            Some(partition) => self.run_partition(stage, force, partition),
            None => self.run(stage, force),
        }
    }

    pub fn run_partition(
        &self,
        stage: Stage,
        force: bool,
        partition: &Partition,
    ) -> StageResult<StageSummary> {
        if matches!(stage, Stage::Discover | Stage::Build) {
            return Err(StageError::NotPartitionable(stage));
        }
        self.layout.ensure()?;
        let mut state = cache::load_pipeline_state(&self.layout)?;

        if !force {
            let manifest = cache::load_manifest(&self.layout)?;
            let units = stages::partition_units(&self.layout, &manifest, partition)?;
            for req in stage.requires() {
                let ready = state.is_completed(*req)
                    || (*req != Stage::Discover
                        && units.iter().all(|u| !manifest.needs(&u.name, *req)));
                if !ready {
                    return Err(StageError::Dependency {
                        stage,
                        missing: *req,
                    });
                }
            }
        }

        info!("Running stage {} on partition {}", stage, partition);
        let mut summary = match self.execute(stage, force, Some(partition)) {
            Ok(summary) => summary,
            Err(err) => {
                warn!("Stage {} failed on partition {}: {}", stage, partition, err);
                state.mark_failed(stage, &err.to_string());
                cache::save_pipeline_state(&self.layout, &state)?;
                return Err(err);
            }
        };
        summary.partition = Some(partition.to_string());

        let manifest = cache::load_manifest(&self.layout)?;
        let done = manifest.units.keys().all(|u| !manifest.needs(u, stage));
        if summary.processed > 0 || !state.is_completed(stage) {
            if done {
                cache::write_json(&self.layout.stage_summary(stage), &summary)?;
                state.mark_completed(stage, summary.clone());
            } else {
                state.mark_partial(stage, summary.clone());
            }
            cache::save_pipeline_state(&self.layout, &state)?;
        }
        info!(
            "Stage {} on partition {}: {} processed, {} reused, {} failed{}",
            stage,
            partition,
            summary.processed,
            summary.skipped,
            summary.failed,
            if done { "; stage complete" } else { "" }
        );
        Ok(summary)
    }

    fn execute(
        &self,
        stage: Stage,
        force: bool,
        partition: Option<&Partition>,
    ) -> StageResult<StageSummary> {
        let ctx = StageContext {
            config: &self.config,
            layout: &self.layout,
            pool: &self.pool,
            force,
            partition,
        };
        let summary = match stage {
            Stage::Discover => stages::discover(&ctx)?,
            Stage::Extract => stages::extract(&ctx)?,
            Stage::Symbols => stages::symbols(&ctx)?,
            Stage::Build => stages::build(&ctx)?,
        };

        let threshold = self.config.max_failure_rate;
        if summary.failure_rate() > threshold {
            return Err(StageError::FailureRate {
                stage,
                failed: summary.failed,
                total: summary.total,
                threshold,
            });
        }
        Ok(summary)
    }

    /// Run every stage in order, stopping at the first failure.
    pub fn run_all(&self, force: bool) -> StageResult<Vec<StageSummary>> {
        Stage::ALL
            .iter()
            .map(|stage| self.run(*stage, force))
            .collect()
    }

    /// Rescan the tree and bring every later stage up to date, reusing
    /// units whose content did not change.
    pub fn update(&self) -> StageResult<Vec<StageSummary>> {
        let mut summaries = vec![self.run(Stage::Discover, true)?];
        for stage in &Stage::ALL[1..] {
            summaries.push(self.run(*stage, false)?);
        }
        Ok(summaries)
    }

    pub fn status(&self) -> StageResult<PipelineStatus> {
        self.status_in(None)
    }

    /// Status with per-category progress, for the categories in
    /// `partition` or for all of them.
    pub fn status_in(&self, partition: Option<&Partition>) -> StageResult<PipelineStatus> {
        let state = cache::load_pipeline_state(&self.layout)?;
        let manifest = cache::load_manifest(&self.layout)?;

        let mut partitions: BTreeMap<String, PartitionStatus> = BTreeMap::new();
        for name in manifest.units.keys() {
            let Some(unit) =
                cache::read_json::<Unit>(&self.layout.stage_artifact(Stage::Discover, name))?
            else {
                continue;
            };
            if partition.is_some_and(|p| !p.matches(&unit.category)) {
                continue;
            }
            let entry = partitions.entry(unit.category).or_default();
            entry.units += 1;
            for stage in &Stage::ALL[1..] {
                let count = entry.completed.entry(*stage).or_insert(0);
                if !manifest.needs(name, *stage) {
                    *count += 1;
                }
            }
        }

        let symbols = if self.layout.index_db().exists() {
            let store = Store::open_existing(self.layout.clone())?;
            let count = store.symbol_count()?;
            store.close()?;
            Some(count)
        } else {
            None
        };

        Ok(PipelineStatus {
            store: self.layout.root().display().to_string(),
            units: manifest.units.len(),
            symbols,
            stages: state.stages,
            partitions,
        })
    }

    /// Remove a stage's marker and artifacts. Downstream markers are reset
    /// and every unit will run the stage again.
    pub fn clear_stage(&self, name: &str) -> StageResult<()> {
        let stage: Stage = name.parse()?;
        let mut state = cache::load_pipeline_state(&self.layout)?;
        state.reset(stage);
        for downstream in stage.downstream() {
            state.reset(downstream);
        }

        cache::remove_dir(&self.layout.stage_dir(stage))?;
        if stage == Stage::Build {
            cache::remove_file(&self.layout.dependency_graph())?;
            cache::remove_dir(&self.layout.unit_graphs_dir())?;
            if self.layout.index_db().exists() {
                let store = Store::open(self.layout.clone())?;
                crate::store::index::clear_all(store.conn())?;
                store.close()?;
            }
        }

        let mut manifest = cache::load_manifest(&self.layout)?;
        manifest.rewind_before(stage);
        cache::save_manifest(&self.layout, &manifest)?;
        cache::save_pipeline_state(&self.layout, &state)?;
        info!("Cleared stage {}", stage);
        Ok(())
    }

    /// Remove the whole store except its configuration.
    pub fn clean(&self) -> StageResult<()> {
        cache::clear_store(&self.layout)?;
        info!("Cleared store at {}", self.layout.root().display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StageStatus;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let temp = TempDir::new().expect("tempdir");
        let files = [
            (
                "Source/Runtime/Core/Core.Build.cs",
                "public class Core : ModuleRules { }",
            ),
            (
                "Source/Runtime/Core/Public/CoreTypes.h",
                "struct FString { int32 Len; };\n",
            ),
            (
                "Source/Runtime/Engine/Engine.Build.cs",
                "public class Engine : ModuleRules { public Engine() { PublicDependencyModuleNames.Add(\"Core\"); } }",
            ),
            (
                "Source/Runtime/Engine/Public/Actor.h",
                "class AActor : public UObject\n{\npublic:\n    void Tick(float DeltaSeconds);\n};\n",
            ),
        ];
        for (rel, content) in files {
            let path = temp.path().join(rel);
            fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
            fs::write(path, content).expect("write");
        }
        temp
    }

    fn pipeline(root: &std::path::Path) -> Pipeline {
        Pipeline::new(KbConfig::new(root).with_workers(2)).expect("pipeline")
    }

    #[test]
    fn stage_requires_its_inputs() {
        let temp = fixture();
        let pipeline = pipeline(temp.path());
        let err = pipeline.run_stage("extract", false).expect_err("dependency");
        assert!(matches!(
            err,
            StageError::Dependency {
                stage: Stage::Extract,
                missing: Stage::Discover
            }
        ));
    }

    #[test]
    fn unknown_stage_is_rejected() {
        let temp = fixture();
        let err = pipeline(temp.path()).run_stage("serve", false).expect_err("unknown");
        assert!(matches!(err, StageError::UnknownStage(name) if name == "serve"));
    }

    #[test]
    fn completed_stage_returns_stored_summary() {
        let temp = fixture();
        let pipeline = pipeline(temp.path());
        let first = pipeline.run_stage("discover", false).expect("discover");
        let again = pipeline.run_stage("discover", false).expect("discover again");
        assert_eq!(first, again);
        assert_eq!(first.total, 2);
    }

    #[test]
    fn run_all_then_rerun_of_upstream_resets_downstream() {
        let temp = fixture();
        let pipeline = pipeline(temp.path());
        let summaries = pipeline.run_all(false).expect("run all");
        assert_eq!(summaries.len(), 4);

        let status = pipeline.status().expect("status");
        assert_eq!(status.units, 2);
        assert!(status
            .stages
            .values()
            .all(|record| record.status == StageStatus::Completed));

        pipeline.run_stage("symbols", true).expect("forced symbols");
        let status = pipeline.status().expect("status");
        assert_eq!(status.stages[&Stage::Build].status, StageStatus::Pending);
        assert_eq!(status.stages[&Stage::Extract].status, StageStatus::Completed);
    }

    #[test]
    fn failure_rate_above_threshold_fails_the_stage() {
        let temp = fixture();
        fs::write(
            temp.path().join("Source/Runtime/Core/Core.Build.cs"),
            "PublicDependencyModuleNames.AddRange(new string[] { \"Broken\" ",
        )
        .expect("write");
        let pipeline = pipeline(temp.path());
        pipeline.run_stage("discover", false).expect("discover");
        let err = pipeline.run_stage("extract", false).expect_err("failure rate");
        assert!(matches!(
            err,
            StageError::FailureRate { failed: 1, total: 2, .. }
        ));
        let status = pipeline.status().expect("status");
        let record = &status.stages[&Stage::Extract];
        assert_eq!(record.status, StageStatus::Failed);
        assert!(record.error.as_deref().unwrap_or("").contains("failed for 1 of 2"));
        assert_eq!(status.stages[&Stage::Discover].status, StageStatus::Completed);
    }

    #[test]
    fn partitioned_runs_complete_the_stage_together() {
        let temp = fixture();
        let pipeline = pipeline(temp.path());
        pipeline.run_stage("discover", false).expect("discover");

        let all = Partition::parse("Runtime").expect("partition");
        let summary = pipeline
            .run_partition(Stage::Extract, false, &all)
            .expect("partitioned extract");
        assert_eq!(summary.partition.as_deref(), Some("Runtime"));
        assert_eq!(summary.count("partition.Runtime"), 2);
        let status = pipeline.status().expect("status");
        assert_eq!(status.stages[&Stage::Extract].status, StageStatus::Completed);
        assert_eq!(status.partitions["Runtime"].units, 2);
        assert_eq!(status.partitions["Runtime"].completed[&Stage::Extract], 2);
        assert_eq!(status.partitions["Runtime"].completed[&Stage::Symbols], 0);
        assert!(status.symbols.is_none());

        let err = pipeline
            .run_partition(Stage::Build, false, &all)
            .expect_err("build is whole-tree");
        assert!(matches!(err, StageError::NotPartitionable(Stage::Build)));

        pipeline.run_all(false).expect("run all");
        assert_eq!(pipeline.status().expect("status").symbols, Some(3));
    }

    #[test]
    fn clear_stage_removes_marker_and_artifacts() {
        let temp = fixture();
        let pipeline = pipeline(temp.path());
        pipeline.run_all(false).expect("run all");
        pipeline.clear_stage("build").expect("clear");

        let status = pipeline.status().expect("status");
        assert_eq!(status.stages[&Stage::Build].status, StageStatus::Pending);
        assert!(!pipeline.layout().dependency_graph().exists());

        let summary = pipeline.run_stage("build", false).expect("rebuild");
        assert_eq!(summary.processed, 2);
    }
}
