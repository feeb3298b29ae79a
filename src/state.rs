//! Persisted pipeline state.
//!
//! Two documents drive every skip decision:
//! - `BuildManifest`: per-unit content hash and the last stage the unit
//!   completed. Consulted for incremental work inside a stage.
//! - `PipelineState`: per-stage status marker plus the stage's summary.

use crate::error::StageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const STATE_FORMAT_VERSION: u32 = 1;

// ============================================================================
// Stages
// ============================================================================

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discover,
    Extract,
    Symbols,
    Build,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Discover, Stage::Extract, Stage::Symbols, Stage::Build];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::Extract => "extract",
            Self::Symbols => "symbols",
            Self::Build => "build",
        }
    }

    /// Stages whose outputs this stage consumes.
    pub fn requires(&self) -> &'static [Stage] {
        match self {
            Self::Discover => &[],
            Self::Extract => &[Stage::Discover],
            Self::Symbols => &[Stage::Extract],
            Self::Build => &[Stage::Extract, Stage::Symbols],
        }
    }

    /// Stage that runs right before this one.
    pub fn previous(&self) -> Option<Stage> {
        let idx = Stage::ALL.iter().position(|s| s == self)?;
        idx.checked_sub(1).map(|prev| Stage::ALL[prev])
    }

    /// Stages that consume this stage's outputs, directly or transitively.
    pub fn downstream(&self) -> Vec<Stage> {
        Stage::ALL
            .iter()
            .copied()
            .filter(|other| other.depends_on(*self))
            .collect()
    }

    fn depends_on(&self, other: Stage) -> bool {
        self.requires()
            .iter()
            .any(|req| *req == other || req.depends_on(other))
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = StageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| StageError::UnknownStage(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sampled per-unit or per-file issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueSample {
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub kind: String,
    pub message: String,
}

impl std::fmt::Display for IssueSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.file {
            Some(file) => write!(f, "[{}] {} {}: {}", self.kind, self.unit, file, self.message),
            None => write!(f, "[{}] {}: {}", self.kind, self.unit, self.message),
        }
    }
}

/// Outcome of one stage run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: Stage,
    /// Units the stage considered.
    pub total: usize,
    /// Units actually processed in this run.
    pub processed: usize,
    /// Units reused from a checkpoint.
    pub skipped: usize,
    /// Units that failed outright.
    pub failed: usize,
    /// Recoverable issues (per-file failures, collisions, scan issues).
    pub warnings: usize,
    pub error_kinds: BTreeMap<String, usize>,
    pub samples: Vec<IssueSample>,
    /// Stage-specific counters.
    pub counts: BTreeMap<String, u64>,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
    /// Category patterns the run was limited to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
}

impl StageSummary {
    pub fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.failed as f64 / self.total as f64
        }
    }

    pub fn count(&self, key: &str) -> u64 {
        self.counts.get(key).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<StageSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Status markers for every stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub format_version: u32,
    pub stages: BTreeMap<Stage, StageRecord>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            format_version: STATE_FORMAT_VERSION,
            stages: Stage::ALL
                .iter()
                .map(|stage| (*stage, StageRecord::default()))
                .collect(),
        }
    }
}

impl PipelineState {
    pub fn record(&self, stage: Stage) -> StageRecord {
        self.stages.get(&stage).cloned().unwrap_or_default()
    }

    pub fn status(&self, stage: Stage) -> StageStatus {
        self.stages
            .get(&stage)
            .map(|r| r.status)
            .unwrap_or_default()
    }

    pub fn is_completed(&self, stage: Stage) -> bool {
        self.status(stage) == StageStatus::Completed
    }

    pub fn mark_running(&mut self, stage: Stage) {
        let record = self.stages.entry(stage).or_default();
        record.status = StageStatus::Running;
        record.error = None;
        record.updated_at = Some(Utc::now());
    }

    /// Mark a stage completed and reset every downstream marker to pending.
    pub fn mark_completed(&mut self, stage: Stage, summary: StageSummary) {
        self.stages.insert(
            stage,
            StageRecord {
                status: StageStatus::Completed,
                summary: Some(summary),
                error: None,
                updated_at: Some(Utc::now()),
            },
        );
        for downstream in stage.downstream() {
            self.reset(downstream);
        }
    }

    /// Record a run that left some units without the stage. The stage stays
    /// pending with the run's summary; downstream markers reset.
    pub fn mark_partial(&mut self, stage: Stage, summary: StageSummary) {
        self.stages.insert(
            stage,
            StageRecord {
                status: StageStatus::Pending,
                summary: Some(summary),
                error: None,
                updated_at: Some(Utc::now()),
            },
        );
        for downstream in stage.downstream() {
            self.reset(downstream);
        }
    }

    /// Mark a stage failed. Other markers are left untouched.
    pub fn mark_failed(&mut self, stage: Stage, error: &str) {
        let record = self.stages.entry(stage).or_default();
        record.status = StageStatus::Failed;
        record.error = Some(error.to_string());
        record.updated_at = Some(Utc::now());
    }

    pub fn reset(&mut self, stage: Stage) {
        self.stages.insert(stage, StageRecord::default());
    }
}

// ============================================================================
// Build manifest
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitEntry {
    pub content_hash: String,
    /// Last stage this unit completed with the recorded hash.
    pub last_stage: Option<Stage>,
    pub updated_at: DateTime<Utc>,
}

/// Per-unit hashes and checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub units: BTreeMap<String, UnitEntry>,
}

impl Default for BuildManifest {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            format_version: STATE_FORMAT_VERSION,
            created_at: now,
            updated_at: now,
            units: BTreeMap::new(),
        }
    }
}

impl BuildManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hash_of(&self, unit: &str) -> Option<&str> {
        self.units.get(unit).map(|e| e.content_hash.as_str())
    }

    /// Record a (possibly new) hash for a unit. A changed hash resets the
    /// unit's checkpoint to `Discover`.
    pub fn record_hash(&mut self, unit: &str, content_hash: &str) {
        let now = Utc::now();
        match self.units.get_mut(unit) {
            Some(entry) if entry.content_hash == content_hash => {}
            Some(entry) => {
                entry.content_hash = content_hash.to_string();
                entry.last_stage = Some(Stage::Discover);
                entry.updated_at = now;
            }
            None => {
                self.units.insert(
                    unit.to_string(),
                    UnitEntry {
                        content_hash: content_hash.to_string(),
                        last_stage: Some(Stage::Discover),
                        updated_at: now,
                    },
                );
            }
        }
        self.updated_at = now;
    }

    /// Whether the unit still has to run `stage`.
    pub fn needs(&self, unit: &str, stage: Stage) -> bool {
        match self.units.get(unit).and_then(|e| e.last_stage) {
            Some(done) => done < stage,
            None => true,
        }
    }

    /// Move a unit's checkpoint to `stage`.
    pub fn complete(&mut self, unit: &str, stage: Stage) {
        if let Some(entry) = self.units.get_mut(unit) {
            entry.last_stage = Some(stage);
            entry.updated_at = Utc::now();
            self.updated_at = entry.updated_at;
        }
    }

    /// Forget every checkpoint at or past `stage`, so each unit runs it
    /// again.
    pub fn rewind_before(&mut self, stage: Stage) {
        for entry in self.units.values_mut() {
            if entry.last_stage.is_some_and(|done| done >= stage) {
                entry.last_stage = stage.previous();
            }
        }
    }

    pub fn remove(&mut self, unit: &str) -> bool {
        let removed = self.units.remove(unit).is_some();
        if removed {
            self.updated_at = Utc::now();
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(stage: Stage) -> StageSummary {
        StageSummary {
            stage,
            total: 1,
            processed: 1,
            skipped: 0,
            failed: 0,
            warnings: 0,
            error_kinds: BTreeMap::new(),
            samples: Vec::new(),
            counts: BTreeMap::new(),
            duration_ms: 0,
            completed_at: Utc::now(),
            partition: None,
        }
    }

    #[test]
    fn downstream_follows_dependencies() {
        assert_eq!(
            Stage::Discover.downstream(),
            vec![Stage::Extract, Stage::Symbols, Stage::Build]
        );
        assert_eq!(Stage::Symbols.downstream(), vec![Stage::Build]);
        assert!(Stage::Build.downstream().is_empty());
    }

    #[test]
    fn stage_parses_from_name() {
        assert_eq!("symbols".parse::<Stage>().ok(), Some(Stage::Symbols));
        assert!(matches!(
            "serve".parse::<Stage>(),
            Err(StageError::UnknownStage(_))
        ));
    }

    #[test]
    fn completion_resets_downstream_markers() {
        let mut state = PipelineState::default();
        for stage in Stage::ALL {
            state.mark_completed(stage, summary(stage));
        }
        assert!(state.is_completed(Stage::Build));

        state.mark_completed(Stage::Extract, summary(Stage::Extract));
        assert!(state.is_completed(Stage::Discover));
        assert!(state.is_completed(Stage::Extract));
        assert_eq!(state.status(Stage::Symbols), StageStatus::Pending);
        assert_eq!(state.status(Stage::Build), StageStatus::Pending);
    }

    #[test]
    fn partial_run_keeps_stage_pending() {
        let mut state = PipelineState::default();
        for stage in Stage::ALL {
            state.mark_completed(stage, summary(stage));
        }
        state.mark_partial(Stage::Symbols, summary(Stage::Symbols));
        assert_eq!(state.status(Stage::Symbols), StageStatus::Pending);
        assert!(state.record(Stage::Symbols).summary.is_some());
        assert!(state.is_completed(Stage::Extract));
        assert_eq!(state.status(Stage::Build), StageStatus::Pending);
    }

    #[test]
    fn failure_leaves_upstream_alone() {
        let mut state = PipelineState::default();
        state.mark_completed(Stage::Discover, summary(Stage::Discover));
        state.mark_failed(Stage::Extract, "boom");
        assert!(state.is_completed(Stage::Discover));
        let record = state.record(Stage::Extract);
        assert_eq!(record.status, StageStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("boom"));
    }

    #[test]
    fn manifest_hash_change_resets_checkpoint() {
        let mut manifest = BuildManifest::new();
        manifest.record_hash("Core", "aaa");
        manifest.complete("Core", Stage::Build);
        assert!(!manifest.needs("Core", Stage::Build));

        manifest.record_hash("Core", "aaa");
        assert!(!manifest.needs("Core", Stage::Build));

        manifest.record_hash("Core", "bbb");
        assert!(manifest.needs("Core", Stage::Extract));
        assert!(!manifest.needs("Core", Stage::Discover));
    }

    #[test]
    fn rewind_before_clears_covering_checkpoints() {
        let mut manifest = BuildManifest::new();
        manifest.record_hash("Core", "aaa");
        manifest.complete("Core", Stage::Build);
        manifest.record_hash("Slate", "bbb");

        manifest.rewind_before(Stage::Symbols);
        assert!(manifest.needs("Core", Stage::Symbols));
        assert!(!manifest.needs("Core", Stage::Extract));
        assert_eq!(manifest.units["Slate"].last_stage, Some(Stage::Discover));

        manifest.rewind_before(Stage::Discover);
        assert_eq!(manifest.units["Core"].last_stage, None);
        assert_eq!(Stage::Discover.previous(), None);
        assert_eq!(Stage::Build.previous(), Some(Stage::Symbols));
    }

    #[test]
    fn pipeline_state_round_trips_through_json() {
        let mut state = PipelineState::default();
        state.mark_completed(Stage::Discover, summary(Stage::Discover));
        let json = serde_json::to_string(&state).expect("serialize");
        let back: PipelineState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, state);
    }
}
