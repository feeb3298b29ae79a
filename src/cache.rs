//! On-disk store layout and JSON artifact io.
//!
//! ```text
//! .kb/
//!   config.json              optional overrides
//!   index.db                 SQLite symbol index
//!   manifest.json            per-unit hashes and checkpoints
//!   pipeline_state.json      per-stage markers
//!   graphs/dependencies.json global dependency graph
//!   graphs/units/<Unit>.json per-unit symbol graphs
//!   stages/<stage>/<Unit>.json, stages/<stage>/summary.json
//!   query_cache.json         reference ids handed out by queries
//! ```

use crate::error::{StoreError, StoreResult};
use crate::state::{BuildManifest, PipelineState, STATE_FORMAT_VERSION, Stage};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

pub const STORE_DIR: &str = ".kb";
pub const CONFIG_FILE: &str = "config.json";
pub const INDEX_DB: &str = "index.db";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const PIPELINE_STATE_FILE: &str = "pipeline_state.json";
pub const GRAPHS_DIR: &str = "graphs";
pub const UNIT_GRAPHS_DIR: &str = "units";
pub const DEPENDENCY_GRAPH_FILE: &str = "dependencies.json";
pub const STAGES_DIR: &str = "stages";
pub const SUMMARY_FILE: &str = "summary.json";
pub const QUERY_CACHE_FILE: &str = "query_cache.json";

/// Paths inside one store directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    pub fn ensure(&self) -> StoreResult<()> {
        for dir in [self.root.clone(), self.unit_graphs_dir(), self.stages_dir()] {
            fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        }
        Ok(())
    }

    pub fn index_db(&self) -> PathBuf {
        self.root.join(INDEX_DB)
    }

    pub fn config(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn manifest(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn pipeline_state(&self) -> PathBuf {
        self.root.join(PIPELINE_STATE_FILE)
    }

    pub fn dependency_graph(&self) -> PathBuf {
        self.root.join(GRAPHS_DIR).join(DEPENDENCY_GRAPH_FILE)
    }

    pub fn unit_graphs_dir(&self) -> PathBuf {
        self.root.join(GRAPHS_DIR).join(UNIT_GRAPHS_DIR)
    }

    pub fn unit_graph(&self, unit: &str) -> PathBuf {
        self.unit_graphs_dir()
            .join(format!("{}.json", file_stem_for(unit)))
    }

    pub fn stages_dir(&self) -> PathBuf {
        self.root.join(STAGES_DIR)
    }

    pub fn stage_dir(&self, stage: Stage) -> PathBuf {
        self.stages_dir().join(stage.as_str())
    }

    pub fn stage_artifact(&self, stage: Stage, unit: &str) -> PathBuf {
        self.stage_dir(stage)
            .join(format!("{}.json", file_stem_for(unit)))
    }

    pub fn stage_summary(&self, stage: Stage) -> PathBuf {
        self.stage_dir(stage).join(SUMMARY_FILE)
    }

    pub fn query_cache(&self) -> PathBuf {
        self.root.join(QUERY_CACHE_FILE)
    }
}

/// Unit names are identifiers in practice; anything else is replaced so the
/// name is always a single path component.
fn file_stem_for(unit: &str) -> String {
    unit.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    let value = serde_json::from_slice(&data).map_err(|e| StoreError::json(path, e))?;
    Ok(Some(value))
}

/// Write pretty JSON through a temporary file and a rename so readers never
/// observe a half-written artifact.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let data = serde_json::to_vec_pretty(value).map_err(|e| StoreError::json(path, e))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, data).map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))?;
    Ok(())
}

pub fn remove_file(path: &Path) -> StoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

pub fn remove_dir(path: &Path) -> StoreResult<()> {
    if path.exists() {
        fs::remove_dir_all(path).map_err(|e| StoreError::io(path, e))?;
    }
    Ok(())
}

pub fn load_manifest(layout: &StoreLayout) -> StoreResult<BuildManifest> {
    let manifest: Option<BuildManifest> = read_json(&layout.manifest())?;
    match manifest {
        Some(m) if m.format_version != STATE_FORMAT_VERSION => Err(StoreError::VersionMismatch {
            found: m.format_version,
            expected: STATE_FORMAT_VERSION,
        }),
        Some(m) => Ok(m),
        None => Ok(BuildManifest::new()),
    }
}

pub fn save_manifest(layout: &StoreLayout, manifest: &BuildManifest) -> StoreResult<()> {
    write_json(&layout.manifest(), manifest)
}

pub fn load_pipeline_state(layout: &StoreLayout) -> StoreResult<PipelineState> {
    let state: Option<PipelineState> = read_json(&layout.pipeline_state())?;
    match state {
        Some(s) if s.format_version != STATE_FORMAT_VERSION => Err(StoreError::VersionMismatch {
            found: s.format_version,
            expected: STATE_FORMAT_VERSION,
        }),
        Some(s) => Ok(s),
        None => Ok(PipelineState::default()),
    }
}

pub fn save_pipeline_state(layout: &StoreLayout, state: &PipelineState) -> StoreResult<()> {
    write_json(&layout.pipeline_state(), state)
}

/// Remove everything in the store except `config.json`.
pub fn clear_store(layout: &StoreLayout) -> StoreResult<()> {
    if !layout.exists() {
        return Ok(());
    }
    let entries = fs::read_dir(layout.root()).map_err(|e| StoreError::io(layout.root(), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(layout.root(), e))?;
        let path = entry.path();
        if path.file_name().and_then(|n| n.to_str()) == Some(CONFIG_FILE) {
            continue;
        }
        if path.is_dir() {
            remove_dir(&path)?;
        } else {
            remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_names_become_single_path_components() {
        let layout = StoreLayout::new("/tmp/store");
        assert_eq!(
            layout.unit_graph("Core"),
            PathBuf::from("/tmp/store/graphs/units/Core.json")
        );
        assert_eq!(
            layout.stage_artifact(Stage::Extract, "../Evil/Name"),
            PathBuf::from("/tmp/store/stages/extract/.._Evil_Name.json")
        );
    }

    #[test]
    fn write_then_read_json() {
        let temp = tempfile::tempdir().expect("tempdir");
        let layout = StoreLayout::new(temp.path().join(STORE_DIR));
        let mut manifest = BuildManifest::new();
        manifest.record_hash("Core", "abc");
        save_manifest(&layout, &manifest).expect("save");

        let loaded = load_manifest(&layout).expect("load");
        assert_eq!(loaded, manifest);
        assert!(!layout.manifest().with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_documents_load_as_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let layout = StoreLayout::new(temp.path());
        assert!(load_manifest(&layout).expect("manifest").units.is_empty());
        assert!(!load_pipeline_state(&layout).expect("state").is_completed(Stage::Discover));
    }

    #[test]
    fn version_mismatch_is_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let layout = StoreLayout::new(temp.path());
        let mut manifest = BuildManifest::new();
        manifest.format_version = 99;
        save_manifest(&layout, &manifest).expect("save");
        assert!(matches!(
            load_manifest(&layout),
            Err(StoreError::VersionMismatch { found: 99, .. })
        ));
    }

    #[test]
    fn clear_keeps_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let layout = StoreLayout::new(temp.path().join(STORE_DIR));
        layout.ensure().expect("ensure");
        fs::write(layout.config(), "{}").expect("config");
        save_manifest(&layout, &BuildManifest::new()).expect("manifest");

        clear_store(&layout).expect("clear");
        assert!(layout.config().exists());
        assert!(!layout.manifest().exists());
        assert!(!layout.unit_graphs_dir().exists());
    }
}
