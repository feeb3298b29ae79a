//! Knowledge base configuration.
//!
//! Defaults cover a stock engine checkout. A `config.json` inside the store
//! directory overrides any subset of fields.

use crate::cache::{CONFIG_FILE, STORE_DIR};
use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Full or incremental graph/index build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    Full,
    #[default]
    Incremental,
}

impl std::str::FromStr for BuildMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "incremental" => Ok(Self::Incremental),
            other => Err(format!("unknown build mode: {other} (use full or incremental)")),
        }
    }
}

/// Query engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryConfig {
    /// Result lists longer than this are masked.
    pub mask_threshold: usize,
    /// Cap on nested member lists at summary level.
    pub summary_member_cap: usize,
    /// Lifetime of cached reference ids.
    pub cache_ttl_secs: u64,
    /// Lines of context on each side of a symbol at source level.
    pub source_window_lines: usize,
    pub default_search_limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            mask_threshold: 5,
            summary_member_cap: 5,
            cache_ttl_secs: 3600,
            source_window_lines: 20,
            default_search_limit: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KbConfig {
    /// Root of the source tree. Supplied by the caller, never persisted.
    #[serde(skip)]
    pub source_root: PathBuf,
    /// Store location. Defaults to `<source_root>/.kb`.
    #[serde(skip)]
    pub store_dir: Option<PathBuf>,
    /// Directories to scan, relative to the source root. Empty means
    /// `Engine/` when it exists, otherwise the whole root.
    pub scan_roots: Vec<PathBuf>,
    /// Extra glob patterns excluded from the scan.
    pub exclude_patterns: Vec<String>,
    pub manifest_suffix: String,
    pub source_extensions: Vec<String>,
    pub max_file_size: u64,
    /// Worker threads for per-unit stages. 0 picks the available parallelism.
    pub workers: usize,
    /// A stage fails when more than this fraction of its units fail.
    pub max_failure_rate: f64,
    pub build_mode: BuildMode,
    pub max_nesting_depth: usize,
    pub max_statement_len: usize,
    pub query: QueryConfig,
}

impl Default for KbConfig {
    fn default() -> Self {
        Self {
            source_root: PathBuf::from("."),
            store_dir: None,
            scan_roots: Vec::new(),
            exclude_patterns: Vec::new(),
            manifest_suffix: ".Build.cs".to_string(),
            source_extensions: ["h", "hpp", "inl", "cpp", "cc", "cxx"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_file_size: 4 * 1024 * 1024,
            workers: 0,
            max_failure_rate: 0.25,
            build_mode: BuildMode::Incremental,
            max_nesting_depth: 256,
            max_statement_len: 64 * 1024,
            query: QueryConfig::default(),
        }
    }
}

impl KbConfig {
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            ..Self::default()
        }
    }

    /// Load the configuration for a source root, merging `config.json` from
    /// the store directory over the defaults when present.
    pub fn load(source_root: &Path, store_dir: Option<&Path>) -> StoreResult<Self> {
        let store = store_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| source_root.join(STORE_DIR));
        let path = store.join(CONFIG_FILE);
        let mut config = if path.exists() {
            let data = fs::read(&path).map_err(|e| StoreError::io(&path, e))?;
            serde_json::from_slice::<KbConfig>(&data).map_err(|e| StoreError::json(&path, e))?
        } else {
            KbConfig::default()
        };
        config.source_root = source_root.to_path_buf();
        config.store_dir = Some(store);
        Ok(config)
    }

    pub fn with_store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = Some(dir.into());
        self
    }

    pub fn with_scan_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scan_roots.push(dir.into());
        self
    }

    pub fn with_exclude(mut self, pattern: &str) -> Self {
        self.exclude_patterns.push(pattern.to_string());
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_build_mode(mut self, mode: BuildMode) -> Self {
        self.build_mode = mode;
        self
    }

    pub fn with_max_failure_rate(mut self, rate: f64) -> Self {
        self.max_failure_rate = rate;
        self
    }

    pub fn with_mask_threshold(mut self, threshold: usize) -> Self {
        self.query.mask_threshold = threshold;
        self
    }

    pub fn with_cache_ttl_secs(mut self, secs: u64) -> Self {
        self.query.cache_ttl_secs = secs;
        self
    }

    pub fn store_dir(&self) -> PathBuf {
        self.store_dir
            .clone()
            .unwrap_or_else(|| self.source_root.join(STORE_DIR))
    }

    /// Absolute directories to walk.
    pub fn effective_scan_roots(&self) -> Vec<PathBuf> {
        if !self.scan_roots.is_empty() {
            return self
                .scan_roots
                .iter()
                .map(|r| self.source_root.join(r))
                .collect();
        }
        let engine = self.source_root.join("Engine");
        if engine.is_dir() {
            vec![engine]
        } else {
            vec![self.source_root.clone()]
        }
    }

    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn is_source_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                self.source_extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }

    pub fn is_manifest_file(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(&self.manifest_suffix) && n.len() > self.manifest_suffix.len())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = KbConfig::default();
        assert_eq!(config.query.mask_threshold, 5);
        assert_eq!(config.query.cache_ttl_secs, 3600);
        assert_eq!(config.max_nesting_depth, 256);
        assert!((config.max_failure_rate - 0.25).abs() < f64::EPSILON);
        assert_eq!(config.build_mode, BuildMode::Incremental);
    }

    #[test]
    fn load_merges_partial_config_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = temp.path().join(STORE_DIR);
        fs::create_dir_all(&store).expect("create store");
        fs::write(
            store.join(CONFIG_FILE),
            r#"{ "workers": 3, "query": { "mask_threshold": 10 } }"#,
        )
        .expect("write config");

        let config = KbConfig::load(temp.path(), None).expect("load config");
        assert_eq!(config.workers, 3);
        assert_eq!(config.query.mask_threshold, 10);
        assert_eq!(config.query.summary_member_cap, 5);
        assert_eq!(config.store_dir(), store);
    }

    #[test]
    fn scan_roots_prefer_engine_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = KbConfig::new(temp.path());
        assert_eq!(config.effective_scan_roots(), vec![temp.path().to_path_buf()]);

        fs::create_dir_all(temp.path().join("Engine")).expect("create engine");
        assert_eq!(
            config.effective_scan_roots(),
            vec![temp.path().join("Engine")]
        );
    }

    #[test]
    fn classifies_files() {
        let config = KbConfig::default();
        assert!(config.is_manifest_file(Path::new("Core/Core.Build.cs")));
        assert!(!config.is_manifest_file(Path::new("Core/.Build.cs")));
        assert!(config.is_source_file(Path::new("Core/Public/Actor.h")));
        assert!(config.is_source_file(Path::new("Core/Private/Actor.CPP")));
        assert!(!config.is_source_file(Path::new("Core/Core.Build.cs")));
    }
}
