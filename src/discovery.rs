//! Unit discovery.
//!
//! Walks the source tree once, collecting build manifests and source files,
//! and turns every manifest into a [`Unit`]. Source files belong to the
//! deepest unit directory that contains them.

use crate::config::KbConfig;
use crate::error::ScanError;
use crate::incremental::unit_content_hash;
use crate::types::Unit;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Category tags for engine source folders.
const SOURCE_CATEGORIES: &[&str] = &["Runtime", "Editor", "Developer", "Programs"];
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// Result of one scan. Issues never abort the scan.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Units sorted by name.
    pub units: Vec<Unit>,
    pub issues: Vec<ScanError>,
    pub files_seen: usize,
}

/// Discovers build units under a source root.
pub struct UnitScanner {
    source_root: PathBuf,
    scan_roots: Vec<PathBuf>,
    exclude_patterns: Vec<String>,
    default_excludes: bool,
    manifest_suffix: String,
    source_extensions: Vec<String>,
    max_file_size: u64,
}

impl UnitScanner {
    /// Scanner over the whole root with default settings.
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        Self::from_config(&KbConfig::new(source_root))
    }

    pub fn from_config(config: &KbConfig) -> Self {
        Self {
            source_root: config.source_root.clone(),
            scan_roots: config.effective_scan_roots(),
            exclude_patterns: config.exclude_patterns.clone(),
            default_excludes: true,
            manifest_suffix: config.manifest_suffix.clone(),
            source_extensions: config.source_extensions.clone(),
            max_file_size: config.max_file_size,
        }
    }

    /// Add an exclude pattern.
    pub fn with_exclude(mut self, pattern: &str) -> Self {
        self.exclude_patterns.push(pattern.to_string());
        self
    }

    /// Disable default excludes.
    pub fn without_default_excludes(mut self) -> Self {
        self.default_excludes = false;
        self
    }

    /// Override max file size.
    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    /// Discover all units.
    pub fn scan(&self) -> Result<ScanReport, ScanError> {
        if !self.source_root.is_dir() {
            return Err(ScanError::MissingRoot(self.source_root.clone()));
        }

        let default_excludes = if self.default_excludes {
            build_globset(default_exclude_patterns())?
        } else {
            build_globset(std::iter::empty())?
        };
        let user_excludes = build_globset(self.exclude_patterns.iter().map(|s| s.as_str()))?;

        let mut report = ScanReport::default();
        let mut manifests = Vec::<PathBuf>::new();
        let mut sources = Vec::<PathBuf>::new();

        for scan_root in &self.scan_roots {
            let walker = WalkBuilder::new(scan_root)
                .hidden(true)
                .git_ignore(true)
                .git_global(false)
                .git_exclude(true)
                .require_git(false)
                .sort_by_file_name(|a, b| a.cmp(b))
                .build();

            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        let path = error_path(&err).unwrap_or_else(|| scan_root.clone());
                        tracing::warn!("Skipping unreadable path {}: {}", path.display(), err);
                        report.issues.push(ScanError::Unreadable {
                            path,
                            reason: err.to_string(),
                        });
                        continue;
                    }
                };
                let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
                if !is_file {
                    continue;
                }
                report.files_seen += 1;

                let path = entry.path();
                let rel = path.strip_prefix(&self.source_root).unwrap_or(path);
                if default_excludes.is_match(rel) || user_excludes.is_match(rel) {
                    continue;
                }
                if self.is_manifest(rel) {
                    manifests.push(rel.to_path_buf());
                } else if self.is_source(rel) && self.within_size_limit(path) {
                    sources.push(rel.to_path_buf());
                }
            }
        }

        manifests.sort();
        manifests.dedup();
        sources.sort();
        sources.dedup();

        let mut units = self.units_from_manifests(&manifests, &mut report.issues);
        self.assign_sources(&mut units, &sources, &mut report.issues);

        let hash_issues: Vec<ScanError> = units
            .par_iter_mut()
            .flat_map_iter(|unit| {
                let (hash, issues) = unit_content_hash(
                    &self.source_root,
                    &unit.manifest_path,
                    &unit.source_files,
                );
                unit.content_hash = hash;
                issues
            })
            .collect();
        report.issues.extend(hash_issues);

        units.sort_by(|a, b| a.name.cmp(&b.name));
        tracing::info!(
            "Discovered {} units ({} files seen, {} issues)",
            units.len(),
            report.files_seen,
            report.issues.len()
        );
        report.units = units;
        Ok(report)
    }

    fn units_from_manifests(&self, manifests: &[PathBuf], issues: &mut Vec<ScanError>) -> Vec<Unit> {
        let mut first_seen = BTreeMap::<String, PathBuf>::new();
        let mut units = Vec::new();

        for manifest in manifests {
            let Some(name) = self.unit_name(manifest) else {
                continue;
            };
            if let Some(first) = first_seen.get(&name) {
                tracing::warn!(
                    "Duplicate unit {}: ignoring {}",
                    name,
                    manifest.display()
                );
                issues.push(ScanError::DuplicateUnit {
                    name,
                    first: first.clone(),
                    duplicate: manifest.clone(),
                });
                continue;
            }
            first_seen.insert(name.clone(), manifest.clone());

            let dir = manifest.parent().unwrap_or(Path::new(""));
            units.push(Unit {
                name,
                manifest_path: to_slash(manifest),
                dir: to_slash(dir),
                category: infer_category(manifest),
                content_hash: String::new(),
                source_files: Vec::new(),
            });
        }
        units
    }

    /// Hand every source file to the deepest unit directory containing it.
    /// A file no unit claims is recorded as an issue.
    fn assign_sources(&self, units: &mut [Unit], sources: &[PathBuf], issues: &mut Vec<ScanError>) {
        let mut by_dir = HashMap::<PathBuf, usize>::new();
        for (idx, unit) in units.iter().enumerate() {
            by_dir.entry(PathBuf::from(&unit.dir)).or_insert(idx);
        }

        for source in sources {
            let owner = source
                .ancestors()
                .skip(1)
                .find_map(|dir| by_dir.get(dir).copied());
            match owner {
                Some(idx) => units[idx].source_files.push(to_slash(source)),
                None => {
                    tracing::warn!("Source file {} belongs to no unit", source.display());
                    issues.push(ScanError::OrphanSource {
                        path: PathBuf::from(to_slash(source)),
                    });
                }
            }
        }
    }

    fn unit_name(&self, manifest: &Path) -> Option<String> {
        let file_name = manifest.file_name()?.to_str()?;
        let name = file_name.strip_suffix(&self.manifest_suffix)?;
        (!name.is_empty()).then(|| name.to_string())
    }

    fn is_manifest(&self, path: &Path) -> bool {
        self.unit_name(path).is_some()
    }

    fn is_source(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                self.source_extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }

    fn within_size_limit(&self, path: &Path) -> bool {
        let Ok(metadata) = fs::metadata(path) else {
            return false;
        };
        metadata.len() <= self.max_file_size
    }
}

/// Infer a unit's category from the directories of its manifest path.
///
/// `.../Source/Runtime/...` gives `Runtime` (likewise Editor, Developer,
/// Programs), `.../Plugins/<Type>/<Name>/...` gives `Plugins.<Type>.<Name>`,
/// `.../Platforms/<Name>/...` gives `Platforms.<Name>`. Anything else is
/// `Unknown`.
pub fn infer_category(manifest_path: &Path) -> String {
    let dirs: Vec<&str> = manifest_path
        .parent()
        .map(|p| {
            p.components()
                .filter_map(|c| match c {
                    Component::Normal(s) => s.to_str(),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    for pair in dirs.windows(2) {
        if pair[0] == "Source" && SOURCE_CATEGORIES.contains(&pair[1]) {
            return pair[1].to_string();
        }
    }

    if let Some(idx) = dirs.iter().position(|d| *d == "Plugins") {
        return match (dirs.get(idx + 1), dirs.get(idx + 2)) {
            (Some(kind), Some(name)) => format!("Plugins.{kind}.{name}"),
            _ => "Plugins.Unknown".to_string(),
        };
    }

    if let Some(idx) = dirs.iter().position(|d| *d == "Platforms") {
        return match dirs.get(idx + 1) {
            Some(name) => format!("Platforms.{name}"),
            None => "Platforms.Unknown".to_string(),
        };
    }

    UNKNOWN_CATEGORY.to_string()
}

fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn error_path(err: &ignore::Error) -> Option<PathBuf> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.clone()),
        ignore::Error::WithDepth { err, .. } => error_path(err),
        ignore::Error::WithLineNumber { err, .. } => error_path(err),
        ignore::Error::Loop { child, .. } => Some(child.clone()),
        _ => None,
    }
}

fn default_exclude_patterns() -> Vec<&'static str> {
    vec![
        "**/.git/**",
        "**/.kb/**",
        "**/Intermediate/**",
        "**/Binaries/**",
        "**/Saved/**",
        "**/DerivedDataCache/**",
    ]
}

fn build_globset<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Result<GlobSet, ScanError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| ScanError::Pattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| ScanError::Pattern {
        pattern: "<set>".to_string(),
        reason: e.to_string(),
    })
}
