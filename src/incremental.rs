//! Change detection for incremental rebuilds.
//!
//! A unit's content hash covers its manifest bytes and every owned source
//! file (path and bytes, in sorted path order). Comparing fresh hashes with
//! the build manifest yields the added/modified/removed/unchanged split.

use crate::error::ScanError;
use crate::state::BuildManifest;
use crate::types::Unit;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Hash a unit's manifest and sources. Unreadable files are reported and
/// left out of the digest.
pub fn unit_content_hash(
    root: &Path,
    manifest_rel: &str,
    source_files: &[String],
) -> (String, Vec<ScanError>) {
    let mut hasher = Sha256::new();
    let mut issues = Vec::new();

    let mut feed = |rel: &str, hasher: &mut Sha256| {
        let path = root.join(rel);
        match fs::read(&path) {
            Ok(bytes) => {
                hasher.update(rel.as_bytes());
                hasher.update([0u8]);
                hasher.update(&bytes);
                hasher.update([0u8]);
            }
            Err(e) => issues.push(ScanError::Unreadable {
                path,
                reason: e.to_string(),
            }),
        }
    };

    feed(manifest_rel, &mut hasher);
    let mut sorted: Vec<&String> = source_files.iter().collect();
    sorted.sort();
    for rel in sorted {
        feed(rel, &mut hasher);
    }

    (format!("{:x}", hasher.finalize()), issues)
}

/// Units split by how they differ from the last recorded manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
}

impl ChangeSet {
    /// Compare a fresh scan with the manifest. All lists are sorted.
    pub fn detect(manifest: &BuildManifest, units: &[Unit]) -> Self {
        let mut changes = ChangeSet::default();
        let mut seen = BTreeSet::new();

        for unit in units {
            seen.insert(unit.name.as_str());
            match manifest.hash_of(&unit.name) {
                None => changes.added.push(unit.name.clone()),
                Some(hash) if hash != unit.content_hash => {
                    changes.modified.push(unit.name.clone())
                }
                Some(_) => changes.unchanged.push(unit.name.clone()),
            }
        }
        changes.removed = manifest
            .units
            .keys()
            .filter(|name| !seen.contains(name.as_str()))
            .cloned()
            .collect();

        changes.added.sort();
        changes.modified.sort();
        changes.unchanged.sort();
        changes
    }

    /// Added and modified units.
    pub fn changed(&self) -> impl Iterator<Item = &String> {
        self.added.iter().chain(self.modified.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}
