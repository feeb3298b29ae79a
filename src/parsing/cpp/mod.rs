//! C++ symbol extraction.
//!
//! A lexical extractor tuned for macro-heavy engine headers: it never
//! preprocesses and never builds a full syntax tree. Each file is scanned in
//! isolation; a file that fails is recorded and the rest of the unit goes on.
//! Out-of-line definitions are matched to their declarations once every file
//! of the unit has been scanned.

pub mod decl;
pub(crate) mod lexer;
mod scanner;
pub mod specifiers;

pub use scanner::{scan, Definition, FileSymbols, ScanLimits};

use crate::config::KbConfig;
use crate::error::{panic_message, SymbolParseError};
use crate::types::{Callable, FileFailure, SymbolRecord, Unit};
use std::collections::HashMap;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct CppExtractor {
    limits: ScanLimits,
}

impl CppExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &KbConfig) -> Self {
        Self {
            limits: ScanLimits {
                max_depth: config.max_nesting_depth,
                max_statement_len: config.max_statement_len,
            },
        }
    }

    pub fn with_limits(mut self, limits: ScanLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Scan one file's text. Panics inside the scanner are caught and
    /// reported as a failure of this file only.
    pub fn extract_source(&self, source: &str, file: &str) -> Result<FileSymbols, SymbolParseError> {
        let limits = self.limits;
        match panic::catch_unwind(AssertUnwindSafe(|| scan(source, file, &limits))) {
            Ok(result) => result,
            Err(payload) => Err(SymbolParseError::Panicked(panic_message(payload.as_ref()))),
        }
    }

    pub fn extract_file(&self, root: &Path, rel: &str) -> Result<FileSymbols, SymbolParseError> {
        let path = root.join(rel);
        let bytes = fs::read(&path).map_err(|e| SymbolParseError::Unreadable {
            path: rel.to_string(),
            reason: e.to_string(),
        })?;
        let source = String::from_utf8_lossy(&bytes);
        self.extract_source(&source, rel)
    }

    /// Extract every source file of a unit. Files are merged in path order;
    /// failing files are listed in the record's `failures`.
    pub fn extract_unit(&self, root: &Path, unit: &Unit) -> SymbolRecord {
        let mut record = SymbolRecord::new(&unit.name);
        let mut definitions = Vec::new();

        for rel in &unit.source_files {
            match self.extract_file(root, rel) {
                Ok(file) => {
                    record.files_parsed += 1;
                    record.types.extend(file.types);
                    record.enums.extend(file.enums);
                    record.callables.extend(file.callables);
                    record.aliases.extend(file.aliases);
                    record.delegates.extend(file.delegates);
                    definitions.extend(file.definitions);
                }
                Err(e) => {
                    warn!("Failed to extract {}: {}", rel, e);
                    record.failures.push(FileFailure {
                        file: rel.clone(),
                        kind: e.kind().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let unmatched = resolve_definitions(&mut record.callables, definitions);
        debug!(
            "Unit {}: {} symbols, {} out-of-line definitions without declaration",
            unit.name,
            record.symbol_count(),
            unmatched
        );
        record
    }
}

/// Attach out-of-line bodies to their declarations. A definition matches a
/// declaration with the same owner and name; among several overloads the
/// one with the same parameter count wins. Definitions without any
/// declaration become callables of their own. Returns how many did.
pub fn resolve_definitions(callables: &mut Vec<Callable>, definitions: Vec<Definition>) -> usize {
    // Declarations still waiting for a body, bucketed by name.
    let mut open: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, callable) in callables.iter().enumerate() {
        if callable.definition.is_none() {
            open.entry(callable.name.clone()).or_default().push(idx);
        }
    }

    let mut unmatched = 0;
    for def in definitions {
        let chosen = open.get_mut(&def.sig.name).and_then(|bucket| {
            let candidates: Vec<usize> = bucket
                .iter()
                .enumerate()
                .filter(|&(_, &idx)| {
                    owner_matches(&callables[idx], def.sig.qualifier.as_deref(), &def.namespace)
                })
                .map(|(pos, _)| pos)
                .collect();
            let pos = candidates
                .iter()
                .copied()
                .find(|&pos| callables[bucket[pos]].params.len() == def.sig.params.len())
                .or_else(|| candidates.first().copied())?;
            Some(bucket.remove(pos))
        });

        match chosen {
            Some(idx) => {
                let callable = &mut callables[idx];
                callable.definition = Some(def.location);
                if callable.doc.is_none() {
                    callable.doc = def.doc;
                }
                callable.calls.extend(def.calls);
                callable.calls.sort();
                callable.calls.dedup();
            }
            None => {
                unmatched += 1;
                callables.push(definition_callable(def));
            }
        }
    }
    unmatched
}

fn owner_matches(callable: &Callable, qualifier: Option<&str>, def_namespace: &str) -> bool {
    match (callable.owner.as_deref(), qualifier) {
        (Some(owner), Some(q)) => {
            // `AActor::Tick` may be defined as `AActor::Tick` or as
            // `UE::AActor::Tick` from outside the namespace.
            let full = crate::types::qualify(&callable.namespace, owner);
            let written = crate::types::qualify(def_namespace, q);
            owner == q || full == q || full == written || full.ends_with(&format!("::{q}"))
        }
        (None, None) => callable.namespace == def_namespace,
        (None, Some(q)) => {
            let written = crate::types::qualify(def_namespace, q);
            callable.namespace == q || callable.namespace == written
        }
        (Some(_), None) => false,
    }
}

fn definition_callable(def: Definition) -> Callable {
    Callable {
        name: def.sig.name,
        namespace: def.namespace,
        owner: def.sig.qualifier,
        return_type: def.sig.return_type,
        params: def.sig.params,
        is_pure_virtual: false,
        is_virtual: def.sig.is_virtual,
        is_static: def.sig.is_static,
        is_const: def.sig.is_const,
        doc: def.doc,
        declaration: def.location.clone(),
        definition: Some(def.location),
        macro_name: None,
        specifiers: Default::default(),
        calls: def.calls,
    }
}
