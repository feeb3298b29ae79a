//! Error taxonomy.
//!
//! Per-file and per-unit errors (`ScanError`, `ManifestParseError`,
//! `SymbolParseError`) are collected into stage summaries and never abort a
//! stage on their own. `StageError` and `StoreError` are surfaced to the
//! caller as distinct error values. `QueryError` only covers malformed
//! query commands.

use crate::state::Stage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while walking the source tree.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("source root does not exist: {0}")]
    MissingRoot(PathBuf),

    #[error("failed to read {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("duplicate unit {name}: {duplicate} ignored, keeping {first}")]
    DuplicateUnit {
        name: String,
        first: PathBuf,
        duplicate: PathBuf,
    },

    #[error("invalid exclude pattern {pattern}: {reason}")]
    Pattern { pattern: String, reason: String },

    #[error("source file {path} lies under no unit directory; its symbols are dropped")]
    OrphanSource { path: PathBuf },
}

impl ScanError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingRoot(_) => "missing_root",
            Self::Unreadable { .. } => "unreadable",
            Self::DuplicateUnit { .. } => "duplicate_unit",
            Self::Pattern { .. } => "pattern",
            Self::OrphanSource { .. } => "orphan_source",
        }
    }

    /// File the issue is about, when it concerns a single file.
    pub fn file(&self) -> Option<&std::path::Path> {
        match self {
            Self::Unreadable { path, .. } | Self::OrphanSource { path } => Some(path),
            Self::DuplicateUnit { duplicate, .. } => Some(duplicate),
            Self::MissingRoot(_) | Self::Pattern { .. } => None,
        }
    }
}

/// Errors raised by the build manifest extractor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ManifestParseError {
    #[error("failed to read {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("malformed manifest at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("unsupported directive at line {line}: {directive}")]
    Unsupported { line: usize, directive: String },
}

impl ManifestParseError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unreadable { .. } => "unreadable",
            Self::Malformed { .. } => "malformed",
            Self::Unsupported { .. } => "unsupported",
        }
    }
}

/// Errors raised while extracting symbols from one source file.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SymbolParseError {
    #[error("failed to read {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("unterminated block comment starting at line {line}")]
    UnterminatedComment { line: usize },

    #[error("unbalanced closing brace at line {line}")]
    UnbalancedBraces { line: usize },

    #[error("nesting deeper than {limit} levels at line {line}")]
    NestingTooDeep { line: usize, limit: usize },

    #[error("statement starting at line {line} exceeds {limit} bytes")]
    RunawayStatement { line: usize, limit: usize },

    #[error("extractor panicked: {0}")]
    Panicked(String),
}

impl SymbolParseError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unreadable { .. } => "unreadable",
            Self::UnterminatedComment { .. } => "unterminated_comment",
            Self::UnbalancedBraces { .. } => "unbalanced_braces",
            Self::NestingTooDeep { .. } => "nesting_too_deep",
            Self::RunawayStatement { .. } => "runaway_statement",
            Self::Panicked(_) => "panicked",
        }
    }
}

/// Two units produced the same fully-qualified symbol key. The first-seen
/// entry is kept; this record notes the one that was dropped.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind} {key} from {dropped_unit} collides with {kept_unit}; keeping {kept_unit}")]
pub struct MergeCollision {
    pub key: String,
    pub kind: String,
    pub kept_unit: String,
    pub dropped_unit: String,
    pub dropped_file: String,
    pub dropped_line: usize,
}

/// Errors raised by the persisted store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no store found at {0}")]
    Missing(PathBuf),

    #[error("store is corrupted: {0}")]
    Corruption(String),

    #[error("store format version {found} is not supported (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid json at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}

/// Errors that fail a pipeline stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("unknown stage: {0}")]
    UnknownStage(String),

    #[error("stage {stage} requires {missing} to be completed first")]
    Dependency { stage: Stage, missing: Stage },

    #[error("stage {stage} failed for {failed} of {total} units (threshold {threshold})")]
    FailureRate {
        stage: Stage,
        failed: usize,
        total: usize,
        threshold: f64,
    },

    #[error("worker pool error: {0}")]
    Pool(String),

    #[error("invalid partition {pattern}: {reason}")]
    Partition { pattern: String, reason: String },

    #[error("stage {0} covers the whole tree and cannot run on a partition")]
    NotPartitionable(Stage),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for StageError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Sqlite(err))
    }
}

/// Errors raised while parsing a textual query command. Lookups that find
/// nothing are answered with a JSON miss, never with an error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("unknown query command: {0}")]
    UnknownCommand(String),

    #[error("{0} needs an argument")]
    MissingArgument(String),

    #[error("invalid option {option} for {command}")]
    InvalidOption { command: String, option: String },

    #[error("unknown detail level: {0} (expected summary, details or source)")]
    UnknownDetail(String),
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type StageResult<T> = Result<T, StageError>;
pub type QueryResult<T> = Result<T, QueryError>;
