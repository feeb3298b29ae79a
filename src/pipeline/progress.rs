//! Thread-safe progress aggregation for one stage run.
//!
//! Counters are atomics, error kinds live in a `DashMap` and issue samples
//! sit behind a `parking_lot::Mutex`. At most [`MAX_SAMPLES`] samples are
//! kept; counts stay exact.

use crate::state::{IssueSample, Stage, StageSummary};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

pub const MAX_SAMPLES: usize = 20;

#[derive(Debug)]
pub struct ProgressTracker {
    stage: Stage,
    started: Instant,
    total: usize,
    processed: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    warnings: AtomicUsize,
    error_kinds: DashMap<String, usize>,
    counts: DashMap<String, AtomicU64>,
    samples: Mutex<Vec<IssueSample>>,
}

impl ProgressTracker {
    pub fn new(stage: Stage, total: usize) -> Self {
        Self {
            stage,
            started: Instant::now(),
            total,
            processed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            warnings: AtomicUsize::new(0),
            error_kinds: DashMap::new(),
            counts: DashMap::new(),
            samples: Mutex::new(Vec::new()),
        }
    }

    pub fn processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// A unit failed outright.
    pub fn failure(&self, unit: &str, file: Option<&str>, kind: &str, message: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.issue(unit, file, kind, message);
    }

    /// A recoverable issue; the unit still counts as processed.
    pub fn warning(&self, unit: &str, file: Option<&str>, kind: &str, message: &str) {
        self.warnings.fetch_add(1, Ordering::Relaxed);
        self.issue(unit, file, kind, message);
    }

    pub fn add_count(&self, key: &str, n: u64) {
        self.counts
            .entry(key.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(n, Ordering::Relaxed);
    }

    fn issue(&self, unit: &str, file: Option<&str>, kind: &str, message: &str) {
        *self.error_kinds.entry(kind.to_string()).or_insert(0) += 1;
        let mut samples = self.samples.lock();
        if samples.len() < MAX_SAMPLES {
            samples.push(IssueSample {
                unit: unit.to_string(),
                file: file.map(str::to_string),
                kind: kind.to_string(),
                message: message.to_string(),
            });
        }
    }

    /// Snapshot into a persisted summary. Maps are sorted so equal runs
    /// serialize the same way.
    pub fn summary(&self) -> StageSummary {
        let error_kinds: BTreeMap<String, usize> = self
            .error_kinds
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        let counts: BTreeMap<String, u64> = self
            .counts
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();
        StageSummary {
            stage: self.stage,
            total: self.total,
            processed: self.processed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            warnings: self.warnings.load(Ordering::Relaxed),
            error_kinds,
            samples: self.samples.lock().clone(),
            counts,
            duration_ms: self.started.elapsed().as_millis() as u64,
            completed_at: Utc::now(),
            partition: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn samples_are_capped_but_counts_are_exact() {
        let tracker = ProgressTracker::new(Stage::Symbols, 50);
        (0..50).into_par_iter().for_each(|i| {
            tracker.failure(&format!("Unit{i}"), None, "unbalanced_braces", "bad");
        });
        let summary = tracker.summary();
        assert_eq!(summary.failed, 50);
        assert_eq!(summary.samples.len(), MAX_SAMPLES);
        assert_eq!(summary.error_kinds.get("unbalanced_braces"), Some(&50));
        assert!((summary.failure_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn counters_accumulate() {
        let tracker = ProgressTracker::new(Stage::Build, 3);
        tracker.processed();
        tracker.processed();
        tracker.skipped();
        tracker.add_count("symbols", 10);
        tracker.add_count("symbols", 5);
        tracker.warning("Engine", Some("Engine/A.h"), "collision", "dup");
        let summary = tracker.summary();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.warnings, 1);
        assert_eq!(summary.count("symbols"), 15);
        assert_eq!(summary.samples[0].file.as_deref(), Some("Engine/A.h"));
    }
}
