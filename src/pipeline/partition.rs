//! Unit partitions.
//!
//! A partition selects units by category. Each pattern is either a category
//! prefix matched on `.` boundaries (`Runtime`, `Plugins.Runtime`) or a glob
//! over the category (`Plugins.*`, `Platforms.{Mac,IOS}`). Matching ignores
//! case. Several patterns are joined with commas.

use crate::error::{StageError, StageResult};
use globset::{GlobBuilder, GlobMatcher};
use std::fmt;

#[derive(Debug, Clone)]
enum Pattern {
    Prefix(String),
    Glob(GlobMatcher),
}

#[derive(Debug, Clone)]
pub struct Partition {
    text: String,
    patterns: Vec<Pattern>,
}

impl Partition {
    pub fn parse(text: &str) -> StageResult<Self> {
        let mut patterns = Vec::new();
        for raw in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if raw.contains(['*', '?', '[', '{']) {
                let glob = GlobBuilder::new(raw)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| StageError::Partition {
                        pattern: raw.to_string(),
                        reason: e.to_string(),
                    })?;
                patterns.push(Pattern::Glob(glob.compile_matcher()));
            } else {
                patterns.push(Pattern::Prefix(raw.trim_end_matches('.').to_lowercase()));
            }
        }
        if patterns.is_empty() {
            return Err(StageError::Partition {
                pattern: text.to_string(),
                reason: "no category pattern given".to_string(),
            });
        }
        Ok(Self {
            text: text.trim().to_string(),
            patterns,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn matches(&self, category: &str) -> bool {
        let lowered = category.to_lowercase();
        self.patterns.iter().any(|pattern| match pattern {
            Pattern::Prefix(prefix) => {
                lowered == *prefix
                    || lowered
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
            }
            Pattern::Glob(glob) => glob.is_match(category),
        })
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl std::str::FromStr for Partition {
    type Err = StageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_match_on_segment_boundaries() {
        let runtime = Partition::parse("Runtime").expect("parse");
        assert!(runtime.matches("Runtime"));
        assert!(runtime.matches("runtime"));
        assert!(!runtime.matches("RuntimeExtras"));
        assert!(!runtime.matches("Plugins.Runtime.Foo"));

        let plugins = Partition::parse("Plugins.Runtime").expect("parse");
        assert!(plugins.matches("Plugins.Runtime.GameplayAbilities"));
        assert!(!plugins.matches("Plugins.Editor.Foo"));
    }

    #[test]
    fn globs_and_lists() {
        let partition: Partition = "Editor, Plugins.*".parse().expect("parse");
        assert!(partition.matches("Editor"));
        assert!(partition.matches("Plugins.Runtime.Foo"));
        assert!(!partition.matches("Runtime"));
        assert_eq!(partition.to_string(), "Editor, Plugins.*");
    }

    #[test]
    fn empty_or_broken_patterns_are_rejected() {
        assert!(matches!(
            Partition::parse(" , "),
            Err(StageError::Partition { .. })
        ));
        assert!(matches!(
            Partition::parse("Plugins.[x"),
            Err(StageError::Partition { .. })
        ));
    }
}
