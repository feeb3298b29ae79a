//! Parsing module for extracting dependency and symbol records.
//!
//! - [`build_cs`]: `*.Build.cs` manifests into dependency records
//! - [`cpp`]: C++ headers and implementation files into symbol records

pub mod build_cs;
pub mod cpp;

pub use build_cs::{ManifestExtraction, ManifestExtractor};
pub use cpp::{CppExtractor, FileSymbols, ScanLimits};

use std::path::Path;

/// How a source file participates in a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRole {
    Header,
    Implementation,
    Inline,
}

impl SourceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::Implementation => "implementation",
            Self::Inline => "inline",
        }
    }
}

/// Role of a source file based on its extension.
pub fn source_role(path: &Path) -> Option<SourceRole> {
    let ext = path.extension()?.to_str()?;
    match ext.to_lowercase().as_str() {
        "h" | "hpp" | "hh" | "hxx" => Some(SourceRole::Header),
        "cpp" | "cc" | "cxx" | "c" => Some(SourceRole::Implementation),
        "inl" | "ipp" => Some(SourceRole::Inline),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_follow_extensions() {
        assert_eq!(source_role(Path::new("A/Actor.h")), Some(SourceRole::Header));
        assert_eq!(source_role(Path::new("A/Actor.CPP")), Some(SourceRole::Implementation));
        assert_eq!(source_role(Path::new("A/Math.inl")), Some(SourceRole::Inline));
        assert_eq!(source_role(Path::new("A/A.Build.cs")), None);
    }
}
