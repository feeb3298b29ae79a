//! `*.Build.cs` manifest extraction.
//!
//! Only the dependency list directives matter:
//!
//! ```text
//! PublicDependencyModuleNames.AddRange(new string[] { "Core", "Engine" });
//! PrivateDependencyModuleNames.Add("Slate");
//! ```
//!
//! Everything else in the file is ignored. A directive whose argument is not
//! a literal (a variable, a method call) is reported as unsupported and
//! skipped; the rest of the manifest still counts.

use super::cpp::lexer;
use crate::error::ManifestParseError;
use crate::types::{DependencyKind, DependencyRecord, Unit};
use regex::Regex;
use std::fs;
use std::path::Path;

const LIST_NAMES: &[(&str, DependencyKind)] = &[
    ("PublicDependencyModuleNames", DependencyKind::Public),
    ("PrivateDependencyModuleNames", DependencyKind::Private),
    ("DynamicallyLoadedModuleNames", DependencyKind::Dynamic),
    ("WeakIncludePathsModuleNames", DependencyKind::Weak),
    ("CircularlyReferencedDependentModules", DependencyKind::Circular),
];

const DIRECTIVE_PATTERN: &str = r"\b(PublicDependencyModuleNames|PrivateDependencyModuleNames|DynamicallyLoadedModuleNames|WeakIncludePathsModuleNames|CircularlyReferencedDependentModules)\s*\.\s*(AddRange|Add)\s*\(";
const MODULE_CLASS_PATTERN: &str = r"\bclass\s+([A-Za-z_][A-Za-z0-9_]*)\s*:\s*ModuleRules\b";
const ARRAY_PATTERN: &str =
    r"(?s)^new\s*(?:string\s*\[\s*\]|\[\s*\]|List\s*<\s*string\s*>\s*(?:\(\s*\))?)\s*\{(.*)\}$";
const LITERAL_PATTERN: &str = r#"^@?"([^"\\]*)"$"#;

/// Result of parsing one manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestExtraction {
    /// Class name deriving from `ModuleRules`, or the file stem.
    pub module_name: String,
    pub record: DependencyRecord,
    /// Directives that were skipped.
    pub unsupported: Vec<ManifestParseError>,
}

#[derive(Debug, Clone)]
pub struct ManifestExtractor {
    directive: Regex,
    module_class: Regex,
    array: Regex,
    literal: Regex,
}

impl ManifestExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            directive: Regex::new(DIRECTIVE_PATTERN)?,
            module_class: Regex::new(MODULE_CLASS_PATTERN)?,
            array: Regex::new(ARRAY_PATTERN)?,
            literal: Regex::new(LITERAL_PATTERN)?,
        })
    }

    /// Read and parse a unit's manifest. The record is keyed by the unit
    /// name from discovery.
    pub fn extract_unit(&self, root: &Path, unit: &Unit) -> Result<ManifestExtraction, ManifestParseError> {
        let path = root.join(&unit.manifest_path);
        let bytes = fs::read(&path).map_err(|e| ManifestParseError::Unreadable {
            path: unit.manifest_path.clone(),
            reason: e.to_string(),
        })?;
        let text = String::from_utf8_lossy(&bytes);
        self.parse(&text, &unit.name)
    }

    pub fn parse(&self, text: &str, unit: &str) -> Result<ManifestExtraction, ManifestParseError> {
        let cleaned = lexer::strip_comments(text).map_err(|e| ManifestParseError::Malformed {
            line: match e {
                crate::error::SymbolParseError::UnterminatedComment { line } => line,
                _ => 1,
            },
            reason: e.to_string(),
        })?;
        let cleaned = String::from_utf8_lossy(&cleaned.text).into_owned();
        // Same offsets as `cleaned`, string bodies blanked. Directives are
        // searched here so text inside literals never matches.
        let masked = blank_string_bodies(&cleaned);

        let module_name = self
            .module_class
            .captures(&masked)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| unit.to_string());

        let mut record = DependencyRecord::empty(unit);
        let mut unsupported = Vec::new();

        for caps in self.directive.captures_iter(&masked) {
            let (Some(whole), Some(list), Some(method)) = (caps.get(0), caps.get(1), caps.get(2)) else {
                continue;
            };
            let line = line_of(&masked, whole.start());
            let open = whole.end() - 1;
            let close = matching_paren(&masked, open).ok_or_else(|| ManifestParseError::Malformed {
                line,
                reason: format!("unterminated argument list for {}", list.as_str()),
            })?;
            let argument = cleaned[open + 1..close].trim();
            let Some(kind) = list_kind(list.as_str()) else {
                continue;
            };

            let names = match method.as_str() {
                "Add" => self.single_literal(argument, line)?.map(|name| vec![name]),
                _ => self.array_literals(argument, line)?,
            };
            match names {
                Some(names) => {
                    for name in names {
                        record.push(kind, &name);
                    }
                }
                None => unsupported.push(ManifestParseError::Unsupported {
                    line,
                    directive: format!("{}.{}({})", list.as_str(), method.as_str(), argument),
                }),
            }
        }

        Ok(ManifestExtraction {
            module_name,
            record,
            unsupported,
        })
    }

    /// `Some(name)` for a string literal, `None` for anything else.
    fn single_literal(&self, argument: &str, line: usize) -> Result<Option<String>, ManifestParseError> {
        check_strings_closed(argument, line)?;
        Ok(self
            .literal
            .captures(argument)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string()))
    }

    /// `Some(names)` when the argument is an array/list initializer made of
    /// string literals only.
    fn array_literals(&self, argument: &str, line: usize) -> Result<Option<Vec<String>>, ManifestParseError> {
        check_strings_closed(argument, line)?;
        let Some(body) = self.array.captures(argument).and_then(|caps| caps.get(1)) else {
            if argument.starts_with("new") && !argument.contains('}') {
                return Err(ManifestParseError::Malformed {
                    line,
                    reason: "unterminated array initializer".to_string(),
                });
            }
            return Ok(None);
        };

        let mut names = Vec::new();
        for entry in body.as_str().split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            match self.literal.captures(entry).and_then(|caps| caps.get(1)) {
                Some(m) => names.push(m.as_str().to_string()),
                None => return Ok(None),
            }
        }
        Ok(Some(names))
    }
}

fn list_kind(list: &str) -> Option<DependencyKind> {
    LIST_NAMES
        .iter()
        .find(|(name, _)| *name == list)
        .map(|(_, kind)| *kind)
}

fn line_of(text: &str, offset: usize) -> usize {
    bytecount::count(&text.as_bytes()[..offset], b'\n') + 1
}

/// Closing parenthesis for the one at `open`, skipping string literals.
fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Replace the bodies of string and char literals with spaces, keeping the
/// quotes, newlines and every byte offset. Handles `\"` escapes and `@"..."`
/// verbatim strings where `""` is an escaped quote.
fn blank_string_bodies(text: &str) -> String {
    let src = text.as_bytes();
    let mut out = src.to_vec();
    let mut i = 0;
    while i < src.len() {
        match src[i] {
            b'"' => {
                let verbatim = i > 0 && src[i - 1] == b'@'
                    || i > 1 && src[i - 1] == b'$' && src[i - 2] == b'@';
                let mut j = i + 1;
                while j < src.len() {
                    match src[j] {
                        b'"' if verbatim && src.get(j + 1) == Some(&b'"') => j += 2,
                        b'"' => break,
                        b'\\' if !verbatim => j += 2,
                        b'\n' if !verbatim => break,
                        _ => j += 1,
                    }
                }
                let end = j.min(src.len());
                for b in &mut out[i + 1..end] {
                    if *b != b'\n' {
                        *b = b' ';
                    }
                }
                // Past the closing quote; an unterminated literal stops at
                // the end of its line and stays visible to the checks below.
                i = if end < src.len() && src[end] == b'"' { end + 1 } else { end };
            }
            b'\'' => {
                let end = if src.get(i + 1) == Some(&b'\\') { i + 3 } else { i + 2 };
                if src.get(end) == Some(&b'\'') {
                    for b in &mut out[i + 1..end] {
                        *b = b' ';
                    }
                    i = end + 1;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn check_strings_closed(argument: &str, line: usize) -> Result<(), ManifestParseError> {
    if argument.bytes().filter(|b| *b == b'"').count() % 2 == 1 {
        return Err(ManifestParseError::Malformed {
            line,
            reason: "unterminated string literal".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn extractor() -> ManifestExtractor {
        ManifestExtractor::new().expect("patterns compile")
    }

    const ENGINE_BUILD_CS: &str = r#"
// Copyright Epic Games, Inc. All Rights Reserved.
using UnrealBuildTool;

public class Engine : ModuleRules
{
    public Engine(ReadOnlyTargetRules Target) : base(Target)
    {
        PCHUsage = PCHUsageMode.UseExplicitOrSharedPCHs;

        PublicDependencyModuleNames.AddRange(
            new string[] {
                "Core",
                "CoreUObject", // reflection
                /* "Disabled", */
                "Core",
            }
        );

        PrivateDependencyModuleNames.Add("Slate");
        DynamicallyLoadedModuleNames.AddRange(new[] { "MovieScene" });
        WeakIncludePathsModuleNames.AddRange(new List<string>() { "Renderer" });
        CircularlyReferencedDependentModules.Add("UMG");

        if (Target.bBuildEditor)
        {
            PrivateDependencyModuleNames.AddRange(new string[] { "UnrealEd" });
        }
    }
}
"#;

    #[test]
    fn extracts_all_dependency_lists() {
        let result = extractor().parse(ENGINE_BUILD_CS, "Engine").expect("parse");
        assert_eq!(result.module_name, "Engine");
        assert_eq!(result.record.unit, "Engine");
        assert_eq!(result.record.public, vec!["Core", "CoreUObject"]);
        assert_eq!(result.record.private, vec!["Slate", "UnrealEd"]);
        assert_eq!(result.record.dynamic, vec!["MovieScene"]);
        assert_eq!(result.record.weak, vec!["Renderer"]);
        assert_eq!(result.record.circular, vec!["UMG"]);
        assert!(result.unsupported.is_empty());
    }

    #[test]
    fn missing_class_falls_back_to_unit_name() {
        let text = r#"PublicDependencyModuleNames.Add("Core");"#;
        let result = extractor().parse(text, "Tiny").expect("parse");
        assert_eq!(result.module_name, "Tiny");
        assert_eq!(result.record.public, vec!["Core"]);
    }

    #[test]
    fn variable_arguments_are_unsupported_but_not_fatal() {
        let text = r#"
PublicDependencyModuleNames.AddRange(SharedModules);
PrivateDependencyModuleNames.Add("Slate");
"#;
        let result = extractor().parse(text, "Game").expect("parse");
        assert_eq!(result.record.private, vec!["Slate"]);
        assert!(result.record.public.is_empty());
        assert_eq!(result.unsupported.len(), 1);
        assert!(matches!(
            result.unsupported[0],
            ManifestParseError::Unsupported { line: 2, .. }
        ));
    }

    #[test]
    fn unterminated_argument_is_malformed() {
        let text = "\n\nPublicDependencyModuleNames.AddRange(new string[] { \"Core\" ";
        let err = extractor().parse(text, "Broken").expect_err("malformed");
        assert!(matches!(err, ManifestParseError::Malformed { line: 3, .. }));
    }

    #[test]
    fn directive_text_inside_strings_is_not_a_directive() {
        let text = r#"
public class Tools : ModuleRules
{
    public Tools(ReadOnlyTargetRules Target) : base(Target)
    {
        string Note = "PublicDependencyModuleNames.Add(\"Fake\")";
        string Path = @"C:\Temp\PrivateDependencyModuleNames.AddRange(""x"";";
        char Quote = '"';
        PublicDependencyModuleNames.Add("Core");
        Log("class Fake : ModuleRules");
    }
}
"#;
        let result = extractor().parse(text, "Tools").expect("parse");
        assert_eq!(result.module_name, "Tools");
        assert_eq!(result.record.public, vec!["Core"]);
        assert!(result.record.private.is_empty());
        assert!(result.unsupported.is_empty());
    }

    #[test]
    fn string_bodies_are_blanked_in_place() {
        let text = "Add(\"a\\\"b\") // \"x\"\n@\"q\"\"r\"";
        let masked = blank_string_bodies(text);
        assert_eq!(masked.len(), text.len());
        assert_eq!(masked, "Add(\"    \") // \" \"\n@\"    \"");
    }

    #[test]
    fn unknown_directives_are_ignored() {
        let text = r#"
bEnableExceptions = true;
PublicIncludePaths.Add("Public");
PublicDefinitions.Add("WITH_FOO=1");
"#;
        let result = extractor().parse(text, "Quiet").expect("parse");
        assert!(result.record.is_empty());
        assert!(result.unsupported.is_empty());
    }

    #[test]
    fn unreadable_manifest_is_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let unit = Unit {
            name: "Gone".to_string(),
            manifest_path: "Gone/Gone.Build.cs".to_string(),
            dir: "Gone".to_string(),
            category: "Unknown".to_string(),
            content_hash: String::new(),
            source_files: Vec::new(),
        };
        let err = extractor().extract_unit(temp.path(), &unit).expect_err("missing");
        assert_eq!(err.kind(), "unreadable");
    }
}
