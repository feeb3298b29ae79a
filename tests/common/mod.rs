//! Shared helpers for integration tests.

#![allow(dead_code)]

use engine_kb::{KbConfig, Pipeline, QueryEngine};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub fn fixture_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("engine")
}

/// Copy the engine fixture into a fresh temp dir.
pub fn copy_fixture() -> TempDir {
    let src_root = fixture_root();
    let temp = tempfile::tempdir().expect("tempdir");

    for entry in walkdir::WalkDir::new(&src_root) {
        let entry = entry.expect("walkdir entry");
        let path = entry.path();
        let rel = path.strip_prefix(&src_root).expect("strip prefix");
        let dest = temp.path().join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest).expect("create dir");
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).expect("create parent");
            }
            fs::copy(path, &dest).expect("copy file");
        }
    }

    temp
}

/// Write `(relative path, content)` pairs under `root`.
pub fn write_files(root: &Path, files: &[(&str, &str)]) {
    for (rel, content) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, content).expect("write file");
    }
}

/// A minimal manifest declaring public dependencies.
pub fn build_cs(unit: &str, public: &[&str]) -> String {
    let deps: Vec<String> = public.iter().map(|d| format!("\"{d}\"")).collect();
    format!(
        "using UnrealBuildTool;\n\npublic class {unit} : ModuleRules\n{{\n\tpublic {unit}(ReadOnlyTargetRules Target) : base(Target)\n\t{{\n\t\tPublicDependencyModuleNames.AddRange(new string[] {{ {} }});\n\t}}\n}}\n",
        deps.join(", ")
    )
}

pub fn config(root: &Path) -> KbConfig {
    KbConfig::new(root).with_workers(2)
}

pub fn pipeline(root: &Path) -> Pipeline {
    Pipeline::new(config(root)).expect("pipeline")
}

/// Build everything under `root` and open a query engine on the result.
pub fn built_engine(root: &Path) -> QueryEngine {
    pipeline(root).run_all(false).expect("run all");
    QueryEngine::open(&config(root)).expect("open engine")
}
