mod common;

use engine_kb::store::IndexEntry;
use engine_kb::{Partition, Stage, StageError, StageStatus, StageSummary, Store, StoreLayout, SymbolRecord};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;

fn summary<'a>(summaries: &'a [StageSummary], stage: Stage) -> &'a StageSummary {
    summaries
        .iter()
        .find(|s| s.stage == stage)
        .expect("stage summary")
}

/// Index rows and graphs, keyed by unit, read back from the store.
fn snapshot(root: &Path) -> Vec<(String, Vec<IndexEntry>, Option<String>)> {
    let layout = StoreLayout::new(common::config(root).store_dir());
    let store = Store::open_existing(layout.clone()).expect("open store");
    let mut out = Vec::new();
    for unit in store.unit_names().expect("unit names") {
        let entries = store.entries_for_unit(&unit).expect("entries");
        let graph = fs::read_to_string(layout.unit_graph(&unit)).ok();
        out.push((unit, entries, graph));
    }
    store.close().expect("close");
    out
}

// ============================================================================
// Idempotence
// ============================================================================

#[test]
fn rebuilding_unchanged_tree_gives_same_index() {
    let temp = common::copy_fixture();
    let pipeline = common::pipeline(temp.path());

    pipeline.run_all(false).expect("first build");
    let first = snapshot(temp.path());
    let first_graph =
        fs::read_to_string(pipeline.layout().dependency_graph()).expect("dependency graph");

    pipeline.run_all(true).expect("forced rebuild");
    assert_eq!(snapshot(temp.path()), first);
    assert_eq!(
        fs::read_to_string(pipeline.layout().dependency_graph()).expect("dependency graph"),
        first_graph
    );
}

#[test]
fn update_without_changes_reuses_everything() {
    let temp = common::copy_fixture();
    let pipeline = common::pipeline(temp.path());
    pipeline.run_all(false).expect("build");

    let summaries = pipeline.update().expect("update");
    let discover = summary(&summaries, Stage::Discover);
    assert_eq!(discover.count("unchanged"), 4);
    assert_eq!(discover.count("modified"), 0);

    for stage in [Stage::Extract, Stage::Symbols, Stage::Build] {
        let s = summary(&summaries, stage);
        assert_eq!(s.processed, 0, "{stage} reprocessed units");
        assert_eq!(s.skipped, 4, "{stage} did not reuse units");
    }
}

// ============================================================================
// Failure isolation
// ============================================================================

#[test]
fn malformed_file_does_not_fail_its_unit() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    common::write_files(
        root,
        &[
            ("Source/Runtime/Gadgets/Gadgets.Build.cs", common::build_cs("Gadgets", &[]).as_str()),
            ("Source/Runtime/Gadgets/Public/A.h", "struct FGadgetA { int32 Value; };\n"),
            ("Source/Runtime/Gadgets/Public/B.h", "struct FGadgetB { int32 Value; };\n"),
            ("Source/Runtime/Gadgets/Public/C.h", "struct FGadgetC { int32 Value; };\n"),
            ("Source/Runtime/Gadgets/Public/Broken.h", "/* never closed\nstruct FBroken {};\n"),
        ],
    );

    let pipeline = common::pipeline(root);
    let summaries = pipeline.run_all(false).expect("build");

    let symbols = summary(&summaries, Stage::Symbols);
    assert_eq!(symbols.failed, 0);
    assert_eq!(symbols.warnings, 1);
    assert_eq!(symbols.error_kinds.get("unterminated_comment"), Some(&1));

    let path = pipeline.layout().stage_artifact(Stage::Symbols, "Gadgets");
    let record: SymbolRecord =
        serde_json::from_str(&fs::read_to_string(path).expect("artifact")).expect("record");
    assert_eq!(record.files_parsed, 3);
    assert_eq!(record.failures.len(), 1);
    assert!(record.failures[0].file.ends_with("Broken.h"));
    assert_eq!(record.types.len(), 3);
}

#[test]
fn too_many_failed_units_fail_the_stage() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    common::write_files(
        root,
        &[
            ("Source/Runtime/Good/Good.Build.cs", common::build_cs("Good", &[]).as_str()),
            ("Source/Runtime/Good/Public/Good.h", "struct FGood {};\n"),
            ("Source/Runtime/Bad/Bad.Build.cs", common::build_cs("Bad", &[]).as_str()),
            ("Source/Runtime/Bad/Public/Bad.h", "/* never closed\n"),
        ],
    );

    let pipeline = common::pipeline(root);
    pipeline.run_stage("discover", false).expect("discover");
    pipeline.run_stage("extract", false).expect("extract");
    let err = pipeline.run_stage("symbols", false).expect_err("half the units failed");
    assert!(err.to_string().contains("failed for 1 of 2 units"));

    let status = pipeline.status().expect("status");
    assert_eq!(status.stages[&Stage::Symbols].status.as_str(), "failed");
}

// ============================================================================
// Incremental updates
// ============================================================================

#[test]
fn editing_one_unit_leaves_others_untouched() {
    let temp = common::copy_fixture();
    let root = temp.path();
    let pipeline = common::pipeline(root);
    pipeline.run_all(false).expect("build");
    let before = snapshot(root);

    let layout = pipeline.layout().clone();
    let store = Store::open_existing(layout.clone()).expect("store");
    let rows_before: Vec<_> = ["Core", "CoreUObject", "UnrealEd"]
        .iter()
        .map(|u| store.unit_row(u).expect("row"))
        .collect();
    store.close().expect("close");

    let header = root.join("Engine/Source/Runtime/Engine/Public/GameFramework/Pawn.h");
    let mut text = fs::read_to_string(&header).expect("read header");
    text.push_str("\nclass ENGINE_API ADefaultPawn : public APawn\n{\npublic:\n\tvoid MoveUp(float Val);\n};\n");
    fs::write(&header, text).expect("write header");

    let summaries = pipeline.update().expect("update");
    assert_eq!(summary(&summaries, Stage::Discover).count("modified"), 1);
    assert_eq!(summary(&summaries, Stage::Symbols).processed, 1);
    assert_eq!(summary(&summaries, Stage::Build).processed, 1);

    let after = snapshot(root);
    for (old, new) in before.iter().zip(&after) {
        if old.0 == "Engine" {
            assert_ne!(old, new);
        } else {
            assert_eq!(old, new, "unit {} changed", old.0);
        }
    }

    let store = Store::open_existing(layout).expect("store");
    let rows_after: Vec<_> = ["Core", "CoreUObject", "UnrealEd"]
        .iter()
        .map(|u| store.unit_row(u).expect("row"))
        .collect();
    assert_eq!(rows_before, rows_after);
    assert_eq!(store.lookup("ADefaultPawn").expect("lookup").len(), 1);
    store.close().expect("close");
}

#[test]
fn removed_unit_disappears_from_graph_and_index() {
    let temp = common::copy_fixture();
    let root = temp.path();
    let pipeline = common::pipeline(root);
    pipeline.run_all(false).expect("build");

    fs::remove_dir_all(root.join("Engine/Source/Editor/UnrealEd")).expect("remove unit");
    let summaries = pipeline.update().expect("update");
    assert_eq!(summary(&summaries, Stage::Discover).count("removed"), 1);
    assert_eq!(summary(&summaries, Stage::Build).count("removed"), 1);

    let store = Store::open_existing(pipeline.layout().clone()).expect("store");
    assert!(store.unit_row("UnrealEd").expect("row").is_none());
    assert!(store.lookup("UEditorEngine").expect("lookup").is_empty());
    let graph = store.dependency_graph().expect("graph").expect("graph exists");
    assert_eq!(
        graph.dependents("Core", false),
        Some(vec!["CoreUObject".to_string(), "Engine".to_string()])
    );
    store.close().expect("close");
}

#[test]
fn status_reports_units_and_markers() {
    let temp = common::copy_fixture();
    let pipeline = common::pipeline(temp.path());
    pipeline.run_all(false).expect("build");

    let status = pipeline.status().expect("status");
    assert_eq!(status.units, 4);
    for stage in Stage::ALL {
        assert_eq!(status.stages[&stage].status.as_str(), "completed");
    }

    pipeline.clear_stage("symbols").expect("clear");
    let status = pipeline.status().expect("status");
    assert_eq!(status.stages[&Stage::Extract].status.as_str(), "completed");
    assert_eq!(status.stages[&Stage::Symbols].status.as_str(), "pending");
    assert_eq!(status.stages[&Stage::Build].status.as_str(), "pending");
}

// ============================================================================
// Partitions
// ============================================================================

#[test]
fn partitions_run_separately_then_build_whole_tree() {
    let temp = common::copy_fixture();
    let pipeline = common::pipeline(temp.path());
    pipeline.run_stage("discover", false).expect("discover");
    let runtime = Partition::parse("Runtime").expect("partition");
    let editor = Partition::parse("editor").expect("partition");

    let extract = pipeline
        .run_stage_in("extract", false, Some(&runtime))
        .expect("runtime extract");
    assert_eq!(extract.total, 3);
    assert_eq!(extract.count("partition.Runtime"), 3);
    assert_eq!(extract.count("partition.Editor"), 0);

    pipeline
        .run_stage_in("symbols", false, Some(&runtime))
        .expect("runtime symbols");
    assert!(matches!(
        pipeline.run_stage("symbols", false),
        Err(StageError::Dependency { missing: Stage::Extract, .. })
    ));
    assert!(matches!(
        pipeline.run_stage_in("symbols", false, Some(&editor)),
        Err(StageError::Dependency { missing: Stage::Extract, .. })
    ));
    assert!(matches!(
        pipeline.run_stage_in("build", false, Some(&runtime)),
        Err(StageError::NotPartitionable(Stage::Build))
    ));

    let status = pipeline.status_in(Some(&editor)).expect("status");
    assert_eq!(status.stages[&Stage::Extract].status, StageStatus::Pending);
    assert_eq!(status.partitions.len(), 1);
    assert_eq!(status.partitions["Editor"].units, 1);
    assert_eq!(status.partitions["Editor"].completed[&Stage::Extract], 0);

    let editor_extract = pipeline
        .run_stage_in("extract", false, Some(&editor))
        .expect("editor extract");
    assert_eq!(editor_extract.total, 1);
    assert_eq!(
        pipeline.status().expect("status").stages[&Stage::Extract].status,
        StageStatus::Completed
    );

    let symbols = pipeline.run_stage("symbols", false).expect("symbols");
    assert_eq!(symbols.processed, 1);
    assert_eq!(symbols.skipped, 3);
    pipeline.run_stage("build", false).expect("build");

    let status = pipeline.status().expect("status");
    assert_eq!(status.partitions["Runtime"].completed[&Stage::Build], 3);
    assert_eq!(status.partitions["Editor"].completed[&Stage::Build], 1);
    assert!(status.symbols.is_some_and(|n| n > 0));
}
