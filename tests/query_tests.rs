mod common;

use engine_kb::{DetailLevel, QueryCommand, QueryEngine};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

fn run(engine: &QueryEngine, command: &str, detail: DetailLevel) -> Value {
    let command: QueryCommand = command.parse().expect("parse command");
    engine.execute(&command, detail).expect("execute")
}

fn names(value: &Value) -> Vec<String> {
    value
        .as_array()
        .expect("list answer")
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other["name"].as_str().unwrap_or_default().to_string(),
        })
        .collect()
}

// ============================================================================
// Units
// ============================================================================

#[test]
fn dependents_of_a_leaf_unit() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    common::write_files(
        root,
        &[
            ("Source/Runtime/Core/Core.Build.cs", common::build_cs("Core", &[]).as_str()),
            (
                "Source/Runtime/Core/Public/CoreTypes.h",
                "struct FCoreThing { int32 Value; };\n",
            ),
            (
                "Source/Runtime/Engine/Engine.Build.cs",
                common::build_cs("Engine", &["Core"]).as_str(),
            ),
            (
                "Source/Runtime/Engine/Public/EngineThing.h",
                "struct FEngineThing { int32 Value; };\n",
            ),
        ],
    );

    let engine = common::built_engine(root);
    assert_eq!(run(&engine, "dependents Core", DetailLevel::Summary), json!(["Engine"]));
    assert_eq!(run(&engine, "dependents Engine", DetailLevel::Summary), json!([]));
    assert_eq!(run(&engine, "dependencies Engine", DetailLevel::Summary), json!(["Core"]));
}

#[test]
fn dependents_in_engine_fixture() {
    let temp = common::copy_fixture();
    let engine = common::built_engine(temp.path());

    assert_eq!(
        run(&engine, "dependents Core", DetailLevel::Summary),
        json!(["CoreUObject", "Engine", "UnrealEd"])
    );
    assert_eq!(
        run(&engine, "dependents --transitive CoreUObject", DetailLevel::Summary),
        json!(["Engine", "UnrealEd"])
    );
}

#[test]
fn dependencies_summary_and_details() {
    let temp = common::copy_fixture();
    let engine = common::built_engine(temp.path());

    assert_eq!(
        run(&engine, "dependencies Engine", DetailLevel::Summary),
        json!(["Core", "CoreUObject", "MovieScene", "Slate", "SlateCore"])
    );

    let details = run(&engine, "dependencies Engine", DetailLevel::Details);
    let movie_scene = details
        .as_array()
        .expect("list")
        .iter()
        .find(|d| d["unit"] == json!("MovieScene"))
        .cloned()
        .expect("dynamic dependency");
    assert_eq!(movie_scene["kind"], json!("dynamic"));
    assert_eq!(movie_scene["external"], json!(true));
}

#[test]
fn unknown_unit_is_a_miss() {
    let temp = common::copy_fixture();
    let engine = common::built_engine(temp.path());

    assert_eq!(
        run(&engine, "dependents Renderer", DetailLevel::Summary),
        json!({"error": "not found: Renderer", "fallback_command": "fuzzy_search Renderer"})
    );
}

// ============================================================================
// Symbols
// ============================================================================

#[test]
fn actor_parent_and_interfaces() {
    let temp = common::copy_fixture();
    let engine = common::built_engine(temp.path());

    let actor = run(&engine, "lookup type:AActor", DetailLevel::Summary);
    assert_eq!(actor["name"], json!("AActor"));
    assert_eq!(actor["parent"], json!("UObject"));
    assert_eq!(actor["interfaces"], json!(["IInterfaceX"]));
    assert_eq!(actor["unit"], json!("Engine"));
    assert_eq!(actor["ref_id"], json!("type:AActor"));

    // Plain name matches the class and its constructor.
    let by_name = run(&engine, "lookup AActor", DetailLevel::Summary);
    let class = by_name
        .as_array()
        .expect("several matches")
        .iter()
        .find(|v| v["kind"] == json!("class"))
        .cloned()
        .expect("class match");
    assert_eq!(class["parent"], json!("UObject"));
}

#[test]
fn missing_type_returns_exact_fallback() {
    let temp = common::copy_fixture();
    let engine = common::built_engine(temp.path());

    for detail in [DetailLevel::Summary, DetailLevel::Details, DetailLevel::Source] {
        assert_eq!(
            run(&engine, "lookup Foo", detail),
            json!({"error": "not found: Foo", "fallback_command": "fuzzy_search Foo"})
        );
    }
}

#[test]
fn details_extend_summary() {
    let temp = common::copy_fixture();
    let engine = common::built_engine(temp.path());

    for target in ["type:AActor", "AActor::Tick", "EAutoReceiveInput", "FVector3d", "unit:Engine"] {
        let summary = run(&engine, &format!("lookup {target}"), DetailLevel::Summary);
        let details = run(&engine, &format!("lookup {target}"), DetailLevel::Details);
        let summary = summary.as_object().expect("summary object");
        let details = details.as_object().expect("details object");

        for key in summary.keys() {
            assert!(details.contains_key(key), "{target}: details lacks {key}");
        }
        assert!(details.len() > summary.len(), "{target}: details adds nothing");
        assert!(details.contains_key("source_ref"));
        assert!(!summary.contains_key("source_ref"));
    }
}

#[test]
fn source_level_shows_definition_text() {
    let temp = common::copy_fixture();
    let engine = common::built_engine(temp.path());

    let tick = run(&engine, "lookup AActor::Tick", DetailLevel::Source);
    assert_eq!(tick["file_role"], json!("implementation"));
    assert!(tick["file"].as_str().expect("file").ends_with("Private/Actor.cpp"));
    assert!(tick["source"].as_str().expect("text").contains("void AActor::Tick"));

    let details = run(&engine, "lookup AActor::Tick", DetailLevel::Details);
    let source_ref = details["source_ref"].as_str().expect("source ref");
    let via_ref = run(&engine, &format!("source {source_ref}"), DetailLevel::Summary);
    assert_eq!(via_ref, tick);
}

#[test]
fn subtypes_direct_and_transitive() {
    let temp = common::copy_fixture();
    let engine = common::built_engine(temp.path());

    assert_eq!(
        names(&run(&engine, "subtypes UObject", DetailLevel::Summary)),
        vec!["AActor", "UEditorEngine"]
    );
    assert_eq!(
        names(&run(&engine, "subtypes --transitive UObject", DetailLevel::Summary)),
        vec!["AActor", "UEditorEngine", "APawn", "ACharacter"]
    );
    assert_eq!(run(&engine, "subtypes ACharacter", DetailLevel::Summary), json!([]));
}

#[test]
fn resolve_links_declaration_to_definition() {
    let temp = common::copy_fixture();
    let engine = common::built_engine(temp.path());

    let tick = run(&engine, "resolve AActor::Tick", DetailLevel::Summary);
    let tick = &tick.as_array().expect("list")[0];
    assert_eq!(tick["resolved"], json!(true));
    assert!(tick["declaration"]["file"].as_str().expect("decl").ends_with("Actor.h"));
    assert!(tick["definition"]["file"].as_str().expect("def").ends_with("Actor.cpp"));

    let ping = run(&engine, "resolve AActor::Ping", DetailLevel::Summary);
    assert_eq!(ping[0]["resolved"], json!(false));

    let alias = run(&engine, "resolve FEditorEngineAlias", DetailLevel::Summary);
    assert_eq!(alias[0]["resolved_to"], json!(["type:UEditorEngine"]));
}

// ============================================================================
// Masking
// ============================================================================

fn widget_engine() -> (QueryEngine, tempfile::TempDir) {
    let temp = tempfile::tempdir().expect("tempdir");
    let header: String = (0..120)
        .map(|i| format!("struct FWidget{i:03} {{ int32 Value; }};\n"))
        .collect();
    common::write_files(
        temp.path(),
        &[
            ("Source/Runtime/Panels/Panels.Build.cs", common::build_cs("Panels", &[]).as_str()),
            ("Source/Runtime/Panels/Public/PanelWidgets.h", header.as_str()),
        ],
    );
    let engine = common::built_engine(temp.path());
    (engine, temp)
}

#[test]
fn long_search_is_masked_and_expandable() {
    let (engine, _temp) = widget_engine();

    let masked = run(&engine, "fuzzy_search Widget", DetailLevel::Summary);
    assert_eq!(masked["masked"], json!(true));
    assert_eq!(masked["total"], json!(120));
    assert_eq!(masked["items"].as_array().map(Vec::len), Some(5));

    let ref_id = masked["ref_id"].as_str().expect("ref id");
    assert!(ref_id.starts_with("ref_"));
    let full = run(&engine, &format!("expand {ref_id}"), DetailLevel::Summary);
    assert_eq!(full.as_array().map(Vec::len), Some(120));
    assert_eq!(full[0], masked["items"][0]);
}

#[test]
fn search_limit_caps_results() {
    let (engine, _temp) = widget_engine();

    let limited = run(&engine, "fuzzy_search --limit 3 Widget", DetailLevel::Summary);
    assert_eq!(limited.as_array().map(Vec::len), Some(3));
    assert_eq!(run(&engine, "fuzzy_search Gizmo", DetailLevel::Summary), json!([]));
}

#[test]
fn references_survive_reopen() {
    let (engine, temp) = widget_engine();
    let masked = run(&engine, "fuzzy_search Widget", DetailLevel::Summary);
    let ref_id = masked["ref_id"].as_str().expect("ref id").to_string();
    engine.close().expect("close");

    let reopened = QueryEngine::open(&common::config(temp.path())).expect("reopen");
    let full = run(&reopened, &format!("expand {ref_id}"), DetailLevel::Summary);
    assert_eq!(full.as_array().map(Vec::len), Some(120));

    assert_eq!(
        run(&reopened, "expand ref_00000000", DetailLevel::Summary),
        json!({"error": "not found: ref_00000000"})
    );
}

// ============================================================================
// Symbol graph
// ============================================================================

fn inventory_engine() -> (QueryEngine, tempfile::TempDir) {
    let temp = tempfile::tempdir().expect("tempdir");
    common::write_files(
        temp.path(),
        &[
            ("Source/Runtime/Game/Game.Build.cs", common::build_cs("Game", &[]).as_str()),
            (
                "Source/Runtime/Game/Public/Inventory.h",
                "struct FItem\n{\n    int32 Count;\n};\n\nclass FInventory\n{\npublic:\n    void Add(FItem Item);\n    FItem* Find(FName Name) const;\n    void Clear();\n\nprivate:\n    FItem Slots;\n};\n",
            ),
            (
                "Source/Runtime/Game/Private/Inventory.cpp",
                "#include \"Inventory.h\"\n\nvoid FInventory::Add(FItem Item)\n{\n    if (Find(Item.Name) == nullptr)\n    {\n        Clear();\n    }\n}\n\nvoid FInventory::Clear()\n{\n}\n",
            ),
        ],
    );
    let engine = common::built_engine(temp.path());
    (engine, temp)
}

#[test]
fn references_list_symbols_naming_a_type() {
    let (engine, _temp) = inventory_engine();

    assert_eq!(
        names(&run(&engine, "references FItem", DetailLevel::Summary)),
        vec!["Add", "Find", "FInventory"]
    );
    assert_eq!(run(&engine, "references FInventory", DetailLevel::Summary), json!([]));
    assert_eq!(
        run(&engine, "references FMissing", DetailLevel::Summary),
        json!({"error": "not found: FMissing", "fallback_command": "fuzzy_search FMissing"})
    );
}

#[test]
fn callers_and_callees_follow_bodies() {
    let (engine, _temp) = inventory_engine();

    assert_eq!(
        names(&run(&engine, "callees FInventory::Add", DetailLevel::Summary)),
        vec!["Clear", "Find"]
    );
    assert_eq!(
        names(&run(&engine, "callers Clear", DetailLevel::Summary)),
        vec!["Add"]
    );
    assert_eq!(run(&engine, "callees FInventory::Clear", DetailLevel::Summary), json!([]));
    assert_eq!(run(&engine, "callers FItem", DetailLevel::Summary), json!([]));

    let detailed = run(&engine, "callers Clear", DetailLevel::Details);
    assert_eq!(detailed[0]["source_ref"], json!("src:fn:FInventory::Add(FItem)"));
    assert_eq!(detailed[0]["calls"], json!(["Clear", "Find"]));
}

#[test]
fn details_carry_index_bookkeeping() {
    let (engine, _temp) = inventory_engine();

    let summary = run(&engine, "lookup FInventory", DetailLevel::Summary);
    assert!(summary.get("member_ids").is_none());
    let details = run(&engine, "lookup FInventory", DetailLevel::Details);
    let mut members: Vec<String> = details["member_ids"]
        .as_array()
        .expect("member ids")
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    members.sort();
    assert_eq!(
        members,
        vec![
            "fn:FInventory::Add(FItem)",
            "fn:FInventory::Clear()",
            "fn:FInventory::Find(FName)"
        ]
    );

    let unit = run(&engine, "lookup unit:Game", DetailLevel::Details);
    assert!(unit["symbol_count"].as_u64().expect("symbol count") >= 5);
    assert!(unit["indexed_at"].as_str().is_some_and(|s| !s.is_empty()));
}
