//! Detail-level renderings of index entries.
//!
//! Summary and details are built by the same function so every summary
//! field is also a details field. Summary caps member lists; details lists
//! them in full and adds the remaining attributes plus a `source_ref`.
//! Neither includes source text: that is only reachable through
//! [`source_view`] with a source id.

use crate::parsing::source_role;
use crate::store::IndexEntry;
use crate::types::{Callable, DelegateDecl, DependencyRecord, EnumDecl, TypeAlias, TypeDecl, Unit};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::Path;

/// Prefix of source ids handed out in `source_ref`.
pub const SOURCE_PREFIX: &str = "src:";

pub fn source_id(key: &str) -> String {
    format!("{SOURCE_PREFIX}{key}")
}

/// Symbol key named by a source id. Bare keys are accepted as well.
pub fn key_from_source_id(id: &str) -> &str {
    id.strip_prefix(SOURCE_PREFIX).unwrap_or(id)
}

/// Plain name to search for when a key or id misses
/// (`src:fn:UE::AActor::Tick(float)` → `Tick`).
pub fn search_term(id: &str) -> &str {
    let key = key_from_source_id(id);
    let body = match key.split_once(':') {
        Some((prefix, rest)) if !prefix.is_empty() && !prefix.contains("::") => rest,
        _ => key,
    };
    let body = body.split('(').next().unwrap_or(body);
    body.rsplit("::").next().unwrap_or(body)
}

fn capped<T: Clone>(items: &[T], cap: Option<usize>) -> Vec<T> {
    match cap {
        Some(cap) => items.iter().take(cap).cloned().collect(),
        None => items.to_vec(),
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Summary when `full` is false, details when true.
pub fn entry_view(entry: &IndexEntry, full: bool, member_cap: usize) -> Value {
    let cap = if full { None } else { Some(member_cap) };
    let mut view = Map::new();
    view.insert("id".into(), json!(entry.key));
    view.insert("kind".into(), json!(entry.kind));
    view.insert("name".into(), json!(entry.name));
    view.insert("qualified_name".into(), json!(entry.qualified_name));
    view.insert("unit".into(), json!(entry.unit));
    view.insert("file".into(), json!(entry.file));
    view.insert("line".into(), json!(entry.line));

    match entry.kind.as_str() {
        "class" | "struct" | "union" => {
            if let Ok(ty) = serde_json::from_str::<TypeDecl>(&entry.payload) {
                type_fields(&mut view, &ty, cap);
            }
        }
        "enum" => {
            if let Ok(e) = serde_json::from_str::<EnumDecl>(&entry.payload) {
                enum_fields(&mut view, &e, cap);
            }
        }
        "method" | "function" => {
            if let Ok(c) = serde_json::from_str::<Callable>(&entry.payload) {
                callable_fields(&mut view, &c, full);
            }
        }
        "alias" => {
            if let Ok(a) = serde_json::from_str::<TypeAlias>(&entry.payload) {
                view.insert("target".into(), json!(a.target));
                view.insert("form".into(), to_value(&a.form));
                if full {
                    view.insert("doc".into(), json!(a.doc));
                }
            }
        }
        "delegate" => {
            if let Ok(d) = serde_json::from_str::<DelegateDecl>(&entry.payload) {
                view.insert("delegate_kind".into(), json!(d.kind.as_str()));
                view.insert("param_count".into(), json!(d.params.len()));
                if full {
                    view.insert("params".into(), to_value(&d.params));
                    view.insert("specifiers".into(), to_value(&d.specifiers));
                    view.insert("doc".into(), json!(d.doc));
                }
            }
        }
        "unit" => unit_fields(&mut view, entry, cap),
        _ => {}
    }

    view.insert("ref_id".into(), json!(entry.key));
    if full {
        if let Some(signature) = &entry.signature {
            view.insert("signature".into(), json!(signature));
        }
        view.insert("source_ref".into(), json!(source_id(&entry.key)));
    }
    Value::Object(view)
}

fn type_fields(view: &mut Map<String, Value>, ty: &TypeDecl, cap: Option<usize>) {
    view.insert("parent".into(), json!(ty.parent));
    view.insert("interfaces".into(), json!(ty.interfaces));
    view.insert("method_count".into(), json!(ty.methods.len()));
    view.insert("methods".into(), json!(capped(&ty.methods, cap)));
    view.insert("property_count".into(), json!(ty.properties.len()));
    if cap.is_some() {
        let names: Vec<&str> = ty.properties.iter().map(|p| p.name.as_str()).collect();
        view.insert("properties".into(), json!(capped(&names, cap)));
        return;
    }
    view.insert("properties".into(), to_value(&ty.properties));
    view.insert("namespace".into(), json!(ty.namespace));
    view.insert("bases".into(), json!(ty.bases));
    view.insert("macro".into(), json!(ty.macro_name));
    view.insert("specifiers".into(), to_value(&ty.specifiers));
    view.insert("doc".into(), json!(ty.doc));
}

fn enum_fields(view: &mut Map<String, Value>, e: &EnumDecl, cap: Option<usize>) {
    view.insert("value_count".into(), json!(e.values.len()));
    view.insert("values".into(), json!(capped(&e.values, cap)));
    if cap.is_none() {
        view.insert("scoped".into(), json!(e.scoped));
        view.insert("underlying".into(), json!(e.underlying));
        view.insert("macro".into(), json!(e.macro_name));
        view.insert("specifiers".into(), to_value(&e.specifiers));
        view.insert("doc".into(), json!(e.doc));
    }
}

fn callable_fields(view: &mut Map<String, Value>, c: &Callable, full: bool) {
    view.insert("owner".into(), json!(c.owner));
    view.insert("params".into(), json!(c.param_types()));
    view.insert("has_definition".into(), json!(c.definition.is_some()));
    if full {
        view.insert("return_type".into(), json!(c.return_type));
        view.insert("parameters".into(), to_value(&c.params));
        view.insert("is_virtual".into(), json!(c.is_virtual));
        view.insert("is_pure_virtual".into(), json!(c.is_pure_virtual));
        view.insert("is_static".into(), json!(c.is_static));
        view.insert("is_const".into(), json!(c.is_const));
        view.insert("declaration".into(), to_value(&c.declaration));
        view.insert("definition".into(), to_value(&c.definition));
        view.insert("calls".into(), json!(c.calls));
        view.insert("macro".into(), json!(c.macro_name));
        view.insert("specifiers".into(), to_value(&c.specifiers));
        view.insert("doc".into(), json!(c.doc));
    }
}

fn unit_fields(view: &mut Map<String, Value>, entry: &IndexEntry, cap: Option<usize>) {
    let payload = entry.payload_value();
    let deps: DependencyRecord = payload
        .get("dependencies")
        .and_then(|d| serde_json::from_value(d.clone()).ok())
        .unwrap_or_else(|| DependencyRecord::empty(&entry.unit));
    let unit: Option<Unit> = payload
        .get("unit")
        .and_then(|u| serde_json::from_value(u.clone()).ok());

    view.insert(
        "category".into(),
        json!(unit.as_ref().map(|u| u.category.as_str())),
    );
    view.insert(
        "dependency_count".into(),
        json!(deps.public.len() + deps.private.len() + deps.dynamic.len()),
    );
    view.insert("public".into(), json!(capped(&deps.public, cap)));
    view.insert("private".into(), json!(capped(&deps.private, cap)));
    if cap.is_none() {
        view.insert("dynamic".into(), json!(deps.dynamic));
        view.insert("weak".into(), json!(deps.weak));
        view.insert("circular".into(), json!(deps.circular));
        if let Some(unit) = unit {
            view.insert("dir".into(), json!(unit.dir));
            view.insert("content_hash".into(), json!(unit.content_hash));
            view.insert("file_count".into(), json!(unit.source_files.len()));
        }
    }
}

/// Location whose text the source level shows: the definition for callables
/// that have one, otherwise the declaration.
fn source_location(entry: &IndexEntry) -> (String, usize) {
    if matches!(entry.kind.as_str(), "method" | "function") {
        if let Ok(c) = serde_json::from_str::<Callable>(&entry.payload) {
            if let Some(def) = c.definition {
                return (def.file, def.line);
            }
        }
    }
    (entry.file.clone(), entry.line)
}

/// Verbatim text around an entry, `window` lines on each side.
pub fn source_view(entry: &IndexEntry, source_root: &Path, window: usize) -> Value {
    let (file, line) = source_location(entry);
    let path = source_root.join(&file);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            return json!({
                "error": format!("source unavailable: {file}: {e}"),
                "fallback_command": format!("lookup {}", entry.key),
            });
        }
    };

    let newlines = bytecount::count(&bytes, b'\n');
    let total_lines = if bytes.last().is_some_and(|b| *b != b'\n') {
        newlines + 1
    } else {
        newlines
    };
    let line = line.clamp(1, total_lines.max(1));
    let start = line.saturating_sub(window).max(1);
    let end = (line + window).min(total_lines.max(1));

    let text = String::from_utf8_lossy(&bytes);
    let excerpt: Vec<&str> = text
        .lines()
        .skip(start - 1)
        .take(end + 1 - start)
        .collect();

    json!({
        "id": source_id(&entry.key),
        "name": entry.qualified_name,
        "kind": entry.kind,
        "file": file,
        "file_role": source_role(Path::new(&file)).map(|r| r.as_str()),
        "line": line,
        "start_line": start,
        "end_line": end,
        "total_lines": total_lines,
        "source": excerpt.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::index::entries_for_record;
    use crate::types::{Location, PropertyDecl, Specifiers, SymbolRecord, TypeKind};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn actor() -> TypeDecl {
        TypeDecl {
            name: "AActor".to_string(),
            namespace: String::new(),
            kind: TypeKind::Class,
            bases: vec!["UObject".to_string(), "IInterfaceX".to_string()],
            parent: Some("UObject".to_string()),
            interfaces: vec!["IInterfaceX".to_string()],
            methods: (0..8).map(|i| format!("Method{i}")).collect(),
            properties: vec![PropertyDecl {
                name: "RootComponent".to_string(),
                type_name: "USceneComponent*".to_string(),
                macro_name: Some("UPROPERTY".to_string()),
                specifiers: Specifiers::new(),
                doc: None,
                line: 4,
            }],
            doc: Some("Base actor.".to_string()),
            location: Location::new("Engine/Public/Actor.h", 2),
            macro_name: Some("UCLASS".to_string()),
            specifiers: Specifiers::new(),
        }
    }

    fn actor_entry() -> IndexEntry {
        let record = SymbolRecord {
            unit: "Engine".to_string(),
            types: vec![actor()],
            ..Default::default()
        };
        entries_for_record(&record)
            .into_iter()
            .next()
            .expect("entry")
    }

    fn keys(value: &Value) -> BTreeSet<String> {
        value
            .as_object()
            .expect("object")
            .keys()
            .cloned()
            .collect()
    }

    #[test]
    fn summary_fields_are_a_strict_subset_of_details() {
        let entry = actor_entry();
        let summary = entry_view(&entry, false, 5);
        let details = entry_view(&entry, true, 5);

        let summary_keys = keys(&summary);
        let detail_keys = keys(&details);
        assert!(summary_keys.is_subset(&detail_keys));
        assert!(summary_keys.len() < detail_keys.len());
        assert!(!detail_keys.contains("source"));

        assert_eq!(summary["parent"], json!("UObject"));
        assert_eq!(summary["interfaces"], json!(["IInterfaceX"]));
        assert_eq!(summary["method_count"], json!(8));
        assert_eq!(summary["methods"].as_array().map(Vec::len), Some(5));
        assert_eq!(details["methods"].as_array().map(Vec::len), Some(8));
        assert_eq!(details["source_ref"], json!("src:type:AActor"));
    }

    #[test]
    fn search_terms_come_from_keys() {
        assert_eq!(search_term("src:fn:UE::AActor::Tick(float)"), "Tick");
        assert_eq!(search_term("type:AActor"), "AActor");
        assert_eq!(search_term("Foo"), "Foo");
    }

    #[test]
    fn source_window_is_clamped_to_the_file() {
        let temp = TempDir::new().expect("tempdir");
        let dir = temp.path().join("Engine/Public");
        fs::create_dir_all(&dir).expect("mkdir");
        let text: String = (1..=30).map(|i| format!("line {i}\n")).collect();
        fs::write(dir.join("Actor.h"), text).expect("write");

        let entry = actor_entry();
        let view = source_view(&entry, temp.path(), 3);
        assert_eq!(view["start_line"], json!(1));
        assert_eq!(view["end_line"], json!(5));
        assert_eq!(view["total_lines"], json!(30));
        assert_eq!(view["file_role"], json!("header"));
        assert_eq!(view["source"], json!("line 1\nline 2\nline 3\nline 4\nline 5"));

        let missing = source_view(&entry, &temp.path().join("nowhere"), 3);
        assert!(missing["error"].as_str().unwrap_or("").starts_with("source unavailable"));
    }
}
