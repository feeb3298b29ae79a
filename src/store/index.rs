//! Flat symbol index rows.
//!
//! Rows are derived from symbol records without touching the database
//! ([`entries_for_record`], [`unit_entry`]) so derivation can run on worker
//! threads. Writes go through a single transaction on the coordinator.

use crate::error::{MergeCollision, StoreResult};
use crate::symbol_graph::{callable_id, callable_kind, type_id};
use crate::types::{
    is_interface_name, AliasForm, Callable, DelegateDecl, DependencyRecord, EnumDecl, SymbolRecord,
    TypeAlias, TypeDecl, Unit,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One index row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Stable key, unique across the index (`type:UE::AActor`).
    pub key: String,
    pub unit: String,
    pub kind: String,
    pub name: String,
    pub qualified_name: String,
    pub owner: Option<String>,
    pub parent: Option<String>,
    pub file: String,
    pub line: usize,
    pub signature: Option<String>,
    /// JSON of the full declaration.
    pub payload: String,
    /// `(base name, relation)` for types; relation is `inherits` or
    /// `implements`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bases: Vec<(String, String)>,
}

impl IndexEntry {
    pub fn payload_value(&self) -> serde_json::Value {
        serde_json::from_str(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

impl std::fmt::Display for IndexEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} [{}] {} ({})",
            self.file, self.line, self.kind, self.qualified_name, self.unit
        )
    }
}

/// Unit row as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRow {
    pub name: String,
    pub category: String,
    pub manifest_path: String,
    pub dir: String,
    pub content_hash: String,
    pub module_name: Option<String>,
    pub dependencies: DependencyRecord,
    pub file_count: usize,
    pub symbol_count: usize,
    pub indexed_at: String,
}

// ============================================================================
// Derivation
// ============================================================================

/// Base name without template arguments or namespace qualification.
pub fn base_simple_name(base: &str) -> String {
    let head = base.split('<').next().unwrap_or(base).trim();
    head.rsplit("::").next().unwrap_or(head).trim().to_string()
}

fn to_payload<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

fn type_entry(unit: &str, ty: &TypeDecl) -> IndexEntry {
    let qualified = ty.qualified_name();
    let mut signature = format!("{} {}", ty.kind.as_str(), qualified);
    if !ty.bases.is_empty() {
        signature.push_str(" : ");
        signature.push_str(&ty.bases.join(", "));
    }
    let bases = ty
        .bases
        .iter()
        .map(|base| {
            let simple = base_simple_name(base);
            let relation = if is_interface_name(&simple) {
                "implements"
            } else {
                "inherits"
            };
            (simple, relation.to_string())
        })
        .collect();
    IndexEntry {
        key: type_id(&qualified),
        unit: unit.to_string(),
        kind: ty.kind.as_str().to_string(),
        name: ty.name.clone(),
        qualified_name: qualified,
        owner: None,
        parent: ty.parent.clone(),
        file: ty.location.file.clone(),
        line: ty.location.line,
        signature: Some(signature),
        payload: to_payload(ty),
        bases,
    }
}

fn enum_entry(unit: &str, e: &EnumDecl) -> IndexEntry {
    let qualified = e.qualified_name();
    let mut signature = if e.scoped {
        format!("enum class {qualified}")
    } else {
        format!("enum {qualified}")
    };
    if let Some(underlying) = &e.underlying {
        signature.push_str(" : ");
        signature.push_str(underlying);
    }
    IndexEntry {
        key: format!("enum:{qualified}"),
        unit: unit.to_string(),
        kind: "enum".to_string(),
        name: e.name.clone(),
        qualified_name: qualified,
        owner: None,
        parent: None,
        file: e.location.file.clone(),
        line: e.location.line,
        signature: Some(signature),
        payload: to_payload(e),
        bases: Vec::new(),
    }
}

fn callable_entry(unit: &str, c: &Callable) -> IndexEntry {
    IndexEntry {
        key: callable_id(c),
        unit: unit.to_string(),
        kind: callable_kind(c).to_string(),
        name: c.name.clone(),
        qualified_name: c.qualified_name(),
        owner: c.owner.clone(),
        parent: None,
        file: c.declaration.file.clone(),
        line: c.declaration.line,
        signature: Some(c.signature()),
        payload: to_payload(c),
        bases: Vec::new(),
    }
}

fn alias_entry(unit: &str, a: &TypeAlias) -> IndexEntry {
    let qualified = a.qualified_name();
    let signature = match a.form {
        AliasForm::Using => format!("using {} = {}", a.name, a.target),
        AliasForm::Typedef => format!("typedef {} {}", a.target, a.name),
    };
    IndexEntry {
        key: format!("alias:{qualified}"),
        unit: unit.to_string(),
        kind: "alias".to_string(),
        name: a.name.clone(),
        qualified_name: qualified,
        owner: None,
        parent: None,
        file: a.location.file.clone(),
        line: a.location.line,
        signature: Some(signature),
        payload: to_payload(a),
        bases: Vec::new(),
    }
}

fn delegate_entry(unit: &str, d: &DelegateDecl) -> IndexEntry {
    let qualified = d.qualified_name();
    let macro_name = d
        .specifiers
        .get("macro")
        .cloned()
        .unwrap_or_else(|| "DECLARE_DELEGATE".to_string());
    let params = d
        .params
        .iter()
        .map(|p| match &p.name {
            Some(name) => format!("{} {}", p.type_name, name),
            None => p.type_name.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ");
    IndexEntry {
        key: format!("delegate:{qualified}"),
        unit: unit.to_string(),
        kind: "delegate".to_string(),
        name: d.name.clone(),
        qualified_name: qualified,
        owner: d.specifiers.get("owner").cloned(),
        parent: None,
        file: d.location.file.clone(),
        line: d.location.line,
        signature: Some(format!("{macro_name}({}; {params})", d.name)),
        payload: to_payload(d),
        bases: Vec::new(),
    }
}

/// Index rows for one unit's symbols. Duplicate keys inside the unit keep
/// the first declaration.
pub fn entries_for_record(record: &SymbolRecord) -> Vec<IndexEntry> {
    let unit = record.unit.as_str();
    let mut entries = Vec::with_capacity(record.symbol_count());
    entries.extend(record.types.iter().map(|t| type_entry(unit, t)));
    entries.extend(record.enums.iter().map(|e| enum_entry(unit, e)));
    entries.extend(record.callables.iter().map(|c| callable_entry(unit, c)));
    entries.extend(record.aliases.iter().map(|a| alias_entry(unit, a)));
    entries.extend(record.delegates.iter().map(|d| delegate_entry(unit, d)));

    let mut seen = HashSet::new();
    entries.retain(|entry| seen.insert(entry.key.clone()));
    entries
}

/// Row that makes the unit itself searchable.
pub fn unit_entry(unit: &Unit, deps: &DependencyRecord) -> IndexEntry {
    let payload = serde_json::json!({
        "unit": unit,
        "dependencies": deps,
    });
    IndexEntry {
        key: format!("unit:{}", unit.name),
        unit: unit.name.clone(),
        kind: "unit".to_string(),
        name: unit.name.clone(),
        qualified_name: unit.name.clone(),
        owner: None,
        parent: None,
        file: unit.manifest_path.clone(),
        line: 1,
        signature: Some(format!("module {} [{}]", unit.name, unit.category)),
        payload: payload.to_string(),
        bases: Vec::new(),
    }
}

// ============================================================================
// Writes
// ============================================================================

pub fn insert_unit(
    conn: &Connection,
    unit: &Unit,
    module_name: Option<&str>,
    deps: &DependencyRecord,
    symbol_count: usize,
    indexed_at: &str,
) -> StoreResult<()> {
    let deps_json = serde_json::to_string(deps).unwrap_or_else(|_| "{}".to_string());
    conn.execute(
        "INSERT OR REPLACE INTO units
            (name, category, manifest_path, dir, content_hash, module_name,
             dependencies, file_count, symbol_count, indexed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            unit.name,
            unit.category,
            unit.manifest_path,
            unit.dir,
            unit.content_hash,
            module_name,
            deps_json,
            unit.source_files.len() as i64,
            symbol_count as i64,
            indexed_at,
        ],
    )?;
    Ok(())
}

/// Insert rows for one unit. A key already held by another unit keeps the
/// stored row; the dropped one is returned and recorded in `collisions`.
pub fn insert_entries(conn: &Connection, entries: &[IndexEntry]) -> StoreResult<Vec<MergeCollision>> {
    let mut insert = conn.prepare_cached(
        "INSERT INTO symbols
            (unit, symbol_key, kind, name, qualified_name, owner, parent,
             file, line, signature, payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(symbol_key) DO NOTHING",
    )?;
    let mut holder = conn.prepare_cached("SELECT unit FROM symbols WHERE symbol_key = ?1")?;
    let mut insert_base = conn.prepare_cached(
        "INSERT INTO bases (symbol_id, base, base_text, relation) VALUES (?1, ?2, ?3, ?4)",
    )?;
    let mut insert_collision = conn.prepare_cached(
        "INSERT INTO collisions
            (symbol_key, kind, kept_unit, dropped_unit, dropped_file, dropped_line)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;

    let mut collisions = Vec::new();
    for entry in entries {
        let inserted = insert.execute(params![
            entry.unit,
            entry.key,
            entry.kind,
            entry.name,
            entry.qualified_name,
            entry.owner,
            entry.parent,
            entry.file,
            entry.line as i64,
            entry.signature,
            entry.payload,
        ])?;

        if inserted == 0 {
            let kept: Option<String> = holder
                .query_row([&entry.key], |row| row.get(0))
                .optional()?;
            match kept {
                Some(kept_unit) if kept_unit != entry.unit => {
                    insert_collision.execute(params![
                        entry.key,
                        entry.kind,
                        kept_unit,
                        entry.unit,
                        entry.file,
                        entry.line as i64,
                    ])?;
                    collisions.push(MergeCollision {
                        key: entry.key.clone(),
                        kind: entry.kind.clone(),
                        kept_unit,
                        dropped_unit: entry.unit.clone(),
                        dropped_file: entry.file.clone(),
                        dropped_line: entry.line,
                    });
                }
                _ => {}
            }
            continue;
        }

        let id = conn.last_insert_rowid();
        let payload_bases = base_texts(entry);
        for (idx, (base, relation)) in entry.bases.iter().enumerate() {
            let text = payload_bases.get(idx).cloned().unwrap_or_else(|| base.clone());
            insert_base.execute(params![id, base, text, relation])?;
        }
    }
    Ok(collisions)
}

/// Original base spellings, read back from a type payload.
fn base_texts(entry: &IndexEntry) -> Vec<String> {
    if entry.bases.is_empty() {
        return Vec::new();
    }
    serde_json::from_str::<TypeDecl>(&entry.payload)
        .map(|ty| ty.bases)
        .unwrap_or_default()
}

/// Remove a unit with its rows, bases and the collisions it lost.
pub fn delete_unit(conn: &Connection, unit: &str) -> StoreResult<()> {
    conn.execute("DELETE FROM collisions WHERE dropped_unit = ?1", [unit])?;
    conn.execute("DELETE FROM symbols WHERE unit = ?1", [unit])?;
    conn.execute("DELETE FROM units WHERE name = ?1", [unit])?;
    Ok(())
}

pub fn clear_all(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "DELETE FROM collisions;
         DELETE FROM bases;
         DELETE FROM symbols;
         DELETE FROM units;",
    )?;
    Ok(())
}

// ============================================================================
// Reads
// ============================================================================

const ENTRY_COLUMNS: &str = "s.id, s.symbol_key, s.unit, s.kind, s.name, s.qualified_name, s.owner, \
                             s.parent, s.file, s.line, s.signature, s.payload";

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, IndexEntry)> {
    let line: i64 = row.get(9)?;
    Ok((
        row.get(0)?,
        IndexEntry {
            key: row.get(1)?,
            unit: row.get(2)?,
            kind: row.get(3)?,
            name: row.get(4)?,
            qualified_name: row.get(5)?,
            owner: row.get(6)?,
            parent: row.get(7)?,
            file: row.get(8)?,
            line: line.max(0) as usize,
            signature: row.get(10)?,
            payload: row.get(11)?,
            bases: Vec::new(),
        },
    ))
}

fn query_entries(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> StoreResult<Vec<IndexEntry>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, entry_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut bases_stmt =
        conn.prepare_cached("SELECT base, relation FROM bases WHERE symbol_id = ?1 ORDER BY rowid")?;
    let mut entries = Vec::with_capacity(rows.len());
    for (id, mut entry) in rows {
        entry.bases = bases_stmt
            .query_map([id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Rows whose name or qualified name equals `name`.
pub fn lookup(conn: &Connection, name: &str) -> StoreResult<Vec<IndexEntry>> {
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM symbols s
         WHERE s.name = ?1 OR s.qualified_name = ?1
         ORDER BY s.unit, s.kind, s.qualified_name, s.symbol_key"
    );
    query_entries(conn, &sql, &[&name])
}

pub fn get(conn: &Connection, key: &str) -> StoreResult<Option<IndexEntry>> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM symbols s WHERE s.symbol_key = ?1");
    Ok(query_entries(conn, &sql, &[&key])?.into_iter().next())
}

/// Rows whose name contains `needle` (case-insensitive for ASCII).
pub fn name_contains(conn: &Connection, needle: &str, limit: usize) -> StoreResult<Vec<IndexEntry>> {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    let pattern = format!("%{escaped}%");
    let limit = limit as i64;
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM symbols s
         WHERE s.name LIKE ?1 ESCAPE '\\'
         ORDER BY length(s.name), s.name, s.symbol_key
         LIMIT ?2"
    );
    query_entries(conn, &sql, &[&pattern, &limit])
}

/// Types that list `base` (simple name) among their bases.
pub fn direct_subtypes(conn: &Connection, base: &str) -> StoreResult<Vec<IndexEntry>> {
    let simple = base_simple_name(base);
    let sql = format!(
        "SELECT DISTINCT {ENTRY_COLUMNS} FROM symbols s
         JOIN bases b ON b.symbol_id = s.id
         WHERE b.base = ?1
         ORDER BY s.name, s.unit, s.symbol_key"
    );
    query_entries(conn, &sql, &[&simple])
}

/// Member callables of a type.
pub fn members_of(conn: &Connection, owner_qualified: &str) -> StoreResult<Vec<IndexEntry>> {
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM symbols s
         WHERE s.kind = 'method' AND s.qualified_name LIKE ?1 ESCAPE '\\'
         ORDER BY s.file, s.line"
    );
    let prefix = format!(
        "{}::%",
        owner_qualified.replace('%', "\\%").replace('_', "\\_")
    );
    let rows = query_entries(conn, &sql, &[&prefix])?;
    Ok(rows
        .into_iter()
        .filter(|row| {
            row.qualified_name
                .strip_prefix(owner_qualified)
                .and_then(|rest| rest.strip_prefix("::"))
                .is_some_and(|rest| !rest.contains("::"))
        })
        .collect())
}

pub fn entries_for_unit(conn: &Connection, unit: &str) -> StoreResult<Vec<IndexEntry>> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM symbols s WHERE s.unit = ?1 ORDER BY s.symbol_key");
    query_entries(conn, &sql, &[&unit])
}

pub fn unit_row(conn: &Connection, name: &str) -> StoreResult<Option<UnitRow>> {
    let row = conn
        .query_row(
            "SELECT name, category, manifest_path, dir, content_hash, module_name,
                    dependencies, file_count, symbol_count, indexed_at
             FROM units WHERE name = ?1",
            [name],
            |row| {
                let deps: String = row.get(6)?;
                let file_count: i64 = row.get(7)?;
                let symbol_count: i64 = row.get(8)?;
                Ok(UnitRow {
                    name: row.get(0)?,
                    category: row.get(1)?,
                    manifest_path: row.get(2)?,
                    dir: row.get(3)?,
                    content_hash: row.get(4)?,
                    module_name: row.get(5)?,
                    dependencies: serde_json::from_str(&deps).unwrap_or_default(),
                    file_count: file_count.max(0) as usize,
                    symbol_count: symbol_count.max(0) as usize,
                    indexed_at: row.get(9)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn unit_names(conn: &Connection) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM units ORDER BY name")?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
}

pub fn collisions(conn: &Connection) -> StoreResult<Vec<MergeCollision>> {
    let mut stmt = conn.prepare(
        "SELECT symbol_key, kind, kept_unit, dropped_unit, dropped_file, dropped_line
         FROM collisions ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let line: i64 = row.get(5)?;
            Ok(MergeCollision {
                key: row.get(0)?,
                kind: row.get(1)?,
                kept_unit: row.get(2)?,
                dropped_unit: row.get(3)?,
                dropped_file: row.get(4)?,
                dropped_line: line.max(0) as usize,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Units that lost a collision against `kept_unit`.
pub fn units_shadowed_by(conn: &Connection, kept_unit: &str) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT dropped_unit FROM collisions WHERE kept_unit = ?1 ORDER BY dropped_unit",
    )?;
    let rows = stmt
        .query_map([kept_unit], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(rows)
}

pub fn symbol_count(conn: &Connection) -> StoreResult<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM symbols WHERE kind != 'unit'", [], |row| {
        row.get(0)
    })?;
    Ok(count.max(0) as usize)
}
