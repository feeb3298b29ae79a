//! Index database schema and migrations.
//!
//! Migrations are append-only and tracked in `schema_meta`. `open_db` opens
//! the database, enables WAL and foreign keys, and applies pending
//! migrations.

use crate::error::{StoreError, StoreResult};
use rusqlite::{Connection, ErrorCode};
use std::path::Path;

struct Migration {
    version: u32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: "
        CREATE TABLE units (
            name          TEXT    PRIMARY KEY,
            category      TEXT    NOT NULL,
            manifest_path TEXT    NOT NULL,
            dir           TEXT    NOT NULL,
            content_hash  TEXT    NOT NULL,
            module_name   TEXT,
            dependencies  TEXT    NOT NULL,
            file_count    INTEGER NOT NULL DEFAULT 0,
            symbol_count  INTEGER NOT NULL DEFAULT 0,
            indexed_at    TEXT    NOT NULL
        );

        CREATE TABLE symbols (
            id             INTEGER PRIMARY KEY,
            unit           TEXT    NOT NULL REFERENCES units(name) ON DELETE CASCADE,
            symbol_key     TEXT    NOT NULL UNIQUE,
            kind           TEXT    NOT NULL,
            name           TEXT    NOT NULL,
            qualified_name TEXT    NOT NULL,
            owner          TEXT,
            parent         TEXT,
            file           TEXT    NOT NULL,
            line           INTEGER NOT NULL,
            signature      TEXT,
            payload        TEXT    NOT NULL
        );

        CREATE TABLE bases (
            symbol_id INTEGER NOT NULL REFERENCES symbols(id) ON DELETE CASCADE,
            base      TEXT    NOT NULL,
            base_text TEXT    NOT NULL,
            relation  TEXT    NOT NULL
        );

        CREATE TABLE collisions (
            id           INTEGER PRIMARY KEY,
            symbol_key   TEXT    NOT NULL,
            kind         TEXT    NOT NULL,
            kept_unit    TEXT    NOT NULL,
            dropped_unit TEXT    NOT NULL,
            dropped_file TEXT    NOT NULL,
            dropped_line INTEGER NOT NULL
        );

        CREATE INDEX idx_symbols_name      ON symbols(name);
        CREATE INDEX idx_symbols_qualified ON symbols(qualified_name);
        CREATE INDEX idx_symbols_unit      ON symbols(unit);
        CREATE INDEX idx_symbols_owner     ON symbols(owner);
        CREATE INDEX idx_bases_base        ON bases(base);
        CREATE INDEX idx_bases_symbol      ON bases(symbol_id);
        CREATE INDEX idx_collisions_kept   ON collisions(kept_unit);
        CREATE INDEX idx_collisions_drop   ON collisions(dropped_unit);
    ",
}];

pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Open (or create) the index database and bring its schema up to date.
pub fn open_db(path: &Path) -> StoreResult<Connection> {
    let conn = Connection::open(path).map_err(classify)?;
    conn.pragma_update(None, "journal_mode", "wal").map_err(classify)?;
    conn.pragma_update(None, "foreign_keys", "on").map_err(classify)?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_meta (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(classify)?;

    apply_migrations(&conn)?;
    Ok(conn)
}

fn apply_migrations(conn: &Connection) -> StoreResult<()> {
    let max_applied: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_meta",
            [],
            |row| row.get(0),
        )
        .map_err(classify)?;

    if max_applied > latest_version() {
        return Err(StoreError::VersionMismatch {
            found: max_applied,
            expected: latest_version(),
        });
    }

    for m in MIGRATIONS {
        if m.version > max_applied {
            conn.execute_batch(m.sql)?;
            conn.execute("INSERT INTO schema_meta (version) VALUES (?1)", [m.version])?;
        }
    }
    Ok(())
}

/// A file that is not a database surfaces as corruption rather than a
/// generic SQLite error.
fn classify(err: rusqlite::Error) -> StoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::NotADatabase) | Some(ErrorCode::DatabaseCorrupt) => {
            StoreError::Corruption(err.to_string())
        }
        _ => StoreError::Sqlite(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp_db() -> (Connection, TempDir) {
        let dir = TempDir::new().expect("tempdir");
        let conn = open_db(&dir.path().join("index.db")).expect("open");
        (conn, dir)
    }

    #[test]
    fn open_db_creates_tables() {
        let (conn, _dir) = open_temp_db();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("prepare")
            .query_map([], |row| row.get(0))
            .expect("query")
            .collect::<Result<_, _>>()
            .expect("rows");
        for table in ["bases", "collisions", "schema_meta", "symbols", "units"] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn wal_mode_enabled() {
        let (conn, _dir) = open_temp_db();
        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("pragma");
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn migrations_are_idempotent() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("index.db");
        drop(open_db(&path).expect("first open"));
        let conn = open_db(&path).expect("second open");
        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM schema_meta", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn newer_schema_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("index.db");
        let conn = open_db(&path).expect("open");
        conn.execute("INSERT INTO schema_meta (version) VALUES (99)", [])
            .expect("insert");
        drop(conn);
        let err = open_db(&path).expect_err("version mismatch");
        assert!(matches!(err, StoreError::VersionMismatch { found: 99, .. }));
    }

    #[test]
    fn garbage_file_is_corruption() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("index.db");
        std::fs::write(&path, vec![0x42u8; 4096]).expect("write");
        let err = open_db(&path).expect_err("corrupt");
        assert!(matches!(err, StoreError::Corruption(_)), "got {err:?}");
    }
}
