//! Persisted knowledge base store.
//!
//! [`Store`] is an explicit handle over the store directory: the SQLite index
//! plus the JSON graphs next to it. Callers open it, use it and close it;
//! nothing is held globally.

pub mod index;
pub mod schema;

pub use index::{IndexEntry, UnitRow};

use crate::cache::StoreLayout;
use crate::error::{StoreError, StoreResult};
use crate::symbol_graph::SymbolGraph;
use crate::topology::DependencyGraph;
use rusqlite::{Connection, Transaction};
use tracing::debug;

pub struct Store {
    layout: StoreLayout,
    conn: Connection,
}

impl Store {
    /// Open the store, creating the directory and database when missing.
    pub fn open(layout: StoreLayout) -> StoreResult<Self> {
        layout.ensure()?;
        let conn = schema::open_db(&layout.index_db())?;
        debug!("Opened store at {}", layout.root().display());
        Ok(Self { layout, conn })
    }

    /// Open a store that must already exist.
    pub fn open_existing(layout: StoreLayout) -> StoreResult<Self> {
        if !layout.index_db().exists() {
            return Err(StoreError::Missing(layout.root().to_path_buf()));
        }
        Self::open(layout)
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn transaction(&mut self) -> StoreResult<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    pub fn close(self) -> StoreResult<()> {
        self.conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }

    // ------------------------------------------------------------------------
    // Index reads
    // ------------------------------------------------------------------------

    pub fn lookup(&self, name: &str) -> StoreResult<Vec<IndexEntry>> {
        index::lookup(&self.conn, name)
    }

    pub fn get(&self, key: &str) -> StoreResult<Option<IndexEntry>> {
        index::get(&self.conn, key)
    }

    pub fn name_contains(&self, needle: &str, limit: usize) -> StoreResult<Vec<IndexEntry>> {
        index::name_contains(&self.conn, needle, limit)
    }

    pub fn direct_subtypes(&self, base: &str) -> StoreResult<Vec<IndexEntry>> {
        index::direct_subtypes(&self.conn, base)
    }

    pub fn members_of(&self, owner_qualified: &str) -> StoreResult<Vec<IndexEntry>> {
        index::members_of(&self.conn, owner_qualified)
    }

    pub fn unit_row(&self, name: &str) -> StoreResult<Option<UnitRow>> {
        index::unit_row(&self.conn, name)
    }

    pub fn unit_names(&self) -> StoreResult<Vec<String>> {
        index::unit_names(&self.conn)
    }

    pub fn entries_for_unit(&self, unit: &str) -> StoreResult<Vec<IndexEntry>> {
        index::entries_for_unit(&self.conn, unit)
    }

    pub fn collisions(&self) -> StoreResult<Vec<crate::error::MergeCollision>> {
        index::collisions(&self.conn)
    }

    pub fn symbol_count(&self) -> StoreResult<usize> {
        index::symbol_count(&self.conn)
    }

    // ------------------------------------------------------------------------
    // Graphs
    // ------------------------------------------------------------------------

    pub fn dependency_graph(&self) -> StoreResult<Option<DependencyGraph>> {
        DependencyGraph::load(&self.layout.dependency_graph())
    }

    pub fn symbol_graph(&self, unit: &str) -> StoreResult<Option<SymbolGraph>> {
        SymbolGraph::load(&self.layout.unit_graph(unit))
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("root", &self.layout.root())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_existing_requires_a_database() {
        let temp = TempDir::new().expect("tempdir");
        let layout = StoreLayout::new(temp.path().join(".kb"));
        let err = Store::open_existing(layout.clone()).expect_err("missing");
        assert!(matches!(err, StoreError::Missing(_)));

        let store = Store::open(layout.clone()).expect("create");
        assert_eq!(store.symbol_count().expect("count"), 0);
        store.close().expect("close");

        let reopened = Store::open_existing(layout).expect("reopen");
        assert!(reopened.unit_names().expect("units").is_empty());
        assert!(reopened.dependency_graph().expect("graph").is_none());
    }
}
