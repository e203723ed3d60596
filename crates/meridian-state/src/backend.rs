//! Key/value persistence backends.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::Table;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Flat `table → key → bytes` persistence used by the coordinator.
///
/// Implementations must make `put_if_absent` atomic with respect to every
/// other write on the same table; resource-name uniqueness relies on it.
pub trait KvBackend: Send + Sync {
    fn get(&self, table: Table, key: &str) -> StateResult<Option<Vec<u8>>>;

    fn put(&self, table: Table, key: &str, value: &[u8]) -> StateResult<()>;

    /// Insert only when `key` is absent. Returns whether the write happened.
    fn put_if_absent(&self, table: Table, key: &str, value: &[u8]) -> StateResult<bool>;

    /// Remove a key. Returns whether it existed.
    fn delete(&self, table: Table, key: &str) -> StateResult<bool>;

    /// All entries of a table in key order.
    fn list(&self, table: Table) -> StateResult<Vec<(String, Vec<u8>)>>;
}

/// [`KvBackend`] on an embedded redb database.
#[derive(Clone)]
pub struct RedbBackend {
    db: Arc<Database>,
}

impl RedbBackend {
    /// Open (or create) a persistent database at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let backend = Self { db: Arc::new(db) };
        backend.ensure_tables()?;
        debug!(?path, "redb backend opened");
        Ok(backend)
    }

    /// Create an ephemeral in-memory database (for testing).
    pub fn in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let backend = Self { db: Arc::new(db) };
        backend.ensure_tables()?;
        debug!("in-memory redb backend opened");
        Ok(backend)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for table in Table::ALL {
            txn.open_table(table.definition()).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

impl KvBackend for RedbBackend {
    fn get(&self, table: Table, key: &str) -> StateResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table.definition()).map_err(map_err!(Table))?;
        let value = t.get(key).map_err(map_err!(Read))?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    fn put(&self, table: Table, key: &str, value: &[u8]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table.definition()).map_err(map_err!(Table))?;
            t.insert(key, value).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn put_if_absent(&self, table: Table, key: &str, value: &[u8]) -> StateResult<bool> {
        // redb admits one write transaction at a time, so the check and the
        // insert cannot interleave with another writer.
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let inserted;
        {
            let mut t = txn.open_table(table.definition()).map_err(map_err!(Table))?;
            let exists = t.get(key).map_err(map_err!(Read))?.is_some();
            if !exists {
                t.insert(key, value).map_err(map_err!(Write))?;
            }
            inserted = !exists;
        }
        if inserted {
            txn.commit().map_err(map_err!(Transaction))?;
        } else {
            txn.abort().map_err(map_err!(Transaction))?;
        }
        Ok(inserted)
    }

    fn delete(&self, table: Table, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut t = txn.open_table(table.definition()).map_err(map_err!(Table))?;
            existed = t.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    fn list(&self, table: Table) -> StateResult<Vec<(String, Vec<u8>)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table.definition()).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            results.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete() {
        let backend = RedbBackend::in_memory().unwrap();
        backend.put(Table::Workers, "w1", b"one").unwrap();

        assert_eq!(backend.get(Table::Workers, "w1").unwrap(), Some(b"one".to_vec()));
        assert!(backend.get(Table::Resources, "w1").unwrap().is_none());

        assert!(backend.delete(Table::Workers, "w1").unwrap());
        assert!(!backend.delete(Table::Workers, "w1").unwrap());
    }

    #[test]
    fn put_if_absent_only_writes_once() {
        let backend = RedbBackend::in_memory().unwrap();
        assert!(backend.put_if_absent(Table::Resources, "orders", b"first").unwrap());
        assert!(!backend.put_if_absent(Table::Resources, "orders", b"second").unwrap());

        assert_eq!(
            backend.get(Table::Resources, "orders").unwrap(),
            Some(b"first".to_vec())
        );
    }

    #[test]
    fn list_is_key_ordered() {
        let backend = RedbBackend::in_memory().unwrap();
        backend.put(Table::Capabilities, "b@1", b"b").unwrap();
        backend.put(Table::Capabilities, "a@1", b"a").unwrap();

        let keys: Vec<_> = backend
            .list(Table::Capabilities)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["a@1", "b@1"]);
    }

    #[test]
    fn concurrent_put_if_absent_has_one_winner() {
        let backend = Arc::new(RedbBackend::in_memory().unwrap());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let backend = backend.clone();
                std::thread::spawn(move || {
                    backend
                        .put_if_absent(Table::Resources, "contended", format!("{i}").as_bytes())
                        .unwrap()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
