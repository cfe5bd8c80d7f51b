#![allow(clippy::result_large_err)]
//! Persistent [`KvStore`] backed by redb.
//!
//! redb is a pure-Rust embedded database with typed tables, ACID
//! transactions and a single writer at a time, which is exactly the
//! envelope guarded batches need: guards are read and operations applied
//! inside one `WriteTransaction`.
//!
//! # Example
//!
//! ```rust,no_run
//! use gatehouse_store::{KvStore, RedbStore, WriteBatch};
//!
//! let store = RedbStore::open("/var/lib/gatehouse/gatehouse.redb").unwrap();
//! store.put("role/00000000000000000001", b"admin").unwrap();
//!
//! let mut batch = WriteBatch::new();
//! batch
//!     .expect_absent("role_name/admin")
//!     .put("role_name/admin", b"role/00000000000000000001".to_vec());
//! assert!(store.commit(&batch).unwrap().is_committed());
//!
//! store.close().unwrap();
//! ```

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use tempfile::NamedTempFile;

use crate::error::{Result, StorageError};
use crate::kv::{BatchOp, CommitOutcome, KvStore, WriteBatch};

/// Every record and index entry lives in one ordered table.
const KV_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");

/// Id sequences, keyed by sequence name.
const SEQUENCES_TABLE: TableDefinition<&str, u64> = TableDefinition::new("sequences");

/// A redb database handle implementing [`KvStore`].
///
/// Cloning is cheap and shares the underlying database.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
    /// Backing file for temporary stores, removed when the last clone drops.
    _tempfile: Option<Arc<NamedTempFile>>,
}

impl RedbStore {
    /// Open or create a redb database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Database::create(path.as_ref())?;
        let store = Self {
            db: Arc::new(db),
            _tempfile: None,
        };
        store.ensure_tables()?;
        tracing::info!(path = %path.as_ref().display(), "opened redb store");
        Ok(store)
    }

    /// Open a database on a temporary file (for testing).
    ///
    /// The file is deleted once every clone of the store is dropped.
    pub fn open_temporary() -> Result<Self> {
        let tmpfile = NamedTempFile::new()?;
        let db = Database::create(tmpfile.path())?;
        let store = Self {
            db: Arc::new(db),
            _tempfile: Some(Arc::new(tmpfile)),
        };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Close this handle.
    ///
    /// The database is released when the last clone is closed or dropped.
    pub fn close(self) -> Result<()> {
        match Arc::try_unwrap(self.db) {
            Ok(db) => {
                drop(db);
                tracing::info!("closed redb store");
            }
            Err(_) => tracing::debug!("redb store handle released; database still shared"),
        }
        Ok(())
    }

    /// Create the tables up front so readers never see `TableDoesNotExist`.
    fn ensure_tables(&self) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(KV_TABLE)?;
            let _ = write_txn.open_table(SEQUENCES_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

impl KvStore for RedbStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(KV_TABLE)?;
        Ok(table.get(key)?.map(|v| v.value().to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(KV_TABLE)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed;
        {
            let mut table = write_txn.open_table(KV_TABLE)?;
            existed = table.remove(key)?.is_some();
        }
        write_txn.commit()?;
        Ok(existed)
    }

    fn scan(&self, start: &str, end: &str) -> Result<Vec<(String, Vec<u8>)>> {
        if start >= end {
            return Ok(Vec::new());
        }
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(KV_TABLE)?;
        let iter = table.range::<&str>(start..end)?;
        iter.map(|entry| -> Result<(String, Vec<u8>)> {
            let (k, v) = entry?;
            Ok((k.value().to_string(), v.value().to_vec()))
        })
        .collect()
    }

    fn scan_from(&self, start: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(KV_TABLE)?;
        let iter = table.range::<&str>(start..)?;
        iter.map(|entry| -> Result<(String, Vec<u8>)> {
            let (k, v) = entry?;
            Ok((k.value().to_string(), v.value().to_vec()))
        })
        .collect()
    }

    fn commit(&self, batch: &WriteBatch) -> Result<CommitOutcome> {
        let write_txn = self.db.begin_write()?;
        let mut conflict = None;
        {
            let mut table = write_txn.open_table(KV_TABLE)?;
            for guard in batch.guards() {
                let current = table.get(guard.key())?.map(|v| v.value().to_vec());
                if !guard.holds(current.as_deref()) {
                    conflict = Some(CommitOutcome::Conflict {
                        key: guard.key().to_string(),
                        actual: current,
                    });
                    break;
                }
            }
            if conflict.is_none() {
                for op in batch.ops() {
                    match op {
                        BatchOp::Put(key, value) => {
                            table.insert(key.as_str(), value.as_slice())?;
                        }
                        BatchOp::Remove(key) => {
                            table.remove(key.as_str())?;
                        }
                    }
                }
            }
        }
        if let Some(outcome) = conflict {
            write_txn.abort()?;
            return Ok(outcome);
        }
        write_txn.commit()?;
        Ok(CommitOutcome::Committed)
    }

    fn next_id(&self, sequence: &str) -> Result<u64> {
        let write_txn = self.db.begin_write()?;
        let next;
        {
            let mut table = write_txn.open_table(SEQUENCES_TABLE)?;
            let current = table.get(sequence)?.map(|v| v.value()).unwrap_or(0);
            next = current.checked_add(1).ok_or_else(|| StorageError::Corrupt {
                key: sequence.to_string(),
                reason: "sequence exhausted".to_string(),
            })?;
            table.insert(sequence, next)?;
        }
        write_txn.commit()?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_operations() {
        let store = RedbStore::open_temporary().unwrap();

        store.put("key1", b"value1").unwrap();
        assert_eq!(store.get("key1").unwrap(), Some(b"value1".to_vec()));

        assert!(store.remove("key1").unwrap());
        assert!(!store.remove("key1").unwrap());
        assert_eq!(store.get("key1").unwrap(), None);
    }

    #[test]
    fn test_range_scan_is_half_open() {
        let store = RedbStore::open_temporary().unwrap();
        for key in ["a", "b", "c", "d"] {
            store.put(key, key.as_bytes()).unwrap();
        }

        let keys: Vec<String> = store
            .scan("b", "d")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["b", "c"]);

        // Inverted and empty ranges yield nothing
        assert!(store.scan("d", "b").unwrap().is_empty());
        assert!(store.scan("b", "b").unwrap().is_empty());
    }

    #[test]
    fn test_prefix_scan() {
        let store = RedbStore::open_temporary().unwrap();
        store.put("role/1", b"alice").unwrap();
        store.put("role/2", b"bob").unwrap();
        store.put("role_name/admin", b"role/1").unwrap();
        store.put("resource/1", b"page").unwrap();

        let roles = store.scan_prefix("role/").unwrap();
        assert_eq!(roles.len(), 2);
        assert_eq!(roles[0].0, "role/1");

        assert_eq!(store.scan_prefix("").unwrap().len(), 4);
    }

    #[test]
    fn test_commit_applies_all_or_nothing() {
        let store = RedbStore::open_temporary().unwrap();
        store.put("idx/taken", b"owner").unwrap();

        let mut batch = WriteBatch::new();
        batch
            .expect_absent("idx/taken")
            .put("rec/1", b"record".to_vec())
            .put("idx/taken", b"rec/1".to_vec());
        let outcome = store.commit(&batch).unwrap();
        assert_eq!(
            outcome,
            CommitOutcome::Conflict {
                key: "idx/taken".to_string(),
                actual: Some(b"owner".to_vec()),
            }
        );
        assert_eq!(store.get("rec/1").unwrap(), None);

        let mut batch = WriteBatch::new();
        batch
            .expect_value("idx/taken", b"owner".to_vec())
            .remove("idx/taken")
            .put("rec/1", b"record".to_vec());
        assert!(store.commit(&batch).unwrap().is_committed());
        assert_eq!(store.get("idx/taken").unwrap(), None);
        assert_eq!(store.get("rec/1").unwrap(), Some(b"record".to_vec()));
    }

    #[test]
    fn test_next_id_per_sequence() {
        let store = RedbStore::open_temporary().unwrap();
        assert_eq!(store.next_id("role").unwrap(), 1);
        assert_eq!(store.next_id("role").unwrap(), 2);
        assert_eq!(store.next_id("permission").unwrap(), 1);
        assert_eq!(store.next_id("role").unwrap(), 3);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("gatehouse.redb");

        {
            let store = RedbStore::open(&path).unwrap();
            store.put("resource/1", b"dashboard").unwrap();
            assert_eq!(store.next_id("resource").unwrap(), 1);
            store.close().unwrap();
        }

        {
            let store = RedbStore::open(&path).unwrap();
            assert_eq!(store.get("resource/1").unwrap(), Some(b"dashboard".to_vec()));
            // Sequences survive a restart
            assert_eq!(store.next_id("resource").unwrap(), 2);
        }
    }
}
