//! In-memory [`KvStore`] for tests and embedders that need no persistence.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, StorageError};
use crate::kv::{BatchOp, CommitOutcome, KvStore, WriteBatch};

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, Vec<u8>>,
    sequences: BTreeMap<String, u64>,
}

/// `BTreeMap` behind a read-write lock.
///
/// `commit` holds the write lock for the whole batch, so it has the same
/// single-writer semantics as [`crate::RedbStore`]. Cloning shares state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.read().entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.inner
            .write()
            .entries
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.inner.write().entries.remove(key).is_some())
    }

    fn scan(&self, start: &str, end: &str) -> Result<Vec<(String, Vec<u8>)>> {
        // BTreeMap::range panics on inverted bounds
        if start >= end {
            return Ok(Vec::new());
        }
        let inner = self.inner.read();
        Ok(inner
            .entries
            .range::<str, _>((Bound::Included(start), Bound::Excluded(end)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn scan_from(&self, start: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let inner = self.inner.read();
        Ok(inner
            .entries
            .range::<str, _>((Bound::Included(start), Bound::Unbounded))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn commit(&self, batch: &WriteBatch) -> Result<CommitOutcome> {
        let mut inner = self.inner.write();
        for guard in batch.guards() {
            let current = inner.entries.get(guard.key());
            if !guard.holds(current.map(Vec::as_slice)) {
                return Ok(CommitOutcome::Conflict {
                    key: guard.key().to_string(),
                    actual: current.cloned(),
                });
            }
        }
        for op in batch.ops() {
            match op {
                BatchOp::Put(key, value) => {
                    inner.entries.insert(key.clone(), value.clone());
                }
                BatchOp::Remove(key) => {
                    inner.entries.remove(key);
                }
            }
        }
        Ok(CommitOutcome::Committed)
    }

    fn next_id(&self, sequence: &str) -> Result<u64> {
        let mut inner = self.inner.write();
        let counter = inner.sequences.entry(sequence.to_string()).or_insert(0);
        *counter = counter.checked_add(1).ok_or_else(|| StorageError::Corrupt {
            key: sequence.to_string(),
            reason: "sequence exhausted".to_string(),
        })?;
        Ok(*counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_ordering() {
        let store = MemoryStore::new();
        store.put("permission/00000000000000000002", b"2").unwrap();
        store.put("permission/00000000000000000010", b"10").unwrap();
        store.put("permission/00000000000000000001", b"1").unwrap();
        store.put("permission_pair/x#read", b"p").unwrap();

        let values: Vec<Vec<u8>> = store
            .scan_prefix("permission/")
            .unwrap()
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        assert_eq!(values, vec![b"1".to_vec(), b"2".to_vec(), b"10".to_vec()]);
        assert!(store.scan("z", "a").unwrap().is_empty());
    }

    #[test]
    fn test_conflicting_commit_writes_nothing() {
        let store = MemoryStore::new();
        store.put("role_name/coach", b"role/1").unwrap();

        let mut batch = WriteBatch::new();
        batch
            .expect_absent("role_name/coach")
            .put("role/2", b"dup".to_vec())
            .put("role_name/coach", b"role/2".to_vec());
        let outcome = store.commit(&batch).unwrap();
        assert!(!outcome.is_committed());
        assert_eq!(store.get("role/2").unwrap(), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_clones_share_state() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.put("k", b"v").unwrap();
        assert_eq!(other.get("k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(other.next_id("seq").unwrap(), 1);
        assert_eq!(store.next_id("seq").unwrap(), 2);
    }
}
