//! Typed records with transactional secondary indexes.
//!
//! A record lives under a primary key; each secondary index entry maps a
//! natural key (a name, a pair) to that primary key. Every write that
//! touches a record and its index entries goes through one
//! [`WriteBatch`], so readers never observe an index entry without its
//! record or the other way round.
//!
//! Records are encoded with bincode. Index values are the primary key as
//! UTF-8.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StorageError};
use crate::kv::{CommitOutcome, KvStore, WriteBatch};

/// Attempts of a get-or-create before giving up with [`StorageError::Contention`].
///
/// A lost race leaves the winner's index entry behind, so the second
/// attempt normally returns it.
const GET_OR_INSERT_ATTEMPTS: usize = 2;

/// A decoded record together with the exact bytes it was read from.
///
/// The raw bytes are the compare-and-set token for [`IndexedStore::replace`].
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    pub record: T,
    raw: Vec<u8>,
}

/// Outcome of a guarded write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The guard on `key` failed; nothing was written.
    Conflict { key: String },
}

/// Typed view over a [`KvStore`] for one record type.
pub struct IndexedStore<T> {
    kv: Arc<dyn KvStore>,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for IndexedStore<T> {
    fn clone(&self) -> Self {
        Self {
            kv: Arc::clone(&self.kv),
            _record: PhantomData,
        }
    }
}

impl<T> IndexedStore<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            _record: PhantomData,
        }
    }

    /// The underlying store (for id allocation).
    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    pub fn get(&self, primary_key: &str) -> Result<Option<T>> {
        Ok(self.snapshot(primary_key)?.map(|s| s.record))
    }

    /// Read a record together with its compare-and-set token.
    pub fn snapshot(&self, primary_key: &str) -> Result<Option<Snapshot<T>>> {
        match self.kv.get(primary_key)? {
            Some(raw) => {
                let record = bincode::deserialize(&raw)?;
                Ok(Some(Snapshot { record, raw }))
            }
            None => Ok(None),
        }
    }

    /// Resolve an index entry to the primary key it points at.
    pub fn resolve(&self, index_key: &str) -> Result<Option<String>> {
        match self.kv.get(index_key)? {
            Some(bytes) => decode_primary(index_key, bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Resolve an index entry, then load the record.
    ///
    /// A dangling entry resolves to `None`.
    pub fn get_by_index(&self, index_key: &str) -> Result<Option<T>> {
        let Some(primary_key) = self.resolve(index_key)? else {
            return Ok(None);
        };
        let record = self.get(&primary_key)?;
        if record.is_none() {
            tracing::warn!(index_key, primary_key, "dangling index entry");
        }
        Ok(record)
    }

    /// All records whose primary key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, prefix: &str) -> Result<Vec<T>> {
        self.kv
            .scan_prefix(prefix)?
            .into_iter()
            .map(|(_, raw)| Ok(bincode::deserialize(&raw)?))
            .collect()
    }

    /// All `(index_key, primary_key)` entries under an index prefix, in key order.
    pub fn scan_index(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        self.kv
            .scan_prefix(prefix)?
            .into_iter()
            .map(|(index_key, bytes)| {
                let primary_key = decode_primary(&index_key, bytes)?;
                Ok((index_key, primary_key))
            })
            .collect()
    }

    /// Write a new record and its index entries, requiring all of them to be absent.
    pub fn insert_unique(
        &self,
        primary_key: &str,
        record: &T,
        index_keys: &[String],
    ) -> Result<WriteOutcome> {
        let mut batch = WriteBatch::new();
        batch.expect_absent(primary_key);
        for index_key in index_keys {
            batch.expect_absent(index_key.as_str());
        }
        batch.put(primary_key, bincode::serialize(record)?);
        for index_key in index_keys {
            batch.put(index_key.as_str(), primary_key.as_bytes().to_vec());
        }
        self.apply(&batch)
    }

    /// Unconditionally write a record and its index entries in one transaction.
    pub fn put(&self, primary_key: &str, record: &T, index_keys: &[String]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(primary_key, bincode::serialize(record)?);
        for index_key in index_keys {
            batch.put(index_key.as_str(), primary_key.as_bytes().to_vec());
        }
        match self.kv.commit(&batch)? {
            CommitOutcome::Committed => Ok(()),
            // An unguarded batch cannot conflict
            CommitOutcome::Conflict { key, .. } => Err(StorageError::Contention { key }),
        }
    }

    /// Replace a record read as `expected`, swapping index entries atomically.
    ///
    /// Fails with a conflict if the record changed since the snapshot or if
    /// any added index key is already taken.
    pub fn replace(
        &self,
        primary_key: &str,
        expected: &Snapshot<T>,
        record: &T,
        removed_index_keys: &[String],
        added_index_keys: &[String],
    ) -> Result<WriteOutcome> {
        let mut batch = WriteBatch::new();
        batch.expect_value(primary_key, expected.raw.clone());
        for index_key in added_index_keys {
            batch.expect_absent(index_key.as_str());
        }
        for index_key in removed_index_keys {
            batch.remove(index_key.as_str());
        }
        batch.put(primary_key, bincode::serialize(record)?);
        for index_key in added_index_keys {
            batch.put(index_key.as_str(), primary_key.as_bytes().to_vec());
        }
        self.apply(&batch)
    }

    /// Return the record behind `index_key`, or create it.
    ///
    /// `make` builds the `(primary_key, record)` pair for a new record and
    /// may allocate ids; it runs again if a concurrent writer claims the
    /// index key first. Returns the record and whether it was created.
    pub fn get_or_insert_with<F>(&self, index_key: &str, mut make: F) -> Result<(T, bool)>
    where
        F: FnMut() -> Result<(String, T)>,
    {
        for _ in 0..GET_OR_INSERT_ATTEMPTS {
            if let Some(existing) = self.get_by_index(index_key)? {
                return Ok((existing, false));
            }
            let (primary_key, record) = make()?;
            match self.insert_unique(&primary_key, &record, &[index_key.to_string()])? {
                WriteOutcome::Written => return Ok((record, true)),
                WriteOutcome::Conflict { key } => {
                    tracing::debug!(key, index_key, "lost get-or-create race, retrying");
                }
            }
        }
        Err(StorageError::Contention {
            key: index_key.to_string(),
        })
    }

    /// Apply `f` to a record and write it back under compare-and-set.
    ///
    /// A lost compare-and-set means another writer committed, so the
    /// read-modify-write is retried on the fresh record until it lands.
    /// Index entries are left untouched, so `f` must not change indexed
    /// fields. Returns `None` if the record does not exist.
    pub fn modify<F>(&self, primary_key: &str, mut f: F) -> Result<Option<T>>
    where
        F: FnMut(&mut T),
    {
        loop {
            let Some(snapshot) = self.snapshot(primary_key)? else {
                return Ok(None);
            };
            let mut record = bincode::deserialize::<T>(&snapshot.raw)?;
            f(&mut record);
            match self.replace(primary_key, &snapshot, &record, &[], &[])? {
                WriteOutcome::Written => return Ok(Some(record)),
                WriteOutcome::Conflict { key } => {
                    tracing::trace!(key, "record changed concurrently, retrying modify");
                }
            }
        }
    }

    /// Remove a record and the index entries derived from it.
    ///
    /// `index_keys` computes the entries from the stored record, so a
    /// concurrent rename is never left behind. Returns the removed record.
    pub fn remove<F>(&self, primary_key: &str, index_keys: F) -> Result<Option<T>>
    where
        F: Fn(&T) -> Vec<String>,
    {
        loop {
            let Some(snapshot) = self.snapshot(primary_key)? else {
                return Ok(None);
            };
            let mut batch = WriteBatch::new();
            batch.expect_value(primary_key, snapshot.raw.clone());
            batch.remove(primary_key);
            for index_key in index_keys(&snapshot.record) {
                batch.remove(index_key);
            }
            if self.apply(&batch)? == WriteOutcome::Written {
                return Ok(Some(snapshot.record));
            }
        }
    }

    fn apply(&self, batch: &WriteBatch) -> Result<WriteOutcome> {
        match self.kv.commit(batch)? {
            CommitOutcome::Committed => Ok(WriteOutcome::Written),
            CommitOutcome::Conflict { key, .. } => Ok(WriteOutcome::Conflict { key }),
        }
    }
}

fn decode_primary(index_key: &str, bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|_| StorageError::Corrupt {
        key: index_key.to_string(),
        reason: "index value is not UTF-8".to_string(),
    })
}
