//! The ordered key-value contract every backend implements.
//!
//! Keys are UTF-8 strings compared lexicographically (byte order, which for
//! UTF-8 equals code point order). Values are opaque bytes; typed records
//! are layered on top by [`crate::IndexedStore`].

use crate::error::Result;

/// A precondition checked inside the commit transaction before any write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    /// The key must not exist.
    Absent(String),
    /// The key must currently hold exactly this value.
    Value(String, Vec<u8>),
}

impl Guard {
    pub fn key(&self) -> &str {
        match self {
            Guard::Absent(key) | Guard::Value(key, _) => key,
        }
    }

    /// Whether the current value satisfies this guard.
    pub fn holds(&self, current: Option<&[u8]>) -> bool {
        match self {
            Guard::Absent(_) => current.is_none(),
            Guard::Value(_, expected) => current == Some(expected.as_slice()),
        }
    }
}

/// Batch operation type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(String, Vec<u8>),
    Remove(String),
}

/// A set of guarded writes committed as one transaction.
///
/// Guards are evaluated against the state at commit time; if any fails,
/// nothing is written.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    guards: Vec<Guard>,
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Put(key.into(), value.into()));
        self
    }

    pub fn remove(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(BatchOp::Remove(key.into()));
        self
    }

    /// Require `key` to be absent at commit time.
    pub fn expect_absent(&mut self, key: impl Into<String>) -> &mut Self {
        self.guards.push(Guard::Absent(key.into()));
        self
    }

    /// Require `key` to hold `value` at commit time.
    pub fn expect_value(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.guards.push(Guard::Value(key.into(), value.into()));
        self
    }

    pub fn guards(&self) -> &[Guard] {
        &self.guards
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty() && self.ops.is_empty()
    }
}

/// Result of [`KvStore::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// A guard failed; `actual` is the value found at `key`.
    Conflict {
        key: String,
        actual: Option<Vec<u8>>,
    },
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed)
    }
}

/// Persistent, lexicographically ordered map of string keys to byte values.
///
/// Thread-safe: all methods take `&self`. Implementations serialize writers,
/// so a [`WriteBatch`] is never interleaved with another commit.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove `key`. Returns true if a value was present.
    fn remove(&self, key: &str) -> Result<bool>;

    /// Ordered entries in `[start, end)`. Empty when `start >= end`.
    fn scan(&self, start: &str, end: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Ordered entries from `start` to the end of the keyspace.
    fn scan_from(&self, start: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Apply a guarded batch atomically.
    fn commit(&self, batch: &WriteBatch) -> Result<CommitOutcome>;

    /// Allocate the next id of a named sequence. The first id is 1.
    fn next_id(&self, sequence: &str) -> Result<u64>;

    /// Ordered entries whose key starts with `prefix`.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        match prefix_upper_bound(prefix) {
            Some(upper) => self.scan(prefix, &upper),
            None => self.scan_from(prefix),
        }
    }
}

/// Compute the exclusive upper bound of every key starting with `prefix`.
///
/// Returns `None` if the prefix is empty or made only of `char::MAX`
/// (no upper bound exists).
pub fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut upper: Vec<char> = prefix.chars().collect();
    while let Some(last) = upper.pop() {
        if let Some(next) = char_successor(last) {
            upper.push(next);
            return Some(upper.into_iter().collect());
        }
    }
    None
}

fn char_successor(c: char) -> Option<char> {
    match c {
        char::MAX => None,
        // Skip the surrogate gap.
        '\u{D7FF}' => Some('\u{E000}'),
        _ => char::from_u32(c as u32 + 1),
    }
}
