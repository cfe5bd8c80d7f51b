//! Gatehouse Store: ordered embedded key-value storage.
//!
//! This crate provides:
//!
//! 1. **The store contract** ([`KvStore`]): point get/put/remove, ordered
//!    half-open range scans, guarded atomic batches ([`WriteBatch`]) and
//!    durable id sequences.
//!
//! 2. **Backends**: [`RedbStore`] (persistent, redb) and [`MemoryStore`]
//!    (in-process, for tests).
//!
//! 3. **Indexed records** ([`IndexedStore`]): typed records whose secondary
//!    index entries are always written and removed in the same transaction
//!    as the record itself.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  IndexedStore<T> ── insert_unique / replace / remove     │
//! │        │              (one WriteBatch per mutation)      │
//! │        ▼                                                 │
//! │  Arc<dyn KvStore> ──┬──► RedbStore  (kv + sequences)     │
//! │                     └──► MemoryStore (BTreeMap + RwLock) │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use gatehouse_store::{IndexedStore, KvStore, MemoryStore, WriteOutcome};
//!
//! let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
//! let names: IndexedStore<String> = IndexedStore::new(kv);
//!
//! let outcome = names
//!     .insert_unique("name/1", &"Coach".to_string(), &["name_idx/coach".to_string()])
//!     .unwrap();
//! assert_eq!(outcome, WriteOutcome::Written);
//! assert_eq!(names.get_by_index("name_idx/coach").unwrap().as_deref(), Some("Coach"));
//! ```

pub mod error;
pub mod indexed;
pub mod kv;
pub mod memory;
pub mod redb_store;

pub use error::{Result, StorageError};
pub use indexed::{IndexedStore, Snapshot, WriteOutcome};
pub use kv::{prefix_upper_bound, BatchOp, CommitOutcome, Guard, KvStore, WriteBatch};
pub use memory::MemoryStore;
pub use redb_store::RedbStore;
