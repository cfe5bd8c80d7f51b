//! Error types for the storage layer.

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("redb database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("redb transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored record could not be decoded into its typed form.
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// An entry violates the keyspace layout (non-UTF-8 index value, counter overflow).
    #[error("corrupt entry at {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// A get-or-create lost its race on every attempt.
    #[error("write contention on {key}")]
    Contention { key: String },
}

pub type Result<T> = std::result::Result<T, StorageError>;
