use gatehouse_store::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthzError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{0}")]
    Conflict(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl AuthzError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        AuthzError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AuthzError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, AuthzError::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, AuthzError>;
