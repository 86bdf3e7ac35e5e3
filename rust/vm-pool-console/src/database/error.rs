//! Storage error types.

use crate::domain::ValidationErrors;

/// Errors returned by the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// SQLite reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database file or its directory could not be created.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking storage task panicked or was cancelled.
    #[error("storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// A query parameter could not be encoded.
    #[error("failed to encode query parameter: {0}")]
    Encode(#[from] serde_json::Error),

    /// A referenced row does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of row that was looked up.
        entity: &'static str,
        /// Identifier that was looked up.
        id: i64,
    },

    /// Submitted attributes failed validation.
    #[error("validation failed: {0}")]
    Invalid(#[from] ValidationErrors),

    /// The acting user lacks the privilege the operation needs.
    #[error("permission denied: {0}")]
    Forbidden(String),

    /// The operation conflicts with existing rows.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DatabaseError {
    pub(crate) fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}

/// Result type for storage operations.
pub type DatabaseResult<T> = Result<T, DatabaseError>;
