use thiserror::Error;

/// Errors from send record repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("connection error: {0}")]
    Connection(String),

    /// A record with this id already exists (tombstones included).
    #[error("duplicate send id: {0}")]
    DuplicateId(String),

    /// The mutation can never apply to any row.
    #[error("invalid mutation: {0}")]
    InvalidMutation(#[from] ephemera_core::CoreError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}
