use thiserror::Error;

/// Errors that can occur during blob storage operations.
#[derive(Debug, Error)]
pub enum BlobError {
    /// The key is not one this store could have issued.
    #[error("invalid blob key: {0}")]
    InvalidKey(String),

    /// An I/O error from a filesystem-backed store.
    #[error("blob io error: {0}")]
    Io(#[from] std::io::Error),

    /// A storage backend error occurred.
    #[error("blob storage error: {0}")]
    Storage(String),

    /// The operation did not complete within its deadline.
    #[error("blob operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}
