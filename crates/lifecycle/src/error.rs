use ephemera_blob::BlobError;
use ephemera_core::SendId;
use ephemera_store::RepositoryError;
use thiserror::Error;

/// Errors surfaced by send lifecycle operations.
///
/// Callers distinguish three families: invalid input, a denied claim
/// (not found, expired, exhausted, bad password), and storage failures.
/// The latter never imply a download slot was consumed unless the claim
/// itself already committed.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Input rejected before touching storage.
    #[error("validation error: {0}")]
    Validation(String),

    /// The payload exceeds the configured size limit.
    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    /// No such send, or it has been deleted.
    #[error("send not found: {0}")]
    NotFound(SendId),

    /// The send's expiry has passed.
    #[error("send expired: {0}")]
    Expired(SendId),

    /// Every permitted download has been used.
    #[error("send exhausted: {0}")]
    Exhausted(SendId),

    /// The send is password protected and no password was supplied.
    #[error("password required")]
    PasswordRequired,

    /// The supplied password does not match.
    #[error("invalid password")]
    InvalidPassword,

    /// A claim succeeded but the blob it points at is gone.
    #[error("blob missing for send {0}")]
    MissingBlob(SendId),

    /// Password hashing failed.
    #[error("password hashing failed: {0}")]
    Hashing(String),

    /// The record repository failed or timed out.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// The blob store failed or timed out.
    #[error("blob error: {0}")]
    Blob(#[from] BlobError),
}

impl LifecycleError {
    /// Whether this error denies access rather than reporting a fault.
    #[must_use]
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::Expired(_)
                | Self::Exhausted(_)
                | Self::PasswordRequired
                | Self::InvalidPassword
        )
    }

    /// Whether this error is a backend failure worth retrying later.
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Repository(_) | Self::Blob(_) | Self::MissingBlob(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn classification() {
        let id = SendId::new("s1");
        assert!(LifecycleError::Expired(id.clone()).is_denial());
        assert!(LifecycleError::InvalidPassword.is_denial());
        assert!(!LifecycleError::Validation("ttl".into()).is_denial());

        let timeout = LifecycleError::from(RepositoryError::Timeout(Duration::from_secs(1)));
        assert!(timeout.is_storage());
        assert!(!timeout.is_denial());
        assert!(LifecycleError::MissingBlob(id).is_storage());
    }
}
