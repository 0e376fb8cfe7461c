use async_trait::async_trait;

use ephemera_core::{SendCondition, SendFilter, SendId, SendMutation, SendRecord};

use crate::error::RepositoryError;

/// Persistent table of send records.
///
/// Every state change goes through [`conditional_update`], which backends
/// must implement as one atomic compare-and-swap on the row. Correctness
/// across service instances depends on that, not on any in-process lock.
///
/// [`conditional_update`]: SendRepository::conditional_update
#[async_trait]
pub trait SendRepository: Send + Sync {
    /// Insert a new record. Fails with [`RepositoryError::DuplicateId`] if
    /// the id has ever been used.
    async fn insert(&self, record: &SendRecord) -> Result<(), RepositoryError>;

    /// Fetch a record by id, tombstones included.
    async fn get(&self, id: &SendId) -> Result<Option<SendRecord>, RepositoryError>;

    /// Apply `mutation` only if the row currently satisfies `condition`.
    ///
    /// Returns the row as it is after the update, or `None` when zero rows
    /// were affected (missing id, predicate false, or the mutation is not
    /// applicable from the row's state).
    async fn conditional_update(
        &self,
        id: &SendId,
        condition: &SendCondition,
        mutation: SendMutation,
    ) -> Result<Option<SendRecord>, RepositoryError>;

    /// Return records matching `filter`, ordered by `expires_at`.
    async fn query(&self, filter: &SendFilter) -> Result<Vec<SendRecord>, RepositoryError>;

    /// Remove a row outright. Returns `true` if it existed.
    async fn remove(&self, id: &SendId) -> Result<bool, RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Verify object safety.
    fn _assert_dyn_repository(_: &dyn SendRepository) {}
}
