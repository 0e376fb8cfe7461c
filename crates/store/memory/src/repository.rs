use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use ephemera_core::{SendCondition, SendFilter, SendId, SendMutation, SendRecord};
use ephemera_store::error::RepositoryError;
use ephemera_store::repository::SendRepository;

/// In-memory [`SendRepository`] backed by a [`DashMap`].
///
/// Conditional updates run while holding the shard write lock for the row,
/// which makes predicate check and mutation one atomic step. Only suitable
/// for a single process; shared deployments use the `PostgreSQL` backend.
#[derive(Debug, Default)]
pub struct MemorySendRepository {
    rows: DashMap<SendId, SendRecord>,
}

impl MemorySendRepository {
    /// Create a new, empty in-memory repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows, tombstones included.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl SendRepository for MemorySendRepository {
    async fn insert(&self, record: &SendRecord) -> Result<(), RepositoryError> {
        match self.rows.entry(record.id.clone()) {
            Entry::Occupied(_) => Err(RepositoryError::DuplicateId(record.id.to_string())),
            Entry::Vacant(vacant) => {
                vacant.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: &SendId) -> Result<Option<SendRecord>, RepositoryError> {
        Ok(self.rows.get(id).map(|row| row.value().clone()))
    }

    async fn conditional_update(
        &self,
        id: &SendId,
        condition: &SendCondition,
        mutation: SendMutation,
    ) -> Result<Option<SendRecord>, RepositoryError> {
        mutation.validate()?;

        let Some(mut row) = self.rows.get_mut(id) else {
            return Ok(None);
        };

        let current = row.value_mut();
        if !condition.matches(current) || !mutation.applicable_states().contains(&current.state) {
            return Ok(None);
        }

        mutation.apply(current)?;
        Ok(Some(current.clone()))
    }

    async fn query(&self, filter: &SendFilter) -> Result<Vec<SendRecord>, RepositoryError> {
        let mut rows: Vec<SendRecord> = self
            .rows
            .iter()
            .filter(|row| filter.matches(row.value()))
            .map(|row| row.value().clone())
            .collect();
        rows.sort_by(|a, b| (a.expires_at, &a.id).cmp(&(b.expires_at, &b.id)));
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn remove(&self, id: &SendId) -> Result<bool, RepositoryError> {
        Ok(self.rows.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use ephemera_core::SendState;
    use ephemera_store::testing::{run_repository_conformance_tests, sample_record};

    use super::*;

    #[tokio::test]
    async fn conformance() {
        let repo = MemorySendRepository::new();
        run_repository_conformance_tests(&repo)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_claims_never_overdraw() {
        let repo = Arc::new(MemorySendRepository::new());
        let record = sample_record(Utc::now(), Duration::seconds(60), 5);
        repo.insert(&record).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..64 {
            let repo = Arc::clone(&repo);
            let id = record.id.clone();
            handles.push(tokio::spawn(async move {
                repo.conditional_update(
                    &id,
                    &SendCondition::claimable_at(Utc::now()),
                    SendMutation::ConsumeDownload { at: Utc::now() },
                )
                .await
                .unwrap()
                .is_some()
            }));
        }

        let mut won = 0;
        for handle in handles {
            if handle.await.unwrap() {
                won += 1;
            }
        }
        assert_eq!(won, 5);

        let stored = repo.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.downloads_remaining, 0);
        assert_eq!(stored.state, SendState::Exhausted);
    }

    #[tokio::test]
    async fn conditional_update_on_missing_row_is_none() {
        let repo = MemorySendRepository::new();
        let result = repo
            .conditional_update(
                &SendId::generate(),
                &SendCondition::in_state(SendState::Active),
                SendMutation::Transition(SendState::Expired),
            )
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(repo.is_empty());
    }
}
