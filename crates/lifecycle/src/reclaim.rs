//! Retiring a send and reclaiming its blob.
//!
//! Reclamation is a sequence of conditional writes around one blob delete:
//!
//! 1. `active`/`exhausted` -> `expired`, conditioned on the state observed
//!    when the candidate was read. A lost race means someone else already
//!    moved the record; the candidate is skipped.
//! 2. Delete the blob. An absent blob counts as deleted. A failure leaves
//!    the record `expired`, which marks it for retry on the next pass.
//! 3. `expired` -> `deleted`, or remove the row when hard deletes are
//!    enabled.
//!
//! Any number of reclaimers, in any number of processes, can run this
//! against the same record. At most one wins each write and the blob delete
//! is idempotent.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use ephemera_blob::BlobStore;
use ephemera_core::{SendCondition, SendMutation, SendRecord, SendState};
use ephemera_store::SendRepository;

use crate::bounded;
use crate::error::LifecycleError;
use crate::metrics::LifecycleMetrics;

/// Result of one reclamation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimOutcome {
    /// The blob is gone and the record finalized.
    Reclaimed {
        /// Whether the blob still existed when deleted.
        blob_existed: bool,
    },
    /// Nothing to do: the record is live, already finalized, or another
    /// writer moved it first.
    Skipped,
}

/// Runs the retire, delete, finalize sequence for individual records.
///
/// Shared by the [`Sweeper`](crate::Sweeper) and the eager cleanup that
/// follows a final download.
pub struct Reclaimer {
    repository: Arc<dyn SendRepository>,
    blobs: Arc<dyn BlobStore>,
    metrics: Arc<LifecycleMetrics>,
    storage_timeout: Duration,
    hard_delete: bool,
}

impl Reclaimer {
    pub fn new(
        repository: Arc<dyn SendRepository>,
        blobs: Arc<dyn BlobStore>,
        metrics: Arc<LifecycleMetrics>,
        storage_timeout: Duration,
        hard_delete: bool,
    ) -> Self {
        Self {
            repository,
            blobs,
            metrics,
            storage_timeout,
            hard_delete,
        }
    }

    #[must_use]
    pub fn hard_delete(&self) -> bool {
        self.hard_delete
    }

    /// Reclaim `record`, treating its `state` as the observed state.
    ///
    /// An `active` record that has not yet expired is never touched.
    pub async fn reclaim(
        &self,
        record: &SendRecord,
        now: DateTime<Utc>,
    ) -> Result<ReclaimOutcome, LifecycleError> {
        let outcome = self.reclaim_inner(record, now).await;
        match &outcome {
            Ok(ReclaimOutcome::Reclaimed { .. }) => self.metrics.increment_reclaimed(),
            Ok(ReclaimOutcome::Skipped) => self.metrics.increment_reclaim_skipped(),
            Err(_) => self.metrics.increment_reclaim_errors(),
        }
        outcome
    }

    async fn reclaim_inner(
        &self,
        record: &SendRecord,
        now: DateTime<Utc>,
    ) -> Result<ReclaimOutcome, LifecycleError> {
        if !record.is_reclaimable_at(now) {
            return Ok(ReclaimOutcome::Skipped);
        }
        if matches!(record.state, SendState::Active | SendState::Exhausted)
            && !self.retire(record).await?
        {
            return Ok(ReclaimOutcome::Skipped);
        }

        let blob_existed = bounded::blob(self.storage_timeout, self.blobs.delete(&record.blob_key))
            .await
            .inspect_err(|e| {
                warn!(
                    send_id = %record.id,
                    blob_key = %record.blob_key,
                    error = %e,
                    "blob delete failed; record stays expired for retry"
                );
            })?;

        if !self.finalize(record).await? {
            return Ok(ReclaimOutcome::Skipped);
        }

        debug!(send_id = %record.id, blob_existed, "send reclaimed");
        Ok(ReclaimOutcome::Reclaimed { blob_existed })
    }

    /// Move the record from its observed state to `expired`.
    async fn retire(&self, record: &SendRecord) -> Result<bool, LifecycleError> {
        let retired = bounded::repo(
            self.storage_timeout,
            self.repository.conditional_update(
                &record.id,
                &SendCondition::in_state(record.state),
                SendMutation::Transition(SendState::Expired),
            ),
        )
        .await?;

        if retired.is_some() {
            self.metrics.increment_retired();
            debug!(send_id = %record.id, from = %record.state, "send retired");
        }
        Ok(retired.is_some())
    }

    /// Tombstone or remove a record whose blob is gone.
    async fn finalize(&self, record: &SendRecord) -> Result<bool, LifecycleError> {
        let tombstoned = bounded::repo(
            self.storage_timeout,
            self.repository.conditional_update(
                &record.id,
                &SendCondition::in_state(SendState::Expired),
                SendMutation::Transition(SendState::Deleted),
            ),
        )
        .await?;

        if tombstoned.is_none() {
            return Ok(false);
        }
        if self.hard_delete {
            bounded::repo(self.storage_timeout, self.repository.remove(&record.id)).await?;
        }
        Ok(true)
    }

    /// Remove a `deleted` tombstone outright. Used when hard deletes are
    /// enabled to clear tombstones left by an interrupted finalize.
    pub async fn purge(&self, record: &SendRecord) -> Result<bool, LifecycleError> {
        if record.state != SendState::Deleted {
            return Ok(false);
        }
        Ok(bounded::repo(self.storage_timeout, self.repository.remove(&record.id)).await?)
    }
}
