use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use ephemera_blob::BlobStore;
use ephemera_core::{
    BlobKey, SendCondition, SendId, SendKind, SendMutation, SendRecord, SendState,
};
use ephemera_store::SendRepository;

use crate::bounded;
use crate::config::LifecycleConfig;
use crate::error::LifecycleError;
use crate::metrics::LifecycleMetrics;
use crate::password;
use crate::reclaim::{ReclaimOutcome, Reclaimer};
use crate::sweeper::{SweeperBuilder, SweeperConfig};

/// Parameters for a new send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOptions {
    pub ttl: Duration,
    pub max_downloads: u32,
    pub kind: SendKind,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    /// Plaintext password; hashed before it reaches the repository.
    pub password: Option<String>,
}

impl SendOptions {
    #[must_use]
    pub fn new(ttl: Duration, max_downloads: u32) -> Self {
        Self {
            ttl,
            max_downloads,
            kind: SendKind::File,
            filename: None,
            content_type: None,
            password: None,
        }
    }

    #[must_use]
    pub fn kind(mut self, kind: SendKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Protect the send with a password. Empty strings are ignored.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        let password = password.into();
        self.password = (!password.is_empty()).then_some(password);
        self
    }
}

/// How a caller is trying to download a send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Access {
    pub password: Option<String>,
    /// When set, sends of any other kind are reported as not found.
    pub kind: Option<SendKind>,
}

/// A granted claim: one download slot has been consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub blob_key: BlobKey,
    /// This claim took the last permitted download.
    pub is_final: bool,
    /// The record as it was right after the claim committed.
    pub record: SendRecord,
}

/// A claimed send with its payload.
#[derive(Debug, Clone)]
pub struct Download {
    pub record: SendRecord,
    pub data: Bytes,
    pub is_final: bool,
}

/// Public view of a send, safe to hand to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendSummary {
    pub id: SendId,
    pub kind: SendKind,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub max_downloads: u32,
    pub downloads_remaining: u32,
    pub state: SendState,
    pub password_protected: bool,
    /// Whether a claim would currently succeed, password aside.
    pub available: bool,
}

impl SendSummary {
    fn of(record: &SendRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: record.id.clone(),
            kind: record.kind,
            filename: record.filename.clone(),
            content_type: record.content_type.clone(),
            size_bytes: record.size_bytes,
            created_at: record.created_at,
            expires_at: record.expires_at,
            max_downloads: record.max_downloads,
            downloads_remaining: record.downloads_remaining,
            state: record.state,
            password_protected: record.is_password_protected(),
            available: record.is_claimable_at(now),
        }
    }
}

/// Creates sends and grants claims.
///
/// The manager holds no per-send state. Every decision is made by a
/// conditional write in the repository, so any number of managers in any
/// number of processes can serve the same sends.
pub struct SendManager {
    repository: Arc<dyn SendRepository>,
    blobs: Arc<dyn BlobStore>,
    config: LifecycleConfig,
    metrics: Arc<LifecycleMetrics>,
    reclaimer: Arc<Reclaimer>,
}

impl SendManager {
    pub fn new(
        repository: Arc<dyn SendRepository>,
        blobs: Arc<dyn BlobStore>,
        config: LifecycleConfig,
    ) -> Self {
        let metrics = Arc::new(LifecycleMetrics::default());
        let reclaimer = Arc::new(Reclaimer::new(
            Arc::clone(&repository),
            Arc::clone(&blobs),
            Arc::clone(&metrics),
            config.storage_timeout,
            config.hard_delete,
        ));
        Self {
            repository,
            blobs,
            config,
            metrics,
            reclaimer,
        }
    }

    #[must_use]
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<LifecycleMetrics> {
        &self.metrics
    }

    /// A sweeper builder wired to this manager's repository, blob store,
    /// metrics, and reclaim policy.
    #[must_use]
    pub fn sweeper(&self, config: SweeperConfig) -> SweeperBuilder {
        SweeperBuilder::new()
            .config(config)
            .repository(Arc::clone(&self.repository))
            .reclaimer(Arc::clone(&self.reclaimer))
            .metrics(Arc::clone(&self.metrics))
            .storage_timeout(self.config.storage_timeout)
    }

    /// Register a send for a blob that is already stored.
    ///
    /// The record starts `active` with every download available.
    pub async fn create(
        &self,
        blob_key: BlobKey,
        size_bytes: u64,
        options: SendOptions,
    ) -> Result<SendRecord, LifecycleError> {
        let result = self
            .create_inner(SendId::generate(), blob_key, size_bytes, options)
            .await;
        self.observe(result)
    }

    async fn create_inner(
        &self,
        id: SendId,
        blob_key: BlobKey,
        size_bytes: u64,
        options: SendOptions,
    ) -> Result<SendRecord, LifecycleError> {
        self.validate(&options, size_bytes)?;
        let ttl = chrono::Duration::from_std(options.ttl)
            .map_err(|_| LifecycleError::Validation("ttl out of range".into()))?;

        let mut record = SendRecord::new(
            id,
            blob_key,
            Utc::now(),
            ttl,
            options.max_downloads,
        );
        record.kind = options.kind;
        record.filename = options.filename;
        record.content_type = options.content_type;
        record.size_bytes = size_bytes;
        record.password_hash = options
            .password
            .as_deref()
            .map(password::hash_password)
            .transpose()?;

        bounded::repo(self.config.storage_timeout, self.repository.insert(&record)).await?;

        self.metrics.increment_created();
        info!(
            send_id = %record.id,
            kind = %record.kind,
            size_bytes,
            max_downloads = record.max_downloads,
            expires_at = %record.expires_at,
            "send created"
        );
        Ok(record)
    }

    /// Store `data` and register a send for it.
    ///
    /// If the record is not written, whether because the insert failed or
    /// because the caller dropped this future, the blob is deleted again.
    pub async fn upload(
        &self,
        data: Bytes,
        options: SendOptions,
    ) -> Result<SendRecord, LifecycleError> {
        let size_bytes = data.len() as u64;
        self.validate(&options, size_bytes)?;

        let blob_key = self.observe(
            bounded::blob(self.config.storage_timeout, self.blobs.put(data))
                .await
                .map_err(LifecycleError::from),
        )?;

        let id = SendId::generate();
        let pending = PendingUpload {
            id: id.clone(),
            blob_key: blob_key.clone(),
            repository: Arc::clone(&self.repository),
            blobs: Arc::clone(&self.blobs),
            storage_timeout: self.config.storage_timeout,
            armed: true,
        };

        let result = self.create_inner(id, blob_key, size_bytes, options).await;
        match self.observe(result) {
            Ok(record) => {
                pending.commit();
                Ok(record)
            }
            Err(e) => {
                pending.abandon().await;
                Err(e)
            }
        }
    }

    /// Consume one download slot.
    ///
    /// Exactly one conditional write decides the outcome. On denial a
    /// follow-up read explains why: not found, expired, or exhausted.
    pub async fn claim(&self, id: &SendId) -> Result<Claim, LifecycleError> {
        let result = self.claim_inner(id).await;
        self.observe(result)
    }

    async fn claim_inner(&self, id: &SendId) -> Result<Claim, LifecycleError> {
        let now = Utc::now();
        let updated = bounded::repo(
            self.config.storage_timeout,
            self.repository.conditional_update(
                id,
                &SendCondition::claimable_at(now),
                SendMutation::ConsumeDownload { at: now },
            ),
        )
        .await?;

        let Some(record) = updated else {
            return Err(self.explain_denial(id, now).await?);
        };

        let is_final = record.downloads_remaining == 0;
        self.metrics.increment_claims_granted();
        if is_final {
            self.metrics.increment_claims_final();
        }
        debug!(
            send_id = %id,
            downloads_remaining = record.downloads_remaining,
            is_final,
            "claim granted"
        );

        Ok(Claim {
            blob_key: record.blob_key.clone(),
            is_final,
            record,
        })
    }

    async fn explain_denial(
        &self,
        id: &SendId,
        now: DateTime<Utc>,
    ) -> Result<LifecycleError, LifecycleError> {
        let current = bounded::repo(self.config.storage_timeout, self.repository.get(id)).await?;
        let denial = match current {
            None => LifecycleError::NotFound(id.clone()),
            Some(r) if r.state == SendState::Deleted => LifecycleError::NotFound(id.clone()),
            Some(r) if r.is_expired_at(now) => LifecycleError::Expired(id.clone()),
            // Includes exhausted sends already retired to `expired` by a sweep.
            Some(_) => LifecycleError::Exhausted(id.clone()),
        };
        match denial {
            LifecycleError::NotFound(_) => self.metrics.increment_claims_not_found(),
            LifecycleError::Expired(_) => self.metrics.increment_claims_expired(),
            _ => self.metrics.increment_claims_exhausted(),
        }
        debug!(send_id = %id, reason = %denial, "claim denied");
        Ok(denial)
    }

    /// Check access, claim a slot, and read the payload.
    ///
    /// The password is verified before the claim, so a wrong password never
    /// consumes a download. If the blob read fails after the claim
    /// committed, the slot stays consumed.
    pub async fn download(&self, id: &SendId, access: &Access) -> Result<Download, LifecycleError> {
        let result = self.download_inner(id, access).await;
        self.observe(result)
    }

    async fn download_inner(&self, id: &SendId, access: &Access) -> Result<Download, LifecycleError> {
        let record = self.visible(id).await?;
        if access.kind.is_some_and(|kind| kind != record.kind) {
            return Err(LifecycleError::NotFound(id.clone()));
        }
        // A record that is unclaimable now can never become claimable
        // again, so the claim below will deny it without a password check.
        if record.is_claimable_at(Utc::now()) {
            self.check_password(&record, access.password.as_deref())?;
        }

        let claim = self.claim_inner(id).await?;

        let data = bounded::blob(self.config.storage_timeout, self.blobs.get(&claim.blob_key))
            .await?
            .ok_or_else(|| {
                error!(send_id = %id, blob_key = %claim.blob_key, "claimed send has no blob");
                LifecycleError::MissingBlob(id.clone())
            })?;

        if claim.is_final && self.config.eager_cleanup {
            self.spawn_reclaim(claim.record.clone());
        }

        Ok(Download {
            record: claim.record,
            data,
            is_final: claim.is_final,
        })
    }

    /// Read a send's public metadata without claiming it.
    pub async fn peek(&self, id: &SendId) -> Result<SendSummary, LifecycleError> {
        let result = self.visible(id).await;
        self.observe(result).map(|record| SendSummary::of(&record, Utc::now()))
    }

    /// Fetch a record, hiding tombstones.
    async fn visible(&self, id: &SendId) -> Result<SendRecord, LifecycleError> {
        bounded::repo(self.config.storage_timeout, self.repository.get(id))
            .await?
            .filter(|r| r.state != SendState::Deleted)
            .ok_or_else(|| LifecycleError::NotFound(id.clone()))
    }

    fn check_password(
        &self,
        record: &SendRecord,
        candidate: Option<&str>,
    ) -> Result<(), LifecycleError> {
        let Some(hash) = record.password_hash.as_deref() else {
            return Ok(());
        };
        let outcome = match candidate {
            None | Some("") => Err(LifecycleError::PasswordRequired),
            Some(p) if password::verify_password(hash, p) => Ok(()),
            Some(_) => Err(LifecycleError::InvalidPassword),
        };
        if outcome.is_err() {
            self.metrics.increment_password_rejections();
        }
        outcome
    }

    fn validate(&self, options: &SendOptions, size_bytes: u64) -> Result<(), LifecycleError> {
        let limits = &self.config.limits;
        if options.ttl.is_zero() {
            return Err(LifecycleError::Validation("ttl must be positive".into()));
        }
        if options.ttl > limits.max_ttl {
            return Err(LifecycleError::Validation(format!(
                "ttl exceeds maximum of {}s",
                limits.max_ttl.as_secs()
            )));
        }
        if options.max_downloads == 0 {
            return Err(LifecycleError::Validation(
                "max_downloads must be at least 1".into(),
            ));
        }
        if options.max_downloads > limits.max_downloads {
            return Err(LifecycleError::Validation(format!(
                "max_downloads exceeds maximum of {}",
                limits.max_downloads
            )));
        }
        if size_bytes > limits.max_size_bytes {
            return Err(LifecycleError::PayloadTooLarge {
                size: size_bytes,
                limit: limits.max_size_bytes,
            });
        }
        Ok(())
    }

    /// Reclaim once `claim_grace` has passed. Every other claim on the
    /// record committed before this final one, so by then none of their
    /// downloads is still inside its grace window.
    fn spawn_reclaim(&self, record: SendRecord) {
        let reclaimer = Arc::clone(&self.reclaimer);
        let grace = self.config.claim_grace;
        tokio::spawn(async move {
            if !grace.is_zero() {
                tokio::time::sleep(grace).await;
            }
            match reclaimer.reclaim(&record, Utc::now()).await {
                Ok(ReclaimOutcome::Reclaimed { .. }) => {
                    debug!(send_id = %record.id, "eager cleanup reclaimed send");
                }
                Ok(ReclaimOutcome::Skipped) => {}
                Err(e) => {
                    warn!(send_id = %record.id, error = %e, "eager cleanup failed; sweeper will retry");
                }
            }
        });
    }

    fn observe<T>(&self, result: Result<T, LifecycleError>) -> Result<T, LifecycleError> {
        if let Err(e) = &result
            && e.is_storage()
        {
            self.metrics.increment_storage_errors();
            warn!(error = %e, "storage failure");
        }
        result
    }
}

/// A blob written by [`SendManager::upload`] whose record is not yet known
/// to be committed. Dropping it while armed schedules the rollback.
struct PendingUpload {
    id: SendId,
    blob_key: BlobKey,
    repository: Arc<dyn SendRepository>,
    blobs: Arc<dyn BlobStore>,
    storage_timeout: Duration,
    armed: bool,
}

impl PendingUpload {
    fn commit(mut self) {
        self.armed = false;
    }

    async fn abandon(mut self) {
        self.armed = false;
        self.rollback().await;
    }

    /// Delete the blob unless a record for it turns out to exist. An insert
    /// that timed out or was cancelled may still have committed.
    fn rollback(&self) -> impl Future<Output = ()> + Send + 'static {
        let id = self.id.clone();
        let blob_key = self.blob_key.clone();
        let repository = Arc::clone(&self.repository);
        let blobs = Arc::clone(&self.blobs);
        let limit = self.storage_timeout;
        async move {
            match bounded::repo(limit, repository.get(&id)).await {
                Ok(Some(_)) => return,
                Ok(None) => {}
                Err(e) => {
                    warn!(send_id = %id, blob_key = %blob_key, error = %e, "cannot confirm upload state; blob left in place");
                    return;
                }
            }
            match bounded::blob(limit, blobs.delete(&blob_key)).await {
                Ok(_) => debug!(send_id = %id, blob_key = %blob_key, "upload rolled back"),
                Err(e) => warn!(
                    send_id = %id,
                    blob_key = %blob_key,
                    error = %e,
                    "failed to roll back blob after upload failed"
                ),
            }
        }
    }
}

impl Drop for PendingUpload {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(self.rollback());
            }
            Err(_) => warn!(blob_key = %self.blob_key, "upload abandoned outside a runtime; blob left in place"),
        }
    }
}
