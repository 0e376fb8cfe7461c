//! Periodic expiration and reclamation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use ephemera_core::{SendFilter, SendRecord, SendState};
use ephemera_store::SendRepository;

use crate::bounded;
use crate::error::LifecycleError;
use crate::metrics::LifecycleMetrics;
use crate::reclaim::{ReclaimOutcome, Reclaimer};

/// Sweeper configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweeperConfig {
    /// Time between cycles.
    pub interval: Duration,
    /// Maximum records fetched per candidate query.
    pub batch_size: usize,
    /// Records claimed more recently than this are left for a later cycle,
    /// since their downloader may still be reading the blob.
    pub claim_grace: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            batch_size: 500,
            claim_grace: Duration::from_secs(30),
        }
    }
}

/// Tally of one sweep cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub reclaimed: usize,
    /// Lost a race to another writer.
    pub skipped: usize,
    /// Left alone because of a recent claim.
    pub in_flight: usize,
    pub failed: usize,
    /// Tombstones removed under hard delete.
    pub purged: usize,
}

impl SweepReport {
    fn is_quiet(&self) -> bool {
        self.reclaimed == 0 && self.failed == 0 && self.purged == 0
    }
}

/// Background task that retires expired and exhausted sends.
///
/// Each cycle pages through two candidate queries: `exhausted` and `expired`
/// sends, then `active` sends whose expiry has passed. `expired` candidates
/// are left over from earlier cycles whose blob delete failed. Pages are
/// keyset-ordered on `(expires_at, id)`, so a record that fails or is skipped
/// never holds back the records behind it. Every candidate is handed to the
/// [`Reclaimer`], whose conditional writes make it safe for several sweepers
/// to run against one repository.
pub struct Sweeper {
    config: SweeperConfig,
    claim_grace: chrono::Duration,
    repository: Arc<dyn SendRepository>,
    reclaimer: Arc<Reclaimer>,
    metrics: Arc<LifecycleMetrics>,
    storage_timeout: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

impl Sweeper {
    /// Run cycles until a shutdown signal arrives or every shutdown sender
    /// is dropped. A cycle in progress always completes first.
    pub async fn run(&mut self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            batch_size = self.config.batch_size,
            "sweeper starting"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("sweeper received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %e, "sweep cycle failed");
                    }
                }
            }
        }

        info!("sweeper stopped");
    }

    /// Run a single cycle.
    ///
    /// Fails only if a candidate query fails. Per-record failures are
    /// counted in the report and retried next cycle.
    pub async fn run_cycle(&self) -> Result<SweepReport, LifecycleError> {
        let now = Utc::now();
        let mut report = SweepReport::default();

        let mut spent = Pages::new(
            SendFilter::in_states([SendState::Exhausted, SendState::Expired]),
            self.config.batch_size,
        );
        while let Some(page) = spent.next(self).await? {
            for record in &page {
                self.sweep_one(record, now, &mut report).await;
            }
        }

        let mut overdue = Pages::new(
            SendFilter::in_states([SendState::Active]).expired_by(now),
            self.config.batch_size,
        );
        while let Some(page) = overdue.next(self).await? {
            for record in &page {
                self.sweep_one(record, now, &mut report).await;
            }
        }

        if self.reclaimer.hard_delete() {
            let mut tombstones = Pages::new(
                SendFilter::in_states([SendState::Deleted]),
                self.config.batch_size,
            );
            while let Some(page) = tombstones.next(self).await? {
                for record in &page {
                    match self.reclaimer.purge(record).await {
                        Ok(true) => report.purged += 1,
                        Ok(false) => {}
                        Err(e) => {
                            report.failed += 1;
                            warn!(send_id = %record.id, error = %e, "tombstone purge failed");
                        }
                    }
                }
            }
        }

        self.metrics.increment_sweep_cycles();
        if report.is_quiet() {
            debug!(scanned = report.scanned, "sweep cycle complete");
        } else {
            info!(
                scanned = report.scanned,
                reclaimed = report.reclaimed,
                skipped = report.skipped,
                in_flight = report.in_flight,
                failed = report.failed,
                purged = report.purged,
                "sweep cycle complete"
            );
        }
        Ok(report)
    }

    async fn sweep_one(
        &self,
        record: &SendRecord,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        report.scanned += 1;
        if record.claimed_within(self.claim_grace, now) {
            report.in_flight += 1;
            return;
        }
        match self.reclaimer.reclaim(record, now).await {
            Ok(ReclaimOutcome::Reclaimed { .. }) => report.reclaimed += 1,
            Ok(ReclaimOutcome::Skipped) => report.skipped += 1,
            Err(e) => {
                report.failed += 1;
                warn!(send_id = %record.id, error = %e, "reclaim failed; will retry");
            }
        }
    }

    async fn candidates(&self, filter: SendFilter) -> Result<Vec<SendRecord>, LifecycleError> {
        Ok(bounded::repo(self.storage_timeout, self.repository.query(&filter)).await?)
    }
}

/// Keyset pagination over one candidate query.
struct Pages {
    filter: SendFilter,
    batch_size: usize,
    last: Option<SendRecord>,
    done: bool,
}

impl Pages {
    fn new(filter: SendFilter, batch_size: usize) -> Self {
        Self {
            filter,
            batch_size,
            last: None,
            done: false,
        }
    }

    /// The next page, or `None` once a short page has been returned.
    async fn next(
        &mut self,
        sweeper: &Sweeper,
    ) -> Result<Option<Vec<SendRecord>>, LifecycleError> {
        if self.done {
            return Ok(None);
        }
        let mut filter = self.filter.clone().limit(self.batch_size);
        if let Some(last) = &self.last {
            filter = filter.after(last);
        }
        let page = sweeper.candidates(filter).await?;
        self.done = page.len() < self.batch_size;
        self.last = page.last().cloned();
        Ok((!page.is_empty()).then_some(page))
    }
}

/// Builder for [`Sweeper`].
///
/// Usually obtained pre-wired from
/// [`SendManager::sweeper`](crate::SendManager::sweeper).
pub struct SweeperBuilder {
    config: SweeperConfig,
    repository: Option<Arc<dyn SendRepository>>,
    reclaimer: Option<Arc<Reclaimer>>,
    metrics: Option<Arc<LifecycleMetrics>>,
    storage_timeout: Duration,
}

impl SweeperBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: SweeperConfig::default(),
            repository: None,
            reclaimer: None,
            metrics: None,
            storage_timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn config(mut self, config: SweeperConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn repository(mut self, repository: Arc<dyn SendRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    #[must_use]
    pub fn reclaimer(mut self, reclaimer: Arc<Reclaimer>) -> Self {
        self.reclaimer = Some(reclaimer);
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: Arc<LifecycleMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    /// Build the sweeper.
    ///
    /// Returns the sweeper and a shutdown sender.
    pub fn build(self) -> Result<(Sweeper, mpsc::Sender<()>), &'static str> {
        let repository = self.repository.ok_or("repository is required")?;
        let reclaimer = self.reclaimer.ok_or("reclaimer is required")?;
        let metrics = self.metrics.ok_or("metrics is required")?;
        if self.config.interval.is_zero() {
            return Err("interval must be positive");
        }
        if self.config.batch_size == 0 {
            return Err("batch_size must be positive");
        }
        let claim_grace = chrono::Duration::from_std(self.config.claim_grace)
            .map_err(|_| "claim_grace out of range")?;

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let sweeper = Sweeper {
            config: self.config,
            claim_grace,
            repository,
            reclaimer,
            metrics,
            storage_timeout: self.storage_timeout,
            shutdown_rx,
        };

        Ok((sweeper, shutdown_tx))
    }
}

impl Default for SweeperBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Duration as ChronoDuration;
    use ephemera_blob::{BlobStore, MemoryBlobStore};
    use ephemera_core::{BlobKey, SendId};
    use ephemera_store_memory::MemorySendRepository;

    use crate::{LifecycleConfig, SendManager, SendOptions};

    fn fast() -> SweeperConfig {
        SweeperConfig {
            interval: Duration::from_millis(50),
            batch_size: 100,
            claim_grace: Duration::ZERO,
        }
    }

    async fn seed(
        repo: &MemorySendRepository,
        blobs: &MemoryBlobStore,
        age_secs: i64,
        ttl_secs: i64,
    ) -> SendRecord {
        let key: BlobKey = blobs.put(Bytes::from_static(b"payload")).await.unwrap();
        let record = SendRecord::new(
            SendId::generate(),
            key,
            Utc::now() - ChronoDuration::seconds(age_secs),
            ChronoDuration::seconds(ttl_secs),
            3,
        );
        repo.insert(&record).await.unwrap();
        record
    }

    #[tokio::test]
    async fn builder_requires_wiring() {
        let err = SweeperBuilder::new().build().err();
        assert_eq!(err, Some("repository is required"));
    }

    #[tokio::test]
    async fn builder_rejects_zero_interval() {
        let mgr = SendManager::new(
            Arc::new(MemorySendRepository::new()),
            Arc::new(MemoryBlobStore::new()),
            LifecycleConfig::default(),
        );
        let err = mgr
            .sweeper(SweeperConfig {
                interval: Duration::ZERO,
                ..SweeperConfig::default()
            })
            .build()
            .err();
        assert_eq!(err, Some("interval must be positive"));
    }

    #[tokio::test]
    async fn cycle_reclaims_only_overdue_sends() {
        let repo = Arc::new(MemorySendRepository::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let mgr = SendManager::new(repo.clone(), blobs.clone(), LifecycleConfig::default());

        let stale = seed(&repo, &blobs, 120, 60).await;
        let live = seed(&repo, &blobs, 0, 3600).await;
        let spent = mgr
            .upload(Bytes::from_static(b"one"), SendOptions::new(Duration::from_secs(3600), 1))
            .await
            .unwrap();
        mgr.claim(&spent.id).await.unwrap();

        let (sweeper, _tx) = mgr.sweeper(fast()).build().unwrap();
        let report = sweeper.run_cycle().await.unwrap();
        assert_eq!(report.reclaimed, 2);
        assert_eq!(report.failed, 0);

        for id in [&stale.id, &spent.id] {
            let stored = repo.get(id).await.unwrap().unwrap();
            assert_eq!(stored.state, SendState::Deleted);
        }
        let stored = repo.get(&live.id).await.unwrap().unwrap();
        assert_eq!(stored.state, SendState::Active);
        assert!(blobs.exists(&live.blob_key).await.unwrap());
        assert_eq!(blobs.len(), 1);

        // Nothing left to do.
        let report = sweeper.run_cycle().await.unwrap();
        assert_eq!(report.scanned, 0);
    }

    #[tokio::test]
    async fn recent_claim_is_left_for_later() {
        let repo = Arc::new(MemorySendRepository::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let mgr = SendManager::new(repo.clone(), blobs.clone(), LifecycleConfig::default());

        let record = mgr
            .upload(Bytes::from_static(b"one"), SendOptions::new(Duration::from_secs(3600), 1))
            .await
            .unwrap();
        mgr.claim(&record.id).await.unwrap();

        let (sweeper, _tx) = mgr
            .sweeper(SweeperConfig {
                claim_grace: Duration::from_secs(300),
                ..fast()
            })
            .build()
            .unwrap();
        let report = sweeper.run_cycle().await.unwrap();
        assert_eq!(report.in_flight, 1);
        assert_eq!(report.reclaimed, 0);
        assert!(blobs.exists(&record.blob_key).await.unwrap());
    }

    #[tokio::test]
    async fn hard_delete_purges_rows() {
        let repo = Arc::new(MemorySendRepository::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let mgr = SendManager::new(
            repo.clone(),
            blobs.clone(),
            LifecycleConfig {
                hard_delete: true,
                ..LifecycleConfig::default()
            },
        );
        let stale = seed(&repo, &blobs, 120, 60).await;
        let mut tomb = seed(&repo, &blobs, 0, 60).await;
        tomb.state = SendState::Deleted;
        repo.remove(&tomb.id).await.unwrap();
        repo.insert(&tomb).await.unwrap();

        let (sweeper, _tx) = mgr.sweeper(fast()).build().unwrap();
        let report = sweeper.run_cycle().await.unwrap();
        assert_eq!(report.reclaimed, 1);
        assert_eq!(report.purged, 1);
        assert!(repo.get(&stale.id).await.unwrap().is_none());
        assert!(repo.get(&tomb.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweeper_starts_and_stops() {
        let mgr = SendManager::new(
            Arc::new(MemorySendRepository::new()),
            Arc::new(MemoryBlobStore::new()),
            LifecycleConfig::default(),
        );
        let metrics = Arc::clone(mgr.metrics());
        let (mut sweeper, shutdown_tx) = mgr.sweeper(fast()).build().unwrap();

        let handle = tokio::spawn(async move {
            sweeper.run().await;
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = shutdown_tx.send(()).await;

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "sweeper should stop within timeout");
        assert!(metrics.snapshot().sweep_cycles >= 2);
    }
}
