use std::time::Duration;

/// Upper bounds enforced when creating a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendLimits {
    /// Longest permitted time-to-live.
    pub max_ttl: Duration,
    /// Largest permitted download allowance.
    pub max_downloads: u32,
    /// Largest permitted payload.
    pub max_size_bytes: u64,
}

impl Default for SendLimits {
    fn default() -> Self {
        Self {
            max_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            max_downloads: 100,
            max_size_bytes: 100 * 1024 * 1024,
        }
    }
}

/// Settings shared by [`SendManager`](crate::SendManager) and the reclaim
/// path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Upper bound on any single repository or blob store call.
    pub storage_timeout: Duration,
    /// Reclaim a send right after its final download instead of waiting
    /// for the next sweep.
    pub eager_cleanup: bool,
    /// How long eager cleanup waits after the final claim, so downloads
    /// that claimed earlier can finish reading the blob.
    pub claim_grace: Duration,
    /// Remove finalized records instead of keeping `deleted` tombstones.
    pub hard_delete: bool,
    pub limits: SendLimits,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            storage_timeout: Duration::from_secs(10),
            eager_cleanup: false,
            claim_grace: Duration::from_secs(30),
            hard_delete: false,
            limits: SendLimits::default(),
        }
    }
}
