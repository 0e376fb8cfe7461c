use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters tracking send lifecycle outcomes.
///
/// All counters use relaxed ordering. For a consistent point-in-time view,
/// call [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct LifecycleMetrics {
    /// Sends created.
    pub created: AtomicU64,
    /// Claims granted.
    pub claims_granted: AtomicU64,
    /// Claims that took the final download.
    pub claims_final: AtomicU64,
    /// Claims denied because the send was missing or deleted.
    pub claims_not_found: AtomicU64,
    /// Claims denied because the send had expired.
    pub claims_expired: AtomicU64,
    /// Claims denied because the send was exhausted.
    pub claims_exhausted: AtomicU64,
    /// Downloads rejected by the password check.
    pub password_rejections: AtomicU64,
    /// Storage operations that failed or timed out.
    pub storage_errors: AtomicU64,
    /// Sweep cycles completed.
    pub sweep_cycles: AtomicU64,
    /// Records moved to `expired` by a reclaimer.
    pub retired: AtomicU64,
    /// Blobs deleted and records finalized.
    pub reclaimed: AtomicU64,
    /// Candidates skipped because another writer got there first or a claim
    /// was still in flight.
    pub reclaim_skipped: AtomicU64,
    /// Reclamations that failed and will be retried.
    pub reclaim_errors: AtomicU64,
}

macro_rules! counters {
    ($($field:ident => $method:ident),* $(,)?) => {
        impl LifecycleMetrics {
            $(
                #[doc = concat!("Increment the `", stringify!($field), "` counter.")]
                pub fn $method(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*

            /// Take a point-in-time snapshot of all counters.
            #[must_use]
            pub fn snapshot(&self) -> MetricsSnapshot {
                MetricsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }

        /// A plain-data copy of [`LifecycleMetrics`].
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
        pub struct MetricsSnapshot {
            $(pub $field: u64,)*
        }
    };
}

counters! {
    created => increment_created,
    claims_granted => increment_claims_granted,
    claims_final => increment_claims_final,
    claims_not_found => increment_claims_not_found,
    claims_expired => increment_claims_expired,
    claims_exhausted => increment_claims_exhausted,
    password_rejections => increment_password_rejections,
    storage_errors => increment_storage_errors,
    sweep_cycles => increment_sweep_cycles,
    retired => increment_retired,
    reclaimed => increment_reclaimed,
    reclaim_skipped => increment_reclaim_skipped,
    reclaim_errors => increment_reclaim_errors,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let metrics = LifecycleMetrics::default();
        metrics.increment_created();
        metrics.increment_created();
        metrics.increment_claims_exhausted();

        let snap = metrics.snapshot();
        assert_eq!(snap.created, 2);
        assert_eq!(snap.claims_exhausted, 1);
        assert_eq!(snap.reclaimed, 0);
    }
}
