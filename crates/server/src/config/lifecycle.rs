use serde::{Deserialize, Serialize};

/// Send lifecycle settings.
#[derive(Debug, Deserialize)]
pub struct LifecycleSection {
    /// Upper bound on any single repository or blob store call.
    #[serde(default = "default_storage_timeout_ms")]
    pub storage_timeout_ms: u64,
    /// Reclaim a send right after its final download.
    #[serde(default)]
    pub eager_cleanup: bool,
}

impl Default for LifecycleSection {
    fn default() -> Self {
        Self {
            storage_timeout_ms: default_storage_timeout_ms(),
            eager_cleanup: false,
        }
    }
}

fn default_storage_timeout_ms() -> u64 {
    10_000
}

/// Expiration sweeper settings.
#[derive(Debug, Deserialize)]
pub struct SweeperSection {
    /// Whether this instance runs a sweeper.
    #[serde(default = "default_sweeper_enabled")]
    pub enabled: bool,
    /// Seconds between sweep cycles.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Maximum candidates per query.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Leave sends claimed within this many seconds for a later cycle.
    #[serde(default = "default_claim_grace_seconds")]
    pub claim_grace_seconds: u64,
    /// Remove finalized records instead of keeping tombstones.
    #[serde(default)]
    pub hard_delete: bool,
}

impl Default for SweeperSection {
    fn default() -> Self {
        Self {
            enabled: default_sweeper_enabled(),
            interval_seconds: default_interval_seconds(),
            batch_size: default_batch_size(),
            claim_grace_seconds: default_claim_grace_seconds(),
            hard_delete: false,
        }
    }
}

fn default_sweeper_enabled() -> bool {
    true
}

fn default_interval_seconds() -> u64 {
    60
}

fn default_batch_size() -> usize {
    500
}

fn default_claim_grace_seconds() -> u64 {
    30
}

/// Upload limits and per-send defaults. Served as-is at `/api/config`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,
    #[serde(default = "default_ttl_seconds")]
    pub default_ttl_seconds: u64,
    #[serde(default = "default_max_ttl_seconds")]
    pub max_ttl_seconds: u64,
    #[serde(default = "default_max_downloads_per_send")]
    pub default_max_downloads: u32,
    #[serde(default = "default_max_downloads")]
    pub max_downloads: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size_bytes(),
            default_ttl_seconds: default_ttl_seconds(),
            max_ttl_seconds: default_max_ttl_seconds(),
            default_max_downloads: default_max_downloads_per_send(),
            max_downloads: default_max_downloads(),
        }
    }
}

fn default_max_file_size_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_ttl_seconds() -> u64 {
    24 * 60 * 60
}

fn default_max_ttl_seconds() -> u64 {
    7 * 24 * 60 * 60
}

fn default_max_downloads_per_send() -> u32 {
    1
}

fn default_max_downloads() -> u32 {
    100
}
