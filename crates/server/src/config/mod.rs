mod blob;
mod lifecycle;
mod server;
mod store;

#[cfg(test)]
mod tests;

pub use blob::*;
pub use lifecycle::*;
pub use server::*;
pub use store::*;

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use ephemera_lifecycle::{LifecycleConfig, SendLimits, SweeperConfig};

use crate::error::ServerError;

/// Top-level configuration for the Ephemera server, loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct EphemeraConfig {
    /// HTTP server bind configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Send record repository backend.
    #[serde(default)]
    pub store: StoreConfig,
    /// Blob storage backend.
    #[serde(default)]
    pub blob: BlobConfig,
    #[serde(default)]
    pub lifecycle: LifecycleSection,
    /// Expiration sweeper.
    #[serde(default)]
    pub sweeper: SweeperSection,
    /// Upload limits and per-send defaults.
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl EphemeraConfig {
    /// Load from `path`, falling back to defaults if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ServerError> {
        toml::from_str(contents).map_err(|e| ServerError::Config(e.to_string()))
    }

    /// Settings for the send manager.
    #[must_use]
    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            storage_timeout: Duration::from_millis(self.lifecycle.storage_timeout_ms),
            eager_cleanup: self.lifecycle.eager_cleanup,
            claim_grace: Duration::from_secs(self.sweeper.claim_grace_seconds),
            hard_delete: self.sweeper.hard_delete,
            limits: SendLimits {
                max_ttl: Duration::from_secs(self.limits.max_ttl_seconds),
                max_downloads: self.limits.max_downloads,
                max_size_bytes: self.limits.max_file_size_bytes,
            },
        }
    }

    /// Settings for the background sweeper.
    #[must_use]
    pub fn sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            interval: Duration::from_secs(self.sweeper.interval_seconds),
            batch_size: self.sweeper.batch_size,
            claim_grace: Duration::from_secs(self.sweeper.claim_grace_seconds),
        }
    }
}
