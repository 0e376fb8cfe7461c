use std::sync::Arc;

use ephemera_blob::{BlobStore, FsBlobStore, MemoryBlobStore};
use ephemera_store::SendRepository;
use ephemera_store_memory::MemorySendRepository;
#[cfg(feature = "postgres")]
use ephemera_store_postgres::{PostgresConfig, PostgresSendRepository};

use crate::config::{BlobConfig, StoreConfig};
use crate::error::ServerError;

/// Create a send repository from the given configuration.
///
/// SQL backends run their migrations here.
#[allow(clippy::unused_async)]
pub async fn create_repository(
    config: &StoreConfig,
) -> Result<Arc<dyn SendRepository>, ServerError> {
    let repository: Arc<dyn SendRepository> = match config.backend.as_str() {
        "memory" => Arc::new(MemorySendRepository::new()),
        #[cfg(feature = "postgres")]
        "postgres" => {
            let url = config.url.clone().ok_or_else(|| {
                ServerError::Config("postgres store backend requires [store] url".into())
            })?;

            let pg_config = PostgresConfig {
                url,
                pool_size: config.pool_size,
                schema: config.schema.clone(),
                table_prefix: config.table_prefix.clone(),
                ssl_mode: config.ssl_mode.clone(),
                ssl_root_cert: config.ssl_root_cert.clone(),
            };

            let repository = PostgresSendRepository::new(pg_config)
                .await
                .map_err(|e| ServerError::Config(format!("store postgres: {e}")))?;

            Arc::new(repository)
        }
        other => {
            return Err(ServerError::Config(format!(
                "unsupported store backend: {other} (is the cargo feature enabled?)"
            )));
        }
    };

    Ok(repository)
}

/// Create a blob store from the given configuration.
pub async fn create_blob_store(config: &BlobConfig) -> Result<Arc<dyn BlobStore>, ServerError> {
    let store: Arc<dyn BlobStore> = match config.backend.as_str() {
        "memory" => Arc::new(MemoryBlobStore::new()),
        "filesystem" => {
            let store = FsBlobStore::open(&config.path)
                .await
                .map_err(|e| ServerError::Config(format!("blob filesystem: {e}")))?;
            Arc::new(store)
        }
        other => {
            return Err(ServerError::Config(format!(
                "unsupported blob backend: {other}"
            )));
        }
    };

    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_backends_are_rejected() {
        let store = StoreConfig {
            backend: "cassandra".into(),
            ..StoreConfig::default()
        };
        assert!(matches!(
            create_repository(&store).await,
            Err(ServerError::Config(_))
        ));

        let blob = BlobConfig {
            backend: "tape".into(),
            ..BlobConfig::default()
        };
        assert!(matches!(
            create_blob_store(&blob).await,
            Err(ServerError::Config(_))
        ));
    }

    #[tokio::test]
    async fn filesystem_blob_store_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("blobs");
        let blob = BlobConfig {
            backend: "filesystem".into(),
            path: root.to_string_lossy().into_owned(),
        };
        create_blob_store(&blob).await.unwrap();
        assert!(root.is_dir());
    }
}
