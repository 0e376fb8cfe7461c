use async_trait::async_trait;
use bytes::Bytes;

use ephemera_core::BlobKey;

use crate::error::BlobError;

/// Pluggable blob storage backend for send payloads.
///
/// Keys are opaque and issued by the store. A key is owned by exactly one
/// send record; the store itself knows nothing about records or expiry.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a payload and return the key that addresses it.
    async fn put(&self, data: Bytes) -> Result<BlobKey, BlobError>;

    /// Retrieve a payload. Returns `None` if no blob exists under `key`.
    async fn get(&self, key: &BlobKey) -> Result<Option<Bytes>, BlobError>;

    /// Delete a payload. Returns `true` if the blob existed.
    ///
    /// Deleting an absent blob is not an error.
    async fn delete(&self, key: &BlobKey) -> Result<bool, BlobError>;

    /// Check whether a blob exists without reading it.
    async fn exists(&self, key: &BlobKey) -> Result<bool, BlobError>;
}
