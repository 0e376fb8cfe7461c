use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use ephemera_core::BlobKey;

use crate::error::BlobError;
use crate::store::BlobStore;

/// In-memory [`BlobStore`] backed by a [`DashMap`].
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<BlobKey, Bytes>,
}

impl MemoryBlobStore {
    /// Create a new, empty in-memory blob store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs currently held.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, data: Bytes) -> Result<BlobKey, BlobError> {
        let key = BlobKey::generate();
        self.blobs.insert(key.clone(), data);
        Ok(key)
    }

    async fn get(&self, key: &BlobKey) -> Result<Option<Bytes>, BlobError> {
        Ok(self.blobs.get(key).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, key: &BlobKey) -> Result<bool, BlobError> {
        Ok(self.blobs.remove(key).is_some())
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool, BlobError> {
        Ok(self.blobs.contains_key(key))
    }
}
