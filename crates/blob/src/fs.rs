//! Filesystem blob store: one file per blob under a root directory,
//! sharded by the first two characters of the key.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;

use ephemera_core::BlobKey;

use crate::error::BlobError;
use crate::store::BlobStore;

const TMP_DIR: &str = ".tmp";

/// [`BlobStore`] that keeps each payload in its own file.
///
/// Writes go to a temporary file first and are renamed into place, so a
/// reader never observes a partially written blob.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (and create if needed) a blob store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let root = root.into();
        fs::create_dir_all(root.join(TMP_DIR)).await?;
        tracing::info!(root = %root.display(), "filesystem blob store opened");
        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &BlobKey) -> Result<PathBuf, BlobError> {
        let valid = key.len() > 2
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(BlobError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(&key.as_str()[..2]).join(key.as_str()))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, data: Bytes) -> Result<BlobKey, BlobError> {
        let key = BlobKey::generate();
        let path = self.path_for(&key)?;
        let tmp = self.root.join(TMP_DIR).join(key.as_str());

        if let Err(e) = write_atomically(&tmp, &path, &data).await {
            if let Err(cleanup) = fs::remove_file(&tmp).await
                && cleanup.kind() != ErrorKind::NotFound
            {
                tracing::warn!(path = %tmp.display(), error = %cleanup, "failed to remove partial blob");
            }
            return Err(e.into());
        }

        tracing::debug!(blob_key = %key, size = data.len(), "blob written");
        Ok(key)
    }

    async fn get(&self, key: &BlobKey) -> Result<Option<Bytes>, BlobError> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &BlobKey) -> Result<bool, BlobError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool, BlobError> {
        let path = self.path_for(key)?;
        Ok(fs::try_exists(&path).await?)
    }
}

/// Write to `tmp`, then move it into place at `path`.
async fn write_atomically(tmp: &Path, path: &Path, data: &[u8]) -> std::io::Result<()> {
    fs::write(tmp, data).await?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::rename(tmp, path).await
}
