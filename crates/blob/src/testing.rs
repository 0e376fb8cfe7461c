use bytes::Bytes;

use ephemera_core::BlobKey;

use crate::error::BlobError;
use crate::store::BlobStore;

/// Run the blob store conformance test suite.
///
/// Call this from your backend's test module with a fresh store instance.
///
/// # Errors
///
/// Returns an error if any backend operation fails.
pub async fn run_blob_store_conformance_tests(store: &dyn BlobStore) -> Result<(), BlobError> {
    test_put_then_get(store).await?;
    test_get_missing(store).await?;
    test_keys_are_unique(store).await?;
    test_delete_is_idempotent(store).await?;
    test_empty_payload(store).await?;
    Ok(())
}

async fn test_put_then_get(store: &dyn BlobStore) -> Result<(), BlobError> {
    let key = store.put(Bytes::from_static(b"hello blob")).await?;
    let data = store.get(&key).await?;
    assert_eq!(data.as_deref(), Some(&b"hello blob"[..]));
    assert!(store.exists(&key).await?, "exists should see a stored blob");
    Ok(())
}

async fn test_get_missing(store: &dyn BlobStore) -> Result<(), BlobError> {
    let key = BlobKey::generate();
    assert!(store.get(&key).await?.is_none(), "missing blob should be None");
    assert!(!store.exists(&key).await?);
    Ok(())
}

async fn test_keys_are_unique(store: &dyn BlobStore) -> Result<(), BlobError> {
    let a = store.put(Bytes::from_static(b"same")).await?;
    let b = store.put(Bytes::from_static(b"same")).await?;
    assert_ne!(a, b, "every put should issue its own key");
    Ok(())
}

async fn test_delete_is_idempotent(store: &dyn BlobStore) -> Result<(), BlobError> {
    let key = store.put(Bytes::from_static(b"short-lived")).await?;
    assert!(store.delete(&key).await?, "first delete should report existence");
    assert!(store.get(&key).await?.is_none());
    assert!(
        !store.delete(&key).await?,
        "deleting an absent blob should succeed and return false"
    );
    Ok(())
}

async fn test_empty_payload(store: &dyn BlobStore) -> Result<(), BlobError> {
    let key = store.put(Bytes::new()).await?;
    let data = store.get(&key).await?;
    assert_eq!(data.map(|d| d.len()), Some(0));
    Ok(())
}
