use std::future::Future;
use std::time::Duration;

use ephemera_blob::BlobError;
use ephemera_store::RepositoryError;

/// Run a repository call, failing with [`RepositoryError::Timeout`] once
/// `limit` elapses.
pub(crate) async fn repo<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, RepositoryError>>,
) -> Result<T, RepositoryError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| RepositoryError::Timeout(limit))?
}

/// Run a blob store call, failing with [`BlobError::Timeout`] once `limit`
/// elapses.
pub(crate) async fn blob<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, BlobError>>,
) -> Result<T, BlobError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| BlobError::Timeout(limit))?
}
