use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ephemera_core::{SendId, SendKind};
use ephemera_lifecycle::MetricsSnapshot;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub metrics: MetricsSnapshot,
}

/// Query parameters for `POST /api/send`. The request body is the payload.
#[derive(Debug, Default, Deserialize)]
pub struct CreateSendParams {
    /// `file` (default) or `text`.
    pub kind: Option<String>,
    pub ttl_seconds: Option<u64>,
    pub max_downloads: Option<u32>,
    pub filename: Option<String>,
    pub password: Option<String>,
}

/// Response body for a created send.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSendResponse {
    pub id: SendId,
    /// Share link for the download.
    pub url: String,
    pub kind: SendKind,
    pub expires_at: DateTime<Utc>,
    pub max_downloads: u32,
    pub password_protected: bool,
}

/// Query parameters for the download endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct DownloadParams {
    pub password: Option<String>,
}
