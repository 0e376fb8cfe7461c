use std::time::Duration;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::info;

use ephemera_core::{SendId, SendKind};
use ephemera_lifecycle::{Access, Download, SendOptions, SendSummary};

use super::AppState;
use super::schemas::{CreateSendParams, CreateSendResponse, DownloadParams};
use crate::error::ServerError;

const DOWNLOADS_REMAINING: HeaderName = HeaderName::from_static("x-downloads-remaining");
const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const OCTET_STREAM: &str = "application/octet-stream";

/// `POST /api/send` -- store the request body as a new send.
pub async fn create(
    State(state): State<AppState>,
    Query(params): Query<CreateSendParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateSendResponse>), ServerError> {
    if body.is_empty() {
        return Err(ServerError::BadRequest("empty payload".into()));
    }

    let kind = params
        .kind
        .as_deref()
        .map(str::parse::<SendKind>)
        .transpose()
        .map_err(|e| ServerError::BadRequest(e.to_string()))?
        .unwrap_or_default();

    let ttl = Duration::from_secs(params.ttl_seconds.unwrap_or(state.limits.default_ttl_seconds));
    let max_downloads = params
        .max_downloads
        .unwrap_or(state.limits.default_max_downloads);
    let mut options = SendOptions::new(ttl, max_downloads).kind(kind);

    match kind {
        SendKind::Text => {
            if std::str::from_utf8(&body).is_err() {
                return Err(ServerError::BadRequest("text sends must be UTF-8".into()));
            }
            options = options.content_type(TEXT_PLAIN);
        }
        SendKind::File => {
            if let Some(ct) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
                options = options.content_type(ct);
            }
        }
    }
    if let Some(filename) = params.filename.filter(|f| !f.is_empty()) {
        options = options.filename(filename);
    }
    if let Some(password) = params.password {
        options = options.password(password);
    }

    let record = state.manager.upload(body, options).await?;

    let route = match record.kind {
        SendKind::File => "send",
        SendKind::Text => "text",
    };
    let url = format!("{}/api/{route}/{}", state.base_url, record.id);
    info!(send_id = %record.id, kind = %record.kind, "send uploaded");

    Ok((
        StatusCode::CREATED,
        Json(CreateSendResponse {
            password_protected: record.is_password_protected(),
            id: record.id,
            url,
            kind: record.kind,
            expires_at: record.expires_at,
            max_downloads: record.max_downloads,
        }),
    ))
}

/// `GET /api/send/{id}` -- claim a download and stream the payload back as
/// an attachment.
pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<DownloadParams>,
) -> Result<Response, ServerError> {
    let access = Access {
        password: params.password,
        kind: None,
    };
    let download = state.manager.download(&SendId::new(id), &access).await?;
    Ok(attachment(download))
}

/// `GET /api/text/{id}` -- claim a text send and return it as plain text.
pub async fn text(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<DownloadParams>,
) -> Result<Response, ServerError> {
    let access = Access {
        password: params.password,
        kind: Some(SendKind::Text),
    };
    let download = state.manager.download(&SendId::new(id), &access).await?;

    let mut headers = common_headers(&download);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
    Ok((StatusCode::OK, headers, download.data).into_response())
}

/// `GET /api/send/{id}/check` -- metadata and password requirement, without
/// consuming a download.
pub async fn check(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SendSummary>, ServerError> {
    Ok(Json(state.manager.peek(&SendId::new(id)).await?))
}

fn attachment(download: Download) -> Response {
    let record = &download.record;
    let mut headers = common_headers(&download);

    let content_type = record.content_type.as_deref().unwrap_or(OCTET_STREAM);
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(OCTET_STREAM)),
    );

    let filename = record
        .filename
        .as_deref()
        .map_or_else(|| record.id.to_string(), sanitize_filename);
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\"")) {
        headers.insert(CONTENT_DISPOSITION, value);
    }

    (StatusCode::OK, headers, download.data).into_response()
}

fn common_headers(download: &Download) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(
        DOWNLOADS_REMAINING,
        HeaderValue::from(download.record.downloads_remaining),
    );
    headers
}

/// Keep a filename safe for a quoted `Content-Disposition` parameter.
fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "download".to_owned()
    } else {
        trimmed.to_owned()
    }
}
