use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{self, Request, StatusCode};
use tower::ServiceExt;

use ephemera_blob::MemoryBlobStore;
use ephemera_lifecycle::{LifecycleConfig, SendManager, SweeperConfig};
use ephemera_server::api::schemas::CreateSendResponse;
use ephemera_server::api::{AppState, router};
use ephemera_server::config::LimitsConfig;
use ephemera_store_memory::MemorySendRepository;

// -- Helpers --------------------------------------------------------------

fn build_state(limits: LimitsConfig) -> AppState {
    let config = LifecycleConfig {
        limits: ephemera_lifecycle::SendLimits {
            max_ttl: std::time::Duration::from_secs(limits.max_ttl_seconds),
            max_downloads: limits.max_downloads,
            max_size_bytes: limits.max_file_size_bytes,
        },
        ..LifecycleConfig::default()
    };
    let manager = SendManager::new(
        Arc::new(MemorySendRepository::new()),
        Arc::new(MemoryBlobStore::new()),
        config,
    );
    AppState {
        manager: Arc::new(manager),
        limits,
        base_url: "https://drop.test".to_owned(),
    }
}

fn app() -> Router {
    router(build_state(LimitsConfig::default()))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, http::HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body.to_vec())
}

async fn upload(app: &Router, query: &str, payload: &'static [u8]) -> CreateSendResponse {
    let (status, _, body) = send(
        app,
        Request::builder()
            .method(http::Method::POST)
            .uri(format!("/api/send?{query}"))
            .header(http::header::CONTENT_TYPE, "application/pdf")
            .body(Body::from(payload))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", String::from_utf8_lossy(&body));
    serde_json::from_slice(&body).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn error_message(body: &[u8]) -> String {
    let json: serde_json::Value = serde_json::from_slice(body).unwrap();
    json["error"].as_str().unwrap_or_default().to_owned()
}

// -- Tests ----------------------------------------------------------------

#[tokio::test]
async fn health_returns_ok_with_metrics() {
    let (status, _, body) = send(&app(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["metrics"]["created"], 0);
}

#[tokio::test]
async fn config_exposes_limits() {
    let (status, _, body) = send(&app(), get("/api/config")).await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["max_downloads"], 100);
    assert_eq!(json["default_max_downloads"], 1);
}

#[tokio::test]
async fn file_send_downloads_once_then_gone() {
    let app = app();
    let created = upload(&app, "filename=report.pdf&max_downloads=1", b"%PDF-1.7").await;
    assert_eq!(created.url, format!("https://drop.test/api/send/{}", created.id));
    assert_eq!(created.max_downloads, 1);
    assert!(!created.password_protected);

    let (status, headers, body) = send(&app, get(&format!("/api/send/{}", created.id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"%PDF-1.7");
    assert_eq!(headers[http::header::CONTENT_TYPE], "application/pdf");
    assert_eq!(
        headers[http::header::CONTENT_DISPOSITION],
        "attachment; filename=\"report.pdf\""
    );
    assert_eq!(headers["x-downloads-remaining"], "0");

    let (status, _, body) = send(&app, get(&format!("/api/send/{}", created.id))).await;
    assert_eq!(status, StatusCode::GONE);
    assert!(error_message(&body).contains("exhausted"));
}

#[tokio::test]
async fn text_send_is_served_as_plain_text() {
    let app = app();
    let created = upload(&app, "kind=text&max_downloads=2", b"hello there").await;
    assert!(created.url.contains("/api/text/"));

    let (status, headers, body) = send(&app, get(&format!("/api/text/{}", created.id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"hello there");
    assert_eq!(
        headers[http::header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    assert_eq!(headers["x-downloads-remaining"], "1");
}

#[tokio::test]
async fn text_endpoint_hides_file_sends() {
    let app = app();
    let created = upload(&app, "max_downloads=1", b"binary").await;

    let (status, _, _) = send(&app, get(&format!("/api/text/{}", created.id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The miss consumed nothing.
    let (status, _, _) = send(&app, get(&format!("/api/send/{}", created.id))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn password_protected_send() {
    let app = app();
    let created = upload(&app, "password=s3cret&max_downloads=1", b"classified").await;
    assert!(created.password_protected);

    let (status, _, body) = send(&app, get(&format!("/api/send/{}/check", created.id))).await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["password_protected"], true);
    assert_eq!(json["available"], true);
    assert!(json.get("password_hash").is_none());

    let (status, _, _) = send(&app, get(&format!("/api/send/{}", created.id))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = send(
        &app,
        get(&format!("/api/send/{}?password=wrong", created.id)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, body) = send(
        &app,
        get(&format!("/api/send/{}?password=s3cret", created.id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"classified");
}

#[tokio::test]
async fn unknown_send_is_not_found() {
    let app = app();
    let (status, _, _) = send(&app, get("/api/send/doesnotexist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = send(&app, get("/api/send/doesnotexist/check")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_uploads_are_rejected() {
    let app = app();

    let (status, _, body) = send(
        &app,
        Request::builder()
            .method(http::Method::POST)
            .uri("/api/send?max_downloads=0")
            .body(Body::from("x"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_message(&body).contains("max_downloads"));

    let (status, _, _) = send(
        &app,
        Request::builder()
            .method(http::Method::POST)
            .uri("/api/send?ttl_seconds=0")
            .body(Body::from("x"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(
        &app,
        Request::builder()
            .method(http::Method::POST)
            .uri("/api/send?kind=video")
            .body(Body::from("x"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(
        &app,
        Request::builder()
            .method(http::Method::POST)
            .uri("/api/send")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversize_upload_is_rejected() {
    let app = router(build_state(LimitsConfig {
        max_file_size_bytes: 8,
        ..LimitsConfig::default()
    }));

    let (status, _, _) = send(
        &app,
        Request::builder()
            .method(http::Method::POST)
            .uri("/api/send")
            .body(Body::from(vec![0u8; 64]))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn swept_send_is_not_found() {
    let state = build_state(LimitsConfig::default());
    let manager = Arc::clone(&state.manager);
    let app = router(state);

    let created = upload(&app, "max_downloads=1", b"once").await;
    let (status, _, _) = send(&app, get(&format!("/api/send/{}", created.id))).await;
    assert_eq!(status, StatusCode::OK);

    let (sweeper, _tx) = manager
        .sweeper(SweeperConfig {
            claim_grace: std::time::Duration::ZERO,
            ..SweeperConfig::default()
        })
        .build()
        .unwrap();
    let report = sweeper.run_cycle().await.unwrap();
    assert_eq!(report.reclaimed, 1);

    let (status, _, _) = send(&app, get(&format!("/api/send/{}", created.id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
