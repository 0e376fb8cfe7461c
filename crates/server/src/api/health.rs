use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use super::AppState;
use super::schemas::HealthResponse;

/// `GET /health` -- returns service status together with a metrics snapshot.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let body = HealthResponse {
        status: "ok".into(),
        metrics: state.manager.metrics().snapshot(),
    };
    (StatusCode::OK, Json(body))
}
