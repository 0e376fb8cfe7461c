use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;

use super::AppState;

/// `GET /api/config` -- upload limits for clients rendering the send form.
pub async fn limits(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.limits)
}
