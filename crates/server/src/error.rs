use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use ephemera_lifecycle::LifecycleError;

/// Errors that can occur when running the Ephemera server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error (e.g. binding the listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A malformed request the lifecycle layer never saw.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A send lifecycle error surfaced through the API.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Config(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Lifecycle(e) => match e {
                LifecycleError::Validation(_) => StatusCode::BAD_REQUEST,
                LifecycleError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                LifecycleError::NotFound(_) => StatusCode::NOT_FOUND,
                LifecycleError::Expired(_) | LifecycleError::Exhausted(_) => StatusCode::GONE,
                LifecycleError::PasswordRequired => StatusCode::UNAUTHORIZED,
                LifecycleError::InvalidPassword => StatusCode::FORBIDDEN,
                LifecycleError::Repository(_) | LifecycleError::Blob(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                LifecycleError::MissingBlob(_) | LifecycleError::Hashing(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Backend details stay in the logs.
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            match status {
                StatusCode::SERVICE_UNAVAILABLE => "storage temporarily unavailable".to_owned(),
                _ => "internal server error".to_owned(),
            }
        } else {
            self.to_string()
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}
