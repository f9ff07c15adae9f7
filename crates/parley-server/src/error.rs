use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use parley_shared::ChatError;
use parley_store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Upload not found: {0}")]
    UploadNotFound(String),

    #[error("Upload too large: {size} bytes (max {max})")]
    UploadTooLarge { size: usize, max: usize },

    #[error("Upload storage error: {0}")]
    UploadStorage(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Chat(ChatError::InvalidPayload(_)) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ApiError::Chat(ChatError::NotFound(_)) => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Chat(ChatError::Forbidden(_)) => (StatusCode::FORBIDDEN, self.to_string()),
            ApiError::Chat(ChatError::ServerError(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            ApiError::Store(StoreError::NotFound) => {
                (StatusCode::NOT_FOUND, "Record not found".to_string())
            }
            ApiError::Store(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::UploadNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::UploadTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            ApiError::UploadStorage(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Upload storage error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
