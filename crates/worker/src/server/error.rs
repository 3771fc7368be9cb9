use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pulse_core::types::JobId;
use pulse_db::store::StoreError;
use serde_json::json;

/// Error type for status server handlers.
///
/// Renders as `{"error": …, "code": …}` with a matching HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ApiError::Store(e) => {
                tracing::error!(error = %e, "Job store error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
