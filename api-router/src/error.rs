use axum::{
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;

/// Thin wrapper so handlers can `?`-propagate `AppError` straight into an
/// axum response; the status mapping itself lives on `AppError::status_code`.
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        let message = match &self.0 {
            AppError::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        if matches!(self.0, AppError::Internal(_)) {
            tracing::error!(error = %self.0, "internal error");
        }

        (status, Json(ErrorResponse { error: message, status: "error".to_string() })).into_response()
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
}
