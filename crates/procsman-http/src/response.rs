//! The error envelope shared by every handler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use procsman_common::AdminError;
use serde::Serialize;

/// Wire form of an admin failure.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message_code: &'static str,
    pub message_default: String,
    pub details: String,
}

/// Wrapper implementing `IntoResponse` for the admin taxonomy.
pub struct ApiError(pub AdminError);

impl From<AdminError> for ApiError {
    fn from(err: AdminError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            message_code: self.0.code(),
            message_default: self.0.to_string(),
            details: match &self.0 {
                AdminError::Internal(details) => details.clone(),
                other => other.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
