use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use crate::error::UploadError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Errors raised while handling a TUS request.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid upload id: {0}")]
    InvalidId(String),

    #[error(transparent)]
    Upload(#[from] UploadError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, detail) = match &self {
            ApiError::InvalidId(id) => (StatusCode::NOT_FOUND, "Upload not found", Some(id.clone())),
            ApiError::Upload(err) => match err {
                UploadError::InvalidSize { length, .. } => {
                    let status = if length.is_some_and(|len| len >= 1) {
                        StatusCode::PAYLOAD_TOO_LARGE
                    } else {
                        StatusCode::BAD_REQUEST
                    };
                    (status, "Invalid upload length", Some(err.to_string()))
                }
                UploadError::NotFound(_) => (StatusCode::NOT_FOUND, "Upload not found", None),
                UploadError::MissingOffset => (
                    StatusCode::BAD_REQUEST,
                    "Upload-Offset header required",
                    None,
                ),
                UploadError::MissingContentLength => (
                    StatusCode::BAD_REQUEST,
                    "Content-Length header required",
                    None,
                ),
                UploadError::UnsupportedContentKind(_) => (
                    StatusCode::UNSUPPORTED_MEDIA_TYPE,
                    "Unsupported content type",
                    Some(err.to_string()),
                ),
                UploadError::OffsetConflict { .. } | UploadError::OffsetMismatch { .. } => {
                    (StatusCode::CONFLICT, "Offset mismatch", Some(err.to_string()))
                }
                UploadError::SizeExceeded { .. } => (
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "Upload exceeds declared length",
                    Some(err.to_string()),
                ),
                UploadError::UploadIncomplete { .. } => {
                    (StatusCode::CONFLICT, "Upload incomplete", Some(err.to_string()))
                }
                UploadError::SizeInvariantViolated { .. }
                | UploadError::StorageWriteFailed(_)
                | UploadError::Storage(_)
                | UploadError::Database(_) => {
                    error!(error = %err, "Internal upload error");
                    (StatusCode::INTERNAL_SERVER_ERROR, "Internal error", None)
                }
            },
        };

        let body = ErrorResponse {
            error: error.to_string(),
            detail,
        };

        (status, Json(body)).into_response()
    }
}
