//! API error types.

use crate::assembler::AssemblyError;
use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Always `false`.
    pub success: bool,
    /// Human-readable error message.
    pub error: String,
    /// Error code for programmatic handling.
    pub code: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("fragment of {size} bytes exceeds limit of {max} bytes")]
    FragmentTooLarge { size: u64, max: u64 },

    #[error("invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error("storage error: {0}")]
    Storage(#[from] splice_storage::StorageError),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::FragmentTooLarge { .. } => "fragment_too_large",
            Self::Multipart(_) => "invalid_multipart",
            Self::Assembly(e) => match e {
                AssemblyError::Validation(_) => "validation_error",
                AssemblyError::WriteFailed(_) => "write_failed",
                AssemblyError::IncompleteUpload { .. } => "incomplete_upload",
                AssemblyError::AssemblyFailed(_) => "assembly_failed",
                AssemblyError::UploadFailed(_) => "upload_failed",
            },
            Self::Storage(_) => "storage_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::FragmentTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Multipart(e) => e.status(),
            Self::Assembly(e) => match e {
                AssemblyError::Validation(_) | AssemblyError::IncompleteUpload { .. } => {
                    StatusCode::BAD_REQUEST
                }
                AssemblyError::WriteFailed(_)
                | AssemblyError::AssemblyFailed(_)
                | AssemblyError::UploadFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
            code: self.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
