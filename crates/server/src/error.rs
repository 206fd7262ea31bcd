//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("size mismatch: record has {existing} bytes, request declared {declared}")]
    SizeMismatch { existing: u64, declared: u64 },

    #[error("too many concurrent uploads: {0}")]
    TooManyUploads(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("chunk size mismatch at index {index}: expected {expected}, got {actual}")]
    ChunkSize {
        index: u32,
        expected: u64,
        actual: u64,
    },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata error: {0}")]
    Metadata(#[from] stowage_metadata::MetadataError),

    #[error("core error: {0}")]
    Core(#[from] stowage_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::SizeMismatch { .. } => "size_mismatch",
            Self::TooManyUploads(_) => "too_many_uploads",
            Self::QuotaExceeded(_) => "quota_exceeded",
            Self::ChunkSize { .. } => "chunk_size_mismatch",
            Self::Internal(_) => "internal_error",
            Self::Io(_) => "io_error",
            Self::Metadata(_) => "metadata_error",
            Self::Core(e) => match e {
                stowage_core::Error::InvalidChecksum(_) => "invalid_checksum",
                stowage_core::Error::ChecksumMismatch { .. } => "checksum_mismatch",
                stowage_core::Error::NotAnArchive => "not_an_archive",
                stowage_core::Error::InvalidChunkIndex { .. } => "invalid_chunk_index",
                stowage_core::Error::ChunkSizeMismatch { .. } => "chunk_size_mismatch",
                stowage_core::Error::InvalidSize(_) => "invalid_size",
                stowage_core::Error::Config(_) => "config_error",
            },
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) | Self::SizeMismatch { .. } => StatusCode::BAD_REQUEST,
            Self::TooManyUploads(_) | Self::QuotaExceeded(_) => StatusCode::CONFLICT,
            Self::ChunkSize { .. } => StatusCode::NOT_ACCEPTABLE,
            Self::Internal(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Metadata(stowage_metadata::MetadataError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Metadata(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Core(stowage_core::Error::ChunkSizeMismatch { .. }) => {
                StatusCode::NOT_ACCEPTABLE
            }
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<crate::staging::ReceiveError> for ApiError {
    fn from(e: crate::staging::ReceiveError) -> Self {
        match e {
            crate::staging::ReceiveError::TooLarge { .. } => Self::BadRequest(e.to_string()),
            crate::staging::ReceiveError::Io(io) => Self::Io(io),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::TooManyUploads("global".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::ChunkSize {
                index: 2,
                expected: 100,
                actual: 99
            }
            .status_code(),
            StatusCode::NOT_ACCEPTABLE
        );
        assert_eq!(
            ApiError::Core(stowage_core::Error::NotAnArchive).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Metadata(stowage_metadata::MetadataError::NotFound("x".into()))
                .status_code(),
            StatusCode::NOT_FOUND
        );
    }
}
