//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use formstash_core::DecodeError;
use formstash_storage::StorageError;
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Form field that triggered the error, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Internal(_) => "internal_error",
            Self::Decode(e) => match e {
                DecodeError::Multipart(e) => e.code.as_str(),
                DecodeError::Parse(_) => "malformed_multipart",
                DecodeError::Io(_) => "storage_error",
            },
            Self::Storage(_) => "storage_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Decode(e) => match e {
                DecodeError::Multipart(e) => {
                    StatusCode::from_u16(e.status).unwrap_or(StatusCode::BAD_REQUEST)
                }
                DecodeError::Parse(_) => StatusCode::BAD_REQUEST,
                DecodeError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn field(&self) -> Option<String> {
        match self {
            Self::Decode(e) => e.field().map(str::to_string),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::Decode(DecodeError::Multipart(e)) => e.message.clone(),
            _ => self.to_string(),
        };
        let body = ErrorResponse {
            code: self.code().to_string(),
            message,
            field: self.field(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use formstash_core::{ErrorCode, MultipartError};

    #[test]
    fn test_decode_error_mapping() {
        let err = ApiError::from(DecodeError::for_field(ErrorCode::LimitFileCount, "file"));
        assert_eq!(err.code(), "LIMIT_FILE_COUNT");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.field().as_deref(), Some("file"));

        let err = ApiError::from(DecodeError::from(MultipartError::bad_content_type("text/plain")));
        assert_eq!(err.status_code(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let err = ApiError::from(DecodeError::Parse("unexpected end of form".into()));
        assert_eq!(err.code(), "malformed_multipart");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err = ApiError::from(DecodeError::Io(std::io::Error::other("disk full")));
        assert_eq!(err.code(), "storage_error");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
