//! Error types for the core domain.
//!
//! Two families live here:
//! - [`Error`]: configuration problems detected while compiling routes
//!   (expected-files grammar, option values).
//! - [`DecodeError`]: the single terminal error of a decode session, wrapping
//!   either a classified [`MultipartError`], a parse-layer error surfaced
//!   verbatim, or an I/O failure on temporary storage.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Boxed error type used for errors coming from the parse layer.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Core configuration error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    InvalidExpectedFiles(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of every error the decoder reports to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadContentType,
    LimitFieldCount,
    LimitFieldName,
    LimitFieldValue,
    LimitFileCount,
    LimitFileSize,
    LimitPartCount,
    MissingFile,
    UnexpectedFile,
}

impl ErrorCode {
    /// Stable wire identifier, e.g. `LIMIT_FILE_COUNT`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadContentType => "BAD_CONTENT_TYPE",
            Self::LimitFieldCount => "LIMIT_FIELD_COUNT",
            Self::LimitFieldName => "LIMIT_FIELD_NAME",
            Self::LimitFieldValue => "LIMIT_FIELD_VALUE",
            Self::LimitFileCount => "LIMIT_FILE_COUNT",
            Self::LimitFileSize => "LIMIT_FILE_SIZE",
            Self::LimitPartCount => "LIMIT_PART_COUNT",
            Self::MissingFile => "MISSING_FILE",
            Self::UnexpectedFile => "UNEXPECTED_FILE",
        }
    }

    /// Human-readable message for the code.
    pub fn message(&self) -> &'static str {
        match self {
            Self::BadContentType => "Unsupported content type: ",
            Self::LimitFieldCount => "Too many fields",
            Self::LimitFieldName => "Field name too long",
            Self::LimitFieldValue => "Field value too long",
            Self::LimitFileCount => "Too many files",
            Self::LimitFileSize => "File too large",
            Self::LimitPartCount => "Too many parts",
            Self::MissingFile => "Expected file field missing",
            Self::UnexpectedFile => "Unexpected file field",
        }
    }

    /// HTTP status a transport layer should use for this code.
    pub fn status(&self) -> u16 {
        match self {
            Self::BadContentType => 415,
            _ => 400,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified decode failure: `{code, message, status, field?}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MultipartError {
    pub code: ErrorCode,
    pub message: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl MultipartError {
    /// Create an error that is not tied to a specific field.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.message().to_string(),
            status: code.status(),
            field: None,
        }
    }

    /// Create an error that names the field that triggered it.
    pub fn for_field(code: ErrorCode, field: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            ..Self::new(code)
        }
    }

    /// Create a `BAD_CONTENT_TYPE` error; the message carries the offending value.
    pub fn bad_content_type(content_type: &str) -> Self {
        let code = ErrorCode::BadContentType;
        Self {
            code,
            message: format!("{}{content_type}", code.message()),
            status: code.status(),
            field: None,
        }
    }
}

impl fmt::Display for MultipartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{} ({}, field {field:?})", self.message, self.code),
            None => write!(f, "{} ({})", self.message, self.code),
        }
    }
}

impl std::error::Error for MultipartError {}

/// Terminal error of a decode session.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Multipart(#[from] MultipartError),

    #[error("malformed multipart body: {0}")]
    Parse(#[source] BoxError),

    #[error("temporary storage error: {0}")]
    Io(#[from] std::io::Error),
}

impl DecodeError {
    /// Shorthand for a classified error naming a field.
    pub fn for_field(code: ErrorCode, field: impl Into<String>) -> Self {
        Self::Multipart(MultipartError::for_field(code, field))
    }

    /// The classification, if this error was classified.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Multipart(e) => Some(e.code),
            _ => None,
        }
    }

    /// The field that triggered the error, if known.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Multipart(e) => e.field.as_deref(),
            _ => None,
        }
    }

    /// The classified error, if any.
    pub fn as_multipart(&self) -> Option<&MultipartError> {
        match self {
            Self::Multipart(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ErrorCode> for DecodeError {
    fn from(code: ErrorCode) -> Self {
        Self::Multipart(MultipartError::new(code))
    }
}
