//! Core domain types for formstash.
//!
//! This crate defines the data model shared by the storage and server crates:
//! - Error classification for multipart decoding
//! - Expected-files grammar and the per-field limit policy
//! - Parser limits, decoder options and application configuration
//! - Bracket expansion of text fields
//! - File digests for upload receipts

pub mod config;
pub mod digest;
pub mod error;
pub mod fields;
pub mod policy;

pub use config::{AppConfig, Limits, MultipartOptions, RouteConfig, RouteOptions};
pub use digest::{FileDigest, FileHasher};
pub use error::{BoxError, DecodeError, Error, ErrorCode, MultipartError, Result};
pub use fields::FieldMap;
pub use policy::{ExpectedFiles, FileExpectation, LimitPolicy, UploadPolicy};

/// Default maximum field name size: 100 bytes
pub const DEFAULT_FIELD_NAME_SIZE: usize = 100;

/// Default maximum field value size: 1 MiB
pub const DEFAULT_FIELD_SIZE: usize = 1024 * 1024;

/// MIME type assumed for file parts that declare none.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";
