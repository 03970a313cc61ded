//! Temporary on-disk accumulation of multipart file uploads.
//!
//! This crate provides:
//! - Unique temp file allocation per decode session, with unlink guards
//! - The upload accumulator: admission under a limit policy, concurrent
//!   pipe tasks, a completion barrier and exactly-once teardown
//! - Read handles over completed uploads that clean up after themselves

pub mod accumulator;
pub mod error;
pub mod materialized;
pub mod record;
pub mod source;
pub mod temp;

pub use accumulator::UploadAccumulator;
pub use error::{StorageError, StorageResult};
pub use materialized::{FileEntry, FileMap, MaterializedUpload, UploadStream, discard_files};
pub use record::UploadRecord;
pub use source::{ByteSource, SourceError, byte_source};
pub use temp::{TempFileGuard, TempFileStore, TempSession};
