//! Admitted uploads and the task that writes each one to disk.

use crate::source::{ByteSource, SourceError};
use crate::temp::TempFileGuard;
use formstash_core::{DecodeError, ErrorCode};
use futures::StreamExt;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::task::AbortHandle;

/// One admitted file.
#[derive(Debug)]
pub struct UploadRecord {
    pub(crate) field: String,
    pub(crate) file_name: String,
    pub(crate) mime_type: String,
    pub(crate) temp: TempFileGuard,
    pub(crate) pipe: AbortHandle,
    /// Exact bytes written, set once the pipe task completes.
    pub(crate) size: Option<u64>,
}

impl UploadRecord {
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Sever the pipe. The source is dropped with the task.
    pub(crate) fn abort(&self) {
        self.pipe.abort();
    }
}

/// Copy `source` into `dest` chunk by chunk and report the byte count.
///
/// The next chunk is not pulled until the previous one has been written.
pub(crate) async fn pipe(
    mut source: ByteSource,
    dest: std::io::Result<std::fs::File>,
    field: String,
) -> Result<u64, DecodeError> {
    let mut file = fs::File::from_std(dest?);
    let mut written = 0u64;

    while let Some(chunk) = source.next().await {
        match chunk {
            Ok(bytes) => {
                file.write_all(&bytes).await?;
                written += bytes.len() as u64;
            }
            Err(SourceError::SizeLimit) => {
                return Err(DecodeError::for_field(ErrorCode::LimitFileSize, field));
            }
            Err(SourceError::Stream(err)) => return Err(DecodeError::Parse(err)),
        }
    }

    file.flush().await?;
    Ok(written)
}
