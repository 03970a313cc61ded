//! Read-only handles to completed uploads.

use crate::temp::TempFileGuard;
use bytes::Bytes;
use futures::Stream;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::ReaderStream;

/// A completed upload.
#[derive(Debug)]
pub struct MaterializedUpload {
    /// Declared file name, `""` when the part had none.
    pub file_name: String,
    pub mime_type: String,
    /// Exact bytes written to the temp file.
    pub size: u64,
    pub stream: UploadStream,
}

/// Reader over an upload's temp file, starting at offset 0.
///
/// The temp file is unlinked when the reader reaches EOF, when it is
/// destroyed, or when it is dropped, whichever comes first.
#[derive(Debug)]
pub struct UploadStream {
    file: Option<fs::File>,
    guard: Option<TempFileGuard>,
}

impl UploadStream {
    pub(crate) async fn open(guard: TempFileGuard) -> io::Result<Self> {
        let file = fs::File::open(guard.path()).await?;
        Ok(Self {
            file: Some(file),
            guard: Some(guard),
        })
    }

    /// Path of the backing temp file while it still exists.
    pub fn path(&self) -> Option<&Path> {
        self.guard.as_ref().map(TempFileGuard::path)
    }

    /// Whether the backing file has been released.
    pub fn is_closed(&self) -> bool {
        self.guard.is_none()
    }

    /// Close the reader and unlink the temp file.
    pub async fn destroy(mut self) {
        self.file = None;
        if let Some(guard) = self.guard.take() {
            guard.remove().await;
        }
    }

    /// Adapt into a stream of byte chunks.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send {
        ReaderStream::new(self)
    }

    fn close(&mut self) {
        self.file = None;
        self.guard = None;
    }
}

impl AsyncRead for UploadStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let Some(file) = this.file.as_mut() else {
            return Poll::Ready(Ok(()));
        };

        let before = buf.filled().len();
        let wanted = buf.remaining() > 0;
        match Pin::new(file).poll_read(cx, buf) {
            Poll::Ready(Ok(())) if wanted && buf.filled().len() == before => {
                this.close();
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

/// One field's uploads: a single record when the field allows one file,
/// otherwise the admitted sequence in order.
#[derive(Debug)]
pub enum FileEntry {
    Single(MaterializedUpload),
    Multiple(Vec<MaterializedUpload>),
}

impl FileEntry {
    /// All uploads of the field, in admission order.
    pub fn uploads(&self) -> &[MaterializedUpload] {
        match self {
            Self::Single(upload) => std::slice::from_ref(upload),
            Self::Multiple(uploads) => uploads,
        }
    }

    pub fn into_uploads(self) -> Vec<MaterializedUpload> {
        match self {
            Self::Single(upload) => vec![upload],
            Self::Multiple(uploads) => uploads,
        }
    }

    pub fn as_single(&self) -> Option<&MaterializedUpload> {
        match self {
            Self::Single(upload) => Some(upload),
            Self::Multiple(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.uploads().len()
    }

    pub fn is_empty(&self) -> bool {
        self.uploads().is_empty()
    }
}

/// Completed uploads keyed by field name.
#[derive(Debug, Default)]
pub struct FileMap(BTreeMap<String, FileEntry>);

impl FileMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, field: String, entry: FileEntry) {
        self.0.insert(field, entry);
    }

    pub fn get(&self, field: &str) -> Option<&FileEntry> {
        self.0.get(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<FileEntry> {
        self.0.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FileEntry)> {
        self.0.iter()
    }

    /// Total number of uploads across all fields.
    pub fn upload_count(&self) -> usize {
        self.0.values().map(FileEntry::len).sum()
    }
}

impl IntoIterator for FileMap {
    type Item = (String, FileEntry);
    type IntoIter = std::collections::btree_map::IntoIter<String, FileEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Destroy every stream in `files`, unlinking the temp files.
pub async fn discard_files(files: FileMap) {
    for (_, entry) in files {
        for upload in entry.into_uploads() {
            upload.stream.destroy().await;
        }
    }
}
