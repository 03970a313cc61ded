use bytes::Bytes;
use formstash_storage::{ByteSource, SourceError, TempFileStore, UploadStream, byte_source};
use std::path::Path;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

/// A temp store rooted at a fresh directory, so leak checks are exact.
pub fn temp_store() -> (TempDir, TempFileStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = TempFileStore::new(dir.path());
    (dir, store)
}

/// Number of entries currently in `dir`.
pub fn temp_file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

/// A source that yields `data` split into `chunk_size` pieces.
pub fn chunked_source(data: Bytes, chunk_size: usize) -> ByteSource {
    let chunks: Vec<Result<Bytes, SourceError>> = data
        .chunks(chunk_size.max(1))
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    byte_source(futures::stream::iter(chunks))
}

/// A source fed by hand; the stream ends when the sender is dropped.
pub fn gated_source() -> (mpsc::Sender<Result<Bytes, SourceError>>, ByteSource) {
    let (tx, mut rx) = mpsc::channel::<Result<Bytes, SourceError>>(4);
    let stream = async_stream::stream! {
        while let Some(item) = rx.recv().await {
            yield item;
        }
    };
    (tx, byte_source(stream))
}

/// Read an upload stream to EOF.
pub async fn read_all(mut stream: UploadStream) -> Vec<u8> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    buf
}

/// Generate deterministic test data using a seeded pseudo-random generator.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}
