//! Byte sources feeding admitted uploads.

use bytes::Bytes;
use formstash_core::BoxError;
use futures::Stream;
use std::pin::Pin;
use thiserror::Error;

/// Terminal item of a file part's byte stream other than a clean end.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The part exceeded the configured file size; the rest was discarded.
    #[error("file size limit reached")]
    SizeLimit,

    /// The parse layer failed while reading the part.
    #[error(transparent)]
    Stream(BoxError),
}

/// The byte stream of one file part.
///
/// Dropping a source releases its producer, which then discards the rest of
/// the part so the request body keeps draining.
pub type ByteSource = Pin<Box<dyn Stream<Item = Result<Bytes, SourceError>> + Send>>;

/// Box any compatible stream as a [`ByteSource`].
pub fn byte_source<S>(stream: S) -> ByteSource
where
    S: Stream<Item = Result<Bytes, SourceError>> + Send + 'static,
{
    Box::pin(stream)
}
