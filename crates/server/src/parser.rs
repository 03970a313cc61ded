//! `multer`-backed parser driver.
//!
//! The driver owns the request body and turns it into [`PartEvent`]s while
//! applying the parser limits. It always reads the body to the end: once the
//! session stops listening, or a file stream is dropped, the remaining bytes
//! are read and discarded.

use crate::events::{EVENT_CHANNEL_CAPACITY, EventSource, PartEvent};
use bytes::Bytes;
use formstash_core::{BoxError, DEFAULT_MIME_TYPE, Limits, MultipartOptions};
use formstash_storage::{SourceError, byte_source};
use futures::Stream;
use multer::{Field, Multipart};
use tokio::sync::mpsc;
use tracing::debug;

/// File chunks buffered between the driver and the pipe task.
pub const FILE_CHUNK_CAPACITY: usize = 4;

/// Start a driver task over `body`.
pub fn spawn_parser<S, O, E>(body: S, boundary: String, options: MultipartOptions) -> EventSource
where
    S: Stream<Item = Result<O, E>> + Send + 'static,
    O: Into<Bytes> + 'static,
    E: Into<BoxError> + 'static,
{
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let multipart = Multipart::new(body, boundary);
    let driver = tokio::spawn(drive(multipart, tx, options));
    EventSource::new(rx, Some(driver))
}

/// Event sender that goes quiet once the session has detached.
struct EventSink {
    tx: Option<mpsc::Sender<PartEvent>>,
}

impl EventSink {
    async fn send(&mut self, event: PartEvent) {
        if let Some(tx) = &self.tx
            && tx.send(event).await.is_err()
        {
            debug!("session detached; discarding the rest of the body");
            self.tx = None;
        }
    }

    fn is_open(&self) -> bool {
        self.tx.is_some()
    }
}

#[derive(Default)]
struct Counts {
    parts: usize,
    fields: usize,
    files: usize,
}

fn exceeds(limit: Option<usize>, count: usize) -> bool {
    limit.is_some_and(|max| count > max)
}

async fn drive(mut multipart: Multipart<'static>, tx: mpsc::Sender<PartEvent>, options: MultipartOptions) {
    let limits = &options.limits;
    let mut sink = EventSink { tx: Some(tx) };
    let mut counts = Counts::default();
    let mut limited = false;

    loop {
        let mut field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => {
                if !limited {
                    sink.send(PartEvent::Finish).await;
                }
                return;
            }
            Err(e) => {
                sink.send(PartEvent::Error(Box::new(e))).await;
                return;
            }
        };

        if limited || !sink.is_open() {
            if !skip(&mut field).await {
                return;
            }
            continue;
        }

        counts.parts += 1;
        if exceeds(limits.parts, counts.parts) {
            limited = true;
            sink.send(PartEvent::PartsLimit).await;
            if !skip(&mut field).await {
                return;
            }
            continue;
        }

        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let is_file = file_name.is_some()
            || field
                .content_type()
                .is_some_and(|m| m.essence_str() == mime::APPLICATION_OCTET_STREAM.essence_str());

        let ok = if is_file {
            counts.files += 1;
            if exceeds(limits.files, counts.files) {
                limited = true;
                sink.send(PartEvent::FilesLimit).await;
                skip(&mut field).await
            } else {
                let file_name = if options.preserve_path {
                    file_name
                } else {
                    file_name.map(|n| basename(&n).to_string())
                };
                let mime_type = field
                    .content_type()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());
                forward_file(&mut sink, field, name, file_name, mime_type, limits).await
            }
        } else {
            counts.fields += 1;
            if exceeds(limits.fields, counts.fields) {
                limited = true;
                sink.send(PartEvent::FieldsLimit).await;
                skip(&mut field).await
            } else {
                read_field(&mut sink, field, name, limits).await
            }
        };

        if !ok {
            return;
        }
    }
}

/// Read and discard a part. Returns `false` if the body is broken.
async fn skip(field: &mut Field<'static>) -> bool {
    loop {
        match field.chunk().await {
            Ok(Some(_)) => {}
            Ok(None) => return true,
            Err(e) => {
                debug!(error = %e, "body error while skipping a part");
                return false;
            }
        }
    }
}

async fn read_field(
    sink: &mut EventSink,
    mut field: Field<'static>,
    name: String,
    limits: &Limits,
) -> bool {
    let max = limits.field_size();
    let mut value = Vec::new();
    let mut value_truncated = false;

    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                if value_truncated {
                    continue;
                }
                let room = max - value.len();
                if chunk.len() > room {
                    value.extend_from_slice(&chunk[..room]);
                    value_truncated = true;
                } else {
                    value.extend_from_slice(&chunk);
                }
            }
            Ok(None) => break,
            Err(e) => {
                sink.send(PartEvent::Error(Box::new(e))).await;
                return false;
            }
        }
    }

    let (name, name_truncated) = truncate(name, limits.field_name_size());
    sink.send(PartEvent::Field {
        name,
        value: String::from_utf8_lossy(&value).into_owned(),
        name_truncated,
        value_truncated,
    })
    .await;
    true
}

async fn forward_file(
    sink: &mut EventSink,
    mut field: Field<'static>,
    name: String,
    file_name: Option<String>,
    mime_type: String,
    limits: &Limits,
) -> bool {
    let (chunk_tx, mut chunk_rx) = mpsc::channel::<Result<Bytes, SourceError>>(FILE_CHUNK_CAPACITY);
    let stream = byte_source(async_stream::stream! {
        while let Some(item) = chunk_rx.recv().await {
            yield item;
        }
    });

    debug!(field = %name, file_name = ?file_name, mime_type = %mime_type, "file part");
    sink.send(PartEvent::File {
        name,
        stream,
        file_name,
        mime_type,
    })
    .await;

    let mut size = 0u64;
    let mut forwarding = true;
    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                if !forwarding {
                    continue;
                }
                size += chunk.len() as u64;
                let item = match limits.file_size {
                    Some(max) if size > max => {
                        forwarding = false;
                        Err(SourceError::SizeLimit)
                    }
                    _ => Ok(chunk),
                };
                if chunk_tx.send(item).await.is_err() {
                    forwarding = false;
                }
            }
            Ok(None) => return true,
            Err(e) => {
                let message = e.to_string();
                let _ = chunk_tx.send(Err(SourceError::Stream(message.into()))).await;
                sink.send(PartEvent::Error(Box::new(e))).await;
                return false;
            }
        }
    }
}

/// Cut `name` to at most `max` bytes on a char boundary.
fn truncate(mut name: String, max: usize) -> (String, bool) {
    if name.len() <= max {
        return (name, false);
    }
    let mut end = max;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name.truncate(end);
    (name, true)
}

/// Last path component of a submitted file name.
fn basename(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    const BOUNDARY: &str = "X-FORMSTASH-BOUNDARY";

    fn part(headers: &str, body: &str) -> String {
        format!("--{BOUNDARY}\r\n{headers}\r\n\r\n{body}\r\n")
    }

    fn body(parts: &[String]) -> Vec<u8> {
        let mut out = parts.concat();
        out.push_str(&format!("--{BOUNDARY}--\r\n"));
        out.into_bytes()
    }

    fn source_for(bytes: Vec<u8>, options: MultipartOptions) -> EventSource {
        let chunks: Vec<Result<Bytes, std::io::Error>> = bytes
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        spawn_parser(futures::stream::iter(chunks), BOUNDARY.to_string(), options)
    }

    async fn collect_file(stream: formstash_storage::ByteSource) -> (Vec<u8>, bool) {
        let mut data = Vec::new();
        let mut limited = false;
        let mut stream = stream;
        while let Some(item) = stream.next().await {
            match item {
                Ok(bytes) => data.extend_from_slice(&bytes),
                Err(SourceError::SizeLimit) => limited = true,
                Err(e) => panic!("unexpected stream error: {e}"),
            }
        }
        (data, limited)
    }

    #[tokio::test]
    async fn test_fields_and_files_in_order() {
        let bytes = body(&[
            part("Content-Disposition: form-data; name=\"title\"", "hello"),
            part(
                "Content-Disposition: form-data; name=\"doc\"; filename=\"dir/sub/notes.txt\"\r\nContent-Type: text/plain",
                "file body",
            ),
        ]);
        let mut source = source_for(bytes, MultipartOptions::default());

        match source.next_event().await {
            Some(PartEvent::Field { name, value, name_truncated, value_truncated }) => {
                assert_eq!(name, "title");
                assert_eq!(value, "hello");
                assert!(!name_truncated && !value_truncated);
            }
            other => panic!("expected field, got {other:?}"),
        }
        match source.next_event().await {
            Some(PartEvent::File { name, stream, file_name, mime_type }) => {
                assert_eq!(name, "doc");
                assert_eq!(file_name.as_deref(), Some("notes.txt"));
                assert_eq!(mime_type, "text/plain");
                assert_eq!(collect_file(stream).await, (b"file body".to_vec(), false));
            }
            other => panic!("expected file, got {other:?}"),
        }
        assert!(matches!(source.next_event().await, Some(PartEvent::Finish)));
        source.drained().await;
    }

    #[tokio::test]
    async fn test_octet_stream_without_filename_is_a_file() {
        let bytes = body(&[part(
            "Content-Disposition: form-data; name=\"blob\"\r\nContent-Type: application/octet-stream",
            "raw",
        )]);
        let mut source = source_for(bytes, MultipartOptions::default());

        match source.next_event().await {
            Some(PartEvent::File { file_name, mime_type, stream, .. }) => {
                assert_eq!(file_name, None);
                assert_eq!(mime_type, "application/octet-stream");
                drop(stream);
            }
            other => panic!("expected file, got {other:?}"),
        }
        assert!(matches!(source.next_event().await, Some(PartEvent::Finish)));
    }

    #[tokio::test]
    async fn test_preserve_path_and_default_mime() {
        let bytes = body(&[part(
            "Content-Disposition: form-data; name=\"doc\"; filename=\"C:\\\\docs\\\\a.txt\"",
            "x",
        )]);
        let options = MultipartOptions {
            preserve_path: true,
            ..MultipartOptions::default()
        };
        let mut source = source_for(bytes, options);

        match source.next_event().await {
            Some(PartEvent::File { file_name, mime_type, stream, .. }) => {
                assert!(file_name.unwrap().contains("docs"));
                assert_eq!(mime_type, DEFAULT_MIME_TYPE);
                drop(stream);
            }
            other => panic!("expected file, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_file_size_limit_signals_on_stream() {
        let bytes = body(&[part(
            "Content-Disposition: form-data; name=\"doc\"; filename=\"big.bin\"",
            "0123456789abcdef",
        )]);
        let options = MultipartOptions {
            limits: Limits {
                file_size: Some(10),
                ..Limits::default()
            },
            ..MultipartOptions::default()
        };
        let mut source = source_for(bytes, options);

        let Some(PartEvent::File { stream, .. }) = source.next_event().await else {
            panic!("expected file");
        };
        let (_, limited) = collect_file(stream).await;
        assert!(limited);
        assert!(matches!(source.next_event().await, Some(PartEvent::Finish)));
    }

    #[tokio::test]
    async fn test_field_value_and_name_truncation() {
        let long_name = "n".repeat(8);
        let bytes = body(&[part(
            &format!("Content-Disposition: form-data; name=\"{long_name}\""),
            "0123456789",
        )]);
        let options = MultipartOptions {
            limits: Limits {
                field_name_size: Some(4),
                field_size: Some(6),
                ..Limits::default()
            },
            ..MultipartOptions::default()
        };
        let mut source = source_for(bytes, options);

        match source.next_event().await {
            Some(PartEvent::Field { name, value, name_truncated, value_truncated }) => {
                assert_eq!(name, "nnnn");
                assert_eq!(value, "012345");
                assert!(name_truncated);
                assert!(value_truncated);
            }
            other => panic!("expected field, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_count_limits() {
        let parts = vec![
            part("Content-Disposition: form-data; name=\"a\"", "1"),
            part("Content-Disposition: form-data; name=\"b\"", "2"),
        ];

        let options = MultipartOptions {
            limits: Limits { fields: Some(1), ..Limits::default() },
            ..MultipartOptions::default()
        };
        let mut source = source_for(body(&parts), options);
        assert!(matches!(source.next_event().await, Some(PartEvent::Field { .. })));
        assert!(matches!(source.next_event().await, Some(PartEvent::FieldsLimit)));
        // Nothing follows a limit event.
        assert!(source.next_event().await.is_none());

        let options = MultipartOptions {
            limits: Limits { parts: Some(1), ..Limits::default() },
            ..MultipartOptions::default()
        };
        let mut source = source_for(body(&parts), options);
        assert!(matches!(source.next_event().await, Some(PartEvent::Field { .. })));
        assert!(matches!(source.next_event().await, Some(PartEvent::PartsLimit)));

        let files = vec![
            part("Content-Disposition: form-data; name=\"f\"; filename=\"1.txt\"", "1"),
            part("Content-Disposition: form-data; name=\"f\"; filename=\"2.txt\"", "2"),
        ];
        let options = MultipartOptions {
            limits: Limits { files: Some(1), ..Limits::default() },
            ..MultipartOptions::default()
        };
        let mut source = source_for(body(&files), options);
        let Some(PartEvent::File { stream, .. }) = source.next_event().await else {
            panic!("expected file");
        };
        drop(stream);
        assert!(matches!(source.next_event().await, Some(PartEvent::FilesLimit)));
    }

    #[tokio::test]
    async fn test_malformed_body_reports_error() {
        let bytes = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nunterminated"
        )
        .into_bytes();
        let mut source = source_for(bytes, MultipartOptions::default());

        let mut saw_error = false;
        while let Some(event) = source.next_event().await {
            if let PartEvent::Error(_) = event {
                saw_error = true;
            }
        }
        assert!(saw_error);
        source.drained().await;
    }

    #[tokio::test]
    async fn test_detached_session_still_drains_body() {
        let parts: Vec<String> = (0..20)
            .map(|i| {
                part(
                    &format!("Content-Disposition: form-data; name=\"f{i}\"; filename=\"{i}.bin\""),
                    &"z".repeat(1000),
                )
            })
            .collect();
        let mut source = source_for(body(&parts), MultipartOptions::default());

        let first = source.next_event().await;
        assert!(matches!(first, Some(PartEvent::File { .. })));
        drop(first);
        source.detach();

        tokio::time::timeout(std::time::Duration::from_secs(5), source.drained())
            .await
            .expect("driver did not finish the body");
    }

    #[test]
    fn test_basename_and_truncate() {
        assert_eq!(basename("a/b/c.txt"), "c.txt");
        assert_eq!(basename("C:\\x\\y.txt"), "y.txt");
        assert_eq!(basename("plain.txt"), "plain.txt");
        assert_eq!(truncate("héllo".to_string(), 2), ("h".to_string(), true));
        assert_eq!(truncate("abc".to_string(), 3), ("abc".to_string(), false));
    }
}
