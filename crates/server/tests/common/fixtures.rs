//! Test fixtures: multipart bodies and scripted parse events.

use bytes::Bytes;
use formstash_server::PartEvent;
use formstash_storage::{ByteSource, SourceError, byte_source};
use std::path::Path;

pub const BOUNDARY: &str = "----formstash-test-boundary";

/// Builds `multipart/form-data` request bodies.
#[allow(dead_code)]
#[derive(Default)]
pub struct FormBuilder {
    body: Vec<u8>,
}

#[allow(dead_code)]
impl FormBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, value: &str) -> Self {
        self.push_headers(&format!("Content-Disposition: form-data; name=\"{name}\""));
        self.body.extend_from_slice(value.as_bytes());
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, content_type: &str, data: &[u8]) -> Self {
        self.push_headers(&format!(
            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
             Content-Type: {content_type}"
        ));
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// Header value announcing this body's boundary.
    pub fn content_type() -> String {
        format!("multipart/form-data; boundary={BOUNDARY}")
    }

    pub fn build(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        self.body
    }

    fn push_headers(&mut self, headers: &str) {
        self.body
            .extend_from_slice(format!("--{BOUNDARY}\r\n{headers}\r\n\r\n").as_bytes());
    }
}

/// Number of entries currently in `dir`.
#[allow(dead_code)]
pub fn temp_file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

/// A file source yielding `data` in 4-byte chunks.
#[allow(dead_code)]
pub fn bytes_source(data: &'static [u8]) -> ByteSource {
    let chunks: Vec<Result<Bytes, SourceError>> = data
        .chunks(4)
        .map(|c| Ok(Bytes::from_static(c)))
        .collect();
    byte_source(futures::stream::iter(chunks))
}

/// A scripted field event.
#[allow(dead_code)]
pub fn field_event(name: &str, value: &str) -> PartEvent {
    PartEvent::Field {
        name: name.to_string(),
        value: value.to_string(),
        name_truncated: false,
        value_truncated: false,
    }
}

/// A scripted file event.
#[allow(dead_code)]
pub fn file_event(name: &str, file_name: &str, stream: ByteSource) -> PartEvent {
    PartEvent::File {
        name: name.to_string(),
        stream,
        file_name: Some(file_name.to_string()),
        mime_type: "text/plain".to_string(),
    }
}
