//! The event contract between a multipart parser and a decode session.
//!
//! A parser runs as its own task (the driver) and pushes [`PartEvent`]s into
//! a bounded channel. The session reads them through an [`EventSource`],
//! which also lets it detach early and wait for the driver to finish reading
//! the request body.

use formstash_core::BoxError;
use formstash_storage::ByteSource;
use std::fmt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Events per request buffered between the driver and the session.
pub const EVENT_CHANNEL_CAPACITY: usize = 16;

/// One parse event.
pub enum PartEvent {
    /// A non-file field.
    Field {
        name: String,
        value: String,
        name_truncated: bool,
        value_truncated: bool,
    },
    /// A file part. Dropping `stream` releases the driver to skip the rest.
    File {
        name: String,
        stream: ByteSource,
        file_name: Option<String>,
        mime_type: String,
    },
    /// Malformed input; the driver stops after sending it.
    Error(BoxError),
    FieldsLimit,
    FilesLimit,
    PartsLimit,
    /// The body ended cleanly.
    Finish,
}

impl fmt::Debug for PartEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field {
                name,
                value,
                name_truncated,
                value_truncated,
            } => f
                .debug_struct("Field")
                .field("name", name)
                .field("value_len", &value.len())
                .field("name_truncated", name_truncated)
                .field("value_truncated", value_truncated)
                .finish(),
            Self::File {
                name,
                file_name,
                mime_type,
                ..
            } => f
                .debug_struct("File")
                .field("name", name)
                .field("file_name", file_name)
                .field("mime_type", mime_type)
                .finish_non_exhaustive(),
            Self::Error(e) => f.debug_tuple("Error").field(&e.to_string()).finish(),
            Self::FieldsLimit => f.write_str("FieldsLimit"),
            Self::FilesLimit => f.write_str("FilesLimit"),
            Self::PartsLimit => f.write_str("PartsLimit"),
            Self::Finish => f.write_str("Finish"),
        }
    }
}

/// Receiving end of a parser.
pub struct EventSource {
    events: Option<mpsc::Receiver<PartEvent>>,
    driver: Option<JoinHandle<()>>,
}

impl EventSource {
    pub fn new(events: mpsc::Receiver<PartEvent>, driver: Option<JoinHandle<()>>) -> Self {
        Self {
            events: Some(events),
            driver,
        }
    }

    /// A source fed by hand, with no driver task behind it.
    pub fn channel(capacity: usize) -> (mpsc::Sender<PartEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx, None))
    }

    /// Next event, or `None` once the parser is gone or the source detached.
    pub async fn next_event(&mut self) -> Option<PartEvent> {
        match self.events.as_mut() {
            Some(events) => events.recv().await,
            None => None,
        }
    }

    /// Stop listening. Buffered and future events are dropped, and the
    /// driver goes on discarding the rest of the body.
    pub fn detach(&mut self) {
        self.events = None;
    }

    pub fn is_detached(&self) -> bool {
        self.events.is_none()
    }

    /// Wait until the driver has finished reading the request body.
    pub async fn drained(&mut self) {
        if let Some(driver) = self.driver.take()
            && let Err(e) = driver.await
        {
            tracing::warn!(error = %e, "multipart parser task failed");
        }
    }
}
