//! Decode sessions.
//!
//! A [`DecodeSession`] consumes the events of one request, routes fields into
//! a [`FieldMap`] and file parts into an [`UploadAccumulator`], and produces
//! exactly one terminal result. Every error exit detaches from the parser,
//! discards admitted uploads and waits for the request body to drain before
//! reporting.

use crate::events::{EventSource, PartEvent};
use formstash_core::{DecodeError, ErrorCode, FieldMap, LimitPolicy};
use formstash_storage::{FileMap, TempFileStore, UploadAccumulator, discard_files};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Lifecycle of a decode session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Parsing,
    Finalizing,
    Done,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Parsing => "parsing",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
        })
    }
}

/// A successfully decoded form.
#[derive(Debug)]
pub struct DecodedForm {
    pub fields: FieldMap,
    pub files: FileMap,
}

impl DecodedForm {
    /// Release every upload without reading it.
    pub async fn discard(self) {
        discard_files(self.files).await;
    }
}

enum Wake {
    Event(Option<PartEvent>),
    Failure(DecodeError),
}

enum Step {
    Continue,
    Finish,
}

pub struct DecodeSession {
    source: EventSource,
    uploads: UploadAccumulator,
    required: Arc<[String]>,
    field_name_size: usize,
    fields: FieldMap,
    state: SessionState,
}

impl DecodeSession {
    pub fn new(
        source: EventSource,
        policy: Arc<LimitPolicy>,
        required: Arc<[String]>,
        store: &TempFileStore,
        field_name_size: usize,
    ) -> Self {
        Self {
            source,
            uploads: UploadAccumulator::new(policy, store),
            required,
            field_name_size,
            fields: FieldMap::new(),
            state: SessionState::Parsing,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session to its single terminal result.
    pub async fn run(mut self) -> Result<DecodedForm, DecodeError> {
        let session = self.uploads.session_number();
        debug!(session, state = %self.state, "decode session started");

        loop {
            let wake = tokio::select! {
                event = self.source.next_event() => Wake::Event(event),
                failure = self.uploads.next_failure() => Wake::Failure(failure),
            };
            let step = match wake {
                Wake::Event(event) => self.on_event(event),
                Wake::Failure(err) => Err(err),
            };

            match step {
                Ok(Step::Continue) => {}
                Ok(Step::Finish) => return self.finish().await,
                Err(err) => return Err(self.fail(err).await),
            }
        }
    }

    fn on_event(&mut self, event: Option<PartEvent>) -> Result<Step, DecodeError> {
        let Some(event) = event else {
            return Err(DecodeError::Parse(
                "multipart stream ended before finish".into(),
            ));
        };

        match event {
            PartEvent::Field {
                name,
                value,
                name_truncated,
                value_truncated,
            } => {
                if name_truncated || name.len() > self.field_name_size {
                    return Err(DecodeError::for_field(ErrorCode::LimitFieldName, name));
                }
                if value_truncated {
                    return Err(DecodeError::for_field(ErrorCode::LimitFieldValue, name));
                }
                self.fields.append(&name, &value);
                Ok(Step::Continue)
            }
            PartEvent::File {
                name,
                stream,
                file_name,
                mime_type,
            } => {
                if name.len() > self.field_name_size {
                    drop(stream);
                    return Err(DecodeError::for_field(ErrorCode::LimitFieldName, name));
                }
                match self.uploads.admit(&name, stream, file_name, mime_type) {
                    None => Ok(Step::Continue),
                    Some(code) => Err(DecodeError::for_field(code, name)),
                }
            }
            PartEvent::FieldsLimit => Err(ErrorCode::LimitFieldCount.into()),
            PartEvent::FilesLimit => Err(ErrorCode::LimitFileCount.into()),
            PartEvent::PartsLimit => Err(ErrorCode::LimitPartCount.into()),
            PartEvent::Error(e) => Err(DecodeError::Parse(e)),
            PartEvent::Finish => Ok(Step::Finish),
        }
    }

    async fn fail(&mut self, err: DecodeError) -> DecodeError {
        debug!(
            session = self.uploads.session_number(),
            state = %self.state,
            admitted = self.uploads.admitted(),
            error = %err,
            "decode session failed"
        );
        self.source.detach();
        self.uploads.discard().await;
        self.source.drained().await;
        self.state = SessionState::Done;
        err
    }

    async fn finish(mut self) -> Result<DecodedForm, DecodeError> {
        self.state = SessionState::Finalizing;
        self.source.detach();
        debug!(
            session = self.uploads.session_number(),
            state = %self.state,
            admitted = self.uploads.admitted(),
            "waiting for uploads"
        );

        let files = match self.uploads.materialize().await {
            Ok(files) => files,
            Err(err) => return Err(self.fail(err).await),
        };

        if let Some(missing) = self.required.iter().find(|name| !files.contains(name)) {
            let err = DecodeError::for_field(ErrorCode::MissingFile, missing.clone());
            discard_files(files).await;
            self.source.drained().await;
            self.state = SessionState::Done;
            return Err(err);
        }

        self.source.drained().await;
        self.state = SessionState::Done;
        debug!(
            session = self.uploads.session_number(),
            state = %self.state,
            fields = self.fields.len(),
            files = files.upload_count(),
            "decode session complete"
        );

        Ok(DecodedForm {
            fields: std::mem::take(&mut self.fields),
            files,
        })
    }
}
