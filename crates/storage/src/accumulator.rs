//! Session-scoped accumulation of file uploads.
//!
//! The accumulator admits file parts under a [`LimitPolicy`], spawns one pipe
//! task per admitted part into a [`JoinSet`] and keeps two counters:
//! `admitted` and `completed`. Parsing never waits on disk writes; the only
//! points that await them are [`UploadAccumulator::next_failure`] (which
//! settles completions and surfaces the first failed write) and
//! [`UploadAccumulator::materialize`] (the completion barrier).
//!
//! Teardown goes through [`UploadAccumulator::discard`], or through `Drop`
//! when the owner goes away without calling either exit.

use crate::materialized::{FileEntry, FileMap, MaterializedUpload, UploadStream};
use crate::record::{self, UploadRecord};
use crate::source::ByteSource;
use crate::temp::{TempFileStore, TempSession};
use formstash_core::{DecodeError, ErrorCode, LimitPolicy};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

type PipeResult = (usize, Result<u64, DecodeError>);

/// Collects the uploads of one decode session.
pub struct UploadAccumulator {
    policy: Arc<LimitPolicy>,
    session: TempSession,
    records: Vec<UploadRecord>,
    /// Record indices per field, in admission order.
    fields: BTreeMap<String, Vec<usize>>,
    pipes: JoinSet<PipeResult>,
    admitted: usize,
    completed: usize,
}

impl UploadAccumulator {
    pub fn new(policy: Arc<LimitPolicy>, store: &TempFileStore) -> Self {
        Self {
            policy,
            session: store.session(),
            records: Vec::new(),
            fields: BTreeMap::new(),
            pipes: JoinSet::new(),
            admitted: 0,
            completed: 0,
        }
    }

    pub fn policy(&self) -> &LimitPolicy {
        &self.policy
    }

    /// The process-unique number of this session.
    pub fn session_number(&self) -> u64 {
        self.session.number()
    }

    pub fn admitted(&self) -> usize {
        self.admitted
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Records admitted so far, in admission order.
    pub fn records(&self) -> &[UploadRecord] {
        &self.records
    }

    /// Admit one file part, or return why it was rejected.
    ///
    /// A rejected source is dropped here. An admitted one starts writing to
    /// its temp file immediately on a spawned task; write failures surface
    /// through [`Self::next_failure`] or [`Self::materialize`].
    pub fn admit(
        &mut self,
        field: &str,
        source: ByteSource,
        file_name: Option<String>,
        mime_type: String,
    ) -> Option<ErrorCode> {
        if let Some(code) = self.check_admission(field) {
            debug!(field, code = %code, "file rejected");
            return Some(code);
        }

        let id = self.records.len();
        let (temp, dest) = self.session.create_file();
        let field_name = field.to_string();
        let pipe = self
            .pipes
            .spawn(async move { (id, record::pipe(source, dest, field_name).await) });

        debug!(
            field,
            path = %temp.path().display(),
            "file admitted"
        );

        self.records.push(UploadRecord {
            field: field.to_string(),
            file_name: file_name.unwrap_or_default(),
            mime_type,
            temp,
            pipe,
            size: None,
        });
        self.fields.entry(field.to_string()).or_default().push(id);
        self.admitted += 1;
        None
    }

    fn check_admission(&self, field: &str) -> Option<ErrorCode> {
        if let LimitPolicy::Unlimited = *self.policy {
            return None;
        }
        let Some(max) = self.policy.max_for(field) else {
            return Some(ErrorCode::UnexpectedFile);
        };
        let count = self.fields.get(field).map_or(0, Vec::len);
        if max < 1 || count as i64 >= max {
            return Some(ErrorCode::LimitFileCount);
        }
        None
    }

    /// Wait for the next pipe task to finish.
    ///
    /// Returns `None` when no task is running, `Some(Ok(()))` after settling
    /// a completed write and `Some(Err(_))` for a failed one.
    async fn settle_next(&mut self) -> Option<Result<(), DecodeError>> {
        loop {
            match self.pipes.join_next().await? {
                Ok((id, Ok(size))) => {
                    if let Some(record) = self.records.get_mut(id) {
                        record.size = Some(size);
                    }
                    self.completed += 1;
                    return Some(Ok(()));
                }
                Ok((_, Err(err))) => return Some(Err(err)),
                Err(err) if err.is_cancelled() => continue,
                Err(err) => return Some(Err(DecodeError::Io(std::io::Error::other(err)))),
            }
        }
    }

    /// Resolve with the first failed write.
    ///
    /// Completed writes are settled along the way. Pending forever while
    /// nothing fails. Cancel-safe: dropping the future loses no completion.
    pub async fn next_failure(&mut self) -> DecodeError {
        loop {
            match self.settle_next().await {
                Some(Ok(())) => continue,
                Some(Err(err)) => return err,
                None => std::future::pending::<()>().await,
            }
        }
    }

    /// Wait until every admitted write has completed, then hand the uploads
    /// over as a [`FileMap`].
    ///
    /// On a failed write the records stay in place for [`Self::discard`].
    pub async fn materialize(&mut self) -> Result<FileMap, DecodeError> {
        while self.completed < self.admitted {
            match self.settle_next().await {
                Some(Ok(())) => {}
                Some(Err(err)) => return Err(err),
                None => break,
            }
        }

        let mut records: Vec<Option<UploadRecord>> =
            std::mem::take(&mut self.records).into_iter().map(Some).collect();
        let fields = std::mem::take(&mut self.fields);
        self.admitted = 0;
        self.completed = 0;

        let mut files = FileMap::new();
        for (field, ids) in fields {
            let mut uploads = Vec::with_capacity(ids.len());
            for id in ids {
                let Some(record) = records.get_mut(id).and_then(Option::take) else {
                    continue;
                };
                uploads.push(into_materialized(record).await?);
            }

            let entry = if self.policy.max_for(&field) == Some(1) && uploads.len() == 1 {
                FileEntry::Single(uploads.remove(0))
            } else {
                FileEntry::Multiple(uploads)
            };
            files.insert(field, entry);
        }

        Ok(files)
    }

    /// Tear down every admitted upload. Idempotent.
    ///
    /// Pipes are severed first, then each destination is allowed to close,
    /// then each temp file is unlinked.
    pub async fn discard(&mut self) {
        for record in &self.records {
            record.abort();
        }
        while self.pipes.join_next().await.is_some() {}

        for record in self.records.drain(..) {
            record.temp.remove().await;
        }
        self.fields.clear();
        self.admitted = 0;
        self.completed = 0;
    }
}

async fn into_materialized(record: UploadRecord) -> Result<MaterializedUpload, DecodeError> {
    let UploadRecord {
        file_name,
        mime_type,
        temp,
        size,
        ..
    } = record;
    let size = size.ok_or_else(|| {
        DecodeError::Io(std::io::Error::other("upload write did not complete"))
    })?;
    let stream = UploadStream::open(temp).await?;
    Ok(MaterializedUpload {
        file_name,
        mime_type,
        size,
        stream,
    })
}

impl Drop for UploadAccumulator {
    fn drop(&mut self) {
        if self.records.is_empty() {
            return;
        }

        let mut pipes = std::mem::take(&mut self.pipes);
        let records = std::mem::take(&mut self.records);
        pipes.abort_all();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    while pipes.join_next().await.is_some() {}
                    for record in records {
                        record.temp.remove().await;
                    }
                });
            }
            Err(_) => {
                warn!(
                    uploads = records.len(),
                    "upload accumulator dropped outside a runtime; unlinking synchronously"
                );
            }
        }
    }
}
