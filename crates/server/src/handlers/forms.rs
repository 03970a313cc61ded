//! Form routes: describe a route and submit a form to it.

use crate::error::{ApiError, ApiResult};
use crate::metrics::{
    BYTES_PERSISTED, DECODE_DURATION, DECODE_SESSIONS_COMPLETED, DECODE_SESSIONS_STARTED,
    UPLOADS_MATERIALIZED, record_decode_failure,
};
use crate::session::DecodedForm;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use formstash_core::{ExpectedFiles, FieldMap, FileDigest, Limits};
use formstash_storage::MaterializedUpload;
use futures::StreamExt;
use serde::Serialize;
use std::collections::BTreeMap;

/// Route description.
#[derive(Debug, Serialize)]
pub struct FormRouteResponse {
    pub route: String,
    pub expected_files: ExpectedFiles,
    /// File fields that must be present, in declaration order.
    pub required: Vec<String>,
    pub preserve_path: bool,
    pub limits: Limits,
}

/// Receipt for one stored file.
#[derive(Debug, Serialize)]
pub struct FileReceipt {
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    pub sha256: String,
}

/// Response to a decoded form.
#[derive(Debug, Serialize)]
pub struct FormReceipt {
    pub fields: FieldMap,
    pub files: BTreeMap<String, Vec<FileReceipt>>,
}

/// GET /v1/forms/{route}
pub async fn describe_form(
    State(state): State<AppState>,
    Path(route): Path<String>,
) -> ApiResult<Json<FormRouteResponse>> {
    let hook = state
        .hook(&route)
        .ok_or_else(|| ApiError::NotFound(format!("form route {route}")))?;

    Ok(Json(FormRouteResponse {
        expected_files: hook.expected_files().clone(),
        required: hook.required().to_vec(),
        preserve_path: hook.options().preserve_path,
        limits: hook.options().limits.clone(),
        route,
    }))
}

/// POST /v1/forms/{route}
///
/// Decodes the form, then reads every upload once to digest it. Reading an
/// upload to the end removes its temp file.
#[tracing::instrument(skip(state, req), fields(route = %route))]
pub async fn submit_form(
    State(state): State<AppState>,
    Path(route): Path<String>,
    req: Request,
) -> ApiResult<Json<FormReceipt>> {
    let hook = state
        .hook(&route)
        .ok_or_else(|| ApiError::NotFound(format!("form route {route}")))?
        .clone();

    DECODE_SESSIONS_STARTED.inc();
    let timer = DECODE_DURATION.start_timer();
    let result = hook.decode(req).await;
    timer.observe_duration();

    let DecodedForm { fields, files } = match result {
        Ok(form) => form,
        Err(e) => {
            record_decode_failure(&e);
            tracing::info!(error = %e, field = ?e.field(), "form rejected");
            return Err(e.into());
        }
    };
    DECODE_SESSIONS_COMPLETED.inc();

    let mut receipts = BTreeMap::new();
    for (field, entry) in files {
        let mut list = Vec::with_capacity(entry.len());
        for upload in entry.into_uploads() {
            list.push(digest_upload(upload).await?);
        }
        receipts.insert(field, list);
    }

    tracing::info!(
        fields = fields.len(),
        files = receipts.values().map(Vec::len).sum::<usize>(),
        "form accepted"
    );

    Ok(Json(FormReceipt {
        fields,
        files: receipts,
    }))
}

async fn digest_upload(upload: MaterializedUpload) -> ApiResult<FileReceipt> {
    let MaterializedUpload {
        file_name,
        mime_type,
        size,
        stream,
    } = upload;

    let mut hasher = FileDigest::hasher();
    let mut chunks = stream.into_stream();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|e| ApiError::Internal(format!("reading upload: {e}")))?;
        hasher.update(&chunk);
    }

    if hasher.size() != size {
        return Err(ApiError::Internal(format!(
            "upload size mismatch: recorded {size}, read {}",
            hasher.size()
        )));
    }

    UPLOADS_MATERIALIZED.inc();
    BYTES_PERSISTED.inc_by(size);

    Ok(FileReceipt {
        file_name,
        mime_type,
        size,
        sha256: hasher.finalize().to_hex(),
    })
}
