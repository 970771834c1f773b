//! Raw run file transfer at `/storage?run=<run>&file=<name>`.

use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
    routing::put,
};
use futures::TryStreamExt;
use runlog_storage::{sanitize_path, storage_location_for};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::manifest::{self, FileMeta};
use crate::registry;
use crate::state::AppState;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub fn routes() -> Router<AppState> {
    Router::new().route("/", put(store_file).get(retrieve_file))
}

#[derive(Debug, Deserialize)]
pub struct StorageParams {
    pub run: Option<String>,
    pub file: Option<String>,
}

impl StorageParams {
    fn require(&self) -> Result<(&str, &str), ApiError> {
        let run = self.run.as_deref().filter(|r| !r.is_empty());
        let file = self
            .file
            .as_deref()
            .filter(|f| !sanitize_path(f).is_empty());
        match (run, file) {
            (Some(run), Some(file)) => Ok((run, file)),
            _ => Err(ApiError::bad_request("Missing run or file")),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StoredFile {
    pub ok: bool,
    pub size: u64,
}

#[tracing::instrument(name = "PUT /storage", skip(state, headers, body))]
pub async fn store_file(
    State(state): State<AppState>,
    Query(params): Query<StorageParams>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<StoredFile>, ApiError> {
    let (run_id, file) = params.require()?;
    let location = storage_location_for(run_id, file);

    let size = state
        .blobs
        .put_stream(&location, body.into_data_stream())
        .await?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match registry::find_run_by_run_id(&state.db, run_id).await? {
        Some(run) => {
            let meta = FileMeta {
                size: i64::try_from(size).ok(),
                digest: None,
                content_type,
            };
            manifest::upsert_run_file(&state.db, &run, file, meta).await?;
        }
        None => tracing::warn!(run_id, file, "Stored file for an unknown run"),
    }

    tracing::info!(run_id, file, size, "Stored run file");
    Ok(Json(StoredFile { ok: true, size }))
}

#[tracing::instrument(name = "GET /storage", skip(state))]
pub async fn retrieve_file(
    State(state): State<AppState>,
    Query(params): Query<StorageParams>,
) -> Result<Response, ApiError> {
    let (run_id, file) = params.require()?;
    let location = storage_location_for(run_id, file);

    let Some(blob) = state.blobs.open(&location).await? else {
        return Err(crate::not_found!("File {file} of run {run_id}"));
    };

    let recorded = match registry::find_run_by_run_id(&state.db, run_id).await? {
        Some(run) => manifest::find_run_file(&state.db, &run.id, file)
            .await?
            .and_then(|record| record.content_type),
        None => None,
    };
    let content_type = recorded
        .and_then(|ct| HeaderValue::from_str(&ct).ok())
        .unwrap_or(HeaderValue::from_static(DEFAULT_CONTENT_TYPE));

    let body = Body::from_stream(blob.stream.inspect_err(|e| {
        tracing::error!(error = %e, "Blob stream failed mid-response");
    }));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_LENGTH, HeaderValue::from(blob.size)),
        ],
        body,
    )
        .into_response())
}
