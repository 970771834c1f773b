use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    routing::post,
};
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::ingest::{self, FileStreamRequest};
use crate::registry;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/{entity}/{project}/{run}/file_stream", post(file_stream))
}

#[tracing::instrument(name = "POST /files/{entity}/{project}/{run}/file_stream", skip(state, body))]
pub async fn file_stream(
    State(state): State<AppState>,
    Path((entity, project, run_id)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: FileStreamRequest = serde_json::from_slice(&body)?;
    let run = registry::find_or_create_run(&state.db, &entity, &project, &run_id).await?;

    ingest::apply_file_stream(&state.db, &run, request).await?;

    Ok(Json(json!({ "exitcode": null, "limits": {} })))
}
