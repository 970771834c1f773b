use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::entity::runs;
use crate::error::ApiError;
use crate::query::{self, HistoryQuery};
use crate::{manifest, registry};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/{run_id}", get(get_run))
        .route("/{run_id}/history", get(get_history))
        .route("/{run_id}/files", get(get_files))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    pub keys: Option<String>,
    pub min_step: Option<i64>,
    pub max_step: Option<i64>,
}

async fn load_run(state: &AppState, run_id: &str) -> Result<runs::Model, ApiError> {
    registry::find_run_by_run_id(&state.db, run_id)
        .await?
        .ok_or_else(|| crate::not_found!("Run {run_id}"))
}

#[tracing::instrument(name = "GET /api/runs/{run_id}", skip(state))]
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let run = load_run(&state, &run_id).await?;
    let view = query::run_view(&state.db, run).await?;
    Ok(Json(json!({ "run": view })))
}

#[tracing::instrument(name = "GET /api/runs/{run_id}/history", skip(state))]
pub async fn get_history(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Value>, ApiError> {
    let run = load_run(&state, &run_id).await?;
    let history = HistoryQuery {
        keys: query::parse_keys(params.keys.as_deref()),
        min_step: params.min_step,
        max_step: params.max_step,
    };
    let points = query::history_points(&state.db, &run.id, &history).await?;
    Ok(Json(json!({ "points": points })))
}

#[tracing::instrument(name = "GET /api/runs/{run_id}/files", skip(state))]
pub async fn get_files(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let run = load_run(&state, &run_id).await?;
    let files = manifest::list_run_files(&state.db, &run.id).await?;
    Ok(Json(json!({ "files": files })))
}
