use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::query;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_projects))
        .route("/{entity}/{project}/runs", get(list_runs))
}

#[derive(Debug, Deserialize)]
pub struct RunListParams {
    pub limit: Option<u64>,
}

#[tracing::instrument(name = "GET /api/projects", skip(state))]
pub async fn list_projects(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let projects = query::list_projects(&state.db).await?;
    Ok(Json(json!({ "projects": projects })))
}

#[tracing::instrument(name = "GET /api/projects/{entity}/{project}/runs", skip(state))]
pub async fn list_runs(
    State(state): State<AppState>,
    Path((entity, project)): Path<(String, String)>,
    Query(params): Query<RunListParams>,
) -> Result<Json<Value>, ApiError> {
    let limit = params.limit.unwrap_or(query::DEFAULT_RUN_LIMIT);
    let runs = query::list_runs(&state.db, &entity, &project, limit).await?;
    Ok(Json(json!({ "runs": runs })))
}
