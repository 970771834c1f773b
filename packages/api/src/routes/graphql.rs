//! `POST /graphql`: the subset of the tracking client's GraphQL surface that a
//! run needs, dispatched by operation name.

pub mod bucket;
pub mod operation;
pub mod run_files;

use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::post,
};
use chrono::Utc;
use sea_orm::{ActiveValue::Set, EntityTrait};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::entity::graphql_unknown_ops;
use crate::error::ApiError;
use crate::middleware::api_key::{Caller, resolve_caller};
use crate::state::AppState;
use operation::Operation;

pub const NOT_IMPLEMENTED: &str = "NOT_IMPLEMENTED";

pub fn routes() -> Router<AppState> {
    Router::new().route("/", post(graphql))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphqlRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub variables: Option<Value>,
    #[serde(default)]
    pub operation_name: Option<String>,
}

impl GraphqlRequest {
    pub fn query(&self) -> &str {
        self.query.as_deref().unwrap_or_default()
    }

    /// `variables`, with a missing or null value read as `{}`.
    pub fn variables(&self) -> Value {
        match &self.variables {
            Some(Value::Null) | None => json!({}),
            Some(variables) => variables.clone(),
        }
    }
}

/// Operation payload: `variables.input` when present, else `variables`.
pub fn input_of(variables: &Value) -> &Value {
    match variables.get("input") {
        Some(input) if input.is_object() => input,
        _ => variables,
    }
}

/// First non-empty string found under `keys`, searching `sources` in order.
pub fn pick_first(sources: &[&Value], keys: &[&str]) -> Option<String> {
    sources.iter().find_map(|source| {
        keys.iter().find_map(|key| {
            source
                .get(*key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
    })
}

/// Value under `key` unless absent or null.
pub fn present<'a>(source: &'a Value, key: &str) -> Option<&'a Value> {
    source.get(key).filter(|v| !v.is_null())
}

fn errors_envelope(status: StatusCode, message: &str, code: &str) -> Response {
    (
        status,
        Json(json!({
            "errors": [{ "message": message, "extensions": { "code": code } }]
        })),
    )
        .into_response()
}

/// Renders an [`ApiError`] in the GraphQL `errors` envelope.
pub(crate) fn error_response(err: ApiError) -> Response {
    let mut response = errors_envelope(err.status(), err.message(), err.code());
    if let Some(id) = err.report_id()
        && let Ok(value) = id.parse::<HeaderValue>()
    {
        response.headers_mut().insert("x-error-id", value);
    }
    response
}

/// Api key gate for `/graphql`. Failures use the GraphQL envelope.
pub async fn graphql_gate(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    match resolve_caller(&state.db, request.headers()).await {
        Ok(caller) => {
            request.extensions_mut().insert::<Caller>(caller);
            next.run(request).await
        }
        Err(err) => error_response(err),
    }
}

#[tracing::instrument(name = "POST /graphql", skip(state, caller, headers, body))]
pub async fn graphql(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request: GraphqlRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "Malformed GraphQL body");
            return errors_envelope(StatusCode::BAD_REQUEST, &e.to_string(), "BAD_REQUEST");
        }
    };

    let operation = Operation::resolve(request.operation_name.as_deref(), request.query());
    tracing::debug!(?operation, "Resolved GraphQL operation");

    match dispatch(&state, &caller, &headers, operation, &request).await {
        Ok(body) => Json(body).into_response(),
        Err(err) => error_response(err),
    }
}

async fn dispatch(
    state: &AppState,
    caller: &Caller,
    headers: &HeaderMap,
    operation: Operation,
    request: &GraphqlRequest,
) -> Result<Value, ApiError> {
    let variables = request.variables();

    let data = match operation {
        Operation::ServerCapabilities => json!({
            "probeServerCapabilities": {
                "recallTags": false,
                "useArtifact": false,
                "heartbeat": true,
                "storage": true,
                "directSync": true,
                "history": true,
                "gitOps": false
            }
        }),
        Operation::Viewer => viewer(state, caller),
        Operation::UpsertBucket => bucket::upsert_bucket(state, &variables).await?,
        Operation::CreateRunFiles => run_files::create_run_files(state, headers, &variables).await?,
        Operation::UpsertRun => bucket::upsert_run_documents(state, &variables).await?,
        Operation::Unknown => {
            record_unknown(state, caller, request.query(), variables).await?;
            return Ok(json!({
                "errors": [{
                    "message": NOT_IMPLEMENTED,
                    "extensions": { "code": NOT_IMPLEMENTED }
                }]
            }));
        }
    };

    Ok(json!({ "data": data }))
}

fn viewer(state: &AppState, caller: &Caller) -> Value {
    let settings = &state.settings;
    json!({
        "viewer": {
            "id": caller.api_key_id.as_deref().unwrap_or("viewer"),
            "username": settings.viewer_username,
            "email": settings.viewer_email,
            "entity": {
                "id": caller.api_key_id.as_deref().unwrap_or("entity"),
                "name": settings.default_entity
            }
        }
    })
}

async fn record_unknown(
    state: &AppState,
    caller: &Caller,
    query: &str,
    variables: Value,
) -> Result<(), ApiError> {
    let query_hash = blake3::hash(query.as_bytes()).to_hex().to_string();
    tracing::warn!(query_hash = %query_hash, "Unrecognized GraphQL operation");

    let row = graphql_unknown_ops::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        seen_at: Set(Utc::now().naive_utc()),
        api_key_id: Set(caller.api_key_id.clone()),
        query: Set(query.to_string()),
        variables: Set(variables),
        query_hash: Set(query_hash),
    };
    graphql_unknown_ops::Entity::insert(row)
        .exec_without_returning(&state.db)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_first_order() {
        let input = json!({"entity": "", "project": "vision"});
        let variables = json!({"entityName": "acme", "project": "other"});
        assert_eq!(
            pick_first(&[&input, &variables], &["entityName", "entity"]).as_deref(),
            Some("acme")
        );
        assert_eq!(
            pick_first(&[&input, &variables], &["projectName", "project"]).as_deref(),
            Some("vision")
        );
        assert_eq!(pick_first(&[&input], &["name"]), None);
    }

    #[test]
    fn test_input_of() {
        let nested = json!({"input": {"name": "a"}});
        assert_eq!(input_of(&nested), &json!({"name": "a"}));
        let flat = json!({"name": "b"});
        assert_eq!(input_of(&flat), &flat);
    }
}
