//! Liveness and database readiness.

use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use sea_orm::{ConnectionTrait, DbBackend};
use serde::Serialize;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(liveness))
        .route("/db", get(readiness))
}

#[derive(Debug, Serialize)]
pub struct Liveness {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Readiness {
    pub status: &'static str,
    pub backend: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtt_ms: Option<u64>,
}

fn backend_name(backend: DbBackend) -> &'static str {
    match backend {
        DbBackend::Sqlite => "sqlite",
        DbBackend::Postgres => "postgres",
        _ => "mysql",
    }
}

#[tracing::instrument(name = "GET /health")]
pub async fn liveness() -> Json<Liveness> {
    Json(Liveness {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Pings the database. An unreachable database answers 503 rather than an
/// error body so load balancers can read the status alone.
#[tracing::instrument(name = "GET /health/db", skip(state))]
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let backend = backend_name(state.db.get_database_backend());
    let started = Instant::now();
    match state.db.ping().await {
        Ok(()) => {
            let rtt_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            (
                StatusCode::OK,
                Json(Readiness {
                    status: "ok",
                    backend,
                    rtt_ms: Some(rtt_ms),
                }),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, backend, "Database ping failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(Readiness {
                    status: "unavailable",
                    backend,
                    rtt_ms: None,
                }),
            )
        }
    }
}
