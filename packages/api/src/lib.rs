use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
};
use middleware::api_key::api_key_middleware;
use state::AppState;
use tower::ServiceBuilder;
use tower_http::{
    compression::{CompressionLayer, DefaultPredicate, Predicate, predicate::NotForContentType},
    cors::CorsLayer,
    decompression::RequestDecompressionLayer,
};

pub mod entity;
pub mod middleware;
mod routes;
mod sql;

pub mod error;
pub mod ingest;
pub mod manifest;
pub mod query;
pub mod registry;
pub mod schema;
pub mod state;

#[cfg(test)]
mod test_support;

pub use axum;
pub use sea_orm;

pub fn construct_router(state: AppState) -> Router {
    // Client facing protocol endpoints register the caller's api key.
    let protocol = Router::new()
        .nest(
            "/graphql",
            routes::graphql::routes().route_layer(from_fn_with_state(
                state.clone(),
                routes::graphql::graphql_gate,
            )),
        )
        .nest(
            "/files",
            routes::file_stream::routes()
                .route_layer(from_fn_with_state(state.clone(), api_key_middleware)),
        );

    Router::new()
        .merge(protocol)
        .nest("/storage", routes::storage::routes())
        .nest("/api/projects", routes::projects::routes())
        .nest("/api/runs", routes::runs::routes())
        .nest("/health", routes::health::routes())
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(state.settings.max_body_bytes))
        .layer(CorsLayer::permissive())
        .layer(
            ServiceBuilder::new()
                .layer(RequestDecompressionLayer::new())
                .layer(CompressionLayer::new().compress_when(
                    DefaultPredicate::new().and(NotForContentType::new("application/octet-stream")),
                )),
        )
}
