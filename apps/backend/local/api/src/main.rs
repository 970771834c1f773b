#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use runlog_api::{construct_router, schema, state::State};
use runlog_storage::RunStore;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting runlog server");

    let config = config::Config::from_env()?;
    tracing::info!(
        storage_root = %config.storage_root.display(),
        default_entity = %config.settings.default_entity,
        default_project = %config.settings.default_project,
        "Loaded configuration"
    );

    let blobs = RunStore::local(&config.storage_root)?;
    let state = State::new(config.settings.clone(), &config.database, blobs).await?;

    if config.bootstrap_schema {
        schema::bootstrap(&state.db).await?;
        tracing::info!("Database schema is up to date");
    }

    let app = construct_router(Arc::new(state));

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
