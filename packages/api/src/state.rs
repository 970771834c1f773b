use runlog_storage::RunStore;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use std::{sync::Arc, time::Duration};

pub type AppState = Arc<State>;

/// Protocol level defaults and server knobs handed over by the binary.
#[derive(Clone, Debug)]
pub struct Settings {
    pub default_entity: String,
    pub default_project: String,
    pub viewer_username: String,
    pub viewer_email: String,
    /// Base URL used for file upload/download links. Derived from the request
    /// headers when unset.
    pub public_base_url: Option<String>,
    pub max_body_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_entity: "default".to_string(),
            default_project: "uncategorized".to_string(),
            viewer_username: "runlog".to_string(),
            viewer_email: "runlog@local".to_string(),
            public_base_url: None,
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub sqlx_logging: bool,
}

pub struct State {
    pub settings: Settings,
    pub db: DatabaseConnection,
    pub blobs: RunStore,
}

impl State {
    /// Opens the process wide connection pool. Connections are checked out per
    /// query or transaction and returned to the pool when dropped.
    pub async fn new(
        settings: Settings,
        database: &DatabaseSettings,
        blobs: RunStore,
    ) -> Result<Self, DbErr> {
        let mut opt = ConnectOptions::new(database.url.to_owned());
        opt.max_connections(database.max_connections)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(8))
            .sqlx_logging(database.sqlx_logging);

        let db = Database::connect(opt).await?;
        tracing::info!(
            backend = ?db.get_database_backend(),
            max_connections = database.max_connections,
            "Connected to database"
        );

        Ok(Self::from_parts(settings, db, blobs))
    }

    pub fn from_parts(settings: Settings, db: DatabaseConnection, blobs: RunStore) -> Self {
        Self {
            settings,
            db,
            blobs,
        }
    }
}
