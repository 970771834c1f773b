use std::sync::Arc;

use runlog_storage::RunStore;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tempfile::TempDir;

use crate::state::{AppState, Settings, State};

/// File backed SQLite database living as long as the value.
pub struct TestDb {
    pub db: DatabaseConnection,
    _dir: TempDir,
}

impl TestDb {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("runlog.db").display());
        let mut opt = ConnectOptions::new(url);
        opt.max_connections(4).sqlx_logging(false);
        let db = Database::connect(opt).await.unwrap();
        crate::schema::bootstrap(&db).await.unwrap();
        Self { db, _dir: dir }
    }

    pub fn state(&self) -> AppState {
        Arc::new(State::from_parts(
            Settings::default(),
            self.db.clone(),
            RunStore::memory(),
        ))
    }
}
