use runlog_api::state::{DatabaseSettings, Settings};
use std::{env, path::PathBuf, str::FromStr};

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub storage_root: PathBuf,
    pub bootstrap_schema: bool,
    pub database: DatabaseSettings,
    pub settings: Settings,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

fn var(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name, raw)),
        None => Ok(default),
    }
}

fn flag(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match var(name).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(ConfigError::InvalidValue(name, v)),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Settings::default();

        let settings = Settings {
            default_entity: var("DEFAULT_ENTITY").unwrap_or(defaults.default_entity),
            default_project: var("DEFAULT_PROJECT").unwrap_or(defaults.default_project),
            viewer_username: var("VIEWER_USERNAME").unwrap_or(defaults.viewer_username),
            viewer_email: var("VIEWER_EMAIL").unwrap_or(defaults.viewer_email),
            public_base_url: var("PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string()),
            max_body_bytes: parsed("MAX_BODY_BYTES", defaults.max_body_bytes)?,
        };

        Ok(Config {
            port: parsed("PORT", 8080)?,
            storage_root: var("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./storage")),
            bootstrap_schema: flag("BOOTSTRAP_SCHEMA", true)?,
            database: DatabaseSettings {
                url: var("DATABASE_URL").ok_or(ConfigError::MissingVar("DATABASE_URL"))?,
                max_connections: parsed("DB_MAX_CONNECTIONS", 10)?,
                sqlx_logging: flag("DB_LOGGING", false)?,
            },
            settings,
        })
    }
}
