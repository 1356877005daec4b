use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use crate::store::StoreSettings;

#[derive(Debug, Clone)]
pub struct Config {
    /// Remote document store. `None` runs the journal local-only.
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub frontend_url: String,

    /// Secret of the auth provider's session tokens. `None` disables sign-in.
    pub jwt_secret: Option<String>,

    pub backup_dir: PathBuf,
    pub save_debounce_ms: u64,
    pub recent_sync_limit: usize,
    pub audit_capacity: usize,
    pub error_capacity: usize,
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn parsed<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a number, got '{raw}'")),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: optional("DATABASE_URL"),
            host: optional("HOST").unwrap_or_else(|| "127.0.0.1".into()),
            port: parsed("PORT", 8080)?,
            frontend_url: optional("FRONTEND_URL")
                .unwrap_or_else(|| "http://localhost:3000".into()),

            jwt_secret: optional("AUTH_JWT_SECRET"),

            backup_dir: optional("BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/backup")),
            save_debounce_ms: parsed("SAVE_DEBOUNCE_MS", 1000)?,
            recent_sync_limit: parsed("RECENT_SYNC_LIMIT", 90)?,
            audit_capacity: parsed("AUDIT_CAPACITY", 1000)?,
            error_capacity: parsed("ERROR_CAPACITY", 100)?,
        })
    }

    /// Local-only defaults, used by tests.
    pub fn local() -> Self {
        Self {
            database_url: None,
            host: "127.0.0.1".into(),
            port: 8080,
            frontend_url: "http://localhost:3000".into(),
            jwt_secret: None,
            backup_dir: PathBuf::from("./data/backup"),
            save_debounce_ms: 1000,
            recent_sync_limit: 90,
            audit_capacity: 1000,
            error_capacity: 100,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            save_debounce: Duration::from_millis(self.save_debounce_ms),
            recent_sync_limit: self.recent_sync_limit,
            audit_capacity: self.audit_capacity,
            error_capacity: self.error_capacity,
        }
    }
}
