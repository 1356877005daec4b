use std::sync::Arc;

use anyhow::Context;

use foodlog_api::auth::{session, AuthSession};
use foodlog_api::config::Config;
use foodlog_api::db::{self, PgRemoteStore};
use foodlog_api::storage::local::{FileStorage, LocalBackup};
use foodlog_api::storage::remote::RemoteStore;
use foodlog_api::store::FoodLogStore;
use foodlog_api::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "foodlog_api=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    let config = Arc::new(Config::from_env()?);

    // Remote store is optional; without it the journal runs local-only.
    let remote: Option<Arc<dyn RemoteStore>> = match config.database_url.as_deref() {
        Some(url) => {
            let pool = db::pool::create_pool(url)
                .await
                .context("Failed to connect to database")?;
            db::pool::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            tracing::info!("Database migrations applied");
            Some(Arc::new(PgRemoteStore::new(pool)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, running without remote sync");
            None
        }
    };

    let backup = LocalBackup::new(Arc::new(FileStorage::new(config.backup_dir.clone())));
    let store = FoodLogStore::new(backup, remote, config.store_settings());
    let session = AuthSession::new();
    let listener_task = session::spawn_listener(&session, store.clone());

    let state = AppState {
        store: store.clone(),
        config: config.clone(),
        session,
    };
    let app = foodlog_api::router(state);

    let addr = config.listen_addr();
    tracing::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    listener_task.abort();
    store.flush().await;
    tracing::info!("Pending saves flushed, shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
