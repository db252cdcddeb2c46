//! Vidhub backend entry point

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vidhub::config::Config;
use vidhub::db::Database;
use vidhub::services::{SharedStorage, StorageClient};
use vidhub::{AppState, build_router, cors_layer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Tracing first so configuration fallbacks are logged
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vidhub=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Starting Vidhub backend");

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    ensure_database_dir(&config.database_url).await?;
    let db = Database::connect(&config.database_url).await?;
    db.sync_schema().await?;
    tracing::info!("Database connected");

    let storage: SharedStorage = Arc::new(StorageClient::new(
        config.storage_url.as_deref(),
        config.storage_key.clone(),
    )?);
    if config.storage_url.is_none() {
        tracing::warn!("STORAGE_URL is not set; replaced assets will not be deleted");
    }

    let state = AppState::new(db, config.auth.clone(), config.pagination, storage);
    let app = build_router(state).layer(cors_layer(config.cors_origin.as_deref())?);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.host, config.port))?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// SQLite creates the file but not its directory
async fn ensure_database_dir(url: &str) -> anyhow::Result<()> {
    let path = url.trim_start_matches("sqlite://").trim_start_matches("sqlite:");
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.starts_with(":memory:") {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
    }
    Ok(())
}
