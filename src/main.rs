use anyhow::Result;
use axum::{Router, extract::DefaultBodyLimit};
use services::{metadata_store::SqliteMetadataStore, object_store::DiskObjectStore};
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting image-share with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    prepare_sqlite_file(db_url)?;

    let metadata = SqliteMetadataStore::connect(db_url, 5).await?;
    metadata.migrate().await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize backends ---
    let objects = DiskObjectStore::new(cfg.storage_dir.clone(), cfg.public_base_url.clone());
    let state = state::AppState::new(Arc::new(objects), Arc::new(metadata), cfg.max_upload_bytes);

    // --- Build router ---
    let app: Router = routes::routes::routes()
        .layer(DefaultBodyLimit::max(cfg.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// SQLx will not create a missing database file; make sure it and its
/// directory exist. In-memory URLs are left alone.
fn prepare_sqlite_file(db_url: &str) -> Result<()> {
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    let db_path = db_path.split('?').next().unwrap_or(db_path);
    if db_path.is_empty() || db_path.starts_with(":memory:") {
        return Ok(());
    }
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    let db_path = Path::new(db_path);
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent)?;
        tracing::info!("Created missing directory {:?}", parent);
    }

    match fs::OpenOptions::new().create(true).append(true).open(db_path) {
        Ok(_) => tracing::debug!("Database file can be created/opened."),
        Err(e) => tracing::warn!("Failed to open database file {:?}: {}", db_path, e),
    }
    Ok(())
}
