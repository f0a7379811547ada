mod api;
mod bulk;
mod config;
mod discovery;
mod error;
mod graph;
mod store;
mod store_manager;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::config::Config;
use crate::store::Store;
use crate::store_manager::StoreHandle;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cmdbd=info"))
        )
        .init();

    tracing::info!("Starting cmdbd");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/cmdb/cmdbd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    let store = Store::open_with(&config.store.db_path, config.store.busy_timeout())?
        .with_defaults(config.defaults.clone());
    tracing::info!("Opened database at {:?}", config.store.db_path);

    let initial_hash = store
        .inventory_hash()
        .context("Failed to compute initial inventory hash")?;
    tracing::info!("Initial inventory hash: {}", initial_hash);

    let (hash_tx, hash_rx) = watch::channel(initial_hash);

    let store_handle = StoreHandle::spawn(
        store,
        hash_tx,
        config.discovery.clone(),
        config.store.request_timeout(),
    );

    let app = api::routes::router(api::routes::AppState {
        store: store_handle.clone(),
        hash_rx,
    });

    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    let cancel = CancellationToken::new();
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");
    cancel.cancel();

    let _ = server_handle.await;

    // In-flight requests have drained; stop the store thread last
    if let Err(e) = store_handle.shutdown().await {
        tracing::error!("Failed to shutdown store: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
